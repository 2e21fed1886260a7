//! MAVLink Command Translation
//!
//! Translates mission runner requests into MAVLink commands for the flight
//! controller.

use anyhow::Result;
use mavlink::ardupilotmega::{
    MavCmd, MavMessage, MavMissionType, COMMAND_LONG_DATA, MISSION_REQUEST_LIST_DATA,
};
use tracing::info;

use super::connection::FlightController;

/// Sends commands to the flight controller via MAVLink
#[derive(Clone)]
pub struct MavCommandSender {
    fc: FlightController,
    target_system: u8,
    target_component: u8,
}

impl MavCommandSender {
    pub fn new(fc: FlightController) -> Self {
        let target_system = fc.config().target_system;
        let target_component = fc.config().target_component;
        Self {
            fc,
            target_system,
            target_component,
        }
    }

    /// Start the uploaded mission at item `from`
    pub async fn start_mission(&self, from: u32) -> Result<()> {
        info!("[MAVLink] Starting mission at item {}", from);
        self.fc.send(self.mission_start(from)).await
    }

    /// Pause (`true`) or continue (`false`) the current mission
    pub async fn pause_continue(&self, pause: bool) -> Result<()> {
        info!("[MAVLink] Sending {} command", if pause { "PAUSE" } else { "CONTINUE" });
        self.fc.send(self.pause_or_continue(pause)).await
    }

    /// Set flight mode
    pub async fn set_mode(&self, mode: ArduPilotMode) -> Result<()> {
        info!("[MAVLink] Setting mode to {:?}", mode);
        self.fc.send(self.mode_command(mode)).await
    }

    /// Ask the autopilot how many mission items it holds; answered by MISSION_COUNT
    pub async fn request_mission_list(&self) -> Result<()> {
        let msg = MavMessage::MISSION_REQUEST_LIST(MISSION_REQUEST_LIST_DATA {
            target_system: self.target_system,
            target_component: self.target_component,
            mission_type: MavMissionType::MAV_MISSION_TYPE_MISSION,
        });
        self.fc.send(msg).await
    }

    fn mission_start(&self, from: u32) -> MavMessage {
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: self.target_system,
            target_component: self.target_component,
            command: MavCmd::MAV_CMD_MISSION_START,
            confirmation: 0,
            param1: from as f32, // First item
            param2: 0.0,         // Last item (0 = all)
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
        })
    }

    fn pause_or_continue(&self, pause: bool) -> MavMessage {
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: self.target_system,
            target_component: self.target_component,
            command: MavCmd::MAV_CMD_DO_PAUSE_CONTINUE,
            confirmation: 0,
            param1: if pause { 0.0 } else { 1.0 }, // 0 = pause, 1 = continue
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
        })
    }

    fn mode_command(&self, mode: ArduPilotMode) -> MavMessage {
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: self.target_system,
            target_component: self.target_component,
            command: MavCmd::MAV_CMD_DO_SET_MODE,
            confirmation: 0,
            param1: 1.0, // MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
            param2: mode as u32 as f32,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
        })
    }
}

/// ArduPilot Copter flight modes used by mission execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ArduPilotMode {
    Auto = 3,
    Loiter = 5,
    Rtl = 6,
    Land = 9,
}

impl ArduPilotMode {
    /// Decode a heartbeat `custom_mode`
    pub fn from_custom_mode(custom_mode: u32) -> Option<Self> {
        match custom_mode {
            3 => Some(Self::Auto),
            5 => Some(Self::Loiter),
            6 => Some(Self::Rtl),
            9 => Some(Self::Land),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::FcConfig;

    fn sender() -> (MavCommandSender, tokio::sync::mpsc::Receiver<MavMessage>) {
        let (fc, outbound) = FlightController::detached(FcConfig::default());
        (MavCommandSender::new(fc), outbound)
    }

    fn command_long(msg: MavMessage) -> COMMAND_LONG_DATA {
        match msg {
            MavMessage::COMMAND_LONG(data) => data,
            other => panic!("expected COMMAND_LONG, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mission_start_from_item() {
        let (sender, mut outbound) = sender();
        sender.start_mission(5).await.unwrap();

        let cmd = command_long(outbound.recv().await.unwrap());
        assert_eq!(cmd.command, MavCmd::MAV_CMD_MISSION_START);
        assert_eq!(cmd.param1, 5.0);
        assert_eq!(cmd.target_system, 1);
    }

    #[tokio::test]
    async fn test_pause_continue_params() {
        let (sender, mut outbound) = sender();
        sender.pause_continue(true).await.unwrap();
        sender.pause_continue(false).await.unwrap();

        assert_eq!(command_long(outbound.recv().await.unwrap()).param1, 0.0);
        assert_eq!(command_long(outbound.recv().await.unwrap()).param1, 1.0);
    }

    #[tokio::test]
    async fn test_mode_command() {
        let (sender, mut outbound) = sender();
        sender.set_mode(ArduPilotMode::Loiter).await.unwrap();

        let cmd = command_long(outbound.recv().await.unwrap());
        assert_eq!(cmd.command, MavCmd::MAV_CMD_DO_SET_MODE);
        assert_eq!(cmd.param2, 5.0);
    }

    #[tokio::test]
    async fn test_request_mission_list() {
        let (sender, mut outbound) = sender();
        sender.request_mission_list().await.unwrap();

        assert!(matches!(
            outbound.recv().await.unwrap(),
            MavMessage::MISSION_REQUEST_LIST(_)
        ));
    }

    #[test]
    fn test_mode_from_custom_mode() {
        assert_eq!(ArduPilotMode::from_custom_mode(3), Some(ArduPilotMode::Auto));
        assert_eq!(ArduPilotMode::from_custom_mode(6), Some(ArduPilotMode::Rtl));
        assert_eq!(ArduPilotMode::from_custom_mode(0), None);
    }
}
