//! MAVLink Mission Runner
//!
//! Runs the mission already uploaded to an ArduPilot autopilot and turns
//! flight controller events into runner events for the state machine.

use async_trait::async_trait;
use flightplan_shared::{
    FlightPlanModel, InterruptReason, MissionRunner, RunnerError, RunnerEvent, RunnerEventKind,
    RunnerEventSender,
};
use mavlink::ardupilotmega::MavMessage;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::commands::{ArduPilotMode, MavCommandSender};
use super::connection::{FcEvent, FcEventReceiver, FlightController};

/// What the runner knows about the run in progress
#[derive(Debug, Default)]
struct RunProgress {
    /// Flight plan being flown
    active: Option<String>,
    /// Items on the autopilot for this run, 0 until MISSION_COUNT arrives
    mission_item_count: u32,
    /// Item the run started from
    start_item: u32,
    paused: bool,
    /// Vehicle reported AUTO since the run started
    auto_seen: bool,
}

impl RunProgress {
    fn start(&mut self, flight_plan_uuid: &str, from: u32) {
        self.active = Some(flight_plan_uuid.to_string());
        self.mission_item_count = 0;
        self.start_item = from;
        self.paused = false;
        self.auto_seen = false;
    }

    /// Translate a flight controller event for the active run
    fn on_fc_event(&mut self, event: &FcEvent) -> Option<RunnerEvent> {
        match event {
            FcEvent::Message(MavMessage::MISSION_COUNT(data)) => {
                self.mission_item_count = u32::from(data.count);
                debug!("[RUNNER] Autopilot holds {} mission items", self.mission_item_count);
                // Started at or past the last item: nothing left to fly
                if self.mission_item_count > 0 && self.start_item >= self.mission_item_count {
                    let uuid = self.active.take()?;
                    return Some(RunnerEvent::new(
                        uuid,
                        RunnerEventKind::Completed {
                            mission_item_count: self.mission_item_count,
                        },
                    ));
                }
                None
            }
            FcEvent::Message(MavMessage::MISSION_ITEM_REACHED(data)) => {
                let uuid = self.active.clone()?;
                let executed = u32::from(data.seq) + 1;
                if self.mission_item_count > 0 && executed >= self.mission_item_count {
                    self.active = None;
                    return Some(RunnerEvent::new(
                        uuid,
                        RunnerEventKind::Completed {
                            mission_item_count: self.mission_item_count,
                        },
                    ));
                }
                Some(RunnerEvent::new(
                    uuid,
                    RunnerEventKind::Progress {
                        last_mission_item_executed: executed,
                    },
                ))
            }
            FcEvent::Heartbeat { custom_mode, .. } => {
                self.active.as_ref()?;
                if ArduPilotMode::from_custom_mode(*custom_mode) == Some(ArduPilotMode::Auto) {
                    self.auto_seen = true;
                    return None;
                }
                if !self.auto_seen || self.paused {
                    return None;
                }
                // Mode changed under us: RC override, failsafe or another GCS
                self.interrupt(InterruptReason::Aborted)
            }
            FcEvent::Disconnected { .. } => self.interrupt(InterruptReason::LinkLost),
            FcEvent::Connected | FcEvent::Message(_) => None,
        }
    }

    fn interrupt(&mut self, reason: InterruptReason) -> Option<RunnerEvent> {
        let uuid = self.active.take()?;
        Some(RunnerEvent::new(uuid, RunnerEventKind::Interrupted { reason }))
    }
}

/// Drives an ArduPilot vehicle through its uploaded mission
pub struct MavlinkMissionRunner {
    link: FlightController,
    commands: MavCommandSender,
    progress: Arc<Mutex<RunProgress>>,
}

impl MavlinkMissionRunner {
    /// Create the runner and start translating `fc_events` onto `events`
    pub fn new(link: FlightController, fc_events: FcEventReceiver, events: RunnerEventSender) -> Self {
        let progress = Arc::new(Mutex::new(RunProgress::default()));
        tokio::spawn(pump_fc_events(fc_events, progress.clone(), events));

        Self {
            commands: MavCommandSender::new(link.clone()),
            link,
            progress,
        }
    }
}

fn link_error(e: anyhow::Error) -> RunnerError {
    RunnerError::LinkUnavailable(e.to_string())
}

#[async_trait]
impl MissionRunner for MavlinkMissionRunner {
    async fn play(&self, flight_plan: &FlightPlanModel, from: u32) -> Result<(), RunnerError> {
        if !self.link.is_connected().await {
            return Err(RunnerError::LinkUnavailable("flight controller not connected".into()));
        }

        info!("[RUNNER] Flying {} from item {}", flight_plan.uuid, from);
        self.progress.lock().await.start(&flight_plan.uuid, from);

        // The count check happens when MISSION_COUNT answers
        self.commands.request_mission_list().await.map_err(link_error)?;
        self.commands.start_mission(from).await.map_err(link_error)
    }

    async fn pause(&self) -> Result<(), RunnerError> {
        let mut progress = self.progress.lock().await;
        if progress.active.is_none() {
            return Err(RunnerError::NotRunning);
        }
        self.commands.pause_continue(true).await.map_err(link_error)?;
        progress.paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<(), RunnerError> {
        let mut progress = self.progress.lock().await;
        if progress.active.is_none() {
            return Err(RunnerError::NotRunning);
        }
        self.commands.pause_continue(false).await.map_err(link_error)?;
        progress.paused = false;
        Ok(())
    }

    async fn stop(&self) -> Result<(), RunnerError> {
        let Some(uuid) = self.progress.lock().await.active.take() else {
            return Ok(());
        };

        info!("[RUNNER] Stopping {}, switching to LOITER", uuid);
        self.commands
            .set_mode(ArduPilotMode::Loiter)
            .await
            .map_err(link_error)
    }

    async fn attach(&self, flight_plan: &FlightPlanModel, last_mission_item_executed: u32) -> Result<(), RunnerError> {
        info!(
            "[RUNNER] Attaching to {} at item {}",
            flight_plan.uuid, last_mission_item_executed
        );
        self.progress
            .lock()
            .await
            .start(&flight_plan.uuid, last_mission_item_executed);

        // Mission is already running on the autopilot; only learn its size
        self.commands.request_mission_list().await.map_err(link_error)
    }
}

async fn pump_fc_events(
    mut fc_events: FcEventReceiver,
    progress: Arc<Mutex<RunProgress>>,
    events: RunnerEventSender,
) {
    while let Some(fc_event) = fc_events.recv().await {
        match &fc_event {
            FcEvent::Connected => info!("[FC] Connected to flight controller"),
            FcEvent::Disconnected { reason } => warn!("[FC] Disconnected: {}", reason),
            FcEvent::Heartbeat {
                base_mode,
                custom_mode,
            } => debug!("[FC] Heartbeat: mode={} custom={}", base_mode, custom_mode),
            FcEvent::Message(_) => {}
        }

        let event = progress.lock().await.on_fc_event(&fc_event);
        if let Some(event) = event {
            if events.send(event).await.is_err() {
                debug!("[RUNNER] State machine gone, stopping event pump");
                return;
            }
        }
    }
    debug!("[FC] Flight controller channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::FcConfig;
    use flightplan_shared::runner_event_channel;
    use mavlink::ardupilotmega::{MISSION_COUNT_DATA, MISSION_ITEM_REACHED_DATA};
    use std::time::Duration;
    use tokio::time::timeout;

    fn mission_count(count: u16) -> FcEvent {
        FcEvent::Message(MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
            count,
            ..Default::default()
        }))
    }

    fn reached(seq: u16) -> FcEvent {
        FcEvent::Message(MavMessage::MISSION_ITEM_REACHED(MISSION_ITEM_REACHED_DATA { seq }))
    }

    fn heartbeat(custom_mode: u32) -> FcEvent {
        FcEvent::Heartbeat {
            base_mode: 0,
            custom_mode,
        }
    }

    fn flying(uuid: &str) -> RunProgress {
        let mut progress = RunProgress::default();
        progress.start(uuid, 0);
        progress
    }

    #[test]
    fn test_items_reached_become_progress_then_completion() {
        let mut progress = flying("fp-1");
        assert!(progress.on_fc_event(&mission_count(3)).is_none());

        let event = progress.on_fc_event(&reached(0)).unwrap();
        assert_eq!(event.flight_plan_uuid, "fp-1");
        assert_eq!(
            event.kind,
            RunnerEventKind::Progress {
                last_mission_item_executed: 1
            }
        );

        let event = progress.on_fc_event(&reached(2)).unwrap();
        assert_eq!(
            event.kind,
            RunnerEventKind::Completed {
                mission_item_count: 3
            }
        );
        assert!(progress.on_fc_event(&reached(2)).is_none());
    }

    #[test]
    fn test_new_run_forgets_previous_count() {
        let mut progress = flying("fp-1");
        progress.on_fc_event(&mission_count(3));

        progress.start("fp-2", 4);
        assert_eq!(progress.mission_item_count, 0);

        // Item 4 of a 5-item mission is still ahead
        assert!(progress.on_fc_event(&mission_count(5)).is_none());
        assert_eq!(progress.active.as_deref(), Some("fp-2"));
    }

    #[test]
    fn test_starting_past_last_item_completes() {
        let mut progress = RunProgress::default();
        progress.start("fp-1", 5);

        let event = progress.on_fc_event(&mission_count(5)).unwrap();
        assert_eq!(
            event.kind,
            RunnerEventKind::Completed {
                mission_item_count: 5
            }
        );
        assert!(progress.active.is_none());
    }

    #[tokio::test]
    async fn test_attach_requests_mission_size_only() {
        let (fc, mut outbound) = FlightController::detached(FcConfig::default());
        let (_fc_tx, fc_rx) = tokio::sync::mpsc::channel(8);
        let (events, _events_rx) = runner_event_channel();
        let runner = MavlinkMissionRunner::new(fc, fc_rx, events);
        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");

        runner.attach(&plan, 3).await.unwrap();

        assert!(matches!(
            outbound.recv().await.unwrap(),
            MavMessage::MISSION_REQUEST_LIST(_)
        ));
        assert!(outbound.try_recv().is_err());
        let progress = runner.progress.lock().await;
        assert_eq!(progress.active.as_deref(), Some("fp-1"));
        assert_eq!(progress.start_item, 3);
    }

    #[test]
    fn test_leaving_auto_aborts_run() {
        let mut progress = flying("fp-1");

        // Not in AUTO yet: mode changes before the mission starts are ignored
        assert!(progress.on_fc_event(&heartbeat(5)).is_none());
        assert!(progress.on_fc_event(&heartbeat(3)).is_none());

        let event = progress.on_fc_event(&heartbeat(6)).unwrap();
        assert_eq!(
            event.kind,
            RunnerEventKind::Interrupted {
                reason: InterruptReason::Aborted
            }
        );
        assert!(progress.active.is_none());
    }

    #[test]
    fn test_paused_run_may_leave_auto() {
        let mut progress = flying("fp-1");
        progress.on_fc_event(&heartbeat(3));
        progress.paused = true;

        assert!(progress.on_fc_event(&heartbeat(5)).is_none());
        assert!(progress.active.is_some());
    }

    #[test]
    fn test_link_loss_interrupts_active_run_only() {
        let mut idle = RunProgress::default();
        let lost = FcEvent::Disconnected {
            reason: "timeout".into(),
        };
        assert!(idle.on_fc_event(&lost).is_none());

        let mut progress = flying("fp-1");
        let event = progress.on_fc_event(&lost).unwrap();
        assert_eq!(
            event.kind,
            RunnerEventKind::Interrupted {
                reason: InterruptReason::LinkLost
            }
        );
    }

    #[tokio::test]
    async fn test_play_needs_link() {
        let (fc, _outbound) = FlightController::detached(FcConfig::default());
        let (_fc_tx, fc_rx) = tokio::sync::mpsc::channel(8);
        let (events, _events_rx) = runner_event_channel();
        let runner = MavlinkMissionRunner::new(fc, fc_rx, events);

        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");
        assert!(matches!(
            runner.play(&plan, 0).await,
            Err(RunnerError::LinkUnavailable(_))
        ));
        assert_eq!(runner.pause().await, Err(RunnerError::NotRunning));
        assert_eq!(runner.stop().await, Ok(()));
    }

    #[tokio::test]
    async fn test_pump_forwards_events() {
        let (fc, _outbound) = FlightController::detached(FcConfig::default());
        let (fc_tx, fc_rx) = tokio::sync::mpsc::channel(8);
        let (events, mut events_rx) = runner_event_channel();
        let runner = MavlinkMissionRunner::new(fc, fc_rx, events);
        runner.progress.lock().await.start("fp-1", 0);

        fc_tx.send(reached(1)).await.unwrap();

        let event = timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            RunnerEvent::new(
                "fp-1",
                RunnerEventKind::Progress {
                    last_mission_item_executed: 2
                }
            )
        );
    }
}
