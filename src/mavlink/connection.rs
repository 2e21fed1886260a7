//! Flight Controller Connection
//!
//! Manages the MAVLink link to an ArduPilot flight controller over serial,
//! UDP or TCP and reconnects when it drops.

use anyhow::{anyhow, Result};
use mavlink::ardupilotmega::MavMessage;
use mavlink::{MavConnection, MavHeader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

type SharedConnection = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

/// Connection type for flight controller
#[derive(Debug, Clone)]
pub enum FcConnectionType {
    /// Serial port connection (e.g., "/dev/ttyACM0")
    Serial { port: String, baud: u32 },
    /// UDP connection (e.g., "127.0.0.1:14550")
    Udp { address: String },
    /// TCP connection (e.g., "127.0.0.1:5760")
    Tcp { address: String },
}

impl FcConnectionType {
    /// Address string understood by `mavlink::connect`
    pub fn connection_string(&self) -> String {
        match self {
            FcConnectionType::Serial { port, baud } => format!("serial:{}:{}", port, baud),
            FcConnectionType::Udp { address } => format!("udpin:{}", address),
            FcConnectionType::Tcp { address } => format!("tcpin:{}", address),
        }
    }
}

impl Default for FcConnectionType {
    fn default() -> Self {
        // SITL default
        Self::Udp {
            address: "127.0.0.1:14550".into(),
        }
    }
}

/// Configuration for flight controller connection
#[derive(Debug, Clone)]
pub struct FcConfig {
    pub connection: FcConnectionType,
    /// System ID for this companion computer
    pub system_id: u8,
    /// Component ID for this companion computer
    pub component_id: u8,
    /// Target system ID (flight controller)
    pub target_system: u8,
    /// Target component ID (autopilot)
    pub target_component: u8,
    /// Wait between connection attempts
    pub reconnect_delay: Duration,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            connection: FcConnectionType::default(),
            system_id: 255,      // Companion computer
            component_id: 190,   // MAV_COMP_ID_ONBOARD_COMPUTER
            target_system: 1,    // Autopilot
            target_component: 1, // MAV_COMP_ID_AUTOPILOT1
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// Events from the flight controller
#[derive(Debug, Clone)]
pub enum FcEvent {
    Connected,
    Disconnected { reason: String },
    /// Heartbeat received from FC
    Heartbeat { base_mode: u8, custom_mode: u32 },
    Message(MavMessage),
}

pub type FcEventReceiver = mpsc::Receiver<FcEvent>;

/// Handle to the flight controller link
#[derive(Clone)]
pub struct FlightController {
    config: FcConfig,
    outbound_tx: mpsc::Sender<MavMessage>,
    connected: Arc<RwLock<bool>>,
}

impl FlightController {
    /// Start the connection loop; events arrive on the returned receiver
    pub fn new(config: FcConfig) -> (Self, FcEventReceiver) {
        let (outbound_tx, outbound_rx) = mpsc::channel::<MavMessage>(100);
        let (event_tx, event_rx) = mpsc::channel::<FcEvent>(100);
        let connected = Arc::new(RwLock::new(false));

        tokio::spawn(connection_loop(
            config.clone(),
            outbound_rx,
            event_tx,
            connected.clone(),
        ));

        (
            Self {
                config,
                outbound_tx,
                connected,
            },
            event_rx,
        )
    }

    /// Handle with no link behind it; queued messages land on the returned receiver
    #[cfg(test)]
    pub(crate) fn detached(config: FcConfig) -> (Self, mpsc::Receiver<MavMessage>) {
        let (outbound_tx, outbound_rx) = mpsc::channel::<MavMessage>(100);
        (
            Self {
                config,
                outbound_tx,
                connected: Arc::new(RwLock::new(false)),
            },
            outbound_rx,
        )
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Queue a MAVLink message for the flight controller
    pub async fn send(&self, msg: MavMessage) -> Result<()> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("FC connection closed"))
    }

    pub fn config(&self) -> &FcConfig {
        &self.config
    }
}

/// Connect, serve the link until it fails, then retry
async fn connection_loop(
    config: FcConfig,
    mut outbound_rx: mpsc::Receiver<MavMessage>,
    event_tx: mpsc::Sender<FcEvent>,
    connected: Arc<RwLock<bool>>,
) {
    let address = config.connection.connection_string();

    loop {
        info!("[MAVLink] Connecting to flight controller at {}", address);

        match mavlink::connect::<MavMessage>(&address) {
            Ok(conn) => {
                info!("[MAVLink] Connected to flight controller");
                *connected.write().await = true;
                let _ = event_tx.send(FcEvent::Connected).await;

                let conn: SharedConnection = Arc::from(conn);
                if let Err(e) = handle_connection(conn, &config, &mut outbound_rx, &event_tx).await {
                    error!("[MAVLink] Connection error: {}", e);
                    let _ = event_tx
                        .send(FcEvent::Disconnected {
                            reason: e.to_string(),
                        })
                        .await;
                }

                *connected.write().await = false;
            }
            Err(e) => {
                warn!("[MAVLink] Failed to connect: {}", e);
            }
        }

        if event_tx.is_closed() {
            debug!("[MAVLink] Event receiver dropped, closing link");
            return;
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Serve an established link until a read or write fails
async fn handle_connection(
    conn: SharedConnection,
    config: &FcConfig,
    outbound_rx: &mut mpsc::Receiver<MavMessage>,
    event_tx: &mpsc::Sender<FcEvent>,
) -> Result<()> {
    let header = MavHeader {
        system_id: config.system_id,
        component_id: config.component_id,
        sequence: 0,
    };

    // recv() blocks, so reads run on the blocking pool
    let reader_conn = conn.clone();
    let reader_tx = event_tx.clone();
    let mut reader = tokio::task::spawn_blocking(move || read_loop(reader_conn, reader_tx));

    loop {
        tokio::select! {
            msg = outbound_rx.recv() => match msg {
                Some(msg) => {
                    conn.send(&header, &msg)
                        .map_err(|e| anyhow!("Write error: {}", e))?;
                }
                None => return Err(anyhow!("Outbound channel closed")),
            },
            result = &mut reader => {
                return match result {
                    Ok(read_result) => read_result,
                    Err(e) => Err(anyhow!("Reader task failed: {}", e)),
                };
            }
        }
    }
}

fn read_loop(conn: SharedConnection, event_tx: mpsc::Sender<FcEvent>) -> Result<()> {
    loop {
        match conn.recv() {
            Ok((_header, msg)) => {
                if let MavMessage::HEARTBEAT(hb) = &msg {
                    let heartbeat = FcEvent::Heartbeat {
                        base_mode: hb.base_mode.bits(),
                        custom_mode: hb.custom_mode,
                    };
                    if event_tx.blocking_send(heartbeat).is_err() {
                        return Ok(());
                    }
                }
                if event_tx.blocking_send(FcEvent::Message(msg)).is_err() {
                    return Ok(());
                }
            }
            Err(mavlink::error::MessageReadError::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => return Err(anyhow!("Read error: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FcConfig::default();
        assert_eq!(config.system_id, 255);
        assert_eq!(config.target_system, 1);
        assert_eq!(config.connection.connection_string(), "udpin:127.0.0.1:14550");
    }

    #[test]
    fn test_connection_strings() {
        let serial = FcConnectionType::Serial {
            port: "/dev/ttyACM0".into(),
            baud: 57600,
        };
        assert_eq!(serial.connection_string(), "serial:/dev/ttyACM0:57600");

        let tcp = FcConnectionType::Tcp {
            address: "127.0.0.1:5760".into(),
        };
        assert_eq!(tcp.connection_string(), "tcpin:127.0.0.1:5760");
    }
}
