//! Edge device configuration
//!
//! Defaults target a local SITL autopilot and a simulated runner. Every
//! field can be overridden through `FP_*` environment variables.

use crate::mavlink::{FcConfig, FcConnectionType};
use anyhow::{anyhow, bail, Context, Result};
use flightplan_shared::{MachineConfig, SimulatorConfig};
use std::time::Duration;

/// Which mission runner drives the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    /// Timer-driven, no vehicle needed
    Simulated,
    /// ArduPilot over MAVLink
    Mavlink,
}

/// Configuration for the edge device
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub device_id: String,
    pub runner: RunnerKind,
    pub fc: FcConfig,
    /// Project opened at startup
    pub project_uuid: String,
    pub simulator: SimulatorConfig,
    pub machine: MachineConfig,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            device_id: "edge-001".into(),
            runner: RunnerKind::Simulated,
            fc: FcConfig::default(),
            project_uuid: "default-project".into(),
            simulator: SimulatorConfig::default(),
            machine: MachineConfig::default(),
        }
    }
}

impl EdgeConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `FP_DEVICE_ID` (default: `edge-001`)
    /// - `FP_RUNNER`: `sim` or `mavlink` (default: `sim`)
    /// - `FP_FC_ADDRESS`: `udp:<addr>`, `tcp:<addr>` or `serial:<port>:<baud>`
    /// - `FP_PROJECT` (default: `default-project`)
    /// - `FP_SIM_ITEMS` (default: 10)
    /// - `FP_SIM_STEP_MS` (default: 1000)
    /// - `FP_REOPEN_AFTER_END`: `true` or `false` (default: `true`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(device_id) = lookup("FP_DEVICE_ID") {
            config.device_id = device_id;
        }
        if let Some(runner) = lookup("FP_RUNNER") {
            config.runner = parse_runner(&runner)?;
        }
        if let Some(address) = lookup("FP_FC_ADDRESS") {
            config.fc.connection = parse_fc_address(&address)?;
        }
        if let Some(project) = lookup("FP_PROJECT") {
            config.project_uuid = project;
        }
        if let Some(items) = lookup("FP_SIM_ITEMS") {
            config.simulator.mission_item_count = items
                .parse()
                .with_context(|| format!("Invalid FP_SIM_ITEMS: {}", items))?;
        }
        if let Some(step) = lookup("FP_SIM_STEP_MS") {
            let ms: u64 = step
                .parse()
                .with_context(|| format!("Invalid FP_SIM_STEP_MS: {}", step))?;
            config.simulator.step = Duration::from_millis(ms);
        }
        if let Some(reopen) = lookup("FP_REOPEN_AFTER_END") {
            config.machine.reopen_after_end = reopen
                .parse()
                .with_context(|| format!("Invalid FP_REOPEN_AFTER_END: {}", reopen))?;
        }

        Ok(config)
    }
}

fn parse_runner(value: &str) -> Result<RunnerKind> {
    match value.to_ascii_lowercase().as_str() {
        "sim" | "simulated" => Ok(RunnerKind::Simulated),
        "mavlink" => Ok(RunnerKind::Mavlink),
        other => bail!("Unknown runner '{}' (expected sim or mavlink)", other),
    }
}

fn parse_fc_address(value: &str) -> Result<FcConnectionType> {
    let (scheme, rest) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid FP_FC_ADDRESS '{}'", value))?;

    match scheme {
        "udp" => Ok(FcConnectionType::Udp {
            address: rest.into(),
        }),
        "tcp" => Ok(FcConnectionType::Tcp {
            address: rest.into(),
        }),
        "serial" => {
            let (port, baud) = rest
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("Serial address needs <port>:<baud>, got '{}'", rest))?;
            let baud = baud
                .parse()
                .with_context(|| format!("Invalid baud rate '{}'", baud))?;
            Ok(FcConnectionType::Serial {
                port: port.into(),
                baud,
            })
        }
        other => bail!("Unknown FC connection scheme '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EdgeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.device_id, "edge-001");
        assert_eq!(config.runner, RunnerKind::Simulated);
        assert_eq!(config.simulator.mission_item_count, 10);
        assert!(config.machine.reopen_after_end);
    }

    #[test]
    fn test_overrides() {
        let config = EdgeConfig::from_lookup(lookup(&[
            ("FP_RUNNER", "mavlink"),
            ("FP_FC_ADDRESS", "serial:/dev/ttyACM0:57600"),
            ("FP_PROJECT", "project-x"),
            ("FP_SIM_STEP_MS", "250"),
            ("FP_REOPEN_AFTER_END", "false"),
        ]))
        .unwrap();

        assert_eq!(config.runner, RunnerKind::Mavlink);
        assert_eq!(config.project_uuid, "project-x");
        assert_eq!(config.simulator.step, Duration::from_millis(250));
        assert!(!config.machine.reopen_after_end);
        match config.fc.connection {
            FcConnectionType::Serial { port, baud } => {
                assert_eq!(port, "/dev/ttyACM0");
                assert_eq!(baud, 57600);
            }
            other => panic!("expected serial, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values() {
        assert!(EdgeConfig::from_lookup(lookup(&[("FP_RUNNER", "px4")])).is_err());
        assert!(EdgeConfig::from_lookup(lookup(&[("FP_SIM_ITEMS", "many")])).is_err());
        assert!(EdgeConfig::from_lookup(lookup(&[("FP_FC_ADDRESS", "127.0.0.1")])).is_err());
        assert!(EdgeConfig::from_lookup(lookup(&[("FP_FC_ADDRESS", "serial:/dev/ttyACM0")])).is_err());
    }

    #[test]
    fn test_udp_address() {
        let connection = parse_fc_address("udp:0.0.0.0:14550").unwrap();
        assert!(matches!(connection, FcConnectionType::Udp { address } if address == "0.0.0.0:14550"));
    }
}
