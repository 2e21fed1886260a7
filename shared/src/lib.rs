//! Flight Plan Shared Types
//!
//! This crate provides the flight plan model, the execution state machine
//! and the store/runner contracts it drives. The edge binary plugs concrete
//! stores and mission runners into it.

pub mod error;
pub mod manager;
pub mod model;
pub mod runner;
pub mod state_machine;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use error::{RunnerError, StateMachineError, StoreError};
pub use manager::{FlightPlanStateMachine, MachineConfig};
pub use model::{FlightPlanModel, PlanState};
pub use runner::{
    runner_event_channel, InterruptReason, MissionRunner, RunnerEvent, RunnerEventKind,
    RunnerEventReceiver, RunnerEventSender, SimulatedMissionRunner, SimulatorConfig,
};
pub use state_machine::{is_valid_transition, MachineState, StateKind, TransitionResult};
pub use store::{FlightPlanStore, InMemoryFlightPlanStore};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Channel sizes shared by the machine and its runners
pub mod defaults {
    /// Runner events buffered before a runner waits on the machine
    pub const RUNNER_EVENT_CAPACITY: usize = 64;

    /// Operator commands buffered before callers wait on the machine
    pub const COMMAND_CHANNEL_CAPACITY: usize = 32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms() {
        let before = now_ms();
        assert!(before > 0);
        assert!(now_ms() >= before);
    }

    #[test]
    fn test_machine_config_defaults() {
        let config = MachineConfig::default();
        assert!(config.reopen_after_end);
        assert_eq!(config.command_capacity, defaults::COMMAND_CHANNEL_CAPACITY);
    }
}
