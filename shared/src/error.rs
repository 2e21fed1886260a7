//! Error types for the state machine and its collaborators

use crate::StateKind;
use thiserror::Error;

/// Failures reported by a flight plan store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Flight plan {uuid} not found")]
    NotFound { uuid: String },
    /// Persisting would leave two editable plans in one project
    #[error("Project {project_uuid} already has editable flight plan {existing_uuid}")]
    EditableConflict {
        project_uuid: String,
        existing_uuid: String,
    },
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Failures reported by a mission runner
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunnerError {
    /// No mission item left to execute from the requested index
    #[error("No mission item left after item {from} (mission has {mission_item_count})")]
    MissionExhausted { from: u32, mission_item_count: u32 },
    #[error("No mission is running")]
    NotRunning,
    #[error("Vehicle link unavailable: {0}")]
    LinkUnavailable(String),
}

/// Failures of a state machine command
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    /// Command asked for a transition the current node does not allow
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: StateKind, to: StateKind },
    #[error("Flight plan store failure: {0}")]
    Store(#[from] StoreError),
    #[error("Mission runner failure: {0}")]
    Runner(#[from] RunnerError),
    /// The machine task is no longer running
    #[error("State machine stopped")]
    MachineStopped,
}

impl StateMachineError {
    /// Invalid transitions are local no-ops, not failures
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, StateMachineError::InvalidTransition { .. })
    }
}
