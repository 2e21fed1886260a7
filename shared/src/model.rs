//! Flight plan data model
//!
//! The state machine only reads and updates `state`, `last_mission_item_executed`
//! and `recovery_id`. The other fields are bookkeeping owned by the store.

use std::fmt;

/// Persisted status of a flight plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanState {
    /// Open for authoring; at most one per project
    #[default]
    Editable,
    /// An execution that was interrupted before its last item
    Stopped,
    /// An execution currently (or last known to be) running on the vehicle
    Flying,
    /// An execution that reached its last mission item
    Completed,
}

impl PlanState {
    /// True for every state produced by an execution attempt
    pub fn is_executed(&self) -> bool {
        !matches!(self, PlanState::Editable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanState::Editable => "editable",
            PlanState::Stopped => "stopped",
            PlanState::Flying => "flying",
            PlanState::Completed => "completed",
        }
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored drone mission plan, either the project's editable plan or one
/// execution of it
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlightPlanModel {
    /// Opaque identifier, immutable once created
    pub uuid: String,
    /// Groups all plans and executions of one mission project
    pub project_uuid: String,
    /// Persisted status
    pub state: PlanState,
    /// Number of mission items already executed, i.e. the index to resume from
    pub last_mission_item_executed: u32,
    /// Vehicle-side recovery token of an interrupted execution
    pub recovery_id: Option<String>,
    /// 1-based rank of this execution within its project
    pub execution_rank: Option<u32>,
    pub custom_title: String,
    pub media_count: u32,
    pub uploaded_media_count: u32,
    /// Milliseconds since Unix epoch
    pub last_update_ms: u64,
    pub thumbnail: Option<String>,
}

impl FlightPlanModel {
    /// Create a fresh editable plan
    pub fn new(
        uuid: impl Into<String>,
        project_uuid: impl Into<String>,
        custom_title: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            project_uuid: project_uuid.into(),
            custom_title: custom_title.into(),
            last_update_ms: crate::now_ms(),
            ..Default::default()
        }
    }

    /// Builder-style state override
    pub fn with_state(mut self, state: PlanState) -> Self {
        self.state = state;
        self
    }

    /// Builder-style progress override
    pub fn with_last_mission_item_executed(mut self, last: u32) -> Self {
        self.last_mission_item_executed = last;
        self
    }

    pub fn is_editable(&self) -> bool {
        self.state == PlanState::Editable
    }

    /// An interrupted execution that can continue from where it stopped
    pub fn is_resumable(&self) -> bool {
        matches!(self.state, PlanState::Flying | PlanState::Stopped)
            && self.last_mission_item_executed > 0
    }
}

impl fmt::Display for FlightPlanModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, project {}, item {})",
            self.uuid, self.state, self.project_uuid, self.last_mission_item_executed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_plan_is_editable() {
        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");
        assert_eq!(plan.state, PlanState::Editable);
        assert_eq!(plan.last_mission_item_executed, 0);
        assert!(plan.execution_rank.is_none());
        assert!(plan.last_update_ms > 0);
    }

    #[test]
    fn test_resumable() {
        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");
        assert!(!plan.is_resumable());

        let flying = plan.clone().with_state(PlanState::Flying);
        assert!(!flying.is_resumable());
        assert!(flying.clone().with_last_mission_item_executed(5).is_resumable());

        let stopped = plan.clone().with_state(PlanState::Stopped).with_last_mission_item_executed(2);
        assert!(stopped.is_resumable());

        let completed = plan.with_state(PlanState::Completed).with_last_mission_item_executed(10);
        assert!(!completed.is_resumable());
    }

    #[test]
    fn test_executed_states() {
        assert!(!PlanState::Editable.is_executed());
        assert!(PlanState::Stopped.is_executed());
        assert!(PlanState::Flying.is_executed());
        assert!(PlanState::Completed.is_executed());
        assert_eq!(PlanState::Flying.to_string(), "flying");
    }
}
