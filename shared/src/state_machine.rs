//! Flight Plan State Machine
//!
//! Defines the state nodes, the legal transitions between them and the
//! composite state value published to observers.

use crate::FlightPlanModel;
use std::fmt;

/// The five state nodes of a flight plan's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Machine (re)started, resolving which plan to edit
    Initializing,
    /// A plan is open for authoring
    Editable,
    /// Execution requested, vehicle not flying the mission yet
    StartedNotFlying,
    /// Mission runner is driving the vehicle
    StartedFlying,
    /// Execution finished, completed or stopped
    Ended,
}

impl StateKind {
    pub const ALL: [StateKind; 5] = [
        StateKind::Initializing,
        StateKind::Editable,
        StateKind::StartedNotFlying,
        StateKind::StartedFlying,
        StateKind::Ended,
    ];

    /// States this node may legally transition into
    pub fn valid_next_states(self) -> &'static [StateKind] {
        use StateKind::*;

        match self {
            Initializing => &[Editable],
            Editable => &[StartedNotFlying],
            StartedNotFlying => &[StartedFlying],
            StartedFlying => &[Ended, Initializing],
            Ended => &[Initializing],
        }
    }

    pub fn is_valid_next_state(self, next: StateKind) -> bool {
        self.valid_next_states().contains(&next)
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Initializing => "Initializing",
            StateKind::Editable => "Editable",
            StateKind::StartedNotFlying => "StartedNotFlying",
            StateKind::StartedFlying => "StartedFlying",
            StateKind::Ended => "Ended",
        };
        f.write_str(name)
    }
}

/// Check if a transition from one node to another is legal
pub fn is_valid_transition(from: StateKind, to: StateKind) -> bool {
    from.is_valid_next_state(to)
}

/// Result of a state transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(StateKind),
    /// Transition was invalid from current state, nothing changed
    Invalid { from: StateKind, to: StateKind },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success(_))
    }
}

/// Composite value published to state observers
#[derive(Debug, Clone, PartialEq)]
pub enum MachineState {
    /// Machine (re)started; no plan attached yet
    MachineStarted,
    Editable(FlightPlanModel),
    StartedNotFlying(FlightPlanModel),
    StartedFlying(FlightPlanModel),
    End(FlightPlanModel),
}

impl MachineState {
    /// The node this value was published from
    pub fn kind(&self) -> StateKind {
        match self {
            MachineState::MachineStarted => StateKind::Initializing,
            MachineState::Editable(_) => StateKind::Editable,
            MachineState::StartedNotFlying(_) => StateKind::StartedNotFlying,
            MachineState::StartedFlying(_) => StateKind::StartedFlying,
            MachineState::End(_) => StateKind::Ended,
        }
    }

    pub fn flight_plan(&self) -> Option<&FlightPlanModel> {
        match self {
            MachineState::MachineStarted => None,
            MachineState::Editable(plan)
            | MachineState::StartedNotFlying(plan)
            | MachineState::StartedFlying(plan)
            | MachineState::End(plan) => Some(plan),
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.flight_plan() {
            Some(plan) => write!(f, "{} [{}]", self.kind(), plan),
            None => write!(f, "{}", self.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StateKind::*;

    #[test]
    fn test_initializing_transitions() {
        assert!(Initializing.is_valid_next_state(Editable));

        assert!(!Initializing.is_valid_next_state(Initializing));
        assert!(!Initializing.is_valid_next_state(StartedNotFlying));
        assert!(!Initializing.is_valid_next_state(StartedFlying));
        assert!(!Initializing.is_valid_next_state(Ended));
    }

    #[test]
    fn test_editable_transitions() {
        assert!(Editable.is_valid_next_state(StartedNotFlying));

        assert!(!Editable.is_valid_next_state(Initializing));
        assert!(!Editable.is_valid_next_state(Editable));
        assert!(!Editable.is_valid_next_state(StartedFlying));
        assert!(!Editable.is_valid_next_state(Ended));
    }

    #[test]
    fn test_started_not_flying_transitions() {
        assert!(StartedNotFlying.is_valid_next_state(StartedFlying));

        assert!(!StartedNotFlying.is_valid_next_state(Initializing));
        assert!(!StartedNotFlying.is_valid_next_state(Editable));
        assert!(!StartedNotFlying.is_valid_next_state(StartedNotFlying));
        assert!(!StartedNotFlying.is_valid_next_state(Ended));
    }

    #[test]
    fn test_started_flying_transitions() {
        assert!(StartedFlying.is_valid_next_state(Ended));
        assert!(StartedFlying.is_valid_next_state(Initializing));

        assert!(!StartedFlying.is_valid_next_state(Editable));
        assert!(!StartedFlying.is_valid_next_state(StartedNotFlying));
        assert!(!StartedFlying.is_valid_next_state(StartedFlying));
    }

    #[test]
    fn test_ended_transitions() {
        assert!(Ended.is_valid_next_state(Initializing));

        assert!(!Ended.is_valid_next_state(Editable));
        assert!(!Ended.is_valid_next_state(StartedNotFlying));
        assert!(!Ended.is_valid_next_state(StartedFlying));
        assert!(!Ended.is_valid_next_state(Ended));
    }

    #[test]
    fn test_matrix_matches_table() {
        // Every pair not listed in the table must be rejected
        let legal = [
            (Initializing, Editable),
            (Editable, StartedNotFlying),
            (StartedNotFlying, StartedFlying),
            (StartedFlying, Ended),
            (StartedFlying, Initializing),
            (Ended, Initializing),
        ];

        for from in StateKind::ALL {
            for to in StateKind::ALL {
                assert_eq!(
                    is_valid_transition(from, to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_machine_state_kind() {
        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");
        assert_eq!(MachineState::MachineStarted.kind(), Initializing);
        assert_eq!(MachineState::Editable(plan.clone()).kind(), Editable);
        assert_eq!(MachineState::End(plan.clone()).kind(), Ended);
        assert_eq!(
            MachineState::StartedFlying(plan.clone()).flight_plan().map(|p| p.uuid.as_str()),
            Some("fp-1")
        );
        assert!(MachineState::MachineStarted.flight_plan().is_none());
    }
}
