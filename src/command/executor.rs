//! Command executor - dispatches operator commands to the state machine

use super::OperatorCommand;
use flightplan_shared::{
    FlightPlanStateMachine, FlightPlanStore, InMemoryFlightPlanStore, MachineState,
    StateMachineError,
};
use tracing::{info, warn};

/// Result of command execution
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Command accepted and completed successfully
    Completed { message: String },
    /// Command accepted but execution failed
    Failed { message: String },
    /// Command rejected (invalid state, unknown plan, etc.)
    Rejected { message: String },
}

impl CommandResult {
    fn from_machine(result: Result<(), StateMachineError>, done: impl Into<String>) -> Self {
        match result {
            Ok(()) => CommandResult::Completed {
                message: done.into(),
            },
            Err(e) if e.is_invalid_transition() => CommandResult::Rejected {
                message: e.to_string(),
            },
            Err(e) => CommandResult::Failed {
                message: e.to_string(),
            },
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CommandResult::Completed { message }
            | CommandResult::Failed { message }
            | CommandResult::Rejected { message } => message,
        }
    }
}

/// Executes operator commands against the flight plan state machine
pub struct CommandExecutor {
    machine: FlightPlanStateMachine,
    store: InMemoryFlightPlanStore,
    /// Project listed when no plan is open
    default_project: String,
}

impl CommandExecutor {
    pub fn new(
        machine: FlightPlanStateMachine,
        store: InMemoryFlightPlanStore,
        default_project: impl Into<String>,
    ) -> Self {
        Self {
            machine,
            store,
            default_project: default_project.into(),
        }
    }

    /// Execute a command and report the outcome
    pub async fn execute(&self, command: &OperatorCommand) -> CommandResult {
        info!("Executing command: {:?}", command);

        let result = match command {
            OperatorCommand::Open { uuid, resume } => self.handle_open(uuid, *resume).await,
            OperatorCommand::Start => self.handle_start().await,
            OperatorCommand::Resume => CommandResult::from_machine(self.machine.resume().await, "Resumed"),
            OperatorCommand::Pause => CommandResult::from_machine(self.machine.pause().await, "Paused"),
            OperatorCommand::Stop => CommandResult::from_machine(self.machine.stop().await, "Stopped"),
            OperatorCommand::Status => CommandResult::Completed {
                message: self.machine.state().to_string(),
            },
            OperatorCommand::List => self.handle_list().await,
            OperatorCommand::Help | OperatorCommand::Quit => CommandResult::Completed {
                message: OperatorCommand::USAGE.into(),
            },
        };

        match &result {
            CommandResult::Completed { message } => info!("  Command completed: {}", message),
            CommandResult::Failed { message } => warn!("  Command failed: {}", message),
            CommandResult::Rejected { message } => warn!("  Command rejected: {}", message),
        }
        result
    }

    async fn handle_open(&self, uuid: &str, resume: bool) -> CommandResult {
        let flight_plan = match self.store.flight_plan(uuid).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                return CommandResult::Rejected {
                    message: format!("Flight plan {} not found", uuid),
                }
            }
            Err(e) => {
                return CommandResult::Failed {
                    message: e.to_string(),
                }
            }
        };

        let result = self.machine.open(flight_plan, resume).await;
        let opened = self
            .machine
            .current_flight_plan()
            .map(|p| p.to_string())
            .unwrap_or_default();
        CommandResult::from_machine(result, format!("Opened {}", opened))
    }

    async fn handle_start(&self) -> CommandResult {
        let MachineState::Editable(flight_plan) = self.machine.state() else {
            return CommandResult::Rejected {
                message: format!("Nothing to start in state {}", self.machine.state().kind()),
            };
        };
        let result = self.machine.start(flight_plan).await;
        let started = self
            .machine
            .current_flight_plan()
            .map(|p| p.to_string())
            .unwrap_or_default();
        CommandResult::from_machine(result, format!("Started {}", started))
    }

    async fn handle_list(&self) -> CommandResult {
        let project = self
            .machine
            .current_flight_plan()
            .map(|p| p.project_uuid)
            .unwrap_or_else(|| self.default_project.clone());

        let lines: Vec<String> = self
            .store
            .project_plans(&project)
            .await
            .iter()
            .map(|p| p.to_string())
            .collect();
        CommandResult::Completed {
            message: format!("Project {} ({} plans)\n{}", project, lines.len(), lines.join("\n")),
        }
    }
}
