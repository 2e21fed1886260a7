mod command;
mod config;
mod mavlink;

use command::{CommandExecutor, CommandResult, OperatorCommand};
use config::{EdgeConfig, RunnerKind};
use flightplan_shared::{
    runner_event_channel, FlightPlanStateMachine, InMemoryFlightPlanStore, MachineState,
    MissionRunner, SimulatedMissionRunner,
};
use mavlink::{FlightController, MavlinkMissionRunner};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = EdgeConfig::from_env()?;
    info!("Edge device starting: {}", config.device_id);
    info!("  Runner: {:?}", config.runner);
    info!("  Project: {}", config.project_uuid);

    let store = InMemoryFlightPlanStore::new();
    let (runner_events_tx, runner_events_rx) = runner_event_channel();

    let runner: Arc<dyn MissionRunner> = match config.runner {
        RunnerKind::Simulated => Arc::new(SimulatedMissionRunner::new(
            config.simulator.clone(),
            runner_events_tx,
        )),
        RunnerKind::Mavlink => {
            let (flight_controller, fc_events) = FlightController::new(config.fc.clone());
            info!(
                "Flight controller bridge initialized ({})",
                config.fc.connection.connection_string()
            );
            Arc::new(MavlinkMissionRunner::new(
                flight_controller,
                fc_events,
                runner_events_tx,
            ))
        }
    };

    let (machine, machine_handle) = FlightPlanStateMachine::spawn(
        Arc::new(store.clone()),
        runner,
        runner_events_rx,
        config.machine.clone(),
    );

    // Spawn state logger
    tokio::spawn(log_states(machine.subscribe()));

    // Open the project's plan so the operator lands on Editable
    let plan = store.create_flight_plan(&config.project_uuid, "Survey").await?;
    machine.open(plan, false).await?;

    let executor = CommandExecutor::new(machine, store, config.project_uuid.clone());
    println!("{}", OperatorCommand::USAGE);

    // Main operator loop
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<OperatorCommand>() {
            Ok(command) => command,
            Err(e) => {
                warn!("Invalid command: {}", e);
                println!("{} ({})", e, OperatorCommand::USAGE);
                continue;
            }
        };
        if command == OperatorCommand::Quit {
            break;
        }

        match executor.execute(&command).await {
            CommandResult::Completed { message } => println!("{}", message),
            CommandResult::Rejected { message } => println!("rejected: {}", message),
            CommandResult::Failed { message } => println!("failed: {}", message),
        }
    }

    info!("Edge device shutting down");
    drop(executor);
    if let Err(e) = machine_handle.await {
        error!("State machine task failed: {}", e);
    }
    Ok(())
}

/// Log every state the machine publishes
async fn log_states(mut states: watch::Receiver<MachineState>) {
    loop {
        let state = states.borrow_and_update().clone();
        info!("[MAIN] State: {}", state);
        if states.changed().await.is_err() {
            break;
        }
    }
}
