//! Mission runner contract
//!
//! A runner drives the vehicle through the mission items of one flight plan
//! and reports progress on an event channel consumed by the state machine.

use crate::{defaults, FlightPlanModel, RunnerError};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Why a run stopped before its last mission item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// Vehicle stopped responding
    LinkLost,
    /// Mission aborted from outside this process (RC, other GCS, failsafe)
    Aborted,
    /// Runner gave up waiting for the vehicle
    Timeout,
    /// Operator asked to stop
    UserStop,
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            InterruptReason::LinkLost => "link lost",
            InterruptReason::Aborted => "aborted",
            InterruptReason::Timeout => "timeout",
            InterruptReason::UserStop => "user stop",
        };
        f.write_str(reason)
    }
}

/// What happened on the vehicle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEventKind {
    /// Mission items executed so far
    Progress { last_mission_item_executed: u32 },
    /// Vehicle paused the mission on its own
    Paused,
    /// Vehicle resumed a paused mission on its own
    Resumed,
    /// Vehicle-side recovery token for this run
    RecoveryInfo { recovery_id: String },
    /// Last mission item reached
    Completed { mission_item_count: u32 },
    /// Run stopped before its last item
    Interrupted { reason: InterruptReason },
}

/// Event tagged with the flight plan it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerEvent {
    pub flight_plan_uuid: String,
    pub kind: RunnerEventKind,
}

impl RunnerEvent {
    pub fn new(flight_plan_uuid: impl Into<String>, kind: RunnerEventKind) -> Self {
        Self {
            flight_plan_uuid: flight_plan_uuid.into(),
            kind,
        }
    }
}

pub type RunnerEventSender = mpsc::Sender<RunnerEvent>;
pub type RunnerEventReceiver = mpsc::Receiver<RunnerEvent>;

/// Channel runners report on and the state machine listens to
pub fn runner_event_channel() -> (RunnerEventSender, RunnerEventReceiver) {
    mpsc::channel(defaults::RUNNER_EVENT_CAPACITY)
}

/// Drives the vehicle. Methods return once the request is handed to the
/// vehicle; outcomes arrive as `RunnerEvent`s.
#[async_trait]
pub trait MissionRunner: Send + Sync {
    /// Start the plan's mission at item `from` (0 = first item)
    async fn play(&self, flight_plan: &FlightPlanModel, from: u32) -> Result<(), RunnerError>;

    async fn pause(&self) -> Result<(), RunnerError>;

    /// Continue a paused mission
    async fn resume(&self) -> Result<(), RunnerError>;

    /// Cancel whatever is in flight. Must succeed when nothing runs.
    async fn stop(&self) -> Result<(), RunnerError>;

    /// Take over a mission the vehicle is already flying, with
    /// `last_mission_item_executed` items done
    async fn attach(&self, flight_plan: &FlightPlanModel, last_mission_item_executed: u32) -> Result<(), RunnerError>;
}

/// Configuration for the simulated runner
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Number of mission items every simulated plan has
    pub mission_item_count: u32,
    /// Time spent on each item
    pub step: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            mission_item_count: 10,
            step: Duration::from_millis(1000),
        }
    }
}

struct ActiveRun {
    task: JoinHandle<()>,
    paused: watch::Sender<bool>,
}

/// Runs missions on a timer instead of a vehicle
pub struct SimulatedMissionRunner {
    config: SimulatorConfig,
    events: RunnerEventSender,
    active: Mutex<Option<ActiveRun>>,
}

impl SimulatedMissionRunner {
    pub fn new(config: SimulatorConfig, events: RunnerEventSender) -> Self {
        Self {
            config,
            events,
            active: Mutex::new(None),
        }
    }
}

#[async_trait]
impl MissionRunner for SimulatedMissionRunner {
    async fn play(&self, flight_plan: &FlightPlanModel, from: u32) -> Result<(), RunnerError> {
        let count = self.config.mission_item_count;
        if from >= count {
            return Err(RunnerError::MissionExhausted {
                from,
                mission_item_count: count,
            });
        }

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.task.abort();
        }

        info!("[RUNNER] Simulating {} from item {}/{}", flight_plan.uuid, from, count);
        let (paused_tx, paused_rx) = watch::channel(false);
        let task = tokio::spawn(simulate(
            flight_plan.uuid.clone(),
            from,
            self.config.clone(),
            self.events.clone(),
            paused_rx,
        ));
        *active = Some(ActiveRun {
            task,
            paused: paused_tx,
        });
        Ok(())
    }

    async fn pause(&self) -> Result<(), RunnerError> {
        match self.active.lock().await.as_ref() {
            Some(run) if !run.task.is_finished() => {
                run.paused.send_replace(true);
                Ok(())
            }
            _ => Err(RunnerError::NotRunning),
        }
    }

    async fn resume(&self) -> Result<(), RunnerError> {
        match self.active.lock().await.as_ref() {
            Some(run) if !run.task.is_finished() => {
                run.paused.send_replace(false);
                Ok(())
            }
            _ => Err(RunnerError::NotRunning),
        }
    }

    async fn stop(&self) -> Result<(), RunnerError> {
        if let Some(run) = self.active.lock().await.take() {
            debug!("[RUNNER] Simulation cancelled");
            run.task.abort();
        }
        Ok(())
    }

    async fn attach(&self, flight_plan: &FlightPlanModel, last_mission_item_executed: u32) -> Result<(), RunnerError> {
        // The simulated vehicle keeps flying from where it was
        debug!("[RUNNER] Attaching to {} at item {}", flight_plan.uuid, last_mission_item_executed);
        self.play(flight_plan, last_mission_item_executed).await
    }
}

async fn simulate(
    flight_plan_uuid: String,
    from: u32,
    config: SimulatorConfig,
    events: RunnerEventSender,
    mut paused: watch::Receiver<bool>,
) {
    for item in from..config.mission_item_count {
        if paused.wait_for(|p| !*p).await.is_err() {
            return;
        }
        tokio::time::sleep(config.step).await;
        // A pause requested during the step holds the item back
        if paused.wait_for(|p| !*p).await.is_err() {
            return;
        }

        let event = RunnerEvent::new(
            flight_plan_uuid.clone(),
            RunnerEventKind::Progress {
                last_mission_item_executed: item + 1,
            },
        );
        if events.send(event).await.is_err() {
            return;
        }
    }

    let _ = events
        .send(RunnerEvent::new(
            flight_plan_uuid,
            RunnerEventKind::Completed {
                mission_item_count: config.mission_item_count,
            },
        ))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn fast_runner(items: u32) -> (SimulatedMissionRunner, RunnerEventReceiver) {
        let (tx, rx) = runner_event_channel();
        let config = SimulatorConfig {
            mission_item_count: items,
            step: Duration::from_millis(5),
        };
        (SimulatedMissionRunner::new(config, tx), rx)
    }

    async fn next(rx: &mut RunnerEventReceiver) -> RunnerEventKind {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("runner event timed out")
            .expect("runner channel closed")
            .kind
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let (runner, mut rx) = fast_runner(3);
        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");

        runner.play(&plan, 0).await.unwrap();

        for expected in 1..=3 {
            assert_eq!(
                next(&mut rx).await,
                RunnerEventKind::Progress {
                    last_mission_item_executed: expected
                }
            );
        }
        assert_eq!(
            next(&mut rx).await,
            RunnerEventKind::Completed {
                mission_item_count: 3
            }
        );
    }

    #[tokio::test]
    async fn test_play_from_item() {
        let (runner, mut rx) = fast_runner(4);
        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");

        runner.play(&plan, 3).await.unwrap();

        let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.flight_plan_uuid, "fp-1");
        assert_eq!(
            event.kind,
            RunnerEventKind::Progress {
                last_mission_item_executed: 4
            }
        );
        assert!(matches!(next(&mut rx).await, RunnerEventKind::Completed { .. }));
    }

    #[tokio::test]
    async fn test_nothing_left_to_play() {
        let (runner, _rx) = fast_runner(4);
        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");

        let err = runner.play(&plan, 4).await.unwrap_err();
        assert_eq!(
            err,
            RunnerError::MissionExhausted {
                from: 4,
                mission_item_count: 4
            }
        );
    }

    #[tokio::test]
    async fn test_pause_holds_progress() {
        let (runner, mut rx) = fast_runner(2);
        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");

        runner.play(&plan, 0).await.unwrap();
        runner.pause().await.unwrap();

        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

        runner.resume().await.unwrap();
        assert_eq!(
            next(&mut rx).await,
            RunnerEventKind::Progress {
                last_mission_item_executed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_attach_continues_from_item() {
        let (runner, mut rx) = fast_runner(3);
        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");

        runner.attach(&plan, 2).await.unwrap();

        assert_eq!(
            next(&mut rx).await,
            RunnerEventKind::Progress {
                last_mission_item_executed: 3
            }
        );
        assert!(matches!(next(&mut rx).await, RunnerEventKind::Completed { .. }));
    }

    #[tokio::test]
    async fn test_stop_cancels_run() {
        let (runner, mut rx) = fast_runner(100);
        let plan = FlightPlanModel::new("fp-1", "project-x", "Survey");

        runner.play(&plan, 0).await.unwrap();
        runner.stop().await.unwrap();

        // Drain whatever was sent before the abort, then expect silence
        tokio::time::sleep(Duration::from_millis(20)).await;
        while rx.try_recv().is_ok() {}
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

        assert_eq!(runner.pause().await.unwrap_err(), RunnerError::NotRunning);
        runner.stop().await.unwrap();
    }
}
