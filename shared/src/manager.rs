//! Flight plan state machine manager
//!
//! The manager is an actor: one tokio task owns the current state node and
//! processes operator commands and runner events one at a time. The public
//! handle only sends requests to it and observes the published state.

use crate::state_machine::{MachineState, StateKind, TransitionResult};
use crate::{
    defaults, now_ms, FlightPlanModel, FlightPlanStore, InterruptReason, MissionRunner, PlanState,
    RunnerEvent, RunnerEventKind, RunnerEventReceiver, StateMachineError, StoreError,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Reply = oneshot::Sender<Result<(), StateMachineError>>;

/// Manager configuration
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Re-open the project (Ended -> Initializing -> Editable) once a run ends
    pub reopen_after_end: bool,
    /// Pending operator commands before callers wait
    pub command_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            reopen_after_end: true,
            command_capacity: defaults::COMMAND_CHANNEL_CAPACITY,
        }
    }
}

/// Operator commands sent to the machine task
enum Request {
    Open {
        flight_plan: FlightPlanModel,
        resume: bool,
        reply: Reply,
    },
    Start {
        flight_plan: FlightPlanModel,
        reply: Reply,
    },
    Resume {
        reply: Reply,
    },
    Pause {
        reply: Reply,
    },
    Stop {
        reply: Reply,
    },
    FlightPlanWasEdited {
        flight_plan: FlightPlanModel,
        reply: Reply,
    },
    CatchUp {
        flight_plan: FlightPlanModel,
        last_mission_item_executed: u32,
        reply: Reply,
    },
}

/// Handle to a running flight plan state machine
#[derive(Clone)]
pub struct FlightPlanStateMachine {
    request_tx: mpsc::Sender<Request>,
    state_rx: watch::Receiver<MachineState>,
}

impl FlightPlanStateMachine {
    /// Spawn the machine task. It runs until every handle is dropped.
    pub fn spawn(
        store: Arc<dyn FlightPlanStore>,
        runner: Arc<dyn MissionRunner>,
        runner_events: RunnerEventReceiver,
        config: MachineConfig,
    ) -> (Self, JoinHandle<()>) {
        let (request_tx, request_rx) = mpsc::channel(config.command_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(MachineState::MachineStarted);

        let machine = Machine {
            store,
            runner,
            config,
            node: Node::Initializing,
            resumable: None,
            state_tx,
        };
        let handle = tokio::spawn(machine.run(request_rx, runner_events));

        (
            Self {
                request_tx,
                state_rx,
            },
            handle,
        )
    }

    /// Open a flight plan for editing. Executed plans are never edited in
    /// place: the project's editable plan is reused or a duplicate created.
    /// With `resume`, a resumable execution is remembered for `resume()`.
    pub async fn open(&self, flight_plan: FlightPlanModel, resume: bool) -> Result<(), StateMachineError> {
        self.request(|reply| Request::Open {
            flight_plan,
            resume,
            reply,
        })
        .await
    }

    /// Execute the (just edited) plan: Editable -> StartedNotFlying -> StartedFlying
    pub async fn start(&self, flight_plan: FlightPlanModel) -> Result<(), StateMachineError> {
        self.request(|reply| Request::Start { flight_plan, reply }).await
    }

    /// Continue the current or remembered execution from its last executed item
    pub async fn resume(&self) -> Result<(), StateMachineError> {
        self.request(|reply| Request::Resume { reply }).await
    }

    pub async fn pause(&self) -> Result<(), StateMachineError> {
        self.request(|reply| Request::Pause { reply }).await
    }

    /// Stop the run; the execution ends as `stopped` and stays resumable
    pub async fn stop(&self) -> Result<(), StateMachineError> {
        self.request(|reply| Request::Stop { reply }).await
    }

    /// The open editable plan was changed by its editor
    pub async fn flight_plan_was_edited(&self, flight_plan: FlightPlanModel) -> Result<(), StateMachineError> {
        self.request(|reply| Request::FlightPlanWasEdited { flight_plan, reply })
            .await
    }

    /// Attach to an execution the vehicle is already flying, e.g. after this
    /// process restarted mid-mission. No-op when that execution is the one
    /// being flown.
    pub async fn catch_up(
        &self,
        flight_plan: FlightPlanModel,
        last_mission_item_executed: u32,
    ) -> Result<(), StateMachineError> {
        self.request(|reply| Request::CatchUp {
            flight_plan,
            last_mission_item_executed,
            reply,
        })
        .await
    }

    /// Subscribe to the published state. The latest state is available
    /// immediately, later ones through `changed()`.
    pub fn subscribe(&self) -> watch::Receiver<MachineState> {
        self.state_rx.clone()
    }

    /// Latest published state
    pub fn state(&self) -> MachineState {
        self.state_rx.borrow().clone()
    }

    pub fn current_flight_plan(&self) -> Option<FlightPlanModel> {
        self.state_rx.borrow().flight_plan().cloned()
    }

    async fn request(&self, build: impl FnOnce(Reply) -> Request) -> Result<(), StateMachineError> {
        let (reply, response) = oneshot::channel();
        self.request_tx
            .send(build(reply))
            .await
            .map_err(|_| StateMachineError::MachineStopped)?;
        response.await.map_err(|_| StateMachineError::MachineStopped)?
    }
}

/// A running execution
struct Flying {
    flight_plan: FlightPlanModel,
    runner: Arc<dyn MissionRunner>,
    paused: bool,
}

/// Current state node and the data it needs
enum Node {
    Initializing,
    Editable(FlightPlanModel),
    StartedNotFlying(FlightPlanModel),
    StartedFlying(Flying),
    Ended(FlightPlanModel),
}

impl Node {
    fn kind(&self) -> StateKind {
        match self {
            Node::Initializing => StateKind::Initializing,
            Node::Editable(_) => StateKind::Editable,
            Node::StartedNotFlying(_) => StateKind::StartedNotFlying,
            Node::StartedFlying(_) => StateKind::StartedFlying,
            Node::Ended(_) => StateKind::Ended,
        }
    }

    fn published(&self) -> MachineState {
        match self {
            Node::Initializing => MachineState::MachineStarted,
            Node::Editable(plan) => MachineState::Editable(plan.clone()),
            Node::StartedNotFlying(plan) => MachineState::StartedNotFlying(plan.clone()),
            Node::StartedFlying(flying) => MachineState::StartedFlying(flying.flight_plan.clone()),
            Node::Ended(plan) => MachineState::End(plan.clone()),
        }
    }
}

/// State owned by the machine task
struct Machine {
    store: Arc<dyn FlightPlanStore>,
    runner: Arc<dyn MissionRunner>,
    config: MachineConfig,
    node: Node,
    /// Interrupted execution opened with `resume`
    resumable: Option<FlightPlanModel>,
    state_tx: watch::Sender<MachineState>,
}

impl Machine {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>, mut runner_events: RunnerEventReceiver) {
        info!("[FP] State machine started");

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                Some(event) = runner_events.recv() => {
                    self.handle_runner_event(event).await;
                }
            }
        }

        if matches!(self.node, Node::StartedFlying(_)) {
            self.cancel_runner().await;
        }
        info!("[FP] State machine stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Open {
                flight_plan,
                resume,
                reply,
            } => {
                let _ = reply.send(self.open(flight_plan, resume).await);
            }
            Request::Start { flight_plan, reply } => {
                let _ = reply.send(self.start(flight_plan).await);
            }
            Request::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            Request::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            Request::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            Request::FlightPlanWasEdited { flight_plan, reply } => {
                let _ = reply.send(self.flight_plan_was_edited(flight_plan));
            }
            Request::CatchUp {
                flight_plan,
                last_mission_item_executed,
                reply,
            } => {
                let _ = reply.send(self.catch_up(flight_plan, last_mission_item_executed).await);
            }
        }
    }

    /// Move to `next` if the current node allows it, then publish
    fn enter(&mut self, next: Node) -> TransitionResult {
        let from = self.node.kind();
        let to = next.kind();
        if !from.is_valid_next_state(to) {
            warn!("[FP] Rejected transition {} -> {}", from, to);
            return TransitionResult::Invalid { from, to };
        }

        info!("[FP] Entering state {} (from {})", to, from);
        self.node = next;
        self.publish();
        TransitionResult::Success(to)
    }

    /// Restart the machine on Initializing regardless of the current node
    fn reset(&mut self) {
        debug!("[FP] Resetting machine from {}", self.node.kind());
        self.node = Node::Initializing;
        self.publish();
    }

    fn publish(&self) {
        let state = self.node.published();
        info!("[FP] Publishing state {}", state);
        self.state_tx.send_replace(state);
    }

    fn invalid(&self, to: StateKind) -> StateMachineError {
        let from = self.node.kind();
        warn!("[FP] Command needs {} -> {}, not possible", from, to);
        StateMachineError::InvalidTransition { from, to }
    }

    // MARK: Commands

    async fn open(&mut self, flight_plan: FlightPlanModel, resume: bool) -> Result<(), StateMachineError> {
        info!("[FP] COMMAND: open {} (resume: {})", flight_plan, resume);

        // Resolve first: a store failure must leave the machine untouched
        let editable = self.resolve_editable(&flight_plan).await?;

        self.leave_for(&flight_plan.project_uuid).await;
        self.resumable = if resume && flight_plan.is_resumable() {
            info!("[FP] {} kept for resume from item {}", flight_plan.uuid, flight_plan.last_mission_item_executed);
            Some(flight_plan)
        } else {
            None
        };
        self.enter(Node::Editable(editable));
        Ok(())
    }

    async fn start(&mut self, flight_plan: FlightPlanModel) -> Result<(), StateMachineError> {
        info!("[FP] COMMAND: start {}", flight_plan);
        let current = match &self.node {
            Node::Editable(current) => current,
            _ => return Err(self.invalid(StateKind::StartedNotFlying)),
        };
        if current.uuid != flight_plan.uuid {
            debug!("[FP] Start replaces {} with {}", current.uuid, flight_plan.uuid);
        }
        // Executed plans are history; only an editable plan spawns a new execution
        if !flight_plan.is_editable() {
            warn!("[FP] Cannot start {}: plan is {}", flight_plan.uuid, flight_plan.state);
            return Err(self.invalid(StateKind::StartedNotFlying));
        }

        self.store.persist(&flight_plan).await?;
        let execution = self.store.create_execution(&flight_plan).await?;

        self.resumable = None;
        let from = execution.last_mission_item_executed;
        self.launch(execution, from).await
    }

    async fn resume(&mut self) -> Result<(), StateMachineError> {
        info!("[FP] COMMAND: resume");
        match self.node.kind() {
            StateKind::StartedFlying => self.resume_run().await,
            StateKind::Editable if self.resumable.is_some() => {
                let Some(mut execution) = self.resumable.take() else {
                    return Err(self.invalid(StateKind::StartedNotFlying));
                };
                execution.state = PlanState::Flying;
                if let Err(e) = self.store.persist(&execution).await {
                    self.resumable = Some(execution);
                    return Err(e.into());
                }
                let from = execution.last_mission_item_executed;
                self.launch(execution, from).await
            }
            _ => Err(self.invalid(StateKind::StartedFlying)),
        }
    }

    async fn pause(&mut self) -> Result<(), StateMachineError> {
        info!("[FP] COMMAND: pause");
        let Node::StartedFlying(flying) = &mut self.node else {
            let from = self.node.kind();
            warn!("[FP] COMMAND: pause not possible with state {}", from);
            return Err(StateMachineError::InvalidTransition {
                from,
                to: StateKind::StartedFlying,
            });
        };

        flying.runner.pause().await?;
        flying.paused = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), StateMachineError> {
        info!("[FP] COMMAND: stop");
        if !matches!(self.node, Node::StartedFlying(_)) {
            return Err(self.invalid(StateKind::Ended));
        }
        self.end_run(false, Some(InterruptReason::UserStop)).await;
        Ok(())
    }

    async fn catch_up(
        &mut self,
        mut flight_plan: FlightPlanModel,
        last_mission_item_executed: u32,
    ) -> Result<(), StateMachineError> {
        info!(
            "[FP] COMMAND: catch up on {}, last item: {}",
            flight_plan.uuid, last_mission_item_executed
        );
        if let Node::StartedFlying(flying) = &self.node {
            if flying.flight_plan.uuid == flight_plan.uuid {
                debug!("[FP] Already flying {}, runner catches up on its own", flight_plan.uuid);
                return Ok(());
            }
        }
        if flight_plan.is_editable() {
            warn!("[FP] Cannot catch up on editable plan {}", flight_plan.uuid);
            return Err(self.invalid(StateKind::StartedFlying));
        }

        flight_plan.state = PlanState::Flying;
        flight_plan.last_mission_item_executed = flight_plan
            .last_mission_item_executed
            .max(last_mission_item_executed);
        self.store.persist(&flight_plan).await?;

        // A different execution in flight ends as stopped before the takeover
        self.finish_run(false, Some(InterruptReason::UserStop)).await;
        self.reset();
        self.resumable = None;
        self.attach(flight_plan).await
    }

    fn flight_plan_was_edited(&mut self, flight_plan: FlightPlanModel) -> Result<(), StateMachineError> {
        match &self.node {
            Node::Editable(current) if current.uuid == flight_plan.uuid => {
                debug!("[FP] Flight plan {} was edited", flight_plan.uuid);
                self.node = Node::Editable(flight_plan);
                self.publish();
                Ok(())
            }
            Node::Editable(current) => {
                debug!(
                    "[FP] Ignoring edit of {}, editing {}",
                    flight_plan.uuid, current.uuid
                );
                Ok(())
            }
            _ => Err(self.invalid(StateKind::Editable)),
        }
    }

    // MARK: Transitions

    /// The editable plan to land on when opening `flight_plan`
    async fn resolve_editable(&self, flight_plan: &FlightPlanModel) -> Result<FlightPlanModel, StoreError> {
        if flight_plan.is_editable() {
            return Ok(flight_plan.clone());
        }

        let project = &flight_plan.project_uuid;
        if self.store.has_editable_plan(project).await? {
            match self.store.editable_plan(project).await? {
                Some(existing) if existing.is_editable() && existing.project_uuid == *project => {
                    debug!("[FP] Reusing editable plan {} of project {}", existing.uuid, project);
                    return Ok(existing);
                }
                _ => warn!("[FP] Project {} reports an editable plan that cannot be found", project),
            }
        }

        let duplicate = self.store.duplicate_for_editing(flight_plan).await?;
        info!("[FP] Duplicated {} into editable plan {}", flight_plan.uuid, duplicate.uuid);
        Ok(duplicate)
    }

    /// Bring the machine back to Initializing before opening a plan of `project_uuid`
    async fn leave_for(&mut self, project_uuid: &str) {
        match &self.node {
            Node::StartedFlying(flying) if flying.flight_plan.project_uuid != project_uuid => {
                info!("[FP] Ending run of project {} before opening {}", flying.flight_plan.project_uuid, project_uuid);
                self.finish_run(false, Some(InterruptReason::UserStop)).await;
                if matches!(self.node, Node::Ended(_)) {
                    self.enter(Node::Initializing);
                }
            }
            Node::StartedFlying(_) => {
                self.cancel_runner().await;
                self.enter(Node::Initializing);
            }
            Node::Ended(_) => {
                self.enter(Node::Initializing);
            }
            Node::Initializing | Node::Editable(_) | Node::StartedNotFlying(_) => self.reset(),
        }
    }

    /// Initializing -> StartedFlying on a run already underway. Like `reset`,
    /// this bypasses the table: the vehicle is flying whatever the machine says.
    async fn attach(&mut self, execution: FlightPlanModel) -> Result<(), StateMachineError> {
        let from = execution.last_mission_item_executed;
        info!("[FP] Attaching to {} at item {} (from {})", execution.uuid, from, self.node.kind());
        let runner = self.runner.clone();
        self.node = Node::StartedFlying(Flying {
            flight_plan: execution.clone(),
            runner: runner.clone(),
            paused: false,
        });
        self.publish();

        let attached = runner.attach(&execution, from).await;
        if let Err(e) = attached {
            warn!("[FP] Runner cannot attach to {}: {}", execution.uuid, e);
            self.end_run(false, None).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Editable -> StartedNotFlying -> StartedFlying, then play from `from`
    async fn launch(&mut self, execution: FlightPlanModel, from: u32) -> Result<(), StateMachineError> {
        if !self.enter(Node::StartedNotFlying(execution.clone())).is_success() {
            return Err(self.invalid(StateKind::StartedNotFlying));
        }

        let flying = Flying {
            flight_plan: execution,
            runner: self.runner.clone(),
            paused: false,
        };
        if !self.enter(Node::StartedFlying(flying)).is_success() {
            return Err(self.invalid(StateKind::StartedFlying));
        }

        self.play_from(from).await
    }

    async fn play_from(&mut self, from: u32) -> Result<(), StateMachineError> {
        let Node::StartedFlying(flying) = &mut self.node else {
            return Err(self.invalid(StateKind::StartedFlying));
        };

        info!("[FP] Playing {} from item {}", flying.flight_plan.uuid, from);
        match flying.runner.play(&flying.flight_plan, from).await {
            Ok(()) => {
                flying.paused = false;
                Ok(())
            }
            Err(e) => {
                warn!("[FP] Runner cannot play {}: {}", flying.flight_plan.uuid, e);
                self.end_run(false, None).await;
                Err(e.into())
            }
        }
    }

    async fn resume_run(&mut self) -> Result<(), StateMachineError> {
        let Node::StartedFlying(flying) = &mut self.node else {
            return Err(self.invalid(StateKind::StartedFlying));
        };

        if !flying.paused {
            let from = flying.flight_plan.last_mission_item_executed;
            return self.play_from(from).await;
        }

        match flying.runner.resume().await {
            Ok(()) => {
                flying.paused = false;
                Ok(())
            }
            Err(e) => {
                warn!("[FP] Runner cannot resume {}: {}", flying.flight_plan.uuid, e);
                self.end_run(false, None).await;
                Err(e.into())
            }
        }
    }

    /// End the run, then re-open its project when configured to
    async fn end_run(&mut self, completed: bool, reason: Option<InterruptReason>) {
        let Some(flight_plan) = self.finish_run(completed, reason).await else {
            return;
        };
        if self.config.reopen_after_end {
            self.reopen(flight_plan).await;
        }
    }

    /// StartedFlying -> Ended, persisting `completed` or `stopped`
    async fn finish_run(&mut self, completed: bool, reason: Option<InterruptReason>) -> Option<FlightPlanModel> {
        let Node::StartedFlying(flying) = &self.node else {
            return None;
        };

        let mut flight_plan = flying.flight_plan.clone();
        flight_plan.state = if completed {
            PlanState::Completed
        } else {
            PlanState::Stopped
        };
        flight_plan.last_update_ms = now_ms();
        match reason {
            Some(reason) => info!("[FP] Run of {} interrupted: {}", flight_plan.uuid, reason),
            None if completed => info!("[FP] Run of {} completed", flight_plan.uuid),
            None => info!("[FP] Run of {} ended", flight_plan.uuid),
        }

        self.cancel_runner().await;
        if let Err(e) = self.store.persist(&flight_plan).await {
            warn!("[FP] Failed to persist ended run {}: {}", flight_plan.uuid, e);
        }

        self.enter(Node::Ended(flight_plan.clone()))
            .is_success()
            .then_some(flight_plan)
    }

    /// Ended -> Initializing -> Editable on the ended plan's project
    async fn reopen(&mut self, flight_plan: FlightPlanModel) {
        match self.resolve_editable(&flight_plan).await {
            Ok(editable) => {
                self.enter(Node::Initializing);
                self.enter(Node::Editable(editable));
            }
            Err(e) => error!("[FP] Failed to reopen project {}: {}", flight_plan.project_uuid, e),
        }
    }

    async fn cancel_runner(&self) {
        if let Err(e) = self.runner.stop().await {
            warn!("[FP] Runner stop failed: {}", e);
        }
    }

    // MARK: Runner events

    async fn handle_runner_event(&mut self, event: RunnerEvent) {
        let Node::StartedFlying(flying) = &mut self.node else {
            debug!("[FP] Ignoring runner event {:?} in state {}", event.kind, self.node.kind());
            return;
        };
        if flying.flight_plan.uuid != event.flight_plan_uuid {
            debug!(
                "[FP] Ignoring stale runner event for {} while flying {}",
                event.flight_plan_uuid, flying.flight_plan.uuid
            );
            return;
        }

        match event.kind {
            RunnerEventKind::Progress {
                last_mission_item_executed,
            } => {
                if last_mission_item_executed <= flying.flight_plan.last_mission_item_executed {
                    debug!(
                        "[FP] Ignoring progress {} (already at {})",
                        last_mission_item_executed, flying.flight_plan.last_mission_item_executed
                    );
                    return;
                }
                flying.flight_plan.last_mission_item_executed = last_mission_item_executed;
                flying.flight_plan.last_update_ms = now_ms();
                let flight_plan = flying.flight_plan.clone();
                self.publish();
                self.persist_quietly(&flight_plan).await;
            }
            RunnerEventKind::Paused => {
                info!("[FP] Run of {} paused by vehicle", flying.flight_plan.uuid);
                flying.paused = true;
            }
            RunnerEventKind::Resumed => {
                info!("[FP] Run of {} resumed by vehicle", flying.flight_plan.uuid);
                flying.paused = false;
            }
            RunnerEventKind::RecoveryInfo { recovery_id } => {
                flying.flight_plan.recovery_id = Some(recovery_id);
                let flight_plan = flying.flight_plan.clone();
                self.persist_quietly(&flight_plan).await;
            }
            RunnerEventKind::Completed { mission_item_count } => {
                flying.flight_plan.last_mission_item_executed = flying
                    .flight_plan
                    .last_mission_item_executed
                    .max(mission_item_count);
                self.end_run(true, None).await;
            }
            RunnerEventKind::Interrupted { reason } => {
                self.end_run(false, Some(reason)).await;
            }
        }
    }

    async fn persist_quietly(&self, flight_plan: &FlightPlanModel) {
        if let Err(e) = self.store.persist(flight_plan).await {
            warn!("[FP] Failed to persist {}: {}", flight_plan.uuid, e);
        }
    }
}
