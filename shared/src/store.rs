//! Flight plan store contract and an in-memory implementation

use crate::{now_ms, FlightPlanModel, PlanState, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Title prefix given to executions created from an editable plan
pub const EXECUTION_TITLE_PREFIX: &str = "Execution";

/// Storage the state machine reads from and writes to. Durability is the
/// implementor's concern.
#[async_trait]
pub trait FlightPlanStore: Send + Sync {
    /// Whether the project currently has an editable plan
    async fn has_editable_plan(&self, project_uuid: &str) -> Result<bool, StoreError>;

    /// The project's editable plan, if any
    async fn editable_plan(&self, project_uuid: &str) -> Result<Option<FlightPlanModel>, StoreError>;

    async fn flight_plan(&self, uuid: &str) -> Result<Option<FlightPlanModel>, StoreError>;

    /// Copy an executed plan into a new editable plan of the same project
    async fn duplicate_for_editing(&self, plan: &FlightPlanModel) -> Result<FlightPlanModel, StoreError>;

    /// Create a new execution of an editable plan, ready to fly
    async fn create_execution(&self, plan: &FlightPlanModel) -> Result<FlightPlanModel, StoreError>;

    async fn persist(&self, plan: &FlightPlanModel) -> Result<(), StoreError>;
}

#[derive(Default)]
struct StoreInner {
    plans: HashMap<String, FlightPlanModel>,
    /// Last execution rank handed out, per project
    execution_ranks: HashMap<String, u32>,
}

impl StoreInner {
    fn editable_in(&self, project_uuid: &str) -> Option<&FlightPlanModel> {
        self.plans
            .values()
            .find(|p| p.project_uuid == project_uuid && p.is_editable())
    }

    fn check_single_editable(&self, plan: &FlightPlanModel) -> Result<(), StoreError> {
        if !plan.is_editable() {
            return Ok(());
        }
        match self.editable_in(&plan.project_uuid) {
            Some(existing) if existing.uuid != plan.uuid => Err(StoreError::EditableConflict {
                project_uuid: plan.project_uuid.clone(),
                existing_uuid: existing.uuid.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Keeps every plan in memory; used by the edge device and in tests
#[derive(Clone, Default)]
pub struct InMemoryFlightPlanStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemoryFlightPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and store a fresh editable plan for a project
    pub async fn create_flight_plan(
        &self,
        project_uuid: &str,
        custom_title: &str,
    ) -> Result<FlightPlanModel, StoreError> {
        let plan = FlightPlanModel::new(Uuid::new_v4().to_string(), project_uuid, custom_title);
        let mut inner = self.inner.write().await;
        inner.check_single_editable(&plan)?;
        inner.plans.insert(plan.uuid.clone(), plan.clone());
        Ok(plan)
    }

    /// Store a plan as-is, bypassing invariant checks
    pub async fn insert(&self, plan: FlightPlanModel) {
        self.inner.write().await.plans.insert(plan.uuid.clone(), plan);
    }

    /// All plans of a project, editable plan first, then executions by rank
    pub async fn project_plans(&self, project_uuid: &str) -> Vec<FlightPlanModel> {
        let inner = self.inner.read().await;
        let mut plans: Vec<_> = inner
            .plans
            .values()
            .filter(|p| p.project_uuid == project_uuid)
            .cloned()
            .collect();
        plans.sort_by_key(|p| (p.execution_rank.unwrap_or(0), p.last_update_ms));
        plans
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.plans.len()
    }
}

#[async_trait]
impl FlightPlanStore for InMemoryFlightPlanStore {
    async fn has_editable_plan(&self, project_uuid: &str) -> Result<bool, StoreError> {
        Ok(self.inner.read().await.editable_in(project_uuid).is_some())
    }

    async fn editable_plan(&self, project_uuid: &str) -> Result<Option<FlightPlanModel>, StoreError> {
        Ok(self.inner.read().await.editable_in(project_uuid).cloned())
    }

    async fn flight_plan(&self, uuid: &str) -> Result<Option<FlightPlanModel>, StoreError> {
        Ok(self.inner.read().await.plans.get(uuid).cloned())
    }

    async fn duplicate_for_editing(&self, plan: &FlightPlanModel) -> Result<FlightPlanModel, StoreError> {
        let duplicate = FlightPlanModel {
            uuid: Uuid::new_v4().to_string(),
            project_uuid: plan.project_uuid.clone(),
            state: PlanState::Editable,
            last_mission_item_executed: 0,
            recovery_id: None,
            execution_rank: None,
            custom_title: plan.custom_title.clone(),
            media_count: 0,
            uploaded_media_count: 0,
            last_update_ms: now_ms(),
            thumbnail: plan.thumbnail.clone(),
        };

        let mut inner = self.inner.write().await;
        inner.check_single_editable(&duplicate)?;
        inner.plans.insert(duplicate.uuid.clone(), duplicate.clone());
        Ok(duplicate)
    }

    async fn create_execution(&self, plan: &FlightPlanModel) -> Result<FlightPlanModel, StoreError> {
        let mut inner = self.inner.write().await;
        let rank = inner
            .execution_ranks
            .entry(plan.project_uuid.clone())
            .and_modify(|r| *r += 1)
            .or_insert(1);
        let execution = FlightPlanModel {
            uuid: Uuid::new_v4().to_string(),
            project_uuid: plan.project_uuid.clone(),
            state: PlanState::Flying,
            last_mission_item_executed: 0,
            recovery_id: None,
            execution_rank: Some(*rank),
            custom_title: format!("{} {}", EXECUTION_TITLE_PREFIX, rank),
            media_count: 0,
            uploaded_media_count: 0,
            last_update_ms: now_ms(),
            thumbnail: plan.thumbnail.clone(),
        };
        inner.plans.insert(execution.uuid.clone(), execution.clone());
        Ok(execution)
    }

    async fn persist(&self, plan: &FlightPlanModel) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_single_editable(plan)?;
        let mut stored = plan.clone();
        stored.last_update_ms = now_ms();
        inner.plans.insert(stored.uuid.clone(), stored);
        Ok(())
    }
}
