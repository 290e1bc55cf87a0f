//! StateManager - actor that owns the plan store
//!
//! Processes commands via channels for thread-safe access to persistent state.
//! Every write goes through the single actor task, so a plan is never saved
//! by two writers at once.

use std::path::Path;

use async_trait::async_trait;
use planstore::{Filter, ListOptions, Store};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::messages::{StateCommand, StateError, StateResponse};
use super::repository::{PlanPage, PlanQuery, PlanRepository, PlanSummary};
use crate::domain::Plan;

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a StateManager over the store in `store_dir`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(store_dir: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_dir = %store_dir.as_ref().display(), "spawn: called");
        let store = Store::open(store_dir.as_ref())?;
        Self::spawn_with_store(store)
    }

    /// Spawn a StateManager over a throwaway in-memory store
    pub fn spawn_in_memory() -> eyre::Result<Self> {
        debug!("spawn_in_memory: called");
        Self::spawn_with_store(Store::open_in_memory()?)
    }

    fn spawn_with_store(mut store: Store) -> eyre::Result<Self> {
        let plan_count = store.rebuild_indexes::<Plan>()?;
        info!(plan_count, "Rebuilt plan indexes");

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));

        info!("StateManager spawned");
        Ok(Self { tx })
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Insert or replace a plan
    pub async fn save_plan(&self, plan: Plan) -> StateResponse<()> {
        debug!(session_id = %plan.session_id, status = %plan.status, "save_plan: called");
        self.request(|reply| StateCommand::SavePlan {
            plan: Box::new(plan),
            reply,
        })
        .await
    }

    /// Get a plan by session id
    pub async fn get_plan(&self, id: &str) -> StateResponse<Option<Plan>> {
        debug!(%id, "get_plan: called");
        self.request(|reply| StateCommand::GetPlan {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Get a plan by session id, returning error if not found
    pub async fn get_plan_required(&self, id: &str) -> StateResponse<Plan> {
        self.get_plan(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("Plan {}", id)))
    }

    /// List plan summaries, most recently updated first
    pub async fn list_plans(&self, query: PlanQuery) -> StateResponse<PlanPage> {
        debug!(?query, "list_plans: called");
        self.request(|reply| StateCommand::ListPlans { query, reply }).await
    }

    pub async fn list_session_ids(&self) -> StateResponse<Vec<String>> {
        debug!("list_session_ids: called");
        self.request(|reply| StateCommand::ListSessionIds { reply }).await
    }

    /// Delete a plan; returns whether it existed
    pub async fn delete_plan(&self, id: &str) -> StateResponse<bool> {
        debug!(%id, "delete_plan: called");
        self.request(|reply| StateCommand::DeletePlan {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Recompute index rows for every stored plan
    pub async fn rebuild_indexes(&self) -> StateResponse<usize> {
        debug!("rebuild_indexes: called");
        self.request(|reply| StateCommand::RebuildIndexes { reply }).await
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

#[async_trait]
impl PlanRepository for StateManager {
    async fn save(&self, plan: &Plan) -> StateResponse<()> {
        self.save_plan(plan.clone()).await
    }

    async fn get(&self, session_id: &str) -> StateResponse<Option<Plan>> {
        self.get_plan(session_id).await
    }

    async fn list(&self, query: PlanQuery) -> StateResponse<PlanPage> {
        self.list_plans(query).await
    }

    async fn session_ids(&self) -> StateResponse<Vec<String>> {
        self.list_session_ids().await
    }

    async fn delete(&self, session_id: &str) -> StateResponse<bool> {
        self.delete_plan(session_id).await
    }
}

fn store_err(e: eyre::Report) -> StateError {
    let message = format!("{:#}", e);
    if message.contains("deserialize") {
        StateError::DeserializationError(message)
    } else {
        StateError::StoreError(message)
    }
}

fn query_filters(query: &PlanQuery) -> Vec<Filter> {
    let mut filters = Vec::new();
    if let Some(status) = query.status {
        debug!(%status, "query_filters: adding status filter");
        filters.push(Filter::eq("status", status.to_string()));
    }
    if let Some(text) = query.query.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        debug!(%text, "query_filters: adding search filter");
        filters.push(Filter::contains("search", text.to_lowercase()));
    }
    filters
}

/// The actor loop that processes commands
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::SavePlan { plan, reply } => {
                debug!(session_id = %plan.session_id, "actor_loop: SavePlan command");
                let result = store.upsert(*plan).map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::GetPlan { id, reply } => {
                debug!(%id, "actor_loop: GetPlan command");
                let result: StateResponse<Option<Plan>> = store.get(&id).map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::ListPlans { query, reply } => {
                debug!(?query, "actor_loop: ListPlans command");
                let filters = query_filters(&query);
                let result = store.count::<Plan>(&filters).and_then(|total| {
                    let plans: Vec<Plan> = store.list(&filters, &ListOptions::page(query.limit, query.offset))?;
                    Ok(PlanPage {
                        sessions: plans.iter().map(PlanSummary::from).collect(),
                        total,
                        limit: query.limit,
                        offset: query.offset,
                    })
                });
                let _ = reply.send(result.map_err(store_err));
            }

            StateCommand::ListSessionIds { reply } => {
                debug!("actor_loop: ListSessionIds command");
                let result = store
                    .list::<Plan>(&[], &ListOptions::default())
                    .map(|plans| plans.into_iter().map(|p| p.session_id).collect())
                    .map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::DeletePlan { id, reply } => {
                debug!(%id, "actor_loop: DeletePlan command");
                let result = store.delete::<Plan>(&id).map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::RebuildIndexes { reply } => {
                debug!("actor_loop: RebuildIndexes command");
                let result = store.rebuild_indexes::<Plan>().map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}
