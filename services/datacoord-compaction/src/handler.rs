use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use datacoord_core::metrics::COMPACTION_TASKS;
use datacoord_core::{
    tso, Allocator, CompactionResult, CoreError, CoreResult, HandlerConfig, MetadataStore, NodeId,
    PlanId, SignalId, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ComputeCluster, NodeCompactionState};
use crate::plan::CompactionPlan;
use crate::signal::CompactionSignal;
use crate::task::{CompactionStateSummary, CompactionTask, CompactionTaskState};

/// Destination for plans produced by the trigger.
#[async_trait]
pub trait ExecutionHandler: Send + Sync {
    /// Starts executing `plan` and returns without waiting for it to finish.
    async fn exec_compaction_plan(
        &self,
        signal: &CompactionSignal,
        plan: CompactionPlan,
    ) -> CoreResult<()>;

    /// Whether the handler refuses further automatic plans.
    fn is_full(&self) -> bool;

    /// Snapshot of the tasks raised by `signal_id`, or of every task for id 0.
    fn get_compaction_tasks_by_signal_id(&self, signal_id: SignalId) -> Vec<CompactionTask>;
}

/// Whether a plan started at `start_time` has outlived its timeout at `now`.
pub fn is_timeout(now: Timestamp, start_time: Timestamp, timeout_secs: i32) -> bool {
    tso::elapsed_secs(start_time, now) >= i64::from(timeout_secs)
}

struct HandlerState {
    meta: Arc<dyn MetadataStore>,
    allocator: Arc<dyn Allocator>,
    cluster: Arc<dyn ComputeCluster>,
    config: HandlerConfig,
    plans: RwLock<HashMap<PlanId, CompactionTask>>,
    /// Node slots held by dispatched plans.
    permits: Mutex<HashMap<PlanId, OwnedSemaphorePermit>>,
    node_slots: Mutex<HashMap<NodeId, Arc<Semaphore>>>,
    executing: AtomicUsize,
}

impl HandlerState {
    fn node_slot(&self, node: NodeId) -> Arc<Semaphore> {
        self.node_slots
            .lock()
            .entry(node)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.node_parallelism)))
            .clone()
    }

    /// Moves a task to `to` if it is currently in `from`. Returns whether it moved.
    fn transition(
        &self,
        plan_id: PlanId,
        from: CompactionTaskState,
        to: CompactionTaskState,
    ) -> bool {
        let mut plans = self.plans.write();
        let Some(task) = plans.get_mut(&plan_id) else {
            return false;
        };
        if task.state != from {
            return false;
        }
        task.state = to;
        if from == CompactionTaskState::Executing {
            self.executing.fetch_sub(1, Ordering::SeqCst);
        }
        COMPACTION_TASKS.with_label_values(&[from.as_str()]).dec();
        COMPACTION_TASKS.with_label_values(&[to.as_str()]).inc();
        true
    }

    fn release_permit(&self, plan_id: PlanId) {
        self.permits.lock().remove(&plan_id);
    }

    fn is_dispatched(&self, plan_id: PlanId) -> bool {
        self.permits.lock().contains_key(&plan_id)
    }

    async fn release_segments(&self, plan: &CompactionPlan) {
        self.meta
            .set_segments_compacting(&plan.segment_ids(), false)
            .await;
    }

    async fn fail(&self, plan_id: PlanId, from: CompactionTaskState) {
        if !self.transition(plan_id, from, CompactionTaskState::Failed) {
            return;
        }
        self.release_permit(plan_id);
        let plan = self.plans.read().get(&plan_id).map(|t| t.plan.clone());
        if let Some(plan) = plan {
            self.release_segments(&plan).await;
        }
    }

    async fn remove(&self, plan_id: PlanId) {
        let removed = self.plans.write().remove(&plan_id);
        self.release_permit(plan_id);
        if let Some(task) = removed {
            if task.state == CompactionTaskState::Executing {
                self.executing.fetch_sub(1, Ordering::SeqCst);
            }
            COMPACTION_TASKS
                .with_label_values(&[task.state.as_str()])
                .dec();
            self.release_segments(&task.plan).await;
        }
    }

    /// Forgets completed and failed tasks that started more than the
    /// retention period before `now`. Returns how many were removed.
    fn evict_finished(&self, now: Timestamp) -> usize {
        let retention = i64::try_from(self.config.task_retention_secs).unwrap_or(i64::MAX);
        let mut plans = self.plans.write();
        let before = plans.len();
        plans.retain(|_, task| {
            let expired = task.state.is_terminal()
                && tso::elapsed_secs(task.plan.start_time, now) >= retention;
            if expired {
                COMPACTION_TASKS
                    .with_label_values(&[task.state.as_str()])
                    .dec();
            }
            !expired
        });
        before - plans.len()
    }

    async fn dispatch(self: Arc<Self>, node: NodeId, mut plan: CompactionPlan) {
        let plan_id = plan.plan_id;
        let permit = match self.node_slot(node).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(plan_id = %plan_id, node_id = %node, error = %e, "Node slot closed");
                self.fail(plan_id, CompactionTaskState::Executing).await;
                return;
            }
        };

        let start_time = match self.allocator.alloc_timestamp().await {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(plan_id = %plan_id, error = %e, "Failed to allocate plan start time");
                drop(permit);
                self.fail(plan_id, CompactionTaskState::Executing).await;
                return;
            }
        };

        plan.start_time = start_time;
        {
            let mut plans = self.plans.write();
            match plans.get_mut(&plan_id) {
                Some(task) if task.state == CompactionTaskState::Executing => {
                    task.plan.start_time = start_time;
                }
                _ => {
                    tracing::debug!(plan_id = %plan_id, "Plan finished before dispatch");
                    return;
                }
            }
        }
        self.permits.lock().insert(plan_id, permit);

        match self.cluster.compaction(node, &plan).await {
            Ok(()) => {
                tracing::info!(
                    plan_id = %plan_id,
                    node_id = %node,
                    segments = plan.segment_binlogs.len(),
                    "Dispatched compaction plan"
                );
            }
            Err(e) => {
                tracing::warn!(
                    plan_id = %plan_id,
                    node_id = %node,
                    error = %e,
                    "Failed to dispatch compaction plan"
                );
                self.remove(plan_id).await;
            }
        }
    }
}

/// Production execution handler.
///
/// Tracks every dispatched plan, bounds concurrent plans per compute node,
/// applies results reported by nodes, and expires plans that overrun
/// their deadline.
pub struct CompactionPlanHandler {
    state: Arc<HandlerState>,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl CompactionPlanHandler {
    pub fn new(
        meta: Arc<dyn MetadataStore>,
        allocator: Arc<dyn Allocator>,
        cluster: Arc<dyn ComputeCluster>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            state: Arc::new(HandlerState {
                meta,
                allocator,
                cluster,
                config,
                plans: RwLock::new(HashMap::new()),
                permits: Mutex::new(HashMap::new()),
                node_slots: Mutex::new(HashMap::new()),
                executing: AtomicUsize::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Records the result of a finished plan.
    ///
    /// Results for unknown plans, or for plans that are no longer executing,
    /// are ignored.
    pub async fn complete_compaction(&self, result: CompactionResult) -> CoreResult<()> {
        let plan_id = result.plan_id;
        let plan = {
            let plans = self.state.plans.read();
            match plans.get(&plan_id) {
                None => {
                    tracing::info!(plan_id = %plan_id, "Ignoring result of unknown plan");
                    return Ok(());
                }
                Some(task) if task.state != CompactionTaskState::Executing => {
                    tracing::info!(
                        plan_id = %plan_id,
                        state = %task.state,
                        "Ignoring result of plan that is not executing"
                    );
                    return Ok(());
                }
                Some(task) => task.plan.clone(),
            }
        };

        let merged = self
            .state
            .meta
            .complete_compaction(&plan.segment_ids(), &result)
            .await?;

        if self.state.transition(
            plan_id,
            CompactionTaskState::Executing,
            CompactionTaskState::Completed,
        ) {
            if let Some(task) = self.state.plans.write().get_mut(&plan_id) {
                task.result = Some(result);
            }
            self.state.release_permit(plan_id);
            tracing::info!(
                plan_id = %plan_id,
                segment_id = ?merged.map(|s| s.id),
                "Compaction completed"
            );
        }
        Ok(())
    }

    /// Reconciles tracked tasks with the states reported by compute nodes,
    /// then drops finished tasks past their retention.
    pub async fn update_compaction(&self, ts: Timestamp) -> CoreResult<()> {
        let node_states = self.state.cluster.get_compaction_states().await?;

        let tracked: Vec<CompactionTask> = self
            .state
            .plans
            .read()
            .values()
            .filter(|t| !t.state.is_terminal())
            .cloned()
            .collect();

        for task in tracked {
            let plan_id = task.plan.plan_id;
            match (task.state, node_states.get(&plan_id)) {
                (CompactionTaskState::Executing, Some(NodeCompactionState::Completed(result))) => {
                    if let Err(e) = self.complete_compaction(result.clone()).await {
                        tracing::error!(plan_id = %plan_id, error = %e, "Failed to apply compaction result");
                    }
                }
                (CompactionTaskState::Executing, Some(NodeCompactionState::Executing)) => {
                    if is_timeout(ts, task.plan.start_time, task.plan.timeout_in_seconds)
                        && self.state.transition(
                            plan_id,
                            CompactionTaskState::Executing,
                            CompactionTaskState::Timeout,
                        )
                    {
                        self.state.release_permit(plan_id);
                        tracing::warn!(
                            plan_id = %plan_id,
                            node_id = %task.node_id,
                            timeout_secs = task.plan.timeout_in_seconds,
                            "Compaction timed out"
                        );
                    }
                }
                (CompactionTaskState::Executing, None) => {
                    if self.state.is_dispatched(plan_id) {
                        tracing::warn!(plan_id = %plan_id, node_id = %task.node_id, "Compaction lost by node");
                        self.state.fail(plan_id, CompactionTaskState::Executing).await;
                    }
                }
                (CompactionTaskState::Timeout, None) => {
                    tracing::info!(plan_id = %plan_id, "Timed out compaction released by node");
                    self.state.fail(plan_id, CompactionTaskState::Timeout).await;
                }
                _ => {}
            }
        }

        let evicted = self.state.evict_finished(ts);
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted finished compaction tasks");
        }
        Ok(())
    }

    pub fn get_compaction(&self, plan_id: PlanId) -> Option<CompactionTask> {
        self.state.plans.read().get(&plan_id).cloned()
    }

    /// Task counts for one signal.
    pub fn get_compaction_state(&self, signal_id: SignalId) -> CompactionStateSummary {
        let plans = self.state.plans.read();
        CompactionStateSummary::from_tasks(
            plans
                .values()
                .filter(|t| signal_id.get() == 0 || t.signal.id == signal_id),
        )
    }

    pub fn executing_count(&self) -> usize {
        self.state.executing.load(Ordering::SeqCst)
    }

    /// Starts the periodic reconciliation loop.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            tracing::warn!("Compaction handler already running");
            return;
        }

        let token = CancellationToken::new();
        let handler = Self {
            state: Arc::clone(&self.state),
            worker: Mutex::new(None),
        };
        let interval = self.state.config.update_interval();
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let ts = match handler.state.allocator.alloc_timestamp().await {
                            Ok(ts) => ts,
                            Err(e) => {
                                tracing::warn!(error = %e, "Skipping compaction state update");
                                continue;
                            }
                        };
                        if let Err(e) = handler.update_compaction(ts).await {
                            tracing::error!(error = %e, "Compaction state update failed");
                        }
                    }
                }
            }
        });

        *worker = Some((token, handle));
        tracing::info!("Compaction handler started (interval: {:?})", interval);
    }

    /// Stops the reconciliation loop and waits for it to exit.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some((token, handle)) = worker {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Compaction handler loop panicked");
            }
            tracing::info!("Compaction handler stopped");
        }
    }
}

#[async_trait]
impl ExecutionHandler for CompactionPlanHandler {
    async fn exec_compaction_plan(
        &self,
        signal: &CompactionSignal,
        plan: CompactionPlan,
    ) -> CoreResult<()> {
        let plan_id = plan.plan_id;
        if self.state.plans.read().contains_key(&plan_id) {
            return Err(CoreError::already_exists("compaction plan", plan_id));
        }

        let node = self
            .state
            .cluster
            .find_watcher(&plan.channel)
            .await
            .map_err(|e| CoreError::dispatch(format!("no node watches `{}`: {e}", plan.channel)))?;

        self.state
            .meta
            .set_segments_compacting(&plan.segment_ids(), true)
            .await;

        self.state.plans.write().insert(
            plan_id,
            CompactionTask::new(plan.clone(), signal.clone(), node),
        );
        self.state.executing.fetch_add(1, Ordering::SeqCst);
        COMPACTION_TASKS
            .with_label_values(&[CompactionTaskState::Executing.as_str()])
            .inc();

        tokio::spawn(Arc::clone(&self.state).dispatch(node, plan));
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.executing_count() >= self.state.config.max_parallel_tasks
    }

    fn get_compaction_tasks_by_signal_id(&self, signal_id: SignalId) -> Vec<CompactionTask> {
        let mut tasks: Vec<_> = self
            .state
            .plans
            .read()
            .values()
            .filter(|t| signal_id.get() == 0 || t.signal.id == signal_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.plan.plan_id);
        tasks
    }
}
