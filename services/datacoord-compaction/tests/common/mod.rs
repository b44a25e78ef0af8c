#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datacoord_compaction::{
    CompactionPlan, CompactionSignal, CompactionTask, ComputeCluster, ExecutionHandler,
    NodeCompactionState,
};
use datacoord_core::{
    Allocator, Binlog, CollectionId, CollectionInfo, CollectionSchema, CoreError, CoreResult,
    DataType, FieldBinlog, FieldId, FieldSchema, IndexInfoProvider, NodeId, PartitionId, PlanId,
    SegmentId, SegmentInfo, SegmentState, SignalId, Timestamp, UniqueId, COLLECTION_TTL_KEY,
    DIM_KEY,
};
use parking_lot::Mutex;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("datacoord_compaction=debug")
        .with_test_writer()
        .try_init();
}

/// Float vector collection with dimension 128.
pub fn collection(id: i64) -> CollectionInfo {
    collection_with_vector(id, Some("128"))
}

pub fn collection_with_vector(id: i64, dim: Option<&str>) -> CollectionInfo {
    let mut vector = FieldSchema::new(FieldId::new(201), "embedding", DataType::FloatVector);
    if let Some(dim) = dim {
        vector = vector.with_param(DIM_KEY, dim);
    }
    CollectionInfo::new(
        CollectionId::new(id),
        CollectionSchema {
            name: format!("collection-{id}"),
            fields: vec![
                FieldSchema::new(FieldId::new(100), "pk", DataType::Int64),
                vector,
            ],
        },
    )
}

pub fn collection_without_vector(id: i64) -> CollectionInfo {
    CollectionInfo::new(
        CollectionId::new(id),
        CollectionSchema {
            name: format!("collection-{id}"),
            fields: vec![
                FieldSchema::new(FieldId::new(100), "pk", DataType::Int64),
                FieldSchema::new(FieldId::new(101), "age", DataType::Int16),
            ],
        },
    )
}

pub fn collection_with_ttl(id: i64, ttl: &str) -> CollectionInfo {
    collection(id).with_property(COLLECTION_TTL_KEY, ttl)
}

pub fn flushed_segment(
    id: i64,
    collection_id: i64,
    channel: &str,
    rows: i64,
    max_rows: i64,
) -> SegmentInfo {
    let mut segment = SegmentInfo::new(
        SegmentId::new(id),
        CollectionId::new(collection_id),
        PartitionId::new(1),
        channel,
        max_rows,
    );
    segment.state = SegmentState::Flushed;
    segment.num_of_rows = rows;
    segment.binlogs = vec![FieldBinlog::new(
        FieldId::new(201),
        vec![Binlog::new(format!("insert/{id}"), rows, rows * 512)],
    )];
    segment
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Records every plan it is handed.
#[derive(Default)]
pub struct SpyHandler {
    plans: Mutex<Vec<(CompactionSignal, CompactionPlan)>>,
    full: AtomicBool,
    reject: AtomicBool,
}

impl SpyHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_full(&self, full: bool) {
        self.full.store(full, Ordering::SeqCst);
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn plans(&self) -> Vec<CompactionPlan> {
        self.plans.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn signals(&self) -> Vec<CompactionSignal> {
        self.plans.lock().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn plan_sizes(&self) -> Vec<usize> {
        self.plans
            .lock()
            .iter()
            .map(|(_, p)| p.segment_binlogs.len())
            .collect()
    }

    pub fn planned_segments(&self) -> HashSet<SegmentId> {
        self.plans
            .lock()
            .iter()
            .flat_map(|(_, p)| p.segment_ids())
            .collect()
    }
}

#[async_trait]
impl ExecutionHandler for SpyHandler {
    async fn exec_compaction_plan(
        &self,
        signal: &CompactionSignal,
        plan: CompactionPlan,
    ) -> CoreResult<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(CoreError::dispatch("spy rejects every plan"));
        }
        self.plans.lock().push((signal.clone(), plan));
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.full.load(Ordering::SeqCst)
    }

    fn get_compaction_tasks_by_signal_id(&self, _signal_id: SignalId) -> Vec<CompactionTask> {
        Vec::new()
    }
}

/// Allocator whose every call fails.
pub struct FailingAllocator;

#[async_trait]
impl Allocator for FailingAllocator {
    async fn alloc_timestamp(&self) -> CoreResult<Timestamp> {
        Err(CoreError::allocation("timestamp oracle unavailable"))
    }

    async fn alloc_id(&self) -> CoreResult<UniqueId> {
        Err(CoreError::allocation("id allocator unavailable"))
    }
}

/// Index provider reporting disk indexes for chosen collections.
#[derive(Default)]
pub struct MockIndexProvider {
    disk: Mutex<HashSet<CollectionId>>,
    failing: Mutex<HashSet<CollectionId>>,
}

impl MockIndexProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_disk_index(&self, collection_id: i64) {
        self.disk.lock().insert(CollectionId::new(collection_id));
    }

    pub fn fail_for(&self, collection_id: i64) {
        self.failing.lock().insert(CollectionId::new(collection_id));
    }
}

#[async_trait]
impl IndexInfoProvider for MockIndexProvider {
    async fn describe_index(&self, collection_id: CollectionId) -> CoreResult<bool> {
        if self.failing.lock().contains(&collection_id) {
            return Err(CoreError::index_lookup("index service unavailable"));
        }
        Ok(self.disk.lock().contains(&collection_id))
    }
}

/// Compute cluster driven by the test.
#[derive(Default)]
pub struct ScriptedCluster {
    watchers: Mutex<HashMap<String, NodeId>>,
    dispatched: Mutex<Vec<(NodeId, CompactionPlan)>>,
    states: Mutex<HashMap<PlanId, NodeCompactionState>>,
    fail_dispatch: AtomicBool,
}

impl ScriptedCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn watch(&self, channel: &str, node: i64) {
        self.watchers
            .lock()
            .insert(channel.to_string(), NodeId::new(node));
    }

    pub fn set_fail_dispatch(&self, fail: bool) {
        self.fail_dispatch.store(fail, Ordering::SeqCst);
    }

    pub fn dispatched(&self) -> Vec<(NodeId, CompactionPlan)> {
        self.dispatched.lock().clone()
    }

    pub fn set_state(&self, plan_id: PlanId, state: NodeCompactionState) {
        self.states.lock().insert(plan_id, state);
    }

    pub fn forget(&self, plan_id: PlanId) {
        self.states.lock().remove(&plan_id);
    }
}

#[async_trait]
impl ComputeCluster for ScriptedCluster {
    async fn find_watcher(&self, channel: &str) -> CoreResult<NodeId> {
        self.watchers
            .lock()
            .get(channel)
            .copied()
            .ok_or_else(|| CoreError::not_found("channel watcher", channel))
    }

    async fn compaction(&self, node: NodeId, plan: &CompactionPlan) -> CoreResult<()> {
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(CoreError::dispatch("node refused the plan"));
        }
        self.dispatched.lock().push((node, plan.clone()));
        self.states
            .lock()
            .insert(plan.plan_id, NodeCompactionState::Executing);
        Ok(())
    }

    async fn get_compaction_states(&self) -> CoreResult<HashMap<PlanId, NodeCompactionState>> {
        Ok(self.states.lock().clone())
    }
}
