use std::collections::BTreeMap;
use std::sync::Arc;

use datacoord_core::metrics::{COMPACTION_PLANS, COMPACTION_SIGNALS, TRIGGER_DURATION};
use datacoord_core::{
    tso, Allocator, CollectionId, CollectionInfo, CoreError, CoreResult, IndexInfoProvider,
    MetadataStore, PartitionId, PlanId, SegmentId, SegmentInfo, SegmentLockChecker, SignalId,
    Timestamp,
};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::handler::ExecutionHandler;
use crate::plan::CompactionPlan;
use crate::planner::generate_plans;
use crate::policy::{CompactTime, CompactionPolicy};
use crate::signal::CompactionSignal;

type Worker = (CancellationToken, JoinHandle<mpsc::Receiver<CompactionSignal>>);

/// Decides when segments are compacted and turns the decision into plans.
///
/// Signals arrive from the periodic sweep, from flush notifications through
/// a bounded inbox, or from explicit force requests. Signal handling is
/// serialized: one evaluation runs at a time.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use datacoord_compaction::{CompactionPolicy, CompactionTrigger, ExecutionHandler};
/// # use datacoord_core::{Allocator, CollectionId, IndexInfoProvider, MetadataStore, SegmentLockChecker};
/// # async fn example(
/// #     meta: Arc<dyn MetadataStore>,
/// #     allocator: Arc<dyn Allocator>,
/// #     handler: Arc<dyn ExecutionHandler>,
/// #     index: Arc<dyn IndexInfoProvider>,
/// #     locks: Arc<dyn SegmentLockChecker>,
/// # ) -> datacoord_core::CoreResult<()> {
/// let trigger = CompactionTrigger::new(meta, allocator, handler, index, locks, CompactionPolicy::default());
/// trigger.start();
///
/// let plan_id = trigger.force_trigger_compaction(CollectionId::new(1)).await?;
/// println!("submitted plan {plan_id}");
///
/// trigger.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct CompactionTrigger {
    meta: Arc<dyn MetadataStore>,
    allocator: Arc<dyn Allocator>,
    handler: Arc<dyn ExecutionHandler>,
    index: Arc<dyn IndexInfoProvider>,
    locks: Arc<dyn SegmentLockChecker>,
    policy: CompactionPolicy,
    signal_lock: Arc<tokio::sync::Mutex<()>>,
    /// Set on the background loop's copy only.
    cancel: Option<CancellationToken>,
    signals: mpsc::Sender<CompactionSignal>,
    inbox: Arc<Mutex<Option<mpsc::Receiver<CompactionSignal>>>>,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl CompactionTrigger {
    pub fn new(
        meta: Arc<dyn MetadataStore>,
        allocator: Arc<dyn Allocator>,
        handler: Arc<dyn ExecutionHandler>,
        index: Arc<dyn IndexInfoProvider>,
        locks: Arc<dyn SegmentLockChecker>,
        policy: CompactionPolicy,
    ) -> Self {
        let (signals, inbox) = mpsc::channel(policy.signal_buffer.max(1));
        Self {
            meta,
            allocator,
            handler,
            index,
            locks,
            policy,
            signal_lock: Arc::new(tokio::sync::Mutex::new(())),
            cancel: None,
            signals,
            inbox: Arc::new(Mutex::new(Some(inbox))),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn policy(&self) -> &CompactionPolicy {
        &self.policy
    }

    /// Starts the background loop serving the periodic sweep and the inbox.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            tracing::warn!("Compaction trigger already running");
            return;
        }
        let Some(mut inbox) = self.inbox.lock().take() else {
            tracing::error!("Compaction trigger inbox is unavailable");
            return;
        };

        let token = CancellationToken::new();
        let trigger = self.clone_for_worker(token.clone());
        let interval = self.policy.global_interval;
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => trigger.trigger_compaction().await,
                    signal = inbox.recv() => match signal {
                        Some(signal) if signal.is_global => trigger.handle_global_signal(&signal).await,
                        Some(signal) => trigger.handle_signal(&signal).await,
                        None => break,
                    },
                }
            }
            inbox
        });

        *worker = Some((token, handle));
        tracing::info!("Compaction trigger started (interval: {:?})", interval);
    }

    /// Stops the background loop. Signals still queued are kept for the next start.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some((token, handle)) = worker else {
            return;
        };
        token.cancel();
        match handle.await {
            Ok(inbox) => *self.inbox.lock() = Some(inbox),
            Err(e) => tracing::error!(error = %e, "Compaction trigger loop panicked"),
        }
        tracing::info!("Compaction trigger stopped");
    }

    /// Queues a signal for the background loop without waiting.
    ///
    /// # Errors
    ///
    /// Fails when the inbox is full.
    pub fn enqueue_signal(&self, signal: CompactionSignal) -> CoreResult<()> {
        self.signals.try_send(signal).map_err(|e| match e {
            TrySendError::Full(signal) => {
                tracing::warn!(signal_id = %signal.id, "Compaction signal inbox is full");
                CoreError::invalid_state("compaction signal inbox is full")
            }
            TrySendError::Closed(_) => CoreError::internal("compaction signal inbox is closed"),
        })
    }

    /// Asks for the neighborhood of a freshly flushed segment to be evaluated.
    pub async fn notify_segment_flushed(
        &self,
        collection_id: CollectionId,
        segment_id: SegmentId,
    ) -> CoreResult<()> {
        if !self.policy.enable_auto_compaction {
            return Ok(());
        }
        let id = self.alloc_signal_id().await?;
        self.enqueue_signal(CompactionSignal::segment(id, collection_id, segment_id))
    }

    /// Periodic sweep over every collection. Failures are logged.
    pub async fn trigger_compaction(&self) {
        if !self.policy.enable_auto_compaction {
            return;
        }
        match self.alloc_signal_id().await {
            Ok(id) => self.handle_global_signal(&CompactionSignal::global(id)).await,
            Err(e) => tracing::warn!(error = %e, "Skipping compaction sweep"),
        }
    }

    /// Compacts every eligible segment of a collection right away.
    ///
    /// Returns the id of the first submitted plan.
    pub async fn force_trigger_compaction(&self, collection_id: CollectionId) -> CoreResult<PlanId> {
        let _guard = self.signal_lock.lock().await;
        let signal = CompactionSignal::collection(self.alloc_signal_id().await?, collection_id, true);
        COMPACTION_SIGNALS
            .with_label_values(&[signal.kind(), signal.trigger()])
            .inc();
        let _timer = TRIGGER_DURATION
            .with_label_values(&[signal.kind()])
            .start_timer();

        let plans = self.plan_collection(&signal, collection_id).await?;
        if plans.is_empty() {
            return Err(CoreError::nothing_to_compact(collection_id));
        }

        let submitted = self.submit_plans(&signal, plans).await?;
        let first = submitted.first().copied().ok_or_else(|| {
            CoreError::dispatch(format!(
                "no compaction plan was accepted for collection {collection_id}"
            ))
        })?;

        tracing::info!(
            collection_id = %collection_id,
            signal_id = %signal.id,
            plans = submitted.len(),
            plan_id = %first,
            "Forced compaction submitted"
        );
        Ok(first)
    }

    /// Evaluates the channel and partition of the segment named by `signal`.
    pub async fn handle_signal(&self, signal: &CompactionSignal) {
        let _guard = self.signal_lock.lock().await;
        COMPACTION_SIGNALS
            .with_label_values(&[signal.kind(), signal.trigger()])
            .inc();
        let _timer = TRIGGER_DURATION
            .with_label_values(&[signal.kind()])
            .start_timer();

        if let Err(e) = self.handle_segment_signal(signal).await {
            tracing::warn!(
                signal_id = %signal.id,
                segment_id = ?signal.segment_id,
                error = %e,
                "Compaction signal dropped"
            );
        }
    }

    /// Evaluates one collection, or every collection when the signal names none.
    pub async fn handle_global_signal(&self, signal: &CompactionSignal) {
        let _guard = self.signal_lock.lock().await;
        COMPACTION_SIGNALS
            .with_label_values(&[signal.kind(), signal.trigger()])
            .inc();
        let _timer = TRIGGER_DURATION
            .with_label_values(&[signal.kind()])
            .start_timer();

        let collections = match signal.collection_id {
            Some(id) => vec![id],
            None => self.meta.list_collections().await,
        };

        for collection_id in collections {
            if !signal.is_force && self.handler.is_full() {
                tracing::warn!(signal_id = %signal.id, "Compaction handler is full, ending sweep");
                break;
            }
            let result = match self.plan_collection(signal, collection_id).await {
                Ok(plans) => self.submit_plans(signal, plans).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(
                    collection_id = %collection_id,
                    signal_id = %signal.id,
                    error = %e,
                    "Skipping collection compaction"
                );
            }
        }
    }

    /// Time bounds for evaluating a collection at `ts`.
    pub async fn get_compact_time(
        &self,
        ts: Timestamp,
        collection_id: CollectionId,
    ) -> CoreResult<CompactTime> {
        let collection = self.meta.get_collection(collection_id).await?;
        self.compact_time_for(ts, &collection)
    }

    /// Fresh timestamp from the allocator.
    pub async fn alloc_ts(&self) -> CoreResult<Timestamp> {
        self.allocator.alloc_timestamp().await
    }

    /// Assigns a plan id and start time, and stamps the execution timeout.
    pub async fn fill_origin_plan(&self, plan: &mut CompactionPlan) -> CoreResult<()> {
        let id = self.allocator.alloc_id().await?;
        let start_time = self.allocator.alloc_timestamp().await?;
        plan.plan_id = PlanId::new(id);
        plan.start_time = start_time;
        plan.timeout_in_seconds = self.policy.timeout_secs;
        Ok(())
    }

    fn compact_time_for(&self, ts: Timestamp, collection: &CollectionInfo) -> CoreResult<CompactTime> {
        let travel_time = tso::subtract(ts, self.policy.retention_duration);
        let expire_time = match collection.ttl()? {
            Some(ttl) => tso::subtract(ts, ttl),
            None => 0,
        };
        Ok(CompactTime {
            travel_time,
            expire_time,
        })
    }

    async fn alloc_signal_id(&self) -> CoreResult<SignalId> {
        Ok(SignalId::new(self.allocator.alloc_id().await?))
    }

    async fn evaluation_ts(&self, signal: &CompactionSignal) -> CoreResult<Timestamp> {
        if signal.is_force {
            self.alloc_ts().await
        } else {
            Ok(tso::now())
        }
    }

    fn is_candidate(&self, segment: &SegmentInfo) -> bool {
        segment.state.is_healthy()
            && segment.state.is_flushed()
            && !segment.is_fake
            && !segment.is_compacting
            && !self.locks.has_segment_lock(segment.id)
    }

    /// Applies the disk-index row capacity to `segments` and to the store.
    async fn resolve_capacity(
        &self,
        collection: &CollectionInfo,
        segments: &mut [SegmentInfo],
    ) -> CoreResult<()> {
        let bytes_per_vector = collection.schema.bytes_per_vector()?;
        let has_disk_index = self
            .index
            .describe_index(collection.id)
            .await
            .map_err(|e| CoreError::index_lookup(e.to_string()))?;
        if !has_disk_index {
            return Ok(());
        }

        let max_rows = self.policy.disk_segment_max_rows(bytes_per_vector);
        for segment in segments.iter_mut().filter(|s| s.max_row_num != max_rows) {
            self.meta
                .update_segment(segment.id, Box::new(move |s| s.max_row_num = max_rows))
                .await?;
            tracing::debug!(
                segment_id = %segment.id,
                from = segment.max_row_num,
                to = max_rows,
                "Updated segment capacity for disk index"
            );
            segment.max_row_num = max_rows;
        }
        Ok(())
    }

    /// Unfilled plans for every channel and partition of a collection.
    async fn plan_collection(
        &self,
        signal: &CompactionSignal,
        collection_id: CollectionId,
    ) -> CoreResult<Vec<CompactionPlan>> {
        let collection = self.meta.get_collection(collection_id).await?;
        collection.schema.vector_dimension()?;
        let ts = self.evaluation_ts(signal).await?;
        let compact_time = self.compact_time_for(ts, &collection)?;

        let mut segments: Vec<SegmentInfo> = self
            .meta
            .list_segments(collection_id)
            .await
            .into_iter()
            .filter(|s| self.is_candidate(s))
            .collect();
        if segments.is_empty() {
            return Ok(Vec::new());
        }
        self.resolve_capacity(&collection, &mut segments).await?;

        let mut groups: BTreeMap<(PartitionId, String), Vec<SegmentInfo>> = BTreeMap::new();
        for segment in segments {
            groups
                .entry((segment.partition_id, segment.insert_channel.clone()))
                .or_default()
                .push(segment);
        }

        Ok(groups
            .into_values()
            .flat_map(|group| generate_plans(group, signal.is_force, &compact_time, &self.policy))
            .collect())
    }

    async fn handle_segment_signal(&self, signal: &CompactionSignal) -> CoreResult<()> {
        let segment_id = signal
            .segment_id
            .ok_or_else(|| CoreError::invalid_state("segment signal without segment id"))?;
        if self.handler.is_full() {
            tracing::warn!(signal_id = %signal.id, "Compaction handler is full, dropping signal");
            return Ok(());
        }
        let Some(segment) = self.meta.get_segment(segment_id).await else {
            tracing::debug!(segment_id = %segment_id, "Signalled segment no longer exists");
            return Ok(());
        };

        let collection = self.meta.get_collection(segment.collection_id).await?;
        collection.schema.vector_dimension()?;
        let ts = self.evaluation_ts(signal).await?;
        let compact_time = self.compact_time_for(ts, &collection)?;

        let mut segments: Vec<SegmentInfo> = self
            .meta
            .list_segments(segment.collection_id)
            .await
            .into_iter()
            .filter(|s| {
                s.partition_id == segment.partition_id
                    && s.insert_channel == segment.insert_channel
                    && self.is_candidate(s)
            })
            .collect();
        if segments.is_empty() {
            return Ok(());
        }
        self.resolve_capacity(&collection, &mut segments).await?;

        let plans = generate_plans(segments, signal.is_force, &compact_time, &self.policy);
        self.submit_plans(signal, plans).await?;
        Ok(())
    }

    /// Fills and hands plans to the execution handler. Returns accepted plan ids.
    async fn submit_plans(
        &self,
        signal: &CompactionSignal,
        plans: Vec<CompactionPlan>,
    ) -> CoreResult<Vec<PlanId>> {
        let mut submitted = Vec::with_capacity(plans.len());
        for mut plan in plans {
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                tracing::info!(signal_id = %signal.id, "Compaction trigger stopping, plans discarded");
                break;
            }
            if !signal.is_force && self.handler.is_full() {
                tracing::warn!(signal_id = %signal.id, "Compaction handler is full, deferring plans");
                break;
            }

            self.fill_origin_plan(&mut plan).await?;
            let plan_id = plan.plan_id;
            let segments = plan.segment_binlogs.len();
            let channel = plan.channel.clone();
            match self.handler.exec_compaction_plan(signal, plan).await {
                Ok(()) => {
                    COMPACTION_PLANS.with_label_values(&["submitted"]).inc();
                    tracing::info!(
                        plan_id = %plan_id,
                        signal_id = %signal.id,
                        channel = %channel,
                        segments,
                        "Submitted compaction plan"
                    );
                    submitted.push(plan_id);
                }
                Err(e) => {
                    COMPACTION_PLANS.with_label_values(&["rejected"]).inc();
                    tracing::warn!(
                        plan_id = %plan_id,
                        signal_id = %signal.id,
                        error = %e,
                        "Compaction plan rejected"
                    );
                }
            }
        }
        Ok(submitted)
    }

    /// Clone sharing every handle, for the background loop
    fn clone_for_worker(&self, cancel: CancellationToken) -> Self {
        Self {
            meta: Arc::clone(&self.meta),
            allocator: Arc::clone(&self.allocator),
            handler: Arc::clone(&self.handler),
            index: Arc::clone(&self.index),
            locks: Arc::clone(&self.locks),
            policy: self.policy.clone(),
            signal_lock: Arc::clone(&self.signal_lock),
            cancel: Some(cancel),
            signals: self.signals.clone(),
            inbox: Arc::clone(&self.inbox),
            worker: Arc::clone(&self.worker),
        }
    }
}
