mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use datacoord_compaction::{CompactionPolicy, CompactionSignal, CompactionTrigger, CompactionType};
use datacoord_core::{
    tso, Allocator, CollectionId, CoreError, DataCoordConfig, LockTaskId, MetadataStore, NodeId,
    SegmentId, SignalId,
};
use datacoord_meta::{LocalAllocator, MemoryCatalog, SegmentMeta, SegmentReferenceManager};

struct TestContext {
    meta: Arc<SegmentMeta>,
    handler: Arc<SpyHandler>,
    index: Arc<MockIndexProvider>,
    locks: Arc<SegmentReferenceManager>,
    trigger: CompactionTrigger,
}

fn setup_with(policy: CompactionPolicy, allocator: Arc<dyn Allocator>) -> TestContext {
    init_tracing();
    let meta = Arc::new(SegmentMeta::new(Arc::new(MemoryCatalog::new())));
    let handler = SpyHandler::new();
    let index = MockIndexProvider::new();
    let locks = Arc::new(SegmentReferenceManager::new());
    let trigger = CompactionTrigger::new(
        meta.clone(),
        allocator,
        handler.clone(),
        index.clone(),
        locks.clone(),
        policy,
    );
    TestContext {
        meta,
        handler,
        index,
        locks,
        trigger,
    }
}

fn setup() -> TestContext {
    setup_with(
        CompactionPolicy::default(),
        Arc::new(LocalAllocator::with_start_id(1000)),
    )
}

async fn add_segments(ctx: &TestContext, segments: Vec<datacoord_core::SegmentInfo>) {
    for segment in segments {
        ctx.meta.add_segment(segment).await.unwrap();
    }
}

#[tokio::test]
async fn force_compaction_submits_plan() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));
    add_segments(
        &ctx,
        vec![
            flushed_segment(1, 2, "ch1", 100, 300),
            flushed_segment(2, 2, "ch1", 100, 300),
        ],
    )
    .await;

    let plan_id = ctx
        .trigger
        .force_trigger_compaction(CollectionId::new(2))
        .await
        .unwrap();

    let plans = ctx.handler.plans();
    assert_eq!(plans.len(), 1);
    let plan = &plans[0];
    assert_eq!(plan.plan_id, plan_id);
    assert_eq!(plan.channel, "ch1");
    assert_eq!(plan.compaction_type, CompactionType::Mix);
    assert_eq!(plan.timeout_in_seconds, 180);
    assert!(plan.start_time > 0);
    assert!(plan.timetravel > 0 && plan.timetravel < plan.start_time);

    let mut ids = plan.segment_ids();
    ids.sort();
    assert_eq!(ids, vec![SegmentId::new(1), SegmentId::new(2)]);
    assert!(ctx.handler.signals()[0].is_force);
}

#[tokio::test]
async fn force_compaction_with_disk_index_updates_capacity() {
    let ctx = setup();
    ctx.meta.add_collection(collection(1000));
    ctx.index.with_disk_index(1000);
    add_segments(&ctx, vec![flushed_segment(1, 1000, "ch1", 100, 300)]).await;

    ctx.trigger
        .force_trigger_compaction(CollectionId::new(1000))
        .await
        .unwrap();

    let segment = ctx.meta.get_segment(SegmentId::new(1)).await.unwrap();
    assert_eq!(segment.max_row_num, 4_194_304);
    assert_eq!(ctx.handler.plans().len(), 1);
}

#[tokio::test]
async fn force_compaction_without_vector_field_fails() {
    let ctx = setup();
    ctx.meta.add_collection(collection_without_vector(2000));
    add_segments(&ctx, vec![flushed_segment(1, 2000, "ch1", 100, 300)]).await;

    let err = ctx
        .trigger
        .force_trigger_compaction(CollectionId::new(2000))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Schema { .. }));
    assert!(ctx.handler.plans().is_empty());
}

#[tokio::test]
async fn force_compaction_with_bad_dimension_fails() {
    let ctx = setup();
    ctx.meta.add_collection(collection_with_vector(3000, None));
    ctx.meta
        .add_collection(collection_with_vector(4000, Some("128error")));
    add_segments(
        &ctx,
        vec![
            flushed_segment(1, 3000, "ch1", 100, 300),
            flushed_segment(2, 4000, "ch1", 100, 300),
        ],
    )
    .await;

    for collection_id in [3000, 4000] {
        let result = ctx
            .trigger
            .force_trigger_compaction(CollectionId::new(collection_id))
            .await;
        assert!(matches!(result, Err(CoreError::Schema { .. })));
    }
    assert!(ctx.handler.plans().is_empty());
}

#[tokio::test]
async fn force_compaction_with_bad_ttl_fails() {
    let ctx = setup();
    ctx.meta.add_collection(collection_with_ttl(2, "error"));
    add_segments(&ctx, vec![flushed_segment(1, 2, "ch1", 100, 300)]).await;

    let result = ctx
        .trigger
        .force_trigger_compaction(CollectionId::new(2))
        .await;
    assert!(matches!(result, Err(CoreError::Schema { .. })));
    assert!(ctx.handler.plans().is_empty());
}

#[tokio::test]
async fn force_compaction_with_failing_allocator_fails() {
    let ctx = setup_with(CompactionPolicy::default(), Arc::new(FailingAllocator));
    ctx.meta.add_collection(collection(2));
    add_segments(&ctx, vec![flushed_segment(1, 2, "ch1", 100, 300)]).await;

    let result = ctx
        .trigger
        .force_trigger_compaction(CollectionId::new(2))
        .await;
    assert!(matches!(result, Err(CoreError::Allocation { .. })));
    assert!(ctx.handler.plans().is_empty());
}

#[tokio::test]
async fn force_compaction_with_index_failure_fails() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));
    ctx.index.fail_for(2);
    add_segments(&ctx, vec![flushed_segment(1, 2, "ch1", 100, 300)]).await;

    let result = ctx
        .trigger
        .force_trigger_compaction(CollectionId::new(2))
        .await;
    assert!(matches!(result, Err(CoreError::IndexLookup { .. })));
}

#[tokio::test]
async fn force_compaction_skips_locked_segments() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));
    add_segments(
        &ctx,
        vec![
            flushed_segment(1, 2, "ch1", 100, 300),
            flushed_segment(2, 2, "ch1", 100, 300),
        ],
    )
    .await;
    ctx.locks
        .add_segments_lock(LockTaskId::new(9), NodeId::new(1), &[SegmentId::new(2)])
        .unwrap();

    ctx.trigger
        .force_trigger_compaction(CollectionId::new(2))
        .await
        .unwrap();
    assert_eq!(
        ctx.handler.plans()[0].segment_ids(),
        vec![SegmentId::new(1)]
    );
    assert!(!ctx.handler.planned_segments().contains(&SegmentId::new(2)));
}

#[tokio::test]
async fn force_compaction_ignores_ineligible_segments() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));

    let mut growing = flushed_segment(1, 2, "ch1", 100, 300);
    growing.state = datacoord_core::SegmentState::Growing;
    let mut fake = flushed_segment(2, 2, "ch1", 100, 300);
    fake.is_fake = true;
    let mut dropped = flushed_segment(3, 2, "ch1", 100, 300);
    dropped.state = datacoord_core::SegmentState::Dropped;
    let compacting = flushed_segment(4, 2, "ch1", 100, 300);
    add_segments(&ctx, vec![growing, fake, dropped, compacting]).await;
    ctx.meta
        .set_segments_compacting(&[SegmentId::new(4)], true)
        .await;

    let err = ctx
        .trigger
        .force_trigger_compaction(CollectionId::new(2))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NothingToCompact { .. }));
    assert!(ctx.handler.plans().is_empty());
}

#[tokio::test]
async fn force_compaction_rejected_by_handler_fails() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));
    add_segments(&ctx, vec![flushed_segment(1, 2, "ch1", 100, 300)]).await;
    ctx.handler.set_reject(true);

    let err = ctx
        .trigger
        .force_trigger_compaction(CollectionId::new(2))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Dispatch { .. }));
}

#[tokio::test]
async fn force_compaction_bounded_by_max_segments() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));
    add_segments(
        &ctx,
        (1..=50)
            .map(|i| flushed_segment(i, 2, "ch1", 100, 300_000))
            .collect(),
    )
    .await;

    let first = ctx
        .trigger
        .force_trigger_compaction(CollectionId::new(2))
        .await
        .unwrap();
    assert_eq!(ctx.handler.plan_sizes(), vec![30, 20]);

    let plans = ctx.handler.plans();
    assert_eq!(plans[0].plan_id, first);
    assert!(plans[0].plan_id < plans[1].plan_id);
}

#[tokio::test]
async fn global_signal_packs_small_segments() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));

    let mut rows = vec![510, 500, 480, 300, 250, 200, 128, 128, 128, 127];
    rows.extend([40; 10]);
    rows.extend([20; 10]);
    rows.extend([10; 20]);
    add_segments(
        &ctx,
        rows.iter()
            .enumerate()
            .map(|(i, r)| flushed_segment(i as i64 + 1, 2, "ch1", *r, 512))
            .collect(),
    )
    .await;

    ctx.trigger
        .handle_global_signal(&CompactionSignal::global(SignalId::new(1)))
        .await;
    assert_eq!(ctx.handler.plan_sizes(), vec![24, 12, 8]);
}

#[tokio::test]
async fn global_signal_skips_broken_collection() {
    let ctx = setup();
    ctx.meta.add_collection(collection_with_ttl(1, "error"));
    ctx.meta.add_collection(collection(2));
    add_segments(
        &ctx,
        vec![
            flushed_segment(1, 1, "ch1", 10, 512),
            flushed_segment(2, 1, "ch1", 10, 512),
            flushed_segment(3, 1, "ch1", 10, 512),
            flushed_segment(4, 2, "ch2", 10, 512),
            flushed_segment(5, 2, "ch2", 10, 512),
            flushed_segment(6, 2, "ch2", 10, 512),
        ],
    )
    .await;

    ctx.trigger
        .handle_global_signal(&CompactionSignal::global(SignalId::new(1)))
        .await;

    let plans = ctx.handler.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].channel, "ch2");
}

#[tokio::test]
async fn global_signal_groups_by_channel() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));
    add_segments(
        &ctx,
        vec![
            flushed_segment(1, 2, "ch1", 10, 512),
            flushed_segment(2, 2, "ch2", 10, 512),
            flushed_segment(3, 2, "ch1", 10, 512),
            flushed_segment(4, 2, "ch2", 10, 512),
        ],
    )
    .await;

    ctx.trigger
        .handle_global_signal(&CompactionSignal::collection(
            SignalId::new(1),
            CollectionId::new(2),
            true,
        ))
        .await;

    for plan in ctx.handler.plans() {
        for id in plan.segment_ids() {
            let segment = ctx.meta.get_segment(id).await.unwrap();
            assert_eq!(segment.insert_channel, plan.channel);
        }
    }
    assert_eq!(ctx.handler.plan_sizes(), vec![2, 2]);
}

#[tokio::test]
async fn full_handler_defers_sweep() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));
    add_segments(
        &ctx,
        (1..=5)
            .map(|i| flushed_segment(i, 2, "ch1", 10, 512))
            .collect(),
    )
    .await;
    ctx.handler.set_full(true);

    ctx.trigger.trigger_compaction().await;
    assert!(ctx.handler.plans().is_empty());

    ctx.handler.set_full(false);
    ctx.trigger.trigger_compaction().await;
    assert_eq!(ctx.handler.plans().len(), 1);
}

#[tokio::test]
async fn segment_signal_plans_only_its_channel() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));
    add_segments(
        &ctx,
        vec![
            flushed_segment(1, 2, "ch1", 10, 512),
            flushed_segment(2, 2, "ch1", 10, 512),
            flushed_segment(3, 2, "ch1", 10, 512),
            flushed_segment(4, 2, "ch2", 10, 512),
            flushed_segment(5, 2, "ch2", 10, 512),
            flushed_segment(6, 2, "ch2", 10, 512),
        ],
    )
    .await;

    ctx.trigger
        .handle_signal(&CompactionSignal::segment(
            SignalId::new(1),
            CollectionId::new(2),
            SegmentId::new(4),
        ))
        .await;

    let plans = ctx.handler.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].channel, "ch2");

    // Unknown segments are ignored.
    ctx.trigger
        .handle_signal(&CompactionSignal::segment(
            SignalId::new(2),
            CollectionId::new(2),
            SegmentId::new(99),
        ))
        .await;
    assert_eq!(ctx.handler.plans().len(), 1);
}

#[tokio::test]
async fn compact_time_follows_retention_and_ttl() {
    let ctx = setup();
    ctx.meta.add_collection(collection_with_ttl(1, "10"));
    ctx.meta.add_collection(collection_with_ttl(2, "error"));
    ctx.meta.add_collection(collection(3));

    let now = tso::now();
    let ct = ctx
        .trigger
        .get_compact_time(now, CollectionId::new(1))
        .await
        .unwrap();
    assert_eq!(
        ct.travel_time,
        tso::subtract(now, Duration::from_secs(432_000))
    );
    assert_eq!(ct.expire_time, tso::subtract(now, Duration::from_secs(10)));

    assert!(ctx
        .trigger
        .get_compact_time(now, CollectionId::new(2))
        .await
        .is_err());

    let ct = ctx
        .trigger
        .get_compact_time(now, CollectionId::new(3))
        .await
        .unwrap();
    assert_eq!(ct.expire_time, 0);
}

#[tokio::test]
async fn alloc_ts_surfaces_allocator_errors() {
    let ctx = setup();
    assert!(ctx.trigger.alloc_ts().await.unwrap() > 0);

    let failing = setup_with(CompactionPolicy::default(), Arc::new(FailingAllocator));
    assert!(failing.trigger.alloc_ts().await.is_err());
}

#[tokio::test]
async fn background_loop_serves_flush_notifications() {
    let ctx = setup();
    ctx.meta.add_collection(collection(2));
    add_segments(
        &ctx,
        (1..=3)
            .map(|i| flushed_segment(i, 2, "ch1", 10, 512))
            .collect(),
    )
    .await;

    ctx.trigger.start();
    ctx.trigger.start();
    ctx.trigger
        .notify_segment_flushed(CollectionId::new(2), SegmentId::new(3))
        .await
        .unwrap();

    let handler = ctx.handler.clone();
    wait_until(|| {
        let handler = handler.clone();
        async move { handler.plans().len() == 1 }
    })
    .await;
    assert!(!ctx.handler.signals()[0].is_global);

    tokio::time::timeout(Duration::from_secs(2), ctx.trigger.stop())
        .await
        .expect("trigger loop did not stop");
}

#[tokio::test]
async fn periodic_sweep_runs_on_interval() {
    let mut config = DataCoordConfig::default();
    config.compaction.global_interval_secs = 1;
    let ctx = setup_with(
        CompactionPolicy::from_config(&config),
        Arc::new(LocalAllocator::new()),
    );
    assert_eq!(ctx.trigger.policy().global_interval, Duration::from_secs(1));

    ctx.meta.add_collection(collection(2));
    add_segments(
        &ctx,
        (1..=3)
            .map(|i| flushed_segment(i, 2, "ch1", 10, 512))
            .collect(),
    )
    .await;

    ctx.trigger.start();
    let handler = ctx.handler.clone();
    wait_until(|| {
        let handler = handler.clone();
        async move { !handler.plans().is_empty() }
    })
    .await;
    ctx.trigger.stop().await;

    assert!(ctx.handler.signals()[0].is_global);
}

#[tokio::test]
async fn auto_compaction_disabled_ignores_flushes() {
    let mut config = DataCoordConfig::default();
    config.compaction.enable_auto_compaction = false;
    let ctx = setup_with(
        CompactionPolicy::from_config(&config),
        Arc::new(LocalAllocator::new()),
    );
    ctx.meta.add_collection(collection(2));
    add_segments(
        &ctx,
        (1..=3)
            .map(|i| flushed_segment(i, 2, "ch1", 10, 512))
            .collect(),
    )
    .await;

    ctx.trigger
        .notify_segment_flushed(CollectionId::new(2), SegmentId::new(1))
        .await
        .unwrap();
    ctx.trigger.trigger_compaction().await;
    assert!(ctx.handler.plans().is_empty());

    // Forced compaction still works.
    ctx.trigger
        .force_trigger_compaction(CollectionId::new(2))
        .await
        .unwrap();
    assert_eq!(ctx.handler.plans().len(), 1);
}

#[tokio::test]
async fn inbox_rejects_signals_when_full() {
    let mut config = DataCoordConfig::default();
    config.compaction.signal_buffer = 1;
    let ctx = setup_with(
        CompactionPolicy::from_config(&config),
        Arc::new(LocalAllocator::new()),
    );

    ctx.trigger
        .enqueue_signal(CompactionSignal::global(SignalId::new(1)))
        .unwrap();
    let err = ctx
        .trigger
        .enqueue_signal(CompactionSignal::global(SignalId::new(2)))
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }));
}

#[tokio::test]
async fn force_compaction_works_after_stop() {
    let ctx = setup();
    ctx.meta.add_collection(collection(1));
    add_segments(
        &ctx,
        (1..=3)
            .map(|i| flushed_segment(i, 1, "ch1", 10, 512))
            .collect(),
    )
    .await;

    ctx.trigger.start();
    ctx.trigger.stop().await;

    let plan_id = ctx
        .trigger
        .force_trigger_compaction(CollectionId::new(1))
        .await
        .unwrap();
    let plans = ctx.handler.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].plan_id, plan_id);
    assert_eq!(plans[0].segment_binlogs.len(), 3);

    // The loop can be started again after a stop.
    ctx.trigger.start();
    ctx.trigger.stop().await;
}
