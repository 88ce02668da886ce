//! End-to-end collection scenarios: a full engine (poller, worker pool,
//! cache loader, stats sampler) driven against scripted mock targets with a
//! manually-advanced clock. Tokio time is paused so scheduler ticks and
//! probe delays cost no wall clock.

use std::sync::Arc;
use std::time::Duration;

use netpulse_collector::DataCollectionEngine;
use netpulse_kernel::events::DciEvent;
use netpulse_kernel::item::{self, CollectionItem, ItemFlags, ItemStatus};
use netpulse_kernel::probe::{CollectedData, ProbeReading, SourceKind};
use netpulse_testing::{
    ManualClock, MockTarget, RecordingEventSink, RecordingSession, StaticObjectIndex,
    context_with, make_item, settle_ticks, wait_until,
};

// ---------------------------------------------------------------------------
// 1. Plain agent polling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn plain_agent_polling_delivers_value_then_error() {
    let clock = ManualClock::at(1_000);
    let node = MockTarget::node(1, "edge-router");
    node.push_reading(ProbeReading::success("42"));
    node.push_reading(ProbeReading::comm_error());

    let index = StaticObjectIndex::new();
    index.add(node.clone());
    let item = make_item(101, "Agent.Uptime", SourceKind::NativeAgent, 60, &node);

    let ctx = Arc::new(context_with(clock.clone(), index).build());
    let engine = DataCollectionEngine::start(ctx.clone()).expect("engine starts");

    wait_until("first value forwarded", || node.value_count() == 1).await;
    {
        let values = node.values.lock();
        assert_eq!(values[0].item_id, 101);
        assert_eq!(values[0].timestamp, 1_000);
        assert_eq!(values[0].data, CollectedData::Value("42".into()));
    }
    assert_eq!(item.status(), ItemStatus::Active);

    clock.advance(60);
    wait_until("comm error forwarded", || node.error_count() == 1).await;
    {
        let errors = node.errors.lock();
        assert_eq!(errors[0], (101, false, 1_060));
    }
    // Comm errors cause no status change.
    assert_eq!(item.status(), ItemStatus::Active);
    assert_eq!(node.probe_count(), 2);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// 2. Unsupported -> recover
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unsupported_item_recovers_at_reduced_cadence() {
    let clock = ManualClock::at(10_000);
    let node = MockTarget::node(2, "branch-switch");
    node.push_reading(ProbeReading::not_supported());
    node.push_reading(ProbeReading::success("1"));

    let index = StaticObjectIndex::new();
    index.add(node.clone());
    let item = make_item(102, ".1.3.6.1.2.1.1.3.0", SourceKind::Snmp, 30, &node);
    item.set_snmp_port(161);

    let events = RecordingEventSink::new();
    let ctx = Arc::new(
        context_with(clock.clone(), index)
            .events(events.clone())
            .build(),
    );
    let engine = DataCollectionEngine::start(ctx.clone()).expect("engine starts");

    wait_until("item demoted", || item.status() == ItemStatus::NotSupported).await;
    assert_eq!(node.probe_count(), 1);
    // The per-item port override reached the probe.
    assert!(node.probe_log.lock()[0].starts_with("snmp:161:"));

    // Nominal cadence elapses without a poll: not-supported runs at 10x.
    clock.advance(299);
    settle_ticks(3).await;
    assert_eq!(node.probe_count(), 1);

    clock.advance(1); // t0 + 10 * 30
    wait_until("recovery poll delivered", || node.value_count() == 1).await;
    assert_eq!(item.status(), ItemStatus::Active);
    // Promotion happened before the value was forwarded downstream.
    assert_eq!(node.values.lock()[0].status_at_forward, ItemStatus::Active);

    let events = events.events.lock();
    assert!(matches!(events[0].1, DciEvent::DciUnsupported(_)));
    assert!(matches!(events[1].1, DciEvent::DciActive(_)));

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// 3. Cluster aggregation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cluster_items_aggregate_only_when_flagged() {
    let clock = ManualClock::at(5_000);
    let cluster = MockTarget::cluster(3, "db-cluster");
    cluster.set_default_reading(ProbeReading::success("7"));

    let index = StaticObjectIndex::new();
    index.add(cluster.clone());

    let aggregated = make_item(103, "Sessions.Total", SourceKind::NativeAgent, 30, &cluster);
    aggregated.set_flags(ItemFlags::default().with(item::flags::AGGREGATE_ON_CLUSTER));
    let ignored = make_item(104, "Sessions.Local", SourceKind::NativeAgent, 30, &cluster);

    let ctx = Arc::new(context_with(clock.clone(), index).build());
    let engine = DataCollectionEngine::start(ctx.clone()).expect("engine starts");

    wait_until("first aggregation", || cluster.value_count() == 1).await;
    clock.advance(30);
    wait_until("second aggregation", || cluster.value_count() == 2).await;
    clock.advance(30);
    wait_until("third aggregation", || cluster.value_count() == 3).await;

    assert_eq!(
        cluster
            .cluster_collections
            .load(std::sync::atomic::Ordering::SeqCst),
        3
    );
    // Every forwarded value came from the aggregating item; the unflagged
    // one was ignored silently but still had its poll accounted.
    assert!(cluster.values.lock().iter().all(|v| v.item_id == 103));
    assert_eq!(cluster.error_count(), 0);
    assert!(ignored.last_poll_time() >= 5_000);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// 4. Advanced schedule, minute resolution
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn minute_schedule_fires_exactly_once_at_the_boundary() {
    use chrono::TimeZone;
    let boundary = chrono::Local
        .with_ymd_and_hms(2024, 7, 1, 10, 0, 0)
        .single()
        .expect("unambiguous local time")
        .timestamp();

    let clock = ManualClock::at(boundary - 1); // 09:59:59
    let node = MockTarget::node(4, "core-fw");
    node.set_default_reading(ProbeReading::success("ok"));

    let index = StaticObjectIndex::new();
    index.add(node.clone());
    let item = make_item(105, "Status", SourceKind::Internal, 60, &node);
    item.set_flags(ItemFlags::default().with(item::flags::ADVANCED_SCHEDULE));
    item.set_schedules(vec!["0,30 * * * *".into()]);

    let ctx = Arc::new(context_with(clock.clone(), index).build());
    let engine = DataCollectionEngine::start(ctx.clone()).expect("engine starts");

    settle_ticks(2).await;
    assert_eq!(node.probe_count(), 0, "no poll before the minute boundary");

    clock.set(boundary);
    wait_until("boundary poll", || node.probe_count() == 1).await;

    clock.set(boundary + 1);
    settle_ticks(3).await;
    assert_eq!(node.probe_count(), 1, "exactly one poll within the minute");

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// 5. Force poll while disabled
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn force_poll_on_disabled_item_is_released_without_probing() {
    let clock = ManualClock::at(1_000);
    let node = MockTarget::node(5, "lab-node");
    let index = StaticObjectIndex::new();
    index.add(node.clone());

    let item = make_item(106, "Agent.Version", SourceKind::NativeAgent, 60, &node);
    item.set_status(ItemStatus::Disabled, None);

    let session = RecordingSession::new();
    item.request_force_poll(session.clone());

    let ctx = Arc::new(context_with(clock.clone(), index).build());
    let engine = DataCollectionEngine::start(ctx.clone()).expect("engine starts");

    wait_until("request released", || !item.has_force_poll()).await;
    assert_eq!(node.probe_count(), 0);
    assert!(session.notified.lock().is_empty());
    // The session handle itself was released, not leaked.
    assert_eq!(Arc::strong_count(&session), 1);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// 6. Shutdown during dispatch
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn shutdown_drains_in_flight_polls_and_clears_busy_flags() {
    let clock = ManualClock::at(1_000);
    let node = MockTarget::node(6, "dc-spine");
    node.set_default_reading(ProbeReading::success("1"));
    node.set_probe_delay(Duration::from_secs(2));

    let index = StaticObjectIndex::new();
    index.add(node.clone());
    let items: Vec<Arc<CollectionItem>> = (0..10)
        .map(|i| {
            make_item(
                200 + i,
                &format!("Net.Interface.BytesIn({i})"),
                SourceKind::NativeAgent,
                60,
                &node,
            )
        })
        .collect();

    let ctx = Arc::new(context_with(clock.clone(), index).build());
    let engine = DataCollectionEngine::start(ctx.clone()).expect("engine starts");

    // All ten items are in flight on the worker pool.
    wait_until("workers are dispatching", || {
        node.max_concurrent_probes
            .load(std::sync::atomic::Ordering::SeqCst)
            >= 2
    })
    .await;

    tokio::time::timeout(Duration::from_secs(600), engine.shutdown())
        .await
        .expect("shutdown must terminate in bounded time");

    // In-flight polls completed, nothing re-queued, no busy flag left.
    assert_eq!(node.probe_count(), 10);
    assert_eq!(ctx.collection_queue.len(), 0);
    for item in &items {
        assert!(!item.is_busy());
    }
}

// ---------------------------------------------------------------------------
// Downstream refusal and transformation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn refused_value_is_demoted_to_collection_error() {
    let clock = ManualClock::at(1_000);
    let node = MockTarget::node(7, "noisy-node");
    node.set_default_reading(ProbeReading::success("drop-me"));
    node.set_accept_values(false);

    let index = StaticObjectIndex::new();
    index.add(node.clone());
    let item = make_item(107, "Agent.Load", SourceKind::NativeAgent, 60, &node);

    let ctx = Arc::new(context_with(clock.clone(), index).build());
    let engine = DataCollectionEngine::start(ctx.clone()).expect("engine starts");

    wait_until("refusal registered", || node.error_count() == 1).await;
    assert_eq!(node.value_count(), 1);
    assert_eq!(node.errors.lock()[0], (107, false, 1_000));
    assert_eq!(item.status(), ItemStatus::Active);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transformation_script_rewrites_samples_end_to_end() {
    let clock = ManualClock::at(1_000);
    let node = MockTarget::node(8, "sensor-node");
    node.set_default_reading(ProbeReading::success("21"));

    let index = StaticObjectIndex::new();
    index.add(node.clone());
    let item = make_item(108, "Sensor.TempC", SourceKind::NativeAgent, 60, &node);

    let scripts = Arc::new(netpulse_scripting::RhaiScriptEnv::default());
    item.set_transformation_script(Some("value.parse_int() * 2"), scripts.as_ref());

    let ctx = Arc::new(
        context_with(clock.clone(), index)
            .scripts(scripts)
            .build(),
    );
    let engine = DataCollectionEngine::start(ctx.clone()).expect("engine starts");

    wait_until("transformed value", || node.value_count() == 1).await;
    assert_eq!(
        node.values.lock()[0].data,
        CollectedData::Value("42".into())
    );
    assert_eq!(item.transformation_source().as_deref(), Some("value.parse_int() * 2"));

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cache warm-up
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cold_cache_defers_scheduling_until_the_loader_runs() {
    let clock = ManualClock::at(1_000);
    let node = MockTarget::node(9, "hist-node");
    node.set_default_reading(ProbeReading::success("5"));

    let index = StaticObjectIndex::new();
    index.add(node.clone());
    let item = make_item(109, "Agent.Uptime", SourceKind::NativeAgent, 60, &node);
    item.require_cache(1_000);

    let ctx = Arc::new(context_with(clock.clone(), index).build());
    let engine = DataCollectionEngine::start(ctx.clone()).expect("engine starts");

    settle_ticks(2).await;
    assert_eq!(node.probe_count(), 0, "cold item must not be polled");

    engine.request_cache_reload(item.clone());
    wait_until("cache warmed", || item.is_cache_loaded()).await;
    wait_until("first poll after warm-up", || node.probe_count() == 1).await;

    engine.shutdown().await;
}
