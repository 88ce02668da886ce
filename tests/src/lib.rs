//! Shared test doubles for the NetPulse collection core.
//!
//! Mirrors the production capability seams: a manually-advanced clock,
//! recording sinks for events / session notifications / collected values,
//! scripted mock targets whose probe routines replay canned readings, and a
//! static object index.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use netpulse_kernel::clock::Clock;
use netpulse_kernel::events::{DciEvent, EventSink, SessionNotifier};
use netpulse_kernel::item::{CollectionItem, ItemStatus};
use netpulse_kernel::probe::{CollectedData, ProbeReading, SourceProbe};
use netpulse_kernel::target::{CacheMode, ObjectIndex, SshEndpoint, Target, TargetClass};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// A [`Clock`] advanced explicitly by the test.
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn at(now: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(now)))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Recording sinks
// ---------------------------------------------------------------------------

/// Records every event posted by the core.
#[derive(Default)]
pub struct RecordingEventSink {
    pub events: Mutex<Vec<(u32, DciEvent)>>,
}

impl RecordingEventSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }
}

impl EventSink for RecordingEventSink {
    fn post(&self, owner_id: u32, event: DciEvent) {
        self.events.lock().push((owner_id, event));
    }
}

/// Records force-poll notifications.
#[derive(Default)]
pub struct RecordingSession {
    pub notified: Mutex<Vec<u32>>,
}

impl RecordingSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SessionNotifier for RecordingSession {
    fn notify_force_poll(&self, owner_id: u32) {
        self.notified.lock().push(owner_id);
    }
}

// ---------------------------------------------------------------------------
// MockTarget
// ---------------------------------------------------------------------------

/// A collected value as seen by the downstream sink, together with the item
/// status observed at forwarding time (recovery must happen first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedValue {
    pub item_id: u32,
    pub timestamp: i64,
    pub data: CollectedData,
    pub status_at_forward: ItemStatus,
}

/// A scripted monitored object.
///
/// Probe routines replay `push_reading` entries in order and fall back to
/// the default reading; every probe is logged with its parameter string and
/// the probe timestamp (when a clock is attached), and the peak number of
/// concurrent probes is tracked for the mutual-exclusion invariant.
pub struct MockTarget {
    id: u32,
    name: String,
    class: TargetClass,
    pub items: Mutex<Vec<Arc<CollectionItem>>>,
    readings: Mutex<VecDeque<ProbeReading>>,
    default_reading: Mutex<ProbeReading>,
    probe_delay: Mutex<Duration>,
    probe_clock: Mutex<Option<Arc<ManualClock>>>,
    pub probe_log: Mutex<Vec<String>>,
    pub probe_times: Mutex<Vec<i64>>,
    in_probe: AtomicUsize,
    pub max_concurrent_probes: AtomicUsize,
    pub cluster_collections: AtomicUsize,
    pub values: Mutex<Vec<ForwardedValue>>,
    pub errors: Mutex<Vec<(u32, bool, i64)>>,
    accept_values: AtomicBool,
    trusted_peers: Mutex<HashSet<u32>>,
    cache_mode: Mutex<CacheMode>,
    controller: AtomicU32,
    ssh_endpoint: Mutex<Option<SshEndpoint>>,
    ssh_proxy: AtomicU32,
    zone_proxy: AtomicU32,
}

impl MockTarget {
    fn with_class(id: u32, name: &str, class: TargetClass) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.to_string(),
            class,
            items: Mutex::new(Vec::new()),
            readings: Mutex::new(VecDeque::new()),
            default_reading: Mutex::new(ProbeReading::not_supported()),
            probe_delay: Mutex::new(Duration::ZERO),
            probe_clock: Mutex::new(None),
            probe_log: Mutex::new(Vec::new()),
            probe_times: Mutex::new(Vec::new()),
            in_probe: AtomicUsize::new(0),
            max_concurrent_probes: AtomicUsize::new(0),
            cluster_collections: AtomicUsize::new(0),
            values: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            accept_values: AtomicBool::new(true),
            trusted_peers: Mutex::new(HashSet::new()),
            cache_mode: Mutex::new(CacheMode::Off),
            controller: AtomicU32::new(0),
            ssh_endpoint: Mutex::new(None),
            ssh_proxy: AtomicU32::new(0),
            zone_proxy: AtomicU32::new(0),
        })
    }

    pub fn node(id: u32, name: &str) -> Arc<Self> {
        Self::with_class(id, name, TargetClass::Node)
    }

    pub fn cluster(id: u32, name: &str) -> Arc<Self> {
        Self::with_class(id, name, TargetClass::Cluster)
    }

    pub fn chassis(id: u32, name: &str, controller: u32) -> Arc<Self> {
        let chassis = Self::with_class(id, name, TargetClass::Chassis);
        chassis.controller.store(controller, Ordering::SeqCst);
        chassis
    }

    /// Upcast helper; item constructors take `&Arc<dyn Target>`.
    pub fn as_target(self: &Arc<Self>) -> Arc<dyn Target> {
        self.clone()
    }

    pub fn add_item(&self, item: Arc<CollectionItem>) {
        self.items.lock().push(item);
    }

    pub fn push_reading(&self, reading: ProbeReading) {
        self.readings.lock().push_back(reading);
    }

    pub fn set_default_reading(&self, reading: ProbeReading) {
        *self.default_reading.lock() = reading;
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock() = delay;
    }

    pub fn set_probe_clock(&self, clock: Arc<ManualClock>) {
        *self.probe_clock.lock() = Some(clock);
    }

    pub fn set_accept_values(&self, accept: bool) {
        self.accept_values.store(accept, Ordering::SeqCst);
    }

    pub fn trust(&self, peer_id: u32) {
        self.trusted_peers.lock().insert(peer_id);
    }

    pub fn set_cache_mode(&self, mode: CacheMode) {
        *self.cache_mode.lock() = mode;
    }

    pub fn set_ssh_endpoint(&self, endpoint: SshEndpoint) {
        *self.ssh_endpoint.lock() = Some(endpoint);
    }

    pub fn set_ssh_proxy(&self, proxy: u32) {
        self.ssh_proxy.store(proxy, Ordering::SeqCst);
    }

    pub fn set_zone_proxy(&self, proxy: u32) {
        self.zone_proxy.store(proxy, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probe_log.lock().len()
    }

    pub fn value_count(&self) -> usize {
        self.values.lock().len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    async fn next_reading(&self, label: String) -> ProbeReading {
        let concurrent = self.in_probe.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_probes
            .fetch_max(concurrent, Ordering::SeqCst);

        let delay = *self.probe_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(clock) = self.probe_clock.lock().as_ref() {
            self.probe_times.lock().push(clock.now());
        }
        self.probe_log.lock().push(label);
        let reading = self
            .readings
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reading.lock().clone());

        self.in_probe.fetch_sub(1, Ordering::SeqCst);
        reading
    }
}

#[async_trait]
impl SourceProbe for MockTarget {
    async fn read_internal(&self, metric: &str) -> ProbeReading {
        self.next_reading(format!("internal:{metric}")).await
    }

    async fn read_agent(&self, parameter: &str) -> ProbeReading {
        self.next_reading(format!("agent:{parameter}")).await
    }

    async fn read_snmp(&self, port: u16, raw_interpretation: bool, oid: &str) -> ProbeReading {
        self.next_reading(format!("snmp:{port}:{raw_interpretation}:{oid}"))
            .await
    }

    async fn read_checkpoint_snmp(&self, oid: &str) -> ProbeReading {
        self.next_reading(format!("checkpoint:{oid}")).await
    }

    async fn read_smclp(&self, property: &str) -> ProbeReading {
        self.next_reading(format!("smclp:{property}")).await
    }

    async fn read_script(&self, script: &str) -> ProbeReading {
        self.next_reading(format!("script:{script}")).await
    }

    async fn read_agent_table(&self, name: &str) -> ProbeReading {
        self.next_reading(format!("agent-table:{name}")).await
    }

    async fn read_snmp_table(&self, port: u16, name: &str) -> ProbeReading {
        self.next_reading(format!("snmp-table:{port}:{name}")).await
    }
}

#[async_trait]
impl Target for MockTarget {
    fn class(&self) -> TargetClass {
        self.class
    }

    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn agent_cache_mode(&self) -> CacheMode {
        *self.cache_mode.lock()
    }

    fn trusts(&self, peer_id: u32) -> bool {
        self.trusted_peers.lock().contains(&peer_id)
    }

    fn controller_id(&self) -> u32 {
        self.controller.load(Ordering::SeqCst)
    }

    async fn collect_cluster_data(&self, item: &CollectionItem) -> ProbeReading {
        self.cluster_collections.fetch_add(1, Ordering::SeqCst);
        self.next_reading(format!("cluster:{}", item.name())).await
    }

    fn primary_ip(&self) -> Option<String> {
        Some(format!("192.0.2.{}", self.id))
    }

    fn ssh_endpoint(&self) -> Option<SshEndpoint> {
        self.ssh_endpoint.lock().clone()
    }

    fn ssh_proxy(&self) -> u32 {
        self.ssh_proxy.load(Ordering::SeqCst)
    }

    fn zone_proxy(&self) -> u32 {
        self.zone_proxy.load(Ordering::SeqCst)
    }

    fn items(&self) -> Vec<Arc<CollectionItem>> {
        self.items.lock().clone()
    }

    fn process_new_value(
        &self,
        item: &CollectionItem,
        timestamp: i64,
        data: &CollectedData,
    ) -> bool {
        self.values.lock().push(ForwardedValue {
            item_id: item.id(),
            timestamp,
            data: data.clone(),
            status_at_forward: item.status(),
        });
        self.accept_values.load(Ordering::SeqCst)
    }

    fn process_new_error(&self, item: &CollectionItem, no_instance: bool, timestamp: i64) {
        self.errors.lock().push((item.id(), no_instance, timestamp));
    }
}

// ---------------------------------------------------------------------------
// Object index
// ---------------------------------------------------------------------------

/// Fixed object index over mock targets.
#[derive(Default)]
pub struct StaticObjectIndex {
    targets: Mutex<Vec<Arc<dyn Target>>>,
    nodes: Mutex<HashMap<u32, Arc<dyn Target>>>,
}

impl StaticObjectIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a pollable target, also indexing nodes for lookup.
    pub fn add(&self, target: Arc<MockTarget>) {
        if target.class() == TargetClass::Node {
            self.nodes.lock().insert(target.id(), target.as_target());
        }
        self.targets.lock().push(target.as_target());
    }

    /// Index a node for lookup without making it pollable.
    pub fn add_lookup_only(&self, target: Arc<MockTarget>) {
        self.nodes.lock().insert(target.id(), target.as_target());
    }
}

impl ObjectIndex for StaticObjectIndex {
    fn collection_targets(&self) -> Vec<Arc<dyn Target>> {
        self.targets.lock().clone()
    }

    fn find_node(&self, id: u32) -> Option<Arc<dyn Target>> {
        self.nodes.lock().get(&id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

/// Opt into log output for a test run (`RUST_LOG=netpulse_kernel=trace ...`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Context builder pre-wired with a manual clock and a static index.
pub fn context_with(
    clock: Arc<ManualClock>,
    index: Arc<StaticObjectIndex>,
) -> netpulse_kernel::context::CollectionContextBuilder {
    init_tracing();
    netpulse_kernel::CollectionContext::builder()
        .clock(clock)
        .objects(index)
}

/// Create a simple-value item bound to (and registered on) `owner`.
pub fn make_item(
    id: u32,
    name: &str,
    source: netpulse_kernel::probe::SourceKind,
    interval: i64,
    owner: &Arc<MockTarget>,
) -> Arc<CollectionItem> {
    let target = owner.as_target();
    let item = Arc::new(CollectionItem::new(
        id,
        name,
        source,
        netpulse_kernel::item::ItemKind::SimpleValue,
        interval,
        30,
        &target,
    ));
    owner.add_item(item.clone());
    item
}

// ---------------------------------------------------------------------------
// Async test helpers
// ---------------------------------------------------------------------------

/// Poll `condition` until it holds, giving the engine tasks time to run.
/// Panics after a bounded number of iterations so a broken condition fails
/// the test instead of hanging it.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Let the poller run for roughly `ticks` scheduler wakeups.
pub async fn settle_ticks(ticks: u64) {
    tokio::time::sleep(Duration::from_millis(ticks * 1_000 + 100)).await;
}
