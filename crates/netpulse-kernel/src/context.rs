//! The collection context: every ambient dependency of the core gathered
//! into one value.
//!
//! The context replaces process-wide globals. It is built once at subsystem
//! start and handed to every component; tests instantiate a private context
//! per case with whatever capabilities the case needs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::Notify;

use crate::clock::{Clock, SystemClock};
use crate::config::CollectorConfig;
use crate::events::{EventSink, NoopEventSink};
use crate::item::CollectionItem;
use crate::queue::{CacheEntry, CacheLoaderQueue, CollectionQueue};
use crate::script::{NullScriptEnv, ScriptEnv};
use crate::store::{MemoryScheduleStore, ScheduleStore};
use crate::target::{EmptyObjectIndex, ObjectIndex};

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// External queues whose depth the stats sampler tracks. The writers
/// themselves live downstream; they register a depth gauge here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalQueue {
    DatabaseWriter,
    DataWriter,
    RawDataWriter,
    SyslogProcessing,
    SyslogWriter,
}

/// A registered queue-depth probe.
pub type QueueDepthGauge = Arc<dyn Fn() -> usize + Send + Sync>;

/// One-minute moving averages published by the stats sampler.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueAverages {
    pub collection: f64,
    pub database_writer: f64,
    pub data_writer: f64,
    pub raw_data_writer: f64,
    /// Database, data and raw-data writer depths combined.
    pub combined_writer: f64,
    pub syslog_processing: f64,
    pub syslog_writer: f64,
}

/// Self-monitoring figures exported by the collection core.
#[derive(Default)]
pub struct CollectorTelemetry {
    queuing_time_ms: AtomicU32,
    averages: parking_lot::Mutex<QueueAverages>,
    gauges: parking_lot::Mutex<HashMap<ExternalQueue, QueueDepthGauge>>,
}

impl CollectorTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-minute moving average of the poll scheduler's per-tick wall-clock
    /// duration ("avg DCI queuing time").
    pub fn queuing_time_ms(&self) -> u32 {
        self.queuing_time_ms.load(Ordering::Relaxed)
    }

    pub fn set_queuing_time_ms(&self, value: u32) {
        self.queuing_time_ms.store(value, Ordering::Relaxed);
    }

    pub fn register_gauge(&self, queue: ExternalQueue, gauge: QueueDepthGauge) {
        self.gauges.lock().insert(queue, gauge);
    }

    /// Current depth of an external queue, 0 when no gauge is registered.
    pub fn sample_gauge(&self, queue: ExternalQueue) -> usize {
        self.gauges.lock().get(&queue).map(|g| g()).unwrap_or(0)
    }

    pub fn publish_averages(&self, averages: QueueAverages) {
        *self.averages.lock() = averages;
    }

    pub fn averages(&self) -> QueueAverages {
        *self.averages.lock()
    }
}

// ---------------------------------------------------------------------------
// CollectionContext
// ---------------------------------------------------------------------------

/// Shared state and capabilities of one data collection subsystem instance.
pub struct CollectionContext {
    pub config: CollectorConfig,
    pub clock: Arc<dyn Clock>,
    pub objects: Arc<dyn ObjectIndex>,
    pub scripts: Arc<dyn ScriptEnv>,
    pub events: Arc<dyn EventSink>,
    pub schedule_store: Arc<dyn ScheduleStore>,
    pub collection_queue: CollectionQueue,
    pub cache_queue: CacheLoaderQueue,
    pub telemetry: Arc<CollectorTelemetry>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl CollectionContext {
    pub fn builder() -> CollectionContextBuilder {
        CollectionContextBuilder::new()
    }

    /// Whether cooperative shutdown has begun. Checked by every loop.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Raise the process-wide shutdown flag and wake sleeping loops.
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.shutdown_notify.notify_waiters();
    }

    /// Resolve when shutdown begins; immediately if it already has.
    pub async fn wait_shutdown(&self) {
        loop {
            if self.is_shutdown() {
                return;
            }
            let notified = self.shutdown_notify.notified();
            if self.is_shutdown() {
                return;
            }
            notified.await;
        }
    }

    /// Hand an item to the cache loader. The scheduler will not enqueue the
    /// item until its cache reports loaded.
    pub fn queue_cache_reload(&self, item: Arc<CollectionItem>) {
        self.cache_queue.send(CacheEntry::Load(item));
    }
}

/// Builder with no-op defaults for every capability.
pub struct CollectionContextBuilder {
    config: CollectorConfig,
    clock: Arc<dyn Clock>,
    objects: Arc<dyn ObjectIndex>,
    scripts: Arc<dyn ScriptEnv>,
    events: Arc<dyn EventSink>,
    schedule_store: Arc<dyn ScheduleStore>,
}

impl Default for CollectionContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionContextBuilder {
    pub fn new() -> Self {
        Self {
            config: CollectorConfig::default(),
            clock: Arc::new(SystemClock),
            objects: Arc::new(EmptyObjectIndex),
            scripts: Arc::new(NullScriptEnv),
            events: Arc::new(NoopEventSink),
            schedule_store: Arc::new(MemoryScheduleStore::new()),
        }
    }

    pub fn config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn objects(mut self, objects: Arc<dyn ObjectIndex>) -> Self {
        self.objects = objects;
        self
    }

    pub fn scripts(mut self, scripts: Arc<dyn ScriptEnv>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn schedule_store(mut self, store: Arc<dyn ScheduleStore>) -> Self {
        self.schedule_store = store;
        self
    }

    pub fn build(self) -> CollectionContext {
        CollectionContext {
            config: self.config,
            clock: self.clock,
            objects: self.objects,
            scripts: self.scripts,
            events: self.events,
            schedule_store: self.schedule_store,
            collection_queue: CollectionQueue::new(),
            cache_queue: CacheLoaderQueue::new(),
            telemetry: Arc::new(CollectorTelemetry::new()),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
