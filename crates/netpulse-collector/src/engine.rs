//! The data collection engine: task lifecycle and cooperative shutdown.

use std::sync::Arc;

use error_stack::Report;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use netpulse_kernel::context::CollectionContext;
use netpulse_kernel::error::{KernelError, KernelResult};
use netpulse_kernel::item::CollectionItem;
use netpulse_kernel::queue::{CacheEntry, QueueEntry};

use crate::cache::run_cache_loader;
use crate::collector::run_data_collector;
use crate::poller::run_item_poller;
use crate::stats::run_stat_collector;

/// The running data collection subsystem: one poller, N collector workers,
/// one cache loader and one stats sampler, all sharing a
/// [`CollectionContext`].
pub struct DataCollectionEngine {
    ctx: Arc<CollectionContext>,
    poller: JoinHandle<()>,
    collectors: Vec<JoinHandle<()>>,
    cache_loader: JoinHandle<()>,
    stat_collector: JoinHandle<()>,
}

impl std::fmt::Debug for DataCollectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCollectionEngine")
            .field("poller", &self.poller)
            .field("collectors", &self.collectors)
            .field("cache_loader", &self.cache_loader)
            .field("stat_collector", &self.stat_collector)
            .finish()
    }
}

impl DataCollectionEngine {
    /// Spawn the subsystem. The worker count comes from the context's
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Internal`] when the configured collector count
    /// is 0, which would leave the queue without consumers.
    pub fn start(ctx: Arc<CollectionContext>) -> KernelResult<Self> {
        let workers = ctx.config.data_collector_count;
        if workers == 0 {
            return Err(Report::new(KernelError::Internal(
                "data collector count must be at least 1".into(),
            ))
            .attach_printable("initializing data collection subsystem"));
        }
        info!(workers, "initializing data collection subsystem");

        let collectors = (0..workers)
            .map(|worker| tokio::spawn(run_data_collector(worker, Arc::clone(&ctx))))
            .collect();

        Ok(Self {
            poller: tokio::spawn(run_item_poller(Arc::clone(&ctx))),
            cache_loader: tokio::spawn(run_cache_loader(Arc::clone(&ctx))),
            stat_collector: tokio::spawn(run_stat_collector(Arc::clone(&ctx))),
            collectors,
            ctx,
        })
    }

    pub fn context(&self) -> &Arc<CollectionContext> {
        &self.ctx
    }

    /// Hand an item to the cache loader; it will not be scheduled until its
    /// cache reports loaded.
    pub fn request_cache_reload(&self, item: Arc<CollectionItem>) {
        self.ctx.queue_cache_reload(item);
    }

    /// Cooperative shutdown.
    ///
    /// Order matters: the poller stops first so the queue is not
    /// re-populated, then one sentinel per worker lets in-flight polls
    /// complete and the pool drain, then the cache loader and the stats
    /// sampler are joined.
    pub async fn shutdown(self) {
        info!("stopping data collection subsystem");
        self.ctx.begin_shutdown();

        let _ = self.poller.await;

        for _ in 0..self.collectors.len() {
            self.ctx.collection_queue.send(QueueEntry::Shutdown);
        }
        for worker in self.collectors {
            let _ = worker.await;
        }

        self.ctx.cache_queue.send(CacheEntry::Shutdown);
        let _ = self.cache_loader.await;

        let _ = self.stat_collector.await;
        debug!("data collection subsystem stopped");
    }
}
