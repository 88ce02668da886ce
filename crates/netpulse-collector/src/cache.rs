//! The cache loader: a single task warming per-item historical caches.
//!
//! Items that declare a cache requirement are kept out of scheduling until
//! their cache reports loaded; the loader is fed through the cache queue and
//! terminates on its shutdown sentinel.

use std::sync::Arc;

use tracing::{debug, info};

use netpulse_kernel::context::CollectionContext;
use netpulse_kernel::queue::CacheEntry;

pub(crate) async fn run_cache_loader(ctx: Arc<CollectionContext>) {
    info!("item cache loader started");
    loop {
        match ctx.cache_queue.recv().await {
            CacheEntry::Shutdown => break,
            CacheEntry::Load(item) => {
                debug!(
                    item = item.id(),
                    name = %item.name(),
                    owner = item.owner_id(),
                    "loading cache for collection item"
                );
                item.reload_cache();
            }
        }
    }
    info!("item cache loader stopped");
}
