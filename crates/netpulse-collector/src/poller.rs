//! The item poller: a fixed-tick scanner that walks every collection target
//! and enqueues due items.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info, trace};

use netpulse_kernel::context::CollectionContext;
use netpulse_kernel::queue::QueueEntry;
use netpulse_kernel::target::Target;

/// Seconds between poller wakeups.
const ITEM_POLLING_INTERVAL: u64 = 1;

/// Depth of the per-tick timing ring: one minute of history.
const TIMING_SLOTS: usize = 60 / ITEM_POLLING_INTERVAL as usize;

/// Enqueue every due item of one target. The busy flag is raised before the
/// item enters the queue, so a later tick cannot enqueue it twice.
pub(crate) fn queue_items_for_polling(target: &Arc<dyn Target>, ctx: &CollectionContext) {
    let now = ctx.clock.now();
    for item in target.items() {
        if item.is_due(now, ctx) {
            trace!(item = item.id(), target = target.id(), "queueing item for polling");
            item.set_busy(true);
            ctx.collection_queue.send(QueueEntry::Item(item));
        }
    }
}

/// Poller task body. Wakes every second, walks the object index, and keeps a
/// one-minute moving average of the per-tick wall-clock duration.
pub(crate) async fn run_item_poller(ctx: Arc<CollectionContext>) {
    let mut timing_history = [0u32; TIMING_SLOTS];
    let mut slot = 0usize;

    info!("item poller started");
    loop {
        tokio::select! {
            _ = sleep(Duration::from_secs(ITEM_POLLING_INTERVAL)) => {}
            _ = ctx.wait_shutdown() => break,
        }
        trace!("item poller wakeup");

        let start = Instant::now();
        for target in ctx.objects.collection_targets() {
            if ctx.is_shutdown() {
                break;
            }
            trace!(target = target.id(), name = %target.name(), "scanning target items");
            queue_items_for_polling(&target, &ctx);
        }

        timing_history[slot] = start.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
        slot = (slot + 1) % TIMING_SLOTS;
        let average = timing_history.iter().map(|&v| u64::from(v)).sum::<u64>()
            / TIMING_SLOTS as u64;
        ctx.telemetry.set_queuing_time_ms(average as u32);

        if ctx.is_shutdown() {
            break;
        }
    }
    debug!("item poller thread terminated");
}
