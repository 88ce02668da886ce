//! The stats sampler: rolling one-minute averages of queue depths, exposed
//! for self-monitoring.
//!
//! Samples every five seconds into twelve-slot rings: the collection queue
//! itself, the three downstream writer queues, their combined depth and the
//! two syslog queues. The writers are out of process scope; they appear
//! here only through registered depth gauges and read as zero otherwise.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use netpulse_kernel::context::{CollectionContext, ExternalQueue, QueueAverages};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
const RING_SLOTS: usize = 12;

#[derive(Default)]
struct Ring {
    samples: [usize; RING_SLOTS],
}

impl Ring {
    fn record(&mut self, slot: usize, value: usize) {
        self.samples[slot] = value;
    }

    fn average(&self) -> f64 {
        self.samples.iter().sum::<usize>() as f64 / RING_SLOTS as f64
    }
}

pub(crate) async fn run_stat_collector(ctx: Arc<CollectionContext>) {
    let mut collection = Ring::default();
    let mut database_writer = Ring::default();
    let mut data_writer = Ring::default();
    let mut raw_data_writer = Ring::default();
    let mut combined_writer = Ring::default();
    let mut syslog_processing = Ring::default();
    let mut syslog_writer = Ring::default();
    let mut slot = 0usize;

    debug!("statistics collector started");
    loop {
        tokio::select! {
            _ = sleep(SAMPLE_INTERVAL) => {}
            _ = ctx.wait_shutdown() => break,
        }

        let db = ctx.telemetry.sample_gauge(ExternalQueue::DatabaseWriter);
        let data = ctx.telemetry.sample_gauge(ExternalQueue::DataWriter);
        let raw = ctx.telemetry.sample_gauge(ExternalQueue::RawDataWriter);

        collection.record(slot, ctx.collection_queue.len());
        database_writer.record(slot, db);
        data_writer.record(slot, data);
        raw_data_writer.record(slot, raw);
        combined_writer.record(slot, db + data + raw);
        syslog_processing.record(slot, ctx.telemetry.sample_gauge(ExternalQueue::SyslogProcessing));
        syslog_writer.record(slot, ctx.telemetry.sample_gauge(ExternalQueue::SyslogWriter));
        slot = (slot + 1) % RING_SLOTS;

        ctx.telemetry.publish_averages(QueueAverages {
            collection: collection.average(),
            database_writer: database_writer.average(),
            data_writer: data_writer.average(),
            raw_data_writer: raw_data_writer.average(),
            combined_writer: combined_writer.average(),
            syslog_processing: syslog_processing.average(),
            syslog_writer: syslog_writer.average(),
        });
    }
    debug!("statistics collector stopped");
}
