//! NetPulse data collection engine.
//!
//! Runtime half of the data collection core: the poll scheduler, the
//! collector worker pool, the cache loader and the stats sampler, tied
//! together by [`DataCollectionEngine`]. Contracts and the item data model
//! live in `netpulse-kernel`.

mod cache;
mod collector;
mod engine;
mod poller;
mod stats;

pub use engine::DataCollectionEngine;
