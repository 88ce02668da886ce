// clock abstraction
pub mod clock;

// error module
pub mod error;

// configuration
pub mod config;

// source probe contract
pub mod probe;

// monitored-object contract
pub mod target;

// embedded scripting contract
pub mod script;

// event and session sinks
pub mod events;

// collection item data model
pub mod item;
pub use item::CollectionItem;

// advanced schedule matching
pub mod schedule;

// work queues
pub mod queue;

// persisted schedules relation
pub mod store;

// collection context (ambient state)
pub mod context;
pub use context::CollectionContext;
