//! Crate-level error types for `netpulse-kernel`.
//!
//! Provides a unified [`KernelError`] that composes errors from every
//! sub-module (configuration, scripting, persistence, IO, serialization)
//! together with [`error_stack::Report`] for context-carrying propagation.
//! The crate's fallible entry points (configuration loading, schedule
//! persistence, engine start-up) return [`KernelResult`]; module-internal
//! helpers keep their typed errors and are lifted at the boundary.
//!
//! # Usage
//!
//! ```rust,ignore
//! use netpulse_kernel::error::{KernelError, KernelResult};
//! use error_stack::ResultExt;
//!
//! fn read_settings() -> KernelResult<CollectorConfig> {
//!     // Errors from sub-modules convert automatically via From impls.
//!     // Attach extra context with .attach_printable() as they bubble up.
//!     load_config("collector.yaml")
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach_printable("loading collector.yaml")
//! }
//! ```
//!
//! Probe outcomes are deliberately *not* errors: transient collection
//! failures flow through [`ProbeOutcome`](crate::probe::ProbeOutcome) and
//! the item status machine instead.

use thiserror::Error;

/// Crate-level error type for `netpulse-kernel`.
///
/// Wraps each sub-module's typed error via `#[from]` so that the `?`
/// operator converts them automatically. Use
/// [`error_stack::Report<KernelError>`] (via [`KernelResult`]) to attach
/// human-readable context as the error propagates up the call stack.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// A configuration-related error.
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A scripting-environment error.
    #[error("Script error: {0}")]
    Script(#[from] crate::script::ScriptError),

    /// A schedule-store error.
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
///
/// Equivalent to `Result<T, error_stack::Report<KernelError>>`.
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
