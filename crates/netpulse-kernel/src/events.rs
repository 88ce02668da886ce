//! Message sinks: the event bus and client-session notifier contracts.
//!
//! The collection core only emits; delivery, routing and persistence belong
//! to the host platform. Sinks must be cheap and non-blocking (enqueue and
//! return) because they are called from the hot collection path.

use std::sync::Arc;

use serde::Serialize;

use crate::probe::SourceKind;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Identification payload attached to item status events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemEventDetail {
    pub item_id: u32,
    pub name: String,
    pub description: String,
    pub source: SourceKind,
    pub source_label: &'static str,
}

/// Events published by the collection core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DciEvent {
    /// Item entered the active state.
    DciActive(ItemEventDetail),
    /// Item was administratively disabled.
    DciDisabled(ItemEventDetail),
    /// Item was demoted to not-supported.
    DciUnsupported(ItemEventDetail),
    /// A library script referenced from a macro or schedule failed.
    ScriptError {
        script: String,
        error: String,
        item_id: u32,
    },
}

/// Event bus sink. `owner_id` is the id of the object the event is raised
/// against (the item's owner).
pub trait EventSink: Send + Sync {
    fn post(&self, owner_id: u32, event: DciEvent);
}

/// Discards all events.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn post(&self, _owner_id: u32, _event: DciEvent) {}
}

// ---------------------------------------------------------------------------
// Force-poll notification
// ---------------------------------------------------------------------------

/// Client-session notification sink, addressed by owner id.
pub trait SessionNotifier: Send + Sync {
    /// Tell the session that the force-polled item's owner has fresh data.
    fn notify_force_poll(&self, owner_id: u32);
}

/// A one-shot force-poll request attached to a collection item.
///
/// The request is consumed exactly once: either the worker notifies the
/// session after the poll, or the request is dropped when the poll is
/// skipped (item unservable, target gone). Dropping releases the session
/// reference without notification.
pub struct ForcePollRequest {
    session: Arc<dyn SessionNotifier>,
}

impl ForcePollRequest {
    pub fn new(session: Arc<dyn SessionNotifier>) -> Self {
        Self { session }
    }

    /// Consume the request, notifying the session.
    pub fn notify(self, owner_id: u32) {
        self.session.notify_force_poll(owner_id);
    }
}

impl std::fmt::Debug for ForcePollRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForcePollRequest").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
