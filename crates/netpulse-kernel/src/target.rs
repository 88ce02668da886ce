//! Monitored-object contract: the capability set a target exposes to the
//! collection core.
//!
//! Targets are implemented by the host object model (nodes, clusters, mobile
//! devices, chassis). The core holds them as `Arc<dyn Target>`: a clone is
//! taken for the duration of each poll, and collection items keep only a
//! `Weak` back-reference to their owner, so a deleted target is observed as
//! a failed upgrade rather than a dangling pointer.
//!
//! Implementations must never call back into a [`CollectionItem`] passed to
//! them while the caller may be holding that item's lock; the sink methods
//! receive the item only for identification.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::item::CollectionItem;
use crate::probe::{CollectedData, ProbeReading, SourceProbe};

// ---------------------------------------------------------------------------
// TargetClass
// ---------------------------------------------------------------------------

/// Object class of a collection target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetClass {
    Node,
    Cluster,
    MobileDevice,
    Chassis,
    /// Template objects host item definitions but are never polled.
    Template,
    Other,
}

/// Effective agent-side cache mode for an item.
///
/// `Default` inherits the resolved node's setting. Items whose effective
/// mode is not `Off` are served by the agent-cache subsystem and are never
/// scheduled by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    Default,
    On,
    Off,
}

/// SSH credentials and address of a node, used to synthesize proxy commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub ip: String,
    pub login: String,
    pub password: String,
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// A monitored object capable of hosting collection items.
///
/// The supertrait carries the per-source read routines; the methods below
/// add object identity, routing and the downstream value/error sinks.
/// Defaults are chosen so that a plain node only implements what it has.
#[async_trait]
pub trait Target: SourceProbe {
    fn class(&self) -> TargetClass;

    fn id(&self) -> u32;

    fn name(&self) -> String;

    /// Whether item status transitions on this target generate events.
    fn is_event_source(&self) -> bool {
        matches!(
            self.class(),
            TargetClass::Node
                | TargetClass::Cluster
                | TargetClass::MobileDevice
                | TargetClass::Chassis
        )
    }

    /// Node actually queried for this item, 0 when the owner itself is.
    fn effective_source_node(&self, item: &CollectionItem) -> u32 {
        item.source_node_override()
    }

    /// Agent-side cache default for items inheriting [`CacheMode::Default`].
    fn agent_cache_mode(&self) -> CacheMode {
        CacheMode::Off
    }

    /// Whether this node accepts collection requests on behalf of `peer_id`.
    /// Gates source-node overrides.
    fn trusts(&self, peer_id: u32) -> bool {
        let _ = peer_id;
        false
    }

    /// Controller node of a chassis, 0 otherwise.
    fn controller_id(&self) -> u32 {
        0
    }

    /// Whether the designated cluster resource currently resides on this
    /// node. Nodes without cluster membership return false.
    fn cluster_resource_owned(&self, resource_id: u32) -> bool {
        let _ = resource_id;
        false
    }

    /// Cluster aggregation entry point for items flagged
    /// aggregate-on-cluster.
    async fn collect_cluster_data(&self, item: &CollectionItem) -> ProbeReading {
        let _ = item;
        ProbeReading::not_supported()
    }

    /// Primary management address, used for macro expansion and SSH command
    /// synthesis.
    fn primary_ip(&self) -> Option<String> {
        None
    }

    /// SSH credentials for command synthesis against a proxy agent.
    fn ssh_endpoint(&self) -> Option<SshEndpoint> {
        None
    }

    /// Item-independent SSH proxy pinned on this node, 0 for none.
    fn ssh_proxy(&self) -> u32 {
        0
    }

    /// Proxy node of this node's zone, 0 when zoning is off or unset.
    fn zone_proxy(&self) -> u32 {
        0
    }

    /// Snapshot of the items this target owns, for the poll scheduler walk.
    fn items(&self) -> Vec<Arc<CollectionItem>>;

    /// Accept a collected sample. Returning false demotes the sample to a
    /// collection error.
    fn process_new_value(
        &self,
        item: &CollectionItem,
        timestamp: i64,
        data: &CollectedData,
    ) -> bool;

    /// Accept a collection error for an item. `no_instance` distinguishes
    /// missing-instance errors from plain read failures.
    fn process_new_error(&self, item: &CollectionItem, no_instance: bool, timestamp: i64) {
        let _ = (item, no_instance, timestamp);
    }
}

// ---------------------------------------------------------------------------
// ObjectIndex
// ---------------------------------------------------------------------------

/// Enumeration and lookup capability over the host object model.
///
/// The poll scheduler walks `collection_targets()` every tick; workers use
/// `find_node` to resolve source-node overrides and SSH proxies.
pub trait ObjectIndex: Send + Sync {
    /// Snapshot of every pollable target (nodes, clusters, mobile devices,
    /// chassis).
    fn collection_targets(&self) -> Vec<Arc<dyn Target>>;

    /// Look up a node by id.
    fn find_node(&self, id: u32) -> Option<Arc<dyn Target>>;
}

/// An [`ObjectIndex`] with no objects; the builder default for tests that
/// drive items directly.
pub struct EmptyObjectIndex;

impl ObjectIndex for EmptyObjectIndex {
    fn collection_targets(&self) -> Vec<Arc<dyn Target>> {
        Vec::new()
    }

    fn find_node(&self, _id: u32) -> Option<Arc<dyn Target>> {
        None
    }
}
