//! The collection item: one configured metric on one target.
//!
//! All mutable state lives behind a single `parking_lot::Mutex`; every
//! public operation acquires it exactly once and never calls out to a
//! [`Target`], [`ScriptEnv`] or [`EventSink`] while holding it, except for
//! the handful of read-only target lookups (`id`, `name`, `class`,
//! `agent_cache_mode`, `cluster_resource_owned`) that are documented as
//! never touching items. This replaces the recursive per-item mutex of a
//! classic collection core without changing its guarantees: observers see a
//! consistent (status, last-poll) pair, and the scheduler's `try_lock` skip
//! provides back-pressure when an item is being reconfigured.

pub mod flags;

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::context::CollectionContext;
use crate::error::{KernelError, KernelResult};
use crate::events::{DciEvent, EventSink, ForcePollRequest, ItemEventDetail, SessionNotifier};
use crate::probe::{CollectedData, SourceKind, TableColumn};
use crate::schedule;
use crate::script::{CompiledScript, ScriptBindings, ScriptEnv, ScriptError};
use crate::target::{CacheMode, Target, TargetClass};

pub use flags::ItemFlags;

/// Maximum length of an item name, characters.
pub const MAX_ITEM_NAME: usize = 1024;

/// Cadence multiplier applied to not-supported items so they keep probing
/// for recovery without hammering a dead metric.
const NOT_SUPPORTED_INTERVAL_FACTOR: i64 = 10;

// ---------------------------------------------------------------------------
// Status and kind
// ---------------------------------------------------------------------------

/// Administrative / probe-driven status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Active,
    Disabled,
    NotSupported,
}

/// Shape of the collected datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    SimpleValue,
    Table,
}

// ---------------------------------------------------------------------------
// ItemState
// ---------------------------------------------------------------------------

struct ItemState {
    id: u32,
    guid: Uuid,
    template_id: u32,
    template_item_id: u32,
    name: String,
    description: String,
    system_tag: String,
    source: SourceKind,
    kind: ItemKind,
    /// Seconds; non-positive means "use the configured default".
    polling_interval: i64,
    /// Days; opaque downstream hint.
    retention_days: i32,
    status: ItemStatus,
    flags: ItemFlags,
    /// Node actually queried instead of the owner, 0 for none.
    source_node: u32,
    /// SNMP port override, 0 for the node default.
    snmp_port: u16,
    /// Cluster resource this item is pinned to, 0 for none.
    resource_id: u32,
    /// WinPerf sample count.
    sample_count: i32,
    schedules: Vec<String>,
    /// Column definitions applied to collected tables.
    result_columns: Vec<TableColumn>,
    transformation_source: Option<String>,
    transformation: Option<CompiledScript>,
    owner: Option<Weak<dyn Target>>,
    busy: bool,
    scheduled_for_deletion: bool,
    last_poll: i64,
    /// Advanced-schedule evaluation dedup mark.
    last_check: i64,
    error_count: u32,
    force_poll: Option<ForcePollRequest>,
    /// Historical cache depth required before the first poll.
    cache_size: u32,
    cache_loaded: bool,
    has_value: bool,
}

impl ItemState {
    fn owner_arc(&self) -> Option<Arc<dyn Target>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    fn event_detail(&self) -> ItemEventDetail {
        ItemEventDetail {
            item_id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            source: self.source,
            source_label: self.source.label(),
        }
    }
}

fn clamp_name(name: &str) -> String {
    name.chars().take(MAX_ITEM_NAME).collect()
}

// ---------------------------------------------------------------------------
// CollectionItem
// ---------------------------------------------------------------------------

/// One configured metric on one target.
pub struct CollectionItem {
    state: Mutex<ItemState>,
}

impl CollectionItem {
    /// Create a new item bound to `owner`, active, with a fresh GUID.
    pub fn new(
        id: u32,
        name: &str,
        source: SourceKind,
        kind: ItemKind,
        polling_interval: i64,
        retention_days: i32,
        owner: &Arc<dyn Target>,
    ) -> Self {
        let name = clamp_name(name);
        Self {
            state: Mutex::new(ItemState {
                id,
                guid: Uuid::new_v4(),
                template_id: 0,
                template_item_id: 0,
                description: name.clone(),
                name,
                system_tag: String::new(),
                source,
                kind,
                polling_interval,
                retention_days,
                status: ItemStatus::Active,
                flags: ItemFlags::default(),
                source_node: 0,
                snmp_port: 0,
                resource_id: 0,
                sample_count: 0,
                schedules: Vec::new(),
                result_columns: Vec::new(),
                transformation_source: None,
                transformation: None,
                owner: Some(Arc::downgrade(owner)),
                busy: false,
                scheduled_for_deletion: false,
                last_poll: 0,
                last_check: 0,
                error_count: 0,
                force_poll: None,
                cache_size: 0,
                cache_loaded: true,
                has_value: true,
            }),
        }
    }

    /// Create an unbound item, as held by templates. Binding happens through
    /// [`change_binding`](Self::change_binding).
    pub fn detached(id: u32, name: &str, source: SourceKind, kind: ItemKind) -> Self {
        let name = clamp_name(name);
        Self {
            state: Mutex::new(ItemState {
                id,
                guid: Uuid::new_v4(),
                template_id: 0,
                template_item_id: 0,
                description: name.clone(),
                name,
                system_tag: String::new(),
                source,
                kind,
                polling_interval: 0,
                retention_days: 0,
                status: ItemStatus::Active,
                flags: ItemFlags::default(),
                source_node: 0,
                snmp_port: 0,
                resource_id: 0,
                sample_count: 0,
                schedules: Vec::new(),
                result_columns: Vec::new(),
                transformation_source: None,
                transformation: None,
                owner: None,
                busy: false,
                scheduled_for_deletion: false,
                last_poll: 0,
                last_check: 0,
                error_count: 0,
                force_poll: None,
                cache_size: 0,
                cache_loaded: true,
                has_value: true,
            }),
        }
    }

    /// Copy this item's definition into a fresh, unbound instance with the
    /// same id and GUID but cleared runtime state. Used when instantiating
    /// template items on a target.
    pub fn clone_definition(&self) -> Self {
        let state = self.state.lock();
        Self {
            state: Mutex::new(ItemState {
                id: state.id,
                guid: state.guid,
                template_id: state.template_id,
                template_item_id: state.template_item_id,
                name: state.name.clone(),
                description: state.description.clone(),
                system_tag: state.system_tag.clone(),
                source: state.source,
                kind: state.kind,
                polling_interval: state.polling_interval,
                retention_days: state.retention_days,
                status: state.status,
                flags: state.flags,
                source_node: state.source_node,
                snmp_port: state.snmp_port,
                resource_id: state.resource_id,
                sample_count: state.sample_count,
                schedules: state.schedules.clone(),
                result_columns: state.result_columns.clone(),
                transformation_source: state.transformation_source.clone(),
                transformation: state.transformation.clone(),
                owner: None,
                busy: false,
                scheduled_for_deletion: false,
                last_poll: 0,
                last_check: 0,
                error_count: 0,
                force_poll: None,
                cache_size: state.cache_size,
                cache_loaded: state.cache_size == 0,
                has_value: state.has_value,
            }),
        }
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    pub fn id(&self) -> u32 {
        self.state.lock().id
    }

    pub fn guid(&self) -> Uuid {
        self.state.lock().guid
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn description(&self) -> String {
        self.state.lock().description.clone()
    }

    pub fn system_tag(&self) -> String {
        self.state.lock().system_tag.clone()
    }

    pub fn source(&self) -> SourceKind {
        self.state.lock().source
    }

    pub fn kind(&self) -> ItemKind {
        self.state.lock().kind
    }

    pub fn status(&self) -> ItemStatus {
        self.state.lock().status
    }

    pub fn flags(&self) -> ItemFlags {
        self.state.lock().flags
    }

    pub fn polling_interval(&self) -> i64 {
        self.state.lock().polling_interval
    }

    pub fn retention_days(&self) -> i32 {
        self.state.lock().retention_days
    }

    pub fn template_reference(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.template_id, state.template_item_id)
    }

    pub fn source_node_override(&self) -> u32 {
        self.state.lock().source_node
    }

    pub fn snmp_port(&self) -> u16 {
        self.state.lock().snmp_port
    }

    pub fn resource_id(&self) -> u32 {
        self.state.lock().resource_id
    }

    pub fn sample_count(&self) -> i32 {
        self.state.lock().sample_count
    }

    pub fn schedules(&self) -> Vec<String> {
        self.state.lock().schedules.clone()
    }

    pub fn result_columns(&self) -> Vec<TableColumn> {
        self.state.lock().result_columns.clone()
    }

    pub fn transformation_source(&self) -> Option<String> {
        self.state.lock().transformation_source.clone()
    }

    pub fn error_count(&self) -> u32 {
        self.state.lock().error_count
    }

    pub fn last_poll_time(&self) -> i64 {
        self.state.lock().last_poll
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    pub fn is_scheduled_for_deletion(&self) -> bool {
        self.state.lock().scheduled_for_deletion
    }

    pub fn has_force_poll(&self) -> bool {
        self.state.lock().force_poll.is_some()
    }

    pub fn is_cache_loaded(&self) -> bool {
        self.state.lock().cache_loaded
    }

    pub fn owner(&self) -> Option<Arc<dyn Target>> {
        self.state.lock().owner_arc()
    }

    pub fn owner_id(&self) -> u32 {
        self.owner().map(|o| o.id()).unwrap_or(0)
    }

    pub fn aggregate_on_cluster(&self) -> bool {
        self.state.lock().flags.contains(flags::AGGREGATE_ON_CLUSTER)
    }

    pub fn interpret_snmp_raw(&self) -> bool {
        self.state.lock().flags.contains(flags::INTERPRET_SNMP_RAW)
    }

    // -----------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------

    pub fn set_name(&self, name: &str) {
        self.state.lock().name = clamp_name(name);
    }

    pub fn set_description(&self, description: &str) {
        self.state.lock().description = description.to_string();
    }

    pub fn set_system_tag(&self, tag: &str) {
        self.state.lock().system_tag = tag.to_string();
    }

    pub fn set_flags(&self, flags: ItemFlags) {
        self.state.lock().flags = flags;
    }

    pub fn set_polling_interval(&self, seconds: i64) {
        self.state.lock().polling_interval = seconds;
    }

    pub fn set_retention_days(&self, days: i32) {
        self.state.lock().retention_days = days;
    }

    pub fn set_template_reference(&self, template_id: u32, template_item_id: u32) {
        let mut state = self.state.lock();
        state.template_id = template_id;
        state.template_item_id = template_item_id;
    }

    pub fn set_source_node(&self, node_id: u32) {
        self.state.lock().source_node = node_id;
    }

    pub fn set_snmp_port(&self, port: u16) {
        self.state.lock().snmp_port = port;
    }

    pub fn set_resource_id(&self, resource_id: u32) {
        self.state.lock().resource_id = resource_id;
    }

    pub fn set_sample_count(&self, count: i32) {
        self.state.lock().sample_count = count;
    }

    pub fn set_schedules(&self, schedules: Vec<String>) {
        self.state.lock().schedules = schedules;
    }

    pub fn add_schedule(&self, schedule: &str) {
        self.state.lock().schedules.push(schedule.to_string());
    }

    pub fn set_result_columns(&self, columns: Vec<TableColumn>) {
        self.state.lock().result_columns = columns;
    }

    pub fn set_has_value(&self, has_value: bool) {
        self.state.lock().has_value = has_value;
    }

    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    /// Poll epilogue: record the poll time and make the item schedulable
    /// again. Written only after all status and value updates completed, so
    /// observers see a consistent (status, last-poll) pair.
    pub fn finish_poll(&self, now: i64) {
        let mut state = self.state.lock();
        state.last_poll = now;
        state.busy = false;
    }

    /// Declare the historical cache depth this item needs before its first
    /// poll. A non-zero depth keeps the item out of scheduling until
    /// [`reload_cache`](Self::reload_cache) runs.
    pub fn require_cache(&self, size: u32) {
        let mut state = self.state.lock();
        state.cache_size = size;
        state.cache_loaded = size == 0;
    }

    pub fn needs_cache_reload(&self) -> bool {
        let state = self.state.lock();
        state.cache_size > 0 && !state.cache_loaded
    }

    /// Warm the item's historical cache. Invoked by the cache loader.
    pub fn reload_cache(&self) {
        let mut state = self.state.lock();
        trace!(item = state.id, name = %state.name, depth = state.cache_size, "cache reloaded");
        state.cache_loaded = true;
    }

    // -----------------------------------------------------------------
    // Status machine
    // -----------------------------------------------------------------

    /// Change the item status. When `events` is given, the owner exists and
    /// is an event source, a status *change* publishes the matching event.
    pub fn set_status(&self, status: ItemStatus, events: Option<&dyn EventSink>) {
        let notification = {
            let mut state = self.state.lock();
            let changed = state.status != status;
            state.status = status;
            if changed && events.is_some() {
                state
                    .owner_arc()
                    .filter(|owner| owner.is_event_source())
                    .map(|owner| (owner.id(), state.event_detail()))
            } else {
                None
            }
        };

        if let (Some(events), Some((owner_id, detail))) = (events, notification) {
            let event = match status {
                ItemStatus::Active => DciEvent::DciActive(detail),
                ItemStatus::Disabled => DciEvent::DciDisabled(detail),
                ItemStatus::NotSupported => DciEvent::DciUnsupported(detail),
            };
            events.post(owner_id, event);
        }
    }

    /// Register a collection error and forward it to the owner.
    pub fn process_new_error(&self, no_instance: bool, now: i64) {
        let owner = {
            let mut state = self.state.lock();
            state.error_count += 1;
            state.owner_arc()
        };
        if let Some(owner) = owner {
            owner.process_new_error(self, no_instance, now);
        }
    }

    /// Persist this item's schedule set: the `(item_id, schedule_id,
    /// schedule_text)` rows are rebuilt atomically.
    ///
    /// # Errors
    ///
    /// A backend failure surfaces as [`KernelError::Store`] with the item id
    /// attached.
    pub async fn flush_schedules(
        &self,
        store: &dyn crate::store::ScheduleStore,
    ) -> KernelResult<()> {
        use error_stack::{Report, ResultExt};

        let (id, schedules) = {
            let state = self.state.lock();
            (state.id, state.schedules.clone())
        };
        store
            .replace_schedules(id, &schedules)
            .await
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach_printable_lazy(|| format!("persisting schedules of collection item {id}"))
    }

    /// Disable the item and mark it for deletion. Returns true when no poll
    /// is in flight, i.e. the caller may destroy the item immediately;
    /// otherwise the worker holding it will drain it through the queue.
    pub fn prepare_for_deletion(&self) -> bool {
        let mut state = self.state.lock();
        state.status = ItemStatus::Disabled;
        state.scheduled_for_deletion = true;
        let can_delete = !state.busy;
        debug!(item = state.id, can_delete, "prepared for deletion");
        can_delete
    }

    // -----------------------------------------------------------------
    // Force poll
    // -----------------------------------------------------------------

    /// Attach a one-shot force-poll request. A pending request is replaced,
    /// releasing the previous session handle.
    pub fn request_force_poll(&self, session: Arc<dyn SessionNotifier>) {
        self.state.lock().force_poll = Some(ForcePollRequest::new(session));
    }

    /// Detach the pending force-poll request, if any.
    pub fn take_force_poll(&self) -> Option<ForcePollRequest> {
        self.state.lock().force_poll.take()
    }

    // -----------------------------------------------------------------
    // Transformation
    // -----------------------------------------------------------------

    /// Assign (or clear) the transformation script. The source is compiled
    /// once here; a compilation failure is logged once and the script is
    /// disabled, letting collection continue with raw values.
    pub fn set_transformation_script(&self, source: Option<&str>, env: &dyn ScriptEnv) {
        let trimmed = source.map(str::trim).filter(|s| !s.is_empty());
        let compiled = trimmed.and_then(|src| match env.compile(src) {
            Ok(script) => Some(script),
            Err(e) => {
                let state = self.state.lock();
                warn!(
                    owner = state.owner_arc().map(|o| o.id()).unwrap_or(0),
                    owner_name = %state.owner_arc().map(|o| o.name()).unwrap_or_default(),
                    item = state.id,
                    name = %state.name,
                    error = %e,
                    "transformation script compilation failed"
                );
                None
            }
        });

        let mut state = self.state.lock();
        state.transformation_source = trimmed.map(String::from);
        state.transformation = compiled;
    }

    /// Apply the transformation script to a collected sample.
    ///
    /// Simple values run through the script with `$value` bound; a script
    /// returning nothing printable leaves the sample unchanged. Tables pass
    /// through. A runtime failure is returned to the caller, which demotes
    /// the sample to a collection error.
    pub fn transform(
        &self,
        data: CollectedData,
        env: &dyn ScriptEnv,
    ) -> Result<CollectedData, ScriptError> {
        let (script, bindings) = {
            let state = self.state.lock();
            match (&state.transformation, &data) {
                (Some(script), CollectedData::Value(value)) => {
                    let bindings = Self::script_bindings(&state).with("$value", value.as_str());
                    (script.clone(), bindings)
                }
                _ => return Ok(data),
            }
        };

        let result = env.run(&script, &bindings)?;
        match result.as_string() {
            Some(value) => Ok(CollectedData::Value(value)),
            None => Ok(data),
        }
    }

    // -----------------------------------------------------------------
    // Binding and templates
    // -----------------------------------------------------------------

    /// Rebind the item to a new owner, regenerating its GUID when a new id
    /// is assigned, and optionally expanding `%{...}` macros in the name,
    /// description and system tag.
    pub fn change_binding(
        &self,
        new_id: u32,
        owner: Option<&Arc<dyn Target>>,
        scripts: &dyn ScriptEnv,
        events: &dyn EventSink,
        expand_macros: bool,
    ) {
        {
            let mut state = self.state.lock();
            state.owner = owner.map(Arc::downgrade);
            if new_id != 0 {
                state.id = new_id;
                state.guid = Uuid::new_v4();
            }
        }

        if expand_macros {
            let (name, description, tag) = {
                let state = self.state.lock();
                (
                    state.name.clone(),
                    state.description.clone(),
                    state.system_tag.clone(),
                )
            };
            let name = self.expand_macros(&name, scripts, events);
            let description = self.expand_macros(&description, scripts, events);
            let tag = self.expand_macros(&tag, scripts, events);

            let mut state = self.state.lock();
            state.name = clamp_name(&name);
            state.description = description;
            state.system_tag = tag;
        }
    }

    /// Refresh this bound item from its template counterpart.
    pub fn update_from_template(
        &self,
        template: &CollectionItem,
        scripts: &dyn ScriptEnv,
        events: &dyn EventSink,
    ) {
        let src = template.state.lock();
        let name = src.name.clone();
        let description = src.description.clone();
        let tag = src.system_tag.clone();
        let polling_interval = src.polling_interval;
        let retention_days = src.retention_days;
        let source = src.source;
        let status = src.status;
        let flags = src.flags;
        let source_node = src.source_node;
        let resource_id = src.resource_id;
        let snmp_port = src.snmp_port;
        let schedules = src.schedules.clone();
        let transformation_source = src.transformation_source.clone();
        drop(src);

        let name = self.expand_macros(&name, scripts, events);
        let description = self.expand_macros(&description, scripts, events);
        let tag = self.expand_macros(&tag, scripts, events);

        {
            let mut state = self.state.lock();
            state.name = clamp_name(&name);
            state.description = description;
            state.system_tag = tag;
            state.polling_interval = polling_interval;
            state.retention_days = retention_days;
            state.source = source;
            state.flags = flags;
            state.source_node = source_node;
            state.resource_id = resource_id;
            state.snmp_port = snmp_port;
            state.schedules = schedules;
        }

        self.set_status(status, Some(events));
        self.set_transformation_script(transformation_source.as_deref(), scripts);
    }

    /// Expand `%{...}` macros against this item's owner: `%{node_id}`,
    /// `%{node_name}`, `%{node_primary_ip}` and `%{script:NAME}`. Unknown
    /// macros expand to nothing; an unterminated macro leaves the remainder
    /// verbatim.
    pub fn expand_macros(&self, text: &str, scripts: &dyn ScriptEnv, events: &dyn EventSink) -> String {
        let (owner, item_id, bindings) = {
            let state = self.state.lock();
            (state.owner_arc(), state.id, Self::script_bindings(&state))
        };

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("%{") {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            let Some(end) = tail.find('}') else {
                // Unterminated macro; keep the remainder as-is.
                out.push_str(tail);
                return out;
            };
            let name = tail[2..end].trim();

            match name {
                "node_id" => match &owner {
                    Some(owner) => out.push_str(&owner.id().to_string()),
                    None => out.push_str("(error)"),
                },
                "node_name" => match &owner {
                    Some(owner) => out.push_str(&owner.name()),
                    None => out.push_str("(error)"),
                },
                "node_primary_ip" => match owner.as_ref().and_then(|o| o.primary_ip()) {
                    Some(ip) => out.push_str(&ip),
                    None => out.push_str("(error)"),
                },
                script if script.starts_with("script:") => {
                    let script = &script["script:".len()..];
                    match scripts.run_named(script, &bindings) {
                        Ok(value) => {
                            if let Some(value) = value.as_string() {
                                out.push_str(&value);
                            }
                            debug!(item = item_id, script, "macro script executed");
                        }
                        Err(e) => {
                            debug!(item = item_id, script, error = %e, "macro script failed");
                            events.post(
                                owner.as_ref().map(|o| o.id()).unwrap_or(0),
                                DciEvent::ScriptError {
                                    script: script.to_string(),
                                    error: e.to_string(),
                                    item_id,
                                },
                            );
                        }
                    }
                }
                _ => {} // unknown macros expand to nothing
            }

            rest = &tail[end + 1..];
        }
        out.push_str(rest);
        out
    }

    // -----------------------------------------------------------------
    // Scheduling predicate
    // -----------------------------------------------------------------

    /// Whether the item must be enqueued for collection at `now`.
    ///
    /// Uses `try_lock`: an item being reconfigured or processing a value is
    /// simply skipped this tick rather than blocking the poll scheduler.
    pub fn is_due(&self, now: i64, ctx: &CollectionContext) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            trace!("collection item is locked, skipping this tick");
            return false;
        };

        // A pending force poll fires as soon as the item is pollable at
        // all; when it is not, the request is released on the spot.
        if state.force_poll.is_some() && !state.busy {
            if Self::pollable(&state, ctx) {
                return true;
            }
            debug!(item = state.id, name = %state.name, "forced poll cancelled");
            state.force_poll = None;
            return false;
        }

        if state.busy || !Self::pollable(&state, ctx) {
            return false;
        }

        if state.flags.contains(flags::ADVANCED_SCHEDULE) {
            let due = Self::matches_schedules(&state, now, ctx);
            state.last_check = now;
            due
        } else {
            let interval = Self::effective_interval(&state, ctx);
            let factor = if state.status == ItemStatus::NotSupported {
                NOT_SUPPORTED_INTERVAL_FACTOR
            } else {
                1
            };
            state.last_poll + interval * factor <= now
        }
    }

    /// Gates that hold regardless of cadence: administrative status, cache
    /// warm-up, push exclusion, cluster-resource affinity, value presence
    /// and the agent-side cache mode.
    fn pollable(state: &ItemState, ctx: &CollectionContext) -> bool {
        state.status != ItemStatus::Disabled
            && state.cache_loaded
            && state.source != SourceKind::Push
            && Self::cluster_resource_satisfied(state)
            && state.has_value
            && Self::effective_cache_mode(state, ctx) == CacheMode::Off
    }

    /// An item pinned to a cluster resource is polled only on the node
    /// currently owning that resource.
    fn cluster_resource_satisfied(state: &ItemState) -> bool {
        if state.resource_id == 0 {
            return true;
        }
        let Some(owner) = state.owner_arc() else {
            return false;
        };
        if owner.class() != TargetClass::Node {
            return true;
        }
        owner.cluster_resource_owned(state.resource_id)
    }

    /// Resolve the agent-side cache mode for this item: only agent and SNMP
    /// sources can be cached, the item's flag subfield wins, and `Default`
    /// falls back to the resolved node (owner, chassis controller, or
    /// source-node override).
    fn effective_cache_mode(state: &ItemState, ctx: &CollectionContext) -> CacheMode {
        if !matches!(state.source, SourceKind::NativeAgent | SourceKind::Snmp) {
            return CacheMode::Off;
        }

        let node = if state.source_node != 0 {
            ctx.objects.find_node(state.source_node)
        } else {
            match state.owner_arc() {
                Some(owner) => match owner.class() {
                    TargetClass::Node => Some(owner),
                    TargetClass::Chassis => ctx.objects.find_node(owner.controller_id()),
                    _ => None,
                },
                None => None,
            }
        };
        let Some(node) = node else {
            return CacheMode::Off;
        };

        let mode = match state.flags.cache_mode() {
            CacheMode::Default => node.agent_cache_mode(),
            mode => mode,
        };
        if mode == CacheMode::Default {
            CacheMode::Off
        } else {
            mode
        }
    }

    fn effective_interval(state: &ItemState, ctx: &CollectionContext) -> i64 {
        if state.polling_interval > 0 {
            state.polling_interval
        } else {
            ctx.config.default_polling_interval
        }
    }

    /// Retention hint handed downstream, with the configured default applied
    /// to items that do not set their own.
    pub fn effective_retention_days(&self, ctx: &CollectionContext) -> i32 {
        let state = self.state.lock();
        if state.retention_days > 0 {
            state.retention_days
        } else {
            ctx.config.default_retention_days
        }
    }

    /// Advanced-schedule evaluation with the minute-dedup rule: a match from
    /// a second-less expression fires only once per covered minute.
    fn matches_schedules(state: &ItemState, now: i64, ctx: &CollectionContext) -> bool {
        if state.schedules.is_empty() {
            return false;
        }
        let Some(local_now) = schedule::civil_time(now) else {
            return false;
        };
        let local_last = schedule::civil_time(state.last_check);
        let bindings = Self::script_bindings(state);

        for expr in &state.schedules {
            let Some(resolved) =
                schedule::expand_schedule_reference(expr, ctx.scripts.as_ref(), &bindings, state.id)
            else {
                continue;
            };
            let m = schedule::match_schedule(&resolved, &local_now, now);
            if !m.matched {
                continue;
            }
            use chrono::Timelike;
            let minute_changed = local_last
                .map(|last| last.minute() != local_now.minute())
                .unwrap_or(true);
            if m.with_seconds || now - state.last_check >= 60 || minute_changed {
                return true;
            }
        }
        false
    }

    /// Snapshot bindings exposed to scripts: `$node` and `$dci`.
    fn script_bindings(state: &ItemState) -> ScriptBindings {
        let node = state
            .owner_arc()
            .map(|o| serde_json::json!({ "id": o.id(), "name": o.name() }))
            .unwrap_or(serde_json::Value::Null);
        ScriptBindings::new().with("$node", node).with(
            "$dci",
            serde_json::json!({
                "id": state.id,
                "name": state.name,
                "description": state.description,
                "systemTag": state.system_tag,
                "origin": state.source.code(),
                "errorCount": state.error_count,
                "lastPollTime": state.last_poll,
            }),
        )
    }

    #[cfg(test)]
    fn lock_for_test(&self) -> parking_lot::MutexGuard<'_, ItemState> {
        self.state.lock()
    }
}

impl std::fmt::Debug for CollectionItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CollectionItem")
            .field("id", &state.id)
            .field("name", &state.name)
            .field("source", &state.source)
            .field("status", &state.status)
            .field("busy", &state.busy)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
