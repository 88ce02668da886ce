//! The collector pool: workers consuming the collection queue, resolving the
//! effective target, dispatching probe reads and mapping outcomes onto the
//! item status machine.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use netpulse_kernel::context::CollectionContext;
use netpulse_kernel::item::{CollectionItem, ItemKind, ItemStatus};
use netpulse_kernel::probe::{
    CollectedData, ProbeOutcome, ProbeReading, SourceKind, escape_agent_string,
};
use netpulse_kernel::queue::QueueEntry;
use netpulse_kernel::target::{Target, TargetClass};

/// Worker task body: block on the queue, drain deletions, collect items.
///
/// One parameter buffer per worker is reused across polls for synthesized
/// agent parameters (WinPerf counters, SSH commands).
pub(crate) async fn run_data_collector(worker: usize, ctx: Arc<CollectionContext>) {
    let mut param_buffer = String::with_capacity(1024);

    debug!(worker, "data collector started");
    loop {
        match ctx.collection_queue.recv().await {
            QueueEntry::Shutdown => break,
            QueueEntry::Item(item) => collect_item(&ctx, item, &mut param_buffer).await,
        }
    }
    debug!(worker, "data collector thread terminated");
}

async fn collect_item(ctx: &CollectionContext, item: Arc<CollectionItem>, buf: &mut String) {
    if item.is_scheduled_for_deletion() {
        debug!(
            item = item.id(),
            name = %item.name(),
            owner = item.owner_id(),
            "about to destroy collection item"
        );
        if let Err(e) = ctx.schedule_store.delete_schedules(item.id()).await {
            warn!(item = item.id(), error = %e, "failed to flush deleted item schedules");
        }
        return;
    }

    let Some(owner) = item.owner() else {
        debug!(
            item = item.id(),
            name = %item.name(),
            "attempt to collect information for a non-existing target"
        );
        item.finish_poll(ctx.clock.now());
        return;
    };

    trace!(
        item = item.id(),
        name = %item.name(),
        owner = owner.id(),
        source_node = item.source_node_override(),
        "processing collection item"
    );

    // Resolve the effective target: a source-node override redirects
    // collection when the override is the chassis controller or explicitly
    // trusts the owner; anything else demotes the item.
    let source_node_id = owner.effective_source_node(&item);
    let target = if source_node_id != 0 {
        match ctx.objects.find_node(source_node_id) {
            Some(node) => {
                let controller_link = owner.class() == TargetClass::Chassis
                    && owner.controller_id() == source_node_id;
                if controller_link || node.trusts(owner.id()) {
                    Some(node)
                } else {
                    item.set_status(ItemStatus::NotSupported, Some(ctx.events.as_ref()));
                    None
                }
            }
            None => None,
        }
    } else {
        Some(Arc::clone(&owner))
    };

    let now = ctx.clock.now();
    match target {
        Some(target) => {
            if !ctx.is_shutdown() {
                let reading = match item.kind() {
                    ItemKind::SimpleValue => read_item_value(ctx, &target, &item, buf).await,
                    ItemKind::Table => read_table_value(&target, &item).await,
                };
                apply_reading(ctx, &owner, &item, reading, now);
            }

            // Session notification for operator-initiated polls.
            if let Some(request) = item.take_force_poll() {
                request.notify(item.owner_id());
            }
        }
        None => {
            debug!(
                item = item.id(),
                name = %item.name(),
                owner = owner.id(),
                source_node = source_node_id,
                "attempt to collect information through a non-existing or inaccessible source node"
            );
        }
    }

    item.finish_poll(now);
}

/// Map a probe reading onto the status machine and the downstream sinks.
///
/// Any non-not-supported outcome recovers a demoted item *before* the value
/// or error is forwarded.
fn apply_reading(
    ctx: &CollectionContext,
    owner: &Arc<dyn Target>,
    item: &Arc<CollectionItem>,
    reading: ProbeReading,
    now: i64,
) {
    let events = ctx.events.as_ref();
    match reading.outcome {
        ProbeOutcome::Success => {
            if item.status() == ItemStatus::NotSupported {
                item.set_status(ItemStatus::Active, Some(events));
            }
            let Some(data) = reading.data else {
                item.process_new_error(false, now);
                return;
            };
            match item.transform(data, ctx.scripts.as_ref()) {
                Ok(data) => {
                    if !owner.process_new_value(item, now, &data) {
                        // Value processing failed downstream; demote the
                        // sample to a collection error.
                        item.process_new_error(false, now);
                    }
                }
                Err(e) => {
                    debug!(item = item.id(), error = %e, "transformation failed for sample");
                    item.process_new_error(false, now);
                }
            }
        }
        ProbeOutcome::CollectionError => {
            if item.status() == ItemStatus::NotSupported {
                item.set_status(ItemStatus::Active, Some(events));
            }
            item.process_new_error(false, now);
        }
        ProbeOutcome::NoSuchInstance => {
            if item.status() == ItemStatus::NotSupported {
                item.set_status(ItemStatus::Active, Some(events));
            }
            item.process_new_error(true, now);
        }
        ProbeOutcome::CommError => {
            item.process_new_error(false, now);
        }
        ProbeOutcome::NotSupported => {
            item.set_status(ItemStatus::NotSupported, Some(events));
        }
        ProbeOutcome::Ignore => {}
    }
}

/// Dispatch a simple-value read on (target class, source kind).
async fn read_item_value(
    ctx: &CollectionContext,
    target: &Arc<dyn Target>,
    item: &Arc<CollectionItem>,
    buf: &mut String,
) -> ProbeReading {
    if target.class() == TargetClass::Cluster {
        return if item.aggregate_on_cluster() {
            target.collect_cluster_data(item).await
        } else {
            ProbeReading::ignore()
        };
    }

    let is_node = target.class() == TargetClass::Node;
    let name = item.name();
    match item.source() {
        SourceKind::Internal => target.read_internal(&name).await,
        SourceKind::NativeAgent if is_node => target.read_agent(&name).await,
        SourceKind::Snmp if is_node => {
            target
                .read_snmp(item.snmp_port(), item.interpret_snmp_raw(), &name)
                .await
        }
        SourceKind::CheckpointSnmp if is_node => target.read_checkpoint_snmp(&name).await,
        SourceKind::WinPerf if is_node => {
            buf.clear();
            let _ = write!(
                buf,
                "PDH.CounterValue(\"{}\",{})",
                escape_agent_string(&name),
                item.sample_count()
            );
            target.read_agent(buf).await
        }
        SourceKind::Ssh if is_node => read_through_ssh_proxy(ctx, target, &name, buf).await,
        SourceKind::Smclp if is_node => target.read_smclp(&name).await,
        SourceKind::Script => target.read_script(&name).await,
        _ => ProbeReading::not_supported(),
    }
}

/// Resolve the SSH proxy chain (item-pinned proxy, zone proxy, management
/// node) and synthesize an `SSH.Command` parameter against the proxy agent.
async fn read_through_ssh_proxy(
    ctx: &CollectionContext,
    target: &Arc<dyn Target>,
    command: &str,
    buf: &mut String,
) -> ProbeReading {
    let mut proxy_id = target.ssh_proxy();
    if proxy_id == 0 {
        let zone = target.zone_proxy();
        proxy_id = if zone != 0 {
            zone
        } else {
            ctx.config.management_node_id
        };
    }

    let Some(proxy) = ctx.objects.find_node(proxy_id) else {
        return ProbeReading::comm_error();
    };
    let Some(endpoint) = target.ssh_endpoint() else {
        return ProbeReading::comm_error();
    };

    buf.clear();
    let _ = write!(
        buf,
        "SSH.Command({},\"{}\",\"{}\",\"{}\")",
        endpoint.ip,
        escape_agent_string(&endpoint.login),
        escape_agent_string(&endpoint.password),
        escape_agent_string(command)
    );
    proxy.read_agent(buf).await
}

/// Dispatch a table read. Successful reads get their column display names
/// rewritten from the item's column definitions.
async fn read_table_value(target: &Arc<dyn Target>, item: &Arc<CollectionItem>) -> ProbeReading {
    if target.class() == TargetClass::Cluster {
        return if item.aggregate_on_cluster() {
            target.collect_cluster_data(item).await
        } else {
            ProbeReading::ignore()
        };
    }

    let is_node = target.class() == TargetClass::Node;
    let name = item.name();
    let mut reading = match item.source() {
        SourceKind::NativeAgent if is_node => target.read_agent_table(&name).await,
        SourceKind::Snmp if is_node => target.read_snmp_table(item.snmp_port(), &name).await,
        _ => ProbeReading::not_supported(),
    };

    if reading.outcome == ProbeOutcome::Success {
        if let Some(CollectedData::Table(table)) = reading.data.as_mut() {
            let definitions = item.result_columns();
            if !definitions.is_empty() {
                table.update_result_columns(&definitions);
            }
        }
    }
    reading
}
