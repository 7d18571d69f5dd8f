//! Merge node handlers.
//!
//! A merge node's registry is materialized from its shadow list: the
//! deduplicated traversal of every source feeding its slots (see
//! [`crate::shadow`]). Each handler derives a "post" traversal in which only
//! the event's source is read fresh, applies the smallest registry edit that
//! turns the cached "pre" view into it (moving fields rather than removing
//! and re-adding them so downstream links survive) and finally caches "post"
//! for the next event. A registry that then differs from "post" is a
//! [`CoreError::ShadowDrift`].

use crate::error::CoreError;
use crate::event::{EventKind, UpstreamEvent};
use crate::field::Field;
use crate::graph::ContextGraph;
use crate::id::NodeId;
use crate::node::{ContextNode, MergeNode};
use crate::propagate;
use crate::registry::FieldRegistry;
use crate::shadow::{self, ShadowEntry, SourceFields};

impl ContextNode for MergeNode {
    fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut FieldRegistry {
        &mut self.registry
    }

    fn input_slots(&self) -> usize {
        self.slots
    }

    fn on_upstream_event(
        graph: &mut ContextGraph,
        id: NodeId,
        event: &UpstreamEvent,
    ) -> Result<(), CoreError> {
        if !graph.merge(id)?.settled {
            let post = collect(graph, id)?;
            reconcile(graph, id, &post)?;
            return finish(graph, id, post);
        }
        let pre = graph.merge(id)?.cache.clone();
        let source = event.source;
        let index = event.payload.index;
        let post = collect_changed(graph, id, source, &pre)?;

        match event.kind {
            EventKind::Connect => {
                let entry = shadow::find_entry(&post, source, index)
                    .cloned()
                    .ok_or_else(|| missing(id, source, index, "post"))?;
                connect_entry(graph, id, &entry)?;
            }
            EventKind::Disconnect => {
                let entry = shadow::find_entry(&pre, source, index)
                    .cloned()
                    .ok_or_else(|| missing(id, source, index, "cached"))?;
                disconnect_entry(graph, id, &entry, &post)?;
            }
            EventKind::Move => reconcile(graph, id, &post)?,
            EventKind::Update => {
                let before = shadow::find_entry(&pre, source, index);
                let after = shadow::find_entry(&post, source, index);
                match (before, after) {
                    (Some(b), Some(a))
                        if b.is_live()
                            && b.shadow_index == a.shadow_index
                            && b.duplicates_after.is_empty()
                            && a.duplicates_after.is_empty() =>
                    {
                        if let Some(at) = a.shadow_index {
                            propagate::rename_field(graph, id, at, &a.name)?;
                        }
                    }
                    (Some(b), _) if !b.is_live() && after.is_some_and(|a| !a.is_live()) => {
                        tracing::debug!(merge = %id, key = %b.key, "suppressed duplicate renamed, nothing visible");
                    }
                    _ => reconcile(graph, id, &post)?,
                }
            }
        }
        finish(graph, id, post)
    }

    fn on_slot_connected(graph: &mut ContextGraph, id: NodeId, slot: usize) -> Result<(), CoreError> {
        {
            let merge = graph.merge_mut(id)?;
            if slot + 1 >= merge.slots {
                merge.slots = slot + 2;
            }
        }
        let post = collect(graph, id)?;
        if !graph.merge(id)?.settled {
            reconcile(graph, id, &post)?;
            return finish(graph, id, post);
        }
        let added: Vec<ShadowEntry> = post.iter().filter(|e| e.slot == slot).cloned().collect();
        for entry in &added {
            connect_entry(graph, id, entry)?;
        }
        finish(graph, id, post)
    }

    fn on_slot_disconnected(graph: &mut ContextGraph, id: NodeId, slot: usize) -> Result<(), CoreError> {
        tracing::debug!(merge = %id, slot, "source removed, reconciling");
        let post = collect(graph, id)?;
        reconcile(graph, id, &post)?;
        trim_free_slots(graph, id)?;
        finish(graph, id, post)
    }
}

fn missing(node: NodeId, source: NodeId, index: usize, list: &'static str) -> CoreError {
    tracing::error!(merge = %node, %source, index, list, "event does not match any traversal entry");
    CoreError::MissingTraceback {
        node,
        source_node: source,
        index,
        list,
    }
}

/// Resolved sources of merge node `id`, in slot order.
pub(crate) fn sources(graph: &ContextGraph, id: NodeId) -> Result<Vec<SourceFields>, CoreError> {
    let slots = graph.merge(id)?.slots;
    let mut out = Vec::new();
    for slot in 0..slots {
        let Some(source) = graph.resolve_upstream(id, slot) else {
            continue;
        };
        let Some(node) = graph.node(source) else {
            continue;
        };
        if node.as_context().is_none() {
            continue;
        }
        out.push(SourceFields {
            slot,
            source,
            fields: graph.provide_fields(source)?,
        });
    }
    Ok(out)
}

/// Full traversal of merge node `id`'s sources.
pub(crate) fn collect(graph: &ContextGraph, id: NodeId) -> Result<Vec<ShadowEntry>, CoreError> {
    shadow::collect_entries(&sources(graph, id)?)
}

/// Traversal with only `changed` read from the graph. Every other source is
/// taken from `cached`: in a diamond its own event may still be on the way,
/// and one handler applies exactly one source's change.
fn collect_changed(
    graph: &ContextGraph,
    id: NodeId,
    changed: NodeId,
    cached: &[ShadowEntry],
) -> Result<Vec<ShadowEntry>, CoreError> {
    let mut sources = sources(graph, id)?;
    for source in sources.iter_mut().filter(|s| s.source != changed) {
        let known = shadow::source_fields(cached, source.slot, source.source);
        if !known.is_empty() {
            source.fields = known;
        }
    }
    shadow::collect_entries(&sources)
}

/// Fails with [`CoreError::ConflictingSchema`] when `proposed` feeding `slot`
/// of merge node `id`, in place of whatever feeds it now, could not be
/// merged with the other sources.
pub(crate) fn check_source(
    graph: &ContextGraph,
    id: NodeId,
    slot: usize,
    proposed: Option<NodeId>,
) -> Result<(), CoreError> {
    let mut sources = sources(graph, id)?;
    sources.retain(|s| s.slot != slot);
    let proposed = proposed.filter(|p| graph.node(*p).is_some_and(|n| n.as_context().is_some()));
    if let Some(source) = proposed {
        let at = sources.iter().position(|s| s.slot > slot).unwrap_or(sources.len());
        sources.insert(
            at,
            SourceFields {
                slot,
                source,
                fields: graph.provide_fields(source)?,
            },
        );
    }
    shadow::collect_entries(&sources).map(|_| ())
}

/// Replaces the registry with a fresh materialization. Used by
/// [`ContextGraph::settle`]; emits nothing.
pub(crate) fn rebuild(graph: &mut ContextGraph, id: NodeId) -> Result<(), CoreError> {
    let entries = collect(graph, id)?;
    let merge = graph.merge_mut(id)?;
    let rebuilt = FieldRegistry::from(shadow::materialize(&entries));
    if merge.registry.keys() != rebuilt.keys() {
        tracing::warn!(merge = %id, "restored merge fields differ from their sources, using the rebuilt list");
    }
    merge.registry = rebuilt;
    merge.cache = entries;
    merge.settled = true;
    tracing::debug!(merge = %id, fields = merge.registry.typed_len(), "merge settled");
    Ok(())
}

/// A source field appeared.
fn connect_entry(graph: &mut ContextGraph, id: NodeId, entry: &ShadowEntry) -> Result<(), CoreError> {
    if entry.is_base() {
        return Ok(());
    }
    if !entry.duplicates_before.is_empty() {
        tracing::debug!(merge = %id, key = %entry.key, "suppressed by an earlier source");
        return Ok(());
    }
    let Some(at) = entry.shadow_index else {
        return Ok(());
    };
    if !entry.duplicates_after.is_empty() {
        if let Some(existing) = graph.registry(id)?.position_of_key(&entry.key) {
            tracing::debug!(merge = %id, key = %entry.key, from = existing, to = at, "earlier source takes over field");
            propagate::move_field(graph, id, existing, at)?;
            return Ok(());
        }
    }
    propagate::add_field(graph, id, Field::mirrored(entry.name.clone(), entry.ty.clone()), Some(at))?;
    Ok(())
}

/// A source field disappeared. `entry` comes from the cached traversal.
fn disconnect_entry(
    graph: &mut ContextGraph,
    id: NodeId,
    entry: &ShadowEntry,
    post: &[ShadowEntry],
) -> Result<(), CoreError> {
    if entry.is_base() || !entry.duplicates_before.is_empty() {
        return Ok(());
    }
    let Some(at) = entry.shadow_index else {
        return Ok(());
    };
    if !entry.duplicates_after.is_empty() {
        if let Some(to) = shadow::live_entry(post, &entry.key).and_then(|e| e.shadow_index) {
            tracing::debug!(merge = %id, key = %entry.key, from = at, to, "promoting later duplicate");
            propagate::move_field(graph, id, at, to)?;
            return Ok(());
        }
    }
    propagate::remove_field(graph, id, at)?;
    Ok(())
}

/// Moves, adds and removes fields until the registry matches `post`.
fn reconcile(graph: &mut ContextGraph, id: NodeId, post: &[ShadowEntry]) -> Result<(), CoreError> {
    let live: Vec<ShadowEntry> = shadow::live_fields(post).cloned().collect();

    for entry in &live {
        let Some(at) = entry.shadow_index else {
            continue;
        };
        let registry = graph.registry(id)?;
        let existing = registry
            .position_of_key(&entry.key)
            .filter(|&p| p > 0)
            .map(|p| (p, registry.get(p).map(|f| f.ty == entry.ty).unwrap_or(false)));
        match existing {
            Some((p, true)) => {
                let to = at.min(registry.typed_len().saturating_sub(1));
                if p != to {
                    propagate::move_field(graph, id, p, to)?;
                }
            }
            Some((p, false)) => {
                propagate::remove_field(graph, id, p)?;
                propagate::add_field(graph, id, Field::mirrored(entry.name.clone(), entry.ty.clone()), Some(at))?;
            }
            None => {
                propagate::add_field(graph, id, Field::mirrored(entry.name.clone(), entry.ty.clone()), Some(at))?;
            }
        }
    }

    let keep = live.len();
    loop {
        let registry = graph.registry(id)?;
        let typed = registry.typed_len();
        if typed <= keep + 1 {
            break;
        }
        propagate::remove_field(graph, id, typed - 1)?;
    }
    // Stray wildcard slots left inside the typed range.
    while let Some(w) = graph.registry(id)?.wildcard_index() {
        if w + 1 == graph.registry(id)?.len() {
            break;
        }
        graph.merge_mut(id)?.registry.take(w);
    }
    graph.merge_mut(id)?.registry.ensure_wildcard();
    Ok(())
}

/// Drops trailing source slots that are both unlinked, keeping one free.
fn trim_free_slots(graph: &mut ContextGraph, id: NodeId) -> Result<(), CoreError> {
    loop {
        let slots = graph.merge(id)?.slots;
        if slots < 2 {
            return Ok(());
        }
        let last_free = graph.input_link(id, slots - 1).is_none();
        let previous_free = graph.input_link(id, slots - 2).is_none();
        if !(last_free && previous_free) {
            return Ok(());
        }
        graph.merge_mut(id)?.slots = slots - 1;
    }
}

/// Caches `post` once the registry matches it. A mismatch means an
/// incremental handler went wrong; it is reported, not repaired.
fn finish(graph: &mut ContextGraph, id: NodeId, post: Vec<ShadowEntry>) -> Result<(), CoreError> {
    let expected = shadow::live_keys(&post);
    let actual: Vec<String> = graph.registry(id)?.keys().into_iter().skip(1).collect();
    if actual != expected {
        tracing::error!(merge = %id, ?expected, ?actual, "merge fields drifted from their sources");
        return Err(CoreError::ShadowDrift {
            node: id,
            expected,
            actual,
        });
    }
    let merge = graph.merge_mut(id)?;
    merge.cache = post;
    merge.settled = true;
    Ok(())
}
