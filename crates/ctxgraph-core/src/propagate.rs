//! Registry mutations that propagate.
//!
//! Each helper performs one mutation on a context node's registry, moves
//! the links attached to the node along with their fields and then emits
//! exactly one [`UpstreamEvent`] downstream when a typed field changed.
//! Relay and merge handlers only ever change their registries through here.

use crate::error::CoreError;
use crate::event::UpstreamEvent;
use crate::field::Field;
use crate::graph::ContextGraph;
use crate::id::NodeId;
use crate::registry::SlotRemap;

/// Inserts `field` at `at` and returns its final index.
pub(crate) fn add_field(
    graph: &mut ContextGraph,
    node: NodeId,
    field: Field,
    at: Option<usize>,
) -> Result<usize, CoreError> {
    let typed = !field.is_wildcard();
    let event_name = field.display_name().to_string();
    let ty = field.ty.clone();

    let index = graph.registry_mut(node)?.add(field, at);
    graph.remap_links(node, SlotRemap::Inserted(index));
    tracing::debug!(%node, index, name = %event_name, "field added");

    if typed {
        graph.emit(UpstreamEvent::connect(node, index, &event_name, ty))?;
    }
    Ok(index)
}

/// Removes the field at `index`, owned or not.
pub(crate) fn remove_field(
    graph: &mut ContextGraph,
    node: NodeId,
    index: usize,
) -> Result<Option<Field>, CoreError> {
    let Some(field) = graph.registry_mut(node)?.take(index) else {
        return Ok(None);
    };
    graph.remap_links(node, SlotRemap::Removed(index));
    tracing::debug!(%node, index, name = %field.name, "field removed");

    if !field.is_wildcard() {
        graph.emit(UpstreamEvent::disconnect(
            node,
            index,
            field.display_name(),
            field.ty.clone(),
        ))?;
    }
    Ok(Some(field))
}

/// Splices the field at `from` so it ends at `to`. Returns `false` when
/// nothing moved.
pub(crate) fn move_field(
    graph: &mut ContextGraph,
    node: NodeId,
    from: usize,
    to: usize,
) -> Result<bool, CoreError> {
    let registry = graph.registry_mut(node)?;
    if !registry.move_field(from, to) {
        return Ok(false);
    }
    let Some(field) = registry.get(to).cloned() else {
        return Ok(false);
    };
    graph.remap_links(node, SlotRemap::Moved { from, to });
    tracing::debug!(%node, from, to, name = %field.name, "field moved");

    graph.emit(UpstreamEvent::moved(
        node,
        from,
        to,
        field.display_name(),
        field.ty.clone(),
    ))?;
    Ok(true)
}

/// Renames the field at `index`. `new_name` is stored as given, so owned
/// fields must already carry their prefix. Returns `false` when the name
/// did not change.
pub(crate) fn rename_field(
    graph: &mut ContextGraph,
    node: NodeId,
    index: usize,
    new_name: &str,
) -> Result<bool, CoreError> {
    let registry = graph.registry_mut(node)?;
    match registry.get(index) {
        Some(f) if f.name != new_name && !f.is_wildcard() => {}
        _ => return Ok(false),
    }
    registry.rename(index, new_name);
    let Some(field) = registry.get(index).cloned() else {
        return Ok(false);
    };
    tracing::debug!(%node, index, name = %field.name, "field renamed");

    graph.emit(UpstreamEvent::update(
        node,
        index,
        field.display_name(),
        field.ty.clone(),
    ))?;
    Ok(true)
}
