//! Relay node handlers.
//!
//! A relay mirrors the fields of the single context node feeding its slot 0,
//! position for position, and may own extra fields bound through its
//! trailing wildcard slot. Mirrored fields follow upstream events; owned
//! fields are renamed and deleted by the user and renumbered by
//! [`stabilize_names`] whenever a collision appears.

use crate::error::CoreError;
use crate::event::{EventKind, UpstreamEvent};
use crate::field::Field;
use crate::graph::ContextGraph;
use crate::id::NodeId;
use crate::naming;
use crate::node::{ContextNode, NodeKind, RelayNode};
use crate::propagate;
use crate::registry::FieldRegistry;

impl ContextNode for RelayNode {
    fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut FieldRegistry {
        &mut self.registry
    }

    fn input_slots(&self) -> usize {
        self.registry.len()
    }

    fn on_upstream_event(
        graph: &mut ContextGraph,
        id: NodeId,
        event: &UpstreamEvent,
    ) -> Result<(), CoreError> {
        if graph.relay(id)?.upstream != Some(event.source) {
            tracing::trace!(relay = %id, source = %event.source, "event from a node this relay does not mirror");
            return Ok(());
        }
        let index = event.payload.index;
        match event.kind {
            // A new mirrored field lower-cases a bare upper-case name; an
            // owned field that collides with it is renumbered by
            // stabilize_names.
            EventKind::Connect => {
                let name = naming::source_display_name(&event.payload.name);
                propagate::add_field(graph, id, Field::mirrored(name, event.payload.ty.clone()), Some(index))?;
                stabilize_names(graph, id)
            }
            EventKind::Disconnect => {
                if index > 0 && is_mirrored(graph, id, index)? {
                    propagate::remove_field(graph, id, index)?;
                    stabilize_names(graph, id)?;
                }
                Ok(())
            }
            EventKind::Move => {
                let Some(from) = event.payload.from else {
                    return Ok(());
                };
                if from > 0 && index > 0 && is_mirrored(graph, id, from)? && is_mirrored(graph, id, index)? {
                    propagate::move_field(graph, id, from, index)?;
                }
                Ok(())
            }
            EventKind::Update => {
                if index == 0 || !is_mirrored(graph, id, index)? {
                    return Ok(());
                }
                let name = naming::strip_owned_prefix(&event.payload.name);
                propagate::rename_field(graph, id, index, name)?;
                stabilize_names(graph, id)
            }
        }
    }

    fn on_slot_connected(graph: &mut ContextGraph, id: NodeId, slot: usize) -> Result<(), CoreError> {
        if slot == 0 {
            return bind_upstream(graph, id);
        }
        if graph.registry(id)?.wildcard_index() != Some(slot) {
            return Ok(());
        }
        let Some((label, ty)) = graph.follow_until_type(id, slot) else {
            tracing::debug!(relay = %id, slot, "no concrete type behind wildcard link yet");
            return Ok(());
        };
        let desired = naming::source_display_name(&label);
        let name = naming::next_unique_name(&graph.registry(id)?.keys(), &desired);
        let Some(index) = graph.relay_mut(id)?.registry.bind_wildcard(&name, ty.clone()) else {
            return Ok(());
        };
        tracing::debug!(relay = %id, index, %name, "wildcard bound to owned field");
        graph.emit(UpstreamEvent::connect(id, index, &name, ty))
    }

    fn on_slot_disconnected(graph: &mut ContextGraph, id: NodeId, slot: usize) -> Result<(), CoreError> {
        if slot != 0 {
            return Ok(());
        }
        let relay = graph.relay_mut(id)?;
        let Some(previous) = relay.upstream.take() else {
            return Ok(());
        };
        tracing::debug!(relay = %id, upstream = %previous, "upstream removed, clearing mirrored fields");
        clear_mirrored(graph, id)?;
        stabilize_names(graph, id)
    }
}

fn is_mirrored(graph: &ContextGraph, id: NodeId, index: usize) -> Result<bool, CoreError> {
    Ok(graph
        .registry(id)?
        .get(index)
        .is_some_and(|f| !f.owned && !f.is_wildcard()))
}

/// Slot 0 just got a link: mirror every field of the new upstream context.
fn bind_upstream(graph: &mut ContextGraph, id: NodeId) -> Result<(), CoreError> {
    let upstream = graph.resolve_upstream(id, 0).filter(|up| {
        matches!(graph.kind(*up), Some(NodeKind::Relay) | Some(NodeKind::Merge))
    });
    let Some(upstream) = upstream else {
        return Ok(());
    };
    if graph.relay(id)?.upstream.is_some() {
        clear_mirrored(graph, id)?;
    }
    graph.relay_mut(id)?.upstream = Some(upstream);
    tracing::debug!(relay = %id, %upstream, "relay bound to upstream context");

    for info in graph.provide_fields(upstream)? {
        if info.index == 0 || info.name == naming::BASE_CONTEXT_NAME {
            continue;
        }
        let event = UpstreamEvent::connect(upstream, info.index, &info.name, info.ty);
        RelayNode::on_upstream_event(graph, id, &event)?;
    }
    Ok(())
}

/// Removes every mirrored field, wherever it sits, highest index first.
fn clear_mirrored(graph: &mut ContextGraph, id: NodeId) -> Result<(), CoreError> {
    let mirrored: Vec<usize> = graph
        .registry(id)?
        .list()
        .iter()
        .enumerate()
        .filter(|(i, f)| *i > 0 && !f.owned && !f.is_wildcard())
        .map(|(i, _)| i)
        .collect();
    for index in mirrored.into_iter().rev() {
        propagate::remove_field(graph, id, index)?;
    }
    Ok(())
}

/// Renumbers owned fields so every key on the node is unique.
///
/// The base slot and the trailing wildcard are left alone and mirrored
/// fields keep their names; the first owned field with a given base name
/// keeps it, later ones get `.1`, `.2`, ...
pub fn stabilize_names(graph: &mut ContextGraph, id: NodeId) -> Result<(), CoreError> {
    let fields = graph.registry(id)?.list().to_vec();
    let mut taken: Vec<String> = fields
        .iter()
        .filter(|f| !f.owned && !f.is_wildcard())
        .map(|f| f.key())
        .collect();

    for (index, field) in fields.iter().enumerate() {
        if index == 0 || !field.owned || field.is_wildcard() {
            continue;
        }
        let base = naming::strip_numeric_suffix(field.display_name());
        let wanted = naming::next_unique_name(&taken, base);
        taken.push(naming::name_key(&wanted));
        if wanted != field.display_name() {
            propagate::rename_field(graph, id, index, &naming::add_owned_prefix(&wanted))?;
        }
    }
    Ok(())
}

/// User rename of an owned relay field.
pub(crate) fn rename_owned_field(
    graph: &mut ContextGraph,
    id: NodeId,
    index: usize,
    new_name: &str,
) -> Result<(), CoreError> {
    let field = graph
        .registry(id)?
        .get(index)
        .cloned()
        .ok_or(CoreError::InvalidSlot { node: id, slot: index })?;
    if !field.owned {
        return Err(CoreError::NotOwned { node: id, index });
    }

    let trimmed = naming::strip_owned_prefix(new_name.trim());
    let name = if trimmed.is_empty() {
        field.display_name().to_lowercase()
    } else {
        trimmed.to_string()
    };
    propagate::rename_field(graph, id, index, &naming::add_owned_prefix(&name))?;
    stabilize_names(graph, id)
}

/// User deletion of an owned relay field.
pub(crate) fn remove_owned_field(graph: &mut ContextGraph, id: NodeId, index: usize) -> Result<(), CoreError> {
    let removable = graph
        .registry(id)?
        .get(index)
        .is_some_and(|f| f.owned && f.removable);
    if !removable {
        return Err(CoreError::NotRemovable { node: id, index });
    }
    propagate::remove_field(graph, id, index)?;
    stabilize_names(graph, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{InputPort, OutputPort, TypeTag};

    fn names(graph: &ContextGraph, id: NodeId) -> Vec<String> {
        graph
            .fields(id)
            .unwrap()
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    fn loader(graph: &mut ContextGraph) -> NodeId {
        graph.add_plain(
            "Loader",
            vec![],
            vec![
                OutputPort::new("MODEL", TypeTag::new("MODEL")),
                OutputPort::new("CLIP", TypeTag::new("CLIP")),
            ],
        )
    }

    /// Binds the loader's outputs to owned fields of `relay`.
    fn bind(graph: &mut ContextGraph, relay: NodeId, source: NodeId, slot: usize) {
        let wildcard = graph.registry(relay).unwrap().wildcard_index().unwrap();
        graph.connect(source, slot, relay, wildcard).unwrap();
    }

    #[test]
    fn wildcard_link_creates_lower_cased_owned_field() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        bind(&mut graph, a, l, 1);

        assert_eq!(names(&graph, a), vec!["base_ctx", "+ model", "+ clip", "+"]);
        let labels: Vec<&str> = graph
            .registry(a)
            .unwrap()
            .outputs()
            .iter()
            .map(|o| o.label.as_str())
            .collect();
        assert_eq!(labels, vec!["BASE_CTX", "MODEL", "CLIP"]);
        assert_eq!(graph.input_link(a, 2).map(|l| l.origin_slot), Some(1));
    }

    #[test]
    fn duplicate_owned_names_get_suffixes() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        bind(&mut graph, a, l, 0);
        assert_eq!(names(&graph, a), vec!["base_ctx", "+ model", "+ model.1", "+"]);
    }

    #[test]
    fn slot_zero_mirrors_upstream_fields() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        let b = graph.add_relay();
        graph.connect(a, 0, b, 0).unwrap();

        assert_eq!(graph.relay(b).unwrap().upstream(), Some(a));
        assert_eq!(names(&graph, b), vec!["base_ctx", "model", "+"]);
        assert!(!graph.fields(b).unwrap()[1].owned);
    }

    #[test]
    fn upstream_rename_keeps_its_spelling() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        let b = graph.add_relay();
        graph.connect(a, 0, b, 0).unwrap();

        graph.rename_field(a, 1, "VAE").unwrap();
        assert_eq!(names(&graph, a)[1], "+ VAE");
        assert_eq!(names(&graph, b)[1], "VAE");

        // A relay bound afterwards lower-cases the same name.
        let c = graph.add_relay();
        graph.connect(a, 0, c, 0).unwrap();
        assert_eq!(names(&graph, c)[1], "vae");
    }

    #[test]
    fn mirrored_fields_precede_owned_fields() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        let b = graph.add_relay();
        bind(&mut graph, b, l, 1);
        graph.connect(a, 0, b, 0).unwrap();

        assert_eq!(names(&graph, b), vec!["base_ctx", "model", "+ clip", "+"]);
        // The owned field's input link followed it to slot 2.
        assert_eq!(graph.input_link(b, 2).map(|l| l.origin_slot), Some(1));
        assert!(graph.input_link(b, 1).is_none());
    }

    #[test]
    fn upstream_disconnect_keeps_owned_fields() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        let b = graph.add_relay();
        bind(&mut graph, b, l, 1);
        graph.connect(a, 0, b, 0).unwrap();

        graph.disconnect(b, 0).unwrap();
        assert_eq!(names(&graph, b), vec!["base_ctx", "+ clip", "+"]);
        assert!(graph.relay(b).unwrap().upstream().is_none());
    }

    #[test]
    fn mirrored_fields_cannot_be_removed_or_renamed() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        let b = graph.add_relay();
        graph.connect(a, 0, b, 0).unwrap();

        assert!(matches!(
            graph.remove_field(b, 1),
            Err(CoreError::NotRemovable { index: 1, .. })
        ));
        assert!(matches!(
            graph.rename_field(b, 1, "other"),
            Err(CoreError::NotOwned { index: 1, .. })
        ));
        assert_eq!(names(&graph, b), vec!["base_ctx", "model", "+"]);
    }

    #[test]
    fn rename_propagates_and_empty_name_falls_back() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        let b = graph.add_relay();
        graph.connect(a, 0, b, 0).unwrap();

        graph.rename_field(a, 1, "Checkpoint").unwrap();
        assert_eq!(names(&graph, a)[1], "+ Checkpoint");
        assert_eq!(graph.registry(a).unwrap().outputs()[1].label, "CHECKPOINT");
        assert_eq!(names(&graph, b)[1], "Checkpoint");

        graph.rename_field(a, 1, "   ").unwrap();
        assert_eq!(names(&graph, a)[1], "+ checkpoint");
        assert_eq!(names(&graph, b)[1], "checkpoint");
    }

    #[test]
    fn rename_collision_is_renumbered() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        bind(&mut graph, a, l, 1);
        graph.rename_field(a, 2, "MODEL").unwrap();
        assert_eq!(names(&graph, a), vec!["base_ctx", "+ model", "+ MODEL.1", "+"]);
    }

    #[test]
    fn remove_owned_field_propagates_disconnect() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        bind(&mut graph, a, l, 1);
        let b = graph.add_relay();
        graph.connect(a, 0, b, 0).unwrap();

        graph.remove_field(a, 1).unwrap();
        assert_eq!(names(&graph, a), vec!["base_ctx", "+ clip", "+"]);
        assert_eq!(names(&graph, b), vec!["base_ctx", "clip", "+"]);
        // The input link of the removed field is gone, the clip link moved.
        assert_eq!(graph.input_link(a, 1).map(|l| l.origin_slot), Some(1));
    }

    #[test]
    fn plain_sink_keeps_its_link_when_fields_shift() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        bind(&mut graph, a, l, 0);
        bind(&mut graph, a, l, 1);
        let sink = graph.add_plain("Sink", vec![InputPort::new("clip", TypeTag::new("CLIP"))], vec![]);
        graph.connect(a, 2, sink, 0).unwrap();

        graph.remove_field(a, 1).unwrap();
        let link = graph.input_link(sink, 0).unwrap();
        assert_eq!(link.origin_slot, 1);
        assert_eq!(graph.registry(a).unwrap().outputs()[1].label, "CLIP");
    }
}
