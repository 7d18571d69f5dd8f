//! Per-node field registry.
//!
//! [`FieldRegistry`] is the ordered, authoritative field list of one context
//! node together with its output ports. Index is the contract: field `i`
//! pairs with output `i` for every typed field, the base-context field sits
//! at index 0 and the wildcard slot, when present, is always last and has no
//! output.
//!
//! The registry knows nothing about links or propagation. Every mutation
//! returns enough information ([`SlotRemap`]) for the graph to move the
//! links attached to the node along with their fields.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::{Field, FieldInfo, OutputPort, TypeTag};
use crate::naming;

/// Rejected removal of a field that is neither owned nor the wildcard slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("field {index} is not removable")]
pub struct NotRemovable {
    pub index: usize,
}

/// How slot indices of a node shift after one registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRemap {
    Inserted(usize),
    Removed(usize),
    Moved { from: usize, to: usize },
}

impl SlotRemap {
    /// Maps a pre-mutation slot to its post-mutation slot. `None` means the
    /// slot was removed.
    pub fn apply(&self, slot: usize) -> Option<usize> {
        match *self {
            SlotRemap::Inserted(at) => Some(if slot >= at { slot + 1 } else { slot }),
            SlotRemap::Removed(at) => {
                if slot == at {
                    None
                } else if slot > at {
                    Some(slot - 1)
                } else {
                    Some(slot)
                }
            }
            SlotRemap::Moved { from, to } => {
                if slot == from {
                    Some(to)
                } else if from < to && slot > from && slot <= to {
                    Some(slot - 1)
                } else if from > to && slot >= to && slot < from {
                    Some(slot + 1)
                } else {
                    Some(slot)
                }
            }
        }
    }
}

/// Ordered fields of one node plus their paired outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Field>", into = "Vec<Field>")]
pub struct FieldRegistry {
    fields: Vec<Field>,
    outputs: Vec<OutputPort>,
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Field>> for FieldRegistry {
    fn from(fields: Vec<Field>) -> Self {
        let outputs = fields
            .iter()
            .filter(|f| !f.is_wildcard())
            .map(OutputPort::for_field)
            .collect();
        FieldRegistry { fields, outputs }
    }
}

impl From<FieldRegistry> for Vec<Field> {
    fn from(registry: FieldRegistry) -> Self {
        registry.fields
    }
}

impl FieldRegistry {
    /// A fresh registry: base-context field plus the wildcard slot.
    pub fn new() -> Self {
        FieldRegistry::from(vec![Field::base_context(), Field::wildcard()])
    }

    /// A registry with only the base-context field.
    pub fn base_only() -> Self {
        FieldRegistry::from(vec![Field::base_context()])
    }

    pub fn list(&self) -> &[Field] {
        &self.fields
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub fn get(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields that are not the wildcard slot.
    pub fn typed_len(&self) -> usize {
        self.wildcard_index().unwrap_or(self.fields.len())
    }

    pub fn wildcard_index(&self) -> Option<usize> {
        self.fields.iter().position(Field::is_wildcard)
    }

    pub fn has_trailing_wildcard(&self) -> bool {
        self.fields.last().is_some_and(Field::is_wildcard)
    }

    /// Position of the typed field whose key equals `key`.
    pub fn position_of_key(&self, key: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| !f.is_wildcard() && f.key() == key)
    }

    /// Output labels after the base-context output, in order. Stored with
    /// the node so readers see its outputs without rebuilding the registry.
    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().skip(1).map(|o| o.label.clone()).collect()
    }

    /// Keys of every typed field, in order.
    pub fn keys(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| !f.is_wildcard())
            .map(Field::key)
            .collect()
    }

    /// Typed fields as exposed downstream: display names, registry indices.
    pub fn provide_fields(&self) -> Vec<FieldInfo> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_wildcard())
            .map(|(index, f)| FieldInfo {
                name: f.display_name().to_string(),
                ty: f.ty.clone(),
                index,
            })
            .collect()
    }

    /// True when outputs pair 1:1 with typed fields and the wildcard, if
    /// any, is last.
    pub fn is_aligned(&self) -> bool {
        let typed = self.typed_len();
        let wildcard_last = match self.wildcard_index() {
            Some(i) => i + 1 == self.fields.len(),
            None => true,
        };
        wildcard_last
            && self.outputs.len() == typed
            && self
                .fields
                .iter()
                .zip(&self.outputs)
                .all(|(f, o)| f.ty == o.ty)
    }

    /// Inserts `field` at `at` (clamped to sit before the wildcard slot) and
    /// returns its final index. A wildcard field is appended at the end.
    pub fn add(&mut self, field: Field, at: Option<usize>) -> usize {
        if field.is_wildcard() {
            self.fields.push(field);
            return self.fields.len() - 1;
        }
        let limit = self.typed_len();
        let index = at.map_or(limit, |a| a.min(limit));
        self.outputs.insert(index, OutputPort::for_field(&field));
        self.fields.insert(index, field);
        index
    }

    /// Removes an owned field or the wildcard slot.
    pub fn remove(&mut self, index: usize) -> Result<Field, NotRemovable> {
        match self.fields.get(index) {
            Some(f) if f.owned || f.is_wildcard() => {}
            _ => return Err(NotRemovable { index }),
        }
        self.take(index).ok_or(NotRemovable { index })
    }

    /// Removes any field, owned or mirrored. Used by propagation handlers
    /// that clear mirrored and shadow fields.
    pub(crate) fn take(&mut self, index: usize) -> Option<Field> {
        if index >= self.fields.len() {
            return None;
        }
        let field = self.fields.remove(index);
        if !field.is_wildcard() && index < self.outputs.len() {
            self.outputs.remove(index);
        }
        Some(field)
    }

    /// Splices the typed field at `from` so it ends at `to`, output included.
    /// Returns `false` for a no-op or an out-of-range index.
    pub fn move_field(&mut self, from: usize, to: usize) -> bool {
        let typed = self.typed_len();
        if from == to || from >= typed || to >= typed {
            return false;
        }
        let field = self.fields.remove(from);
        self.fields.insert(to, field);
        let output = self.outputs.remove(from);
        self.outputs.insert(to, output);
        true
    }

    /// Sets the name of the field at `index` and the label of its output.
    pub fn rename(&mut self, index: usize, new_name: &str) -> bool {
        let Some(field) = self.fields.get_mut(index) else {
            return false;
        };
        if field.is_wildcard() {
            return false;
        }
        field.name = new_name.to_string();
        if let Some(output) = self.outputs.get_mut(index) {
            output.label = naming::output_label(new_name);
        }
        true
    }

    /// Turns the trailing wildcard slot into an owned field of type `ty` and
    /// appends a fresh wildcard. Returns the bound index.
    pub fn bind_wildcard(&mut self, name: &str, ty: TypeTag) -> Option<usize> {
        let index = self.wildcard_index()?;
        self.fields[index] = Field::owned(name, ty);
        self.outputs.insert(index, OutputPort::for_field(&self.fields[index]));
        self.fields.push(Field::wildcard());
        Some(index)
    }

    /// Appends a wildcard slot unless one is already last.
    pub fn ensure_wildcard(&mut self) -> bool {
        if self.has_trailing_wildcard() {
            return false;
        }
        self.fields.push(Field::wildcard());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(s: &str) -> TypeTag {
        TypeTag::new(s)
    }

    #[test]
    fn new_registry_is_base_plus_wildcard() {
        let reg = FieldRegistry::new();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.outputs().len(), 1);
        assert_eq!(reg.outputs()[0].label, "BASE_CTX");
        assert!(reg.has_trailing_wildcard());
        assert!(reg.is_aligned());
    }

    #[test]
    fn add_inserts_before_wildcard() {
        let mut reg = FieldRegistry::new();
        let idx = reg.add(Field::mirrored("model", ty("MODEL")), Some(10));
        assert_eq!(idx, 1);
        let idx = reg.add(Field::mirrored("clip", ty("CLIP")), None);
        assert_eq!(idx, 2);
        let idx = reg.add(Field::mirrored("vae", ty("VAE")), Some(1));
        assert_eq!(idx, 1);
        let names: Vec<&str> = reg.list().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["base_ctx", "vae", "model", "clip", "+"]);
        let labels: Vec<&str> = reg.outputs().iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["BASE_CTX", "VAE", "MODEL", "CLIP"]);
        assert_eq!(reg.output_names(), vec!["VAE", "MODEL", "CLIP"]);
        assert!(reg.is_aligned());
    }

    #[test]
    fn remove_rejects_mirrored_fields() {
        let mut reg = FieldRegistry::new();
        reg.add(Field::mirrored("model", ty("MODEL")), None);
        assert_eq!(reg.remove(1), Err(NotRemovable { index: 1 }));
        assert_eq!(reg.remove(0), Err(NotRemovable { index: 0 }));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn remove_owned_field_drops_output() {
        let mut reg = FieldRegistry::new();
        reg.add(Field::owned("seed", ty("INT")), None);
        let removed = reg.remove(1).unwrap();
        assert_eq!(removed.name, "+ seed");
        assert_eq!(reg.outputs().len(), 1);
        assert!(reg.is_aligned());
    }

    #[test]
    fn move_is_pure_splice() {
        let mut reg = FieldRegistry::new();
        for n in ["a", "b", "c"] {
            reg.add(Field::mirrored(n, ty("INT")), None);
        }
        assert!(!reg.move_field(2, 2));
        assert!(reg.move_field(1, 3));
        let names: Vec<&str> = reg.list().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["base_ctx", "b", "c", "a", "+"]);
        assert_eq!(reg.outputs()[3].label, "A");
        assert!(!reg.move_field(1, 4), "the wildcard slot never moves");
    }

    #[test]
    fn bind_wildcard_creates_owned_field_and_new_slot() {
        let mut reg = FieldRegistry::new();
        let idx = reg.bind_wildcard("seed", ty("INT")).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(reg.get(1).unwrap().name, "+ seed");
        assert!(reg.get(1).unwrap().owned);
        assert!(reg.has_trailing_wildcard());
        assert_eq!(reg.outputs()[1].label, "SEED");
        assert!(reg.is_aligned());
    }

    #[test]
    fn slot_remap_follows_splice() {
        let moved = SlotRemap::Moved { from: 1, to: 3 };
        assert_eq!(moved.apply(1), Some(3));
        assert_eq!(moved.apply(2), Some(1));
        assert_eq!(moved.apply(3), Some(2));
        assert_eq!(moved.apply(4), Some(4));
        let back = SlotRemap::Moved { from: 3, to: 1 };
        assert_eq!(back.apply(3), Some(1));
        assert_eq!(back.apply(1), Some(2));
        assert_eq!(SlotRemap::Removed(2).apply(2), None);
        assert_eq!(SlotRemap::Removed(2).apply(3), Some(2));
        assert_eq!(SlotRemap::Inserted(2).apply(2), Some(3));
        assert_eq!(SlotRemap::Inserted(2).apply(1), Some(1));
    }

    #[test]
    fn serde_persists_fields_and_rederives_outputs() {
        let mut reg = FieldRegistry::new();
        reg.add(Field::owned("seed", ty("INT")), None);
        let json = serde_json::to_string(&reg).unwrap();
        let back: FieldRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reg);
    }
}
