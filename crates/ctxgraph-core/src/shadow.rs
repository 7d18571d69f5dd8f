//! Shadow-list derivation for merge nodes.
//!
//! [`collect_entries`] walks the fields of every source feeding a merge node,
//! in slot order, and produces one [`ShadowEntry`] per (source, field) pair.
//! The first occurrence of a case-insensitive key is live and takes the next
//! shadow index; later occurrences are suppressed duplicates of it.
//!
//! The derivation is pure: given the same sources it yields identical
//! entries, so it serves both as the full rebuild after a restore and as
//! the "post" list of every incremental update.

use indexmap::IndexMap;
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::field::{Field, FieldInfo, TypeTag};
use crate::id::NodeId;

/// Fields exposed by the source resolved at one merge slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFields {
    pub slot: usize,
    pub source: NodeId,
    pub fields: Vec<FieldInfo>,
}

/// One (source node, source field) pair observed across all merge sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadowEntry {
    pub source: NodeId,
    pub slot: usize,
    /// Index of the field in the source's registry.
    pub source_index: usize,
    /// Position of this entry in the full traversal.
    pub position: usize,
    /// Shadow index when live, `None` when suppressed.
    pub shadow_index: Option<usize>,
    /// Shadow index this entry would take if it were shown.
    pub candidate_index: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
    pub key: String,
    /// Traversal positions of same-key entries before this one.
    pub duplicates_before: SmallVec<[usize; 2]>,
    /// Traversal positions of same-key entries after this one.
    pub duplicates_after: SmallVec<[usize; 2]>,
}

impl ShadowEntry {
    pub fn is_live(&self) -> bool {
        self.shadow_index.is_some()
    }

    /// The base-context field of a source (index 0) is never materialized
    /// as a shadow field of its own.
    pub fn is_base(&self) -> bool {
        self.source_index == 0
    }
}

/// Derives the full entry list. Fails with [`CoreError::ConflictingSchema`]
/// when one key appears with two different types.
///
/// Only types are compared. Names that differ only in case (`b` and `B`)
/// share a key, so the later one is an ordinary suppressed duplicate and
/// the first occurrence's spelling is shown.
pub fn collect_entries(sources: &[SourceFields]) -> Result<Vec<ShadowEntry>, CoreError> {
    let mut entries: Vec<ShadowEntry> = Vec::new();
    let mut groups: IndexMap<String, SmallVec<[usize; 2]>> = IndexMap::new();
    let mut next_shadow = 0;

    for source in sources {
        for info in &source.fields {
            let key = info.name.to_uppercase();
            let position = entries.len();
            let earlier = groups.entry(key.clone()).or_default();

            if let Some(&first) = earlier.first() {
                let existing = &entries[first];
                if existing.ty != info.ty {
                    tracing::error!(key = %key, "conflicting field types across merge sources");
                    return Err(CoreError::ConflictingSchema {
                        key,
                        existing: existing.ty.clone(),
                        incoming: info.ty.clone(),
                    });
                }
            }

            let shadow_index = if earlier.is_empty() {
                Some(next_shadow)
            } else {
                None
            };
            let duplicates_before = earlier.clone();
            for &e in earlier.iter() {
                entries[e].duplicates_after.push(position);
            }
            earlier.push(position);

            entries.push(ShadowEntry {
                source: source.source,
                slot: source.slot,
                source_index: info.index,
                position,
                shadow_index,
                candidate_index: next_shadow,
                name: info.name.clone(),
                ty: info.ty.clone(),
                key,
                duplicates_before,
                duplicates_after: SmallVec::new(),
            });

            if shadow_index.is_some() {
                next_shadow += 1;
            }
        }
    }

    Ok(entries)
}

/// Finds the entry for field `index` of `source`.
pub fn find_entry(entries: &[ShadowEntry], source: NodeId, index: usize) -> Option<&ShadowEntry> {
    entries
        .iter()
        .find(|e| e.source == source && e.source_index == index)
}

/// Fields of `source` at `slot` as recorded in `entries`, in source order.
pub fn source_fields(entries: &[ShadowEntry], slot: usize, source: NodeId) -> Vec<FieldInfo> {
    entries
        .iter()
        .filter(|e| e.slot == slot && e.source == source)
        .map(|e| FieldInfo {
            name: e.name.clone(),
            ty: e.ty.clone(),
            index: e.source_index,
        })
        .collect()
}

/// The live entry for `key`, if any.
pub fn live_entry<'a>(entries: &'a [ShadowEntry], key: &str) -> Option<&'a ShadowEntry> {
    entries.iter().find(|e| e.is_live() && e.key == key)
}

/// Live, non-base entries in shadow order.
pub fn live_fields(entries: &[ShadowEntry]) -> impl Iterator<Item = &ShadowEntry> {
    entries.iter().filter(|e| e.is_live() && !e.is_base())
}

/// Keys a merge registry should hold (base excluded), in shadow order.
pub fn live_keys(entries: &[ShadowEntry]) -> Vec<String> {
    live_fields(entries).map(|e| e.key.clone()).collect()
}

/// Registry fields materialized from a full rebuild: base context, one
/// mirrored field per live key, and the trailing wildcard.
pub fn materialize(entries: &[ShadowEntry]) -> Vec<Field> {
    let mut fields = vec![Field::base_context()];
    fields.extend(live_fields(entries).map(|e| Field::mirrored(e.name.clone(), e.ty.clone())));
    fields.push(Field::wildcard());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(index: usize, name: &str, ty: &str) -> FieldInfo {
        FieldInfo {
            name: name.to_string(),
            ty: TypeTag::new(ty),
            index,
        }
    }

    fn source(slot: usize, id: u32, names: &[&str]) -> SourceFields {
        let mut fields = vec![info(0, "base_ctx", TypeTag::CONTEXT)];
        fields.extend(
            names
                .iter()
                .enumerate()
                .map(|(i, n)| info(i + 1, n, "INT")),
        );
        SourceFields {
            slot,
            source: NodeId(id),
            fields,
        }
    }

    #[test]
    fn first_occurrence_wins() {
        let entries = collect_entries(&[source(0, 1, &["a", "b"]), source(1, 2, &["B", "c"])]).unwrap();
        let live: Vec<(&str, usize)> = entries
            .iter()
            .filter_map(|e| e.shadow_index.map(|s| (e.name.as_str(), s)))
            .collect();
        assert_eq!(live, vec![("base_ctx", 0), ("a", 1), ("b", 2), ("c", 3)]);

        let upper_b = find_entry(&entries, NodeId(2), 1).unwrap();
        assert_eq!(upper_b.shadow_index, None);
        assert_eq!(upper_b.candidate_index, 3);
        assert_eq!(upper_b.duplicates_before.as_slice(), &[2]);

        let lower_b = find_entry(&entries, NodeId(1), 2).unwrap();
        assert_eq!(lower_b.duplicates_after.as_slice(), &[upper_b.position]);
    }

    #[test]
    fn base_context_is_shared() {
        let entries = collect_entries(&[source(0, 1, &[]), source(1, 2, &[])]).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_live());
        assert!(!entries[1].is_live());
        assert!(live_keys(&entries).is_empty());
    }

    #[test]
    fn conflicting_types_fail() {
        let mut s2 = source(1, 2, &[]);
        s2.fields.push(info(1, "A", "FLOAT"));
        let err = collect_entries(&[source(0, 1, &["a"]), s2]).unwrap_err();
        assert!(matches!(err, CoreError::ConflictingSchema { ref key, .. } if key == "A"));
    }

    #[test]
    fn case_only_name_difference_is_not_a_conflict() {
        let entries = collect_entries(&[source(0, 1, &["b"]), source(1, 2, &["B"])]).unwrap();
        let upper = find_entry(&entries, NodeId(2), 1).unwrap();
        assert!(!upper.is_live());
        assert_eq!(live_entry(&entries, "B").unwrap().name, "b");
    }

    #[test]
    fn source_fields_reads_back_one_source() {
        let sources = [source(0, 1, &["a", "b"]), source(1, 2, &["B", "c"])];
        let entries = collect_entries(&sources).unwrap();
        assert_eq!(source_fields(&entries, 1, NodeId(2)), sources[1].fields);
        assert!(source_fields(&entries, 1, NodeId(1)).is_empty());
    }

    #[test]
    fn materialize_appends_wildcard() {
        let entries = collect_entries(&[source(0, 1, &["a"]), source(1, 2, &["A", "c"])]).unwrap();
        let names: Vec<String> = materialize(&entries).into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["base_ctx", "a", "c", "+"]);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let sources = [source(0, 1, &["x", "y"]), source(2, 5, &["Y", "z"])];
        let first = collect_entries(&sources).unwrap();
        let second = collect_entries(&sources).unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
