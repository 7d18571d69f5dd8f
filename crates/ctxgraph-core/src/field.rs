//! Field schema types shared by every context node.
//!
//! A [`Field`] is one named, typed slot of a node's field registry. A
//! [`TypeTag`] is an opaque type name; the wildcard tag `*` marks the
//! trailing "add new field" slot that is not yet bound to a type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::naming;

/// Opaque type tag of a field or port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(pub String);

impl TypeTag {
    /// Tag of an unbound slot.
    pub const WILDCARD: &'static str = "*";
    /// Tag of the whole-context channel (slot 0 / output 0 of a context node).
    pub const CONTEXT: &'static str = "DYNAMIC_CONTEXT";

    pub fn new(tag: impl Into<String>) -> Self {
        TypeTag(tag.into())
    }

    pub fn wildcard() -> Self {
        TypeTag(Self::WILDCARD.to_string())
    }

    pub fn context() -> Self {
        TypeTag(Self::CONTEXT.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }

    /// Choice types (`COMBO` or a comma-separated option list) whose outputs
    /// are backed by a widget on the consuming side.
    pub fn is_widget_backed(&self) -> bool {
        self.0 == "COMBO" || self.0.contains(',')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeTag {
    fn from(s: &str) -> Self {
        TypeTag(s.to_string())
    }
}

/// One entry of a node's field registry.
///
/// Owned fields carry the owned prefix in `name` (`"+ seed"`); mirrored
/// fields never do. `removable` is only ever set on owned fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
    #[serde(default)]
    pub owned: bool,
    #[serde(default)]
    pub removable: bool,
}

impl Field {
    /// A field mirrored from upstream.
    pub fn mirrored(name: impl Into<String>, ty: TypeTag) -> Self {
        Field {
            name: name.into(),
            ty,
            owned: false,
            removable: false,
        }
    }

    /// A field created locally on this node. The owned prefix is applied.
    pub fn owned(name: &str, ty: TypeTag) -> Self {
        Field {
            name: naming::add_owned_prefix(name),
            ty,
            owned: true,
            removable: true,
        }
    }

    /// The base-context slot every context node carries at index 0.
    pub fn base_context() -> Self {
        Field::mirrored(naming::BASE_CONTEXT_NAME, TypeTag::context())
    }

    /// The trailing unbound slot.
    pub fn wildcard() -> Self {
        Field::mirrored(naming::WILDCARD_NAME, TypeTag::wildcard())
    }

    pub fn is_wildcard(&self) -> bool {
        self.ty.is_wildcard()
    }

    /// Name with the owned prefix removed, as exposed to downstream nodes.
    pub fn display_name(&self) -> &str {
        naming::strip_owned_prefix(&self.name)
    }

    /// Case-insensitive identity of the field within its node.
    pub fn key(&self) -> String {
        naming::name_key(&self.name)
    }
}

/// What a context node exposes to downstream nodes for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
    pub index: usize,
}

/// An output port. Context nodes keep one per typed field, aligned by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    pub label: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub widget: bool,
}

impl OutputPort {
    pub fn new(label: impl Into<String>, ty: TypeTag) -> Self {
        OutputPort {
            label: label.into(),
            ty,
            widget: false,
        }
    }

    /// Output paired with a registry field: upper-cased, prefix stripped,
    /// widget-backed for choice types.
    pub fn for_field(field: &Field) -> Self {
        OutputPort {
            label: naming::output_label(&field.name),
            widget: field.ty.is_widget_backed(),
            ty: field.ty.clone(),
        }
    }
}

/// An input port of a plain host node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
}

impl InputPort {
    pub fn new(name: impl Into<String>, ty: TypeTag) -> Self {
        InputPort {
            name: name.into(),
            ty,
        }
    }
}
