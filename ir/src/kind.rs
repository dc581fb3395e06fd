//! Node kinds and the closed sort lattice.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag identifying the shape of a [`crate::node::Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    /// Named individual (`ENTITY:car`).
    Entity,
    /// Labelled relation over ordered arguments.
    Rel,
    /// Operator application (pending or symbolic).
    Op,
    /// Ordered field map keyed by ASCII strings.
    Struct,
    /// Ordered sequence of nodes.
    List,
    /// Text literal.
    Text,
    /// Finite floating-point literal.
    Number,
    /// Boolean literal.
    Bool,
    /// Pattern variable (`?X`), used only in rules.
    Var,
    /// The absent value.
    Nil,
}

impl NodeKind {
    /// Canonical serialized name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Entity => "ENTITY",
            NodeKind::Rel => "REL",
            NodeKind::Op => "OP",
            NodeKind::Struct => "STRUCT",
            NodeKind::List => "LIST",
            NodeKind::Text => "TEXT",
            NodeKind::Number => "NUMBER",
            NodeKind::Bool => "BOOL",
            NodeKind::Var => "VAR",
            NodeKind::Nil => "NIL",
        }
    }

    /// Parse a canonical kind name.
    #[must_use]
    pub fn from_str_opt(name: &str) -> Option<Self> {
        Some(match name {
            "ENTITY" => NodeKind::Entity,
            "REL" => NodeKind::Rel,
            "OP" => NodeKind::Op,
            "STRUCT" => NodeKind::Struct,
            "LIST" => NodeKind::List,
            "TEXT" => NodeKind::Text,
            "NUMBER" => NodeKind::Number,
            "BOOL" => NodeKind::Bool,
            "VAR" => NodeKind::Var,
            "NIL" => NodeKind::Nil,
            _ => return None,
        })
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic sorts used to type nodes.
///
/// The lattice is closed and flat except for [`Sort::Any`], which is
/// compatible with every sort in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sort {
    Thing,
    Prop,
    Operator,
    State,
    Context,
    Goal,
    Answer,
    Text,
    Number,
    Bool,
    List,
    Any,
}

impl Sort {
    /// Whether a value of sort `self` is acceptable where `expected` is required.
    #[must_use]
    pub fn satisfies(self, expected: Sort) -> bool {
        expected == Sort::Any || self == Sort::Any || self == expected
    }

    /// Canonical name of the sort.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Sort::Thing => "Thing",
            Sort::Prop => "Prop",
            Sort::Operator => "Operator",
            Sort::State => "State",
            Sort::Context => "Context",
            Sort::Goal => "Goal",
            Sort::Answer => "Answer",
            Sort::Text => "Text",
            Sort::Number => "Number",
            Sort::Bool => "Bool",
            Sort::List => "List",
            Sort::Any => "Any",
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
