//! Immutable, interned IR nodes and their canonical constructors.
//!
//! A [`Node`] is a cheap shared handle to canonical [`NodeData`] living in
//! the process-wide intern arena. Constructors canonicalize (struct fields
//! sorted by key, children already canonical) and intern, so two
//! structurally equal trees are always the same handle and comparison is
//! O(1) via the cached fingerprint.

use crate::arena;
use crate::fingerprint::{Fingerprint, FingerprintHasher};
use crate::kind::NodeKind;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Literal payload carried by `NUMBER` and `BOOL` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    /// Finite floating-point value.
    Number(f64),
    /// Boolean value.
    Bool(bool),
}

/// Canonical node payload stored in the intern arena.
///
/// Not constructed directly; use the free constructor functions.
#[derive(Debug)]
pub struct NodeData {
    kind: NodeKind,
    label: Option<String>,
    literal: Option<Literal>,
    args: Vec<Node>,
    fields: Vec<(String, Node)>,
    fingerprint: Fingerprint,
}

impl NodeData {
    pub(crate) fn new(
        kind: NodeKind,
        label: Option<String>,
        literal: Option<Literal>,
        args: Vec<Node>,
        fields: Vec<(String, Node)>,
    ) -> Self {
        let fingerprint = compute_fingerprint(kind, &label, &literal, &args, &fields);
        NodeData {
            kind,
            label,
            literal,
            args,
            fields,
            fingerprint,
        }
    }

    pub(crate) fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

fn compute_fingerprint(
    kind: NodeKind,
    label: &Option<String>,
    literal: &Option<Literal>,
    args: &[Node],
    fields: &[(String, Node)],
) -> Fingerprint {
    let mut hasher = FingerprintHasher::new();
    hasher.write_u8(kind as u8);
    match label {
        Some(value) => {
            hasher.write_u8(1);
            hasher.write_str(value);
        }
        None => hasher.write_u8(0),
    }
    match literal {
        Some(Literal::Number(value)) => {
            hasher.write_u8(1);
            // Canonical bit pattern; `number` rejects NaN so bits are unique
            // per value except -0.0, normalized to 0.0 at construction.
            hasher.write_u32((value.to_bits() >> 32) as u32);
            hasher.write_u32(value.to_bits() as u32);
        }
        Some(Literal::Bool(value)) => {
            hasher.write_u8(2);
            hasher.write_u8(u8::from(*value));
        }
        None => hasher.write_u8(0),
    }
    hasher.write_u32(args.len() as u32);
    for arg in args {
        hasher.write_fingerprint(&arg.fingerprint());
    }
    hasher.write_u32(fields.len() as u32);
    for (key, value) in fields {
        hasher.write_str(key);
        hasher.write_fingerprint(&value.fingerprint());
    }
    hasher.finish()
}

/// Shared immutable handle to an interned canonical node.
#[derive(Clone)]
pub struct Node(Arc<NodeData>);

impl Node {
    pub(crate) fn from_arc(data: Arc<NodeData>) -> Self {
        Node(data)
    }

    /// Node kind tag.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.0.kind
    }

    /// Label (entity/relation/operator/variable name, or TEXT content).
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.0.label.as_deref()
    }

    /// Ordered arguments (REL/OP/LIST children). Order is meaning: a
    /// directed relation's arguments are never reordered.
    #[must_use]
    pub fn args(&self) -> &[Node] {
        &self.0.args
    }

    /// Struct fields, sorted by key.
    #[must_use]
    pub fn fields(&self) -> &[(String, Node)] {
        &self.0.fields
    }

    /// Literal payload of NUMBER/BOOL nodes.
    #[must_use]
    pub fn literal(&self) -> Option<Literal> {
        self.0.literal
    }

    /// Numeric payload, if this is a NUMBER node.
    #[must_use]
    pub fn number_value(&self) -> Option<f64> {
        match self.0.literal {
            Some(Literal::Number(value)) if self.0.kind == NodeKind::Number => Some(value),
            _ => None,
        }
    }

    /// Boolean payload, if this is a BOOL node.
    #[must_use]
    pub fn bool_value(&self) -> Option<bool> {
        match self.0.literal {
            Some(Literal::Bool(value)) if self.0.kind == NodeKind::Bool => Some(value),
            _ => None,
        }
    }

    /// Look up a struct field by key.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Node> {
        self.0
            .fields
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|idx| &self.0.fields[idx].1)
    }

    /// Whether this is the NIL node.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.kind == NodeKind::Nil
    }

    /// Cached content fingerprint (O(1)).
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.0.fingerprint
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.fingerprint == other.0.fingerprint
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.0.fingerprint.as_bytes());
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "Node({}:{label})", self.kind()),
            None => write!(f, "Node({})", self.kind()),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::sexpr::to_sexpr(self))
    }
}

// ---- Constructors ---------------------------------------------------------

fn checked_label(context: &str, name: &str) -> String {
    assert!(
        !name.trim().is_empty(),
        "{context} label must be a non-empty string"
    );
    name.trim().to_string()
}

/// Construct an ENTITY node.
///
/// # Panics
///
/// Panics if `name` is empty.
#[must_use]
pub fn entity(name: &str) -> Node {
    arena::intern(NodeData::new(
        NodeKind::Entity,
        Some(checked_label("entity", name)),
        None,
        Vec::new(),
        Vec::new(),
    ))
}

/// Construct a REL node with ordered arguments.
///
/// # Panics
///
/// Panics if `name` is empty.
#[must_use]
pub fn relation(name: &str, args: impl IntoIterator<Item = Node>) -> Node {
    arena::intern(NodeData::new(
        NodeKind::Rel,
        Some(checked_label("relation", name)),
        None,
        args.into_iter().collect(),
        Vec::new(),
    ))
}

/// Construct an OP node with ordered arguments.
///
/// # Panics
///
/// Panics if `name` is empty.
#[must_use]
pub fn operation(name: &str, args: impl IntoIterator<Item = Node>) -> Node {
    arena::intern(NodeData::new(
        NodeKind::Op,
        Some(checked_label("operation", name)),
        None,
        args.into_iter().collect(),
        Vec::new(),
    ))
}

/// Construct a STRUCT node. Fields are sorted by key; a repeated key keeps
/// the last value (map semantics). Use
/// [`crate::signature::SignatureRegistry::checked_struct`] to reject
/// duplicates instead.
#[must_use]
pub fn struct_node<K: Into<String>>(fields: impl IntoIterator<Item = (K, Node)>) -> Node {
    let map: BTreeMap<String, Node> = fields
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect();
    arena::intern(NodeData::new(
        NodeKind::Struct,
        None,
        None,
        Vec::new(),
        map.into_iter().collect(),
    ))
}

/// The empty STRUCT node.
#[must_use]
pub fn empty_struct() -> Node {
    struct_node(Vec::<(String, Node)>::new())
}

/// Construct a LIST node. Order is preserved; a list is a sequence, not a
/// set.
#[must_use]
pub fn list_node(items: impl IntoIterator<Item = Node>) -> Node {
    arena::intern(NodeData::new(
        NodeKind::List,
        None,
        None,
        items.into_iter().collect(),
        Vec::new(),
    ))
}

/// Construct a TEXT node.
#[must_use]
pub fn text(value: &str) -> Node {
    arena::intern(NodeData::new(
        NodeKind::Text,
        Some(value.to_string()),
        None,
        Vec::new(),
        Vec::new(),
    ))
}

/// Construct a NUMBER node.
///
/// # Panics
///
/// Panics on NaN or infinite input: non-finite values have no canonical
/// serialization. `-0.0` is normalized to `0.0`.
#[must_use]
pub fn number(value: f64) -> Node {
    assert!(value.is_finite(), "NUMBER nodes require finite values");
    let value = if value == 0.0 { 0.0 } else { value };
    arena::intern(NodeData::new(
        NodeKind::Number,
        None,
        Some(Literal::Number(value)),
        Vec::new(),
        Vec::new(),
    ))
}

/// Construct a BOOL node.
#[must_use]
pub fn boolean(value: bool) -> Node {
    arena::intern(NodeData::new(
        NodeKind::Bool,
        None,
        Some(Literal::Bool(value)),
        Vec::new(),
        Vec::new(),
    ))
}

/// Construct a VAR node.
///
/// # Panics
///
/// Panics unless `name` starts with `?`.
#[must_use]
pub fn var(name: &str) -> Node {
    assert!(
        name.starts_with('?'),
        "variable names must start with '?', got {name:?}"
    );
    arena::intern(NodeData::new(
        NodeKind::Var,
        Some(name.to_string()),
        None,
        Vec::new(),
        Vec::new(),
    ))
}

/// The NIL node.
#[must_use]
pub fn nil() -> Node {
    arena::intern(NodeData::new(
        NodeKind::Nil,
        None,
        None,
        Vec::new(),
        Vec::new(),
    ))
}

/// Return the canonical form of a node.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`. Every constructor
/// already canonicalizes and interns, so on handles built through this crate
/// the rebuild converges to the identical interned value.
#[must_use]
pub fn normalize(node: &Node) -> Node {
    match node.kind() {
        NodeKind::Struct => struct_node(
            node.fields()
                .iter()
                .map(|(key, value)| (key.clone(), normalize(value))),
        ),
        NodeKind::List => list_node(node.args().iter().map(normalize)),
        NodeKind::Rel => relation(
            node.label().unwrap_or_default(),
            node.args().iter().map(normalize),
        ),
        NodeKind::Op => operation(
            node.label().unwrap_or_default(),
            node.args().iter().map(normalize),
        ),
        _ => node.clone(),
    }
}

/// Canonical ASCII rendering of a NUMBER payload, shared by both
/// serialization forms.
#[must_use]
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

// ---- Serde ----------------------------------------------------------------

/// Plain serde shape of a node; mirrors the canonical JSON grammar.
#[derive(Serialize, Deserialize)]
struct NodeRepr {
    kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    value: Option<Literal>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    args: Vec<NodeRepr>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    fields: BTreeMap<String, NodeRepr>,
}

fn to_repr(node: &Node) -> NodeRepr {
    NodeRepr {
        kind: node.kind(),
        label: node.label().map(str::to_string),
        value: node.literal(),
        args: node.args().iter().map(to_repr).collect(),
        fields: node
            .fields()
            .iter()
            .map(|(key, value)| (key.clone(), to_repr(value)))
            .collect(),
    }
}

fn from_repr(repr: &NodeRepr) -> Result<Node, String> {
    let label = || {
        repr.label
            .as_deref()
            .ok_or_else(|| format!("{} node missing label", repr.kind))
    };
    match repr.kind {
        NodeKind::Entity => Ok(entity(label()?)),
        NodeKind::Var => {
            let name = label()?;
            if !name.starts_with('?') {
                return Err(format!("VAR label {name:?} must start with '?'"));
            }
            Ok(var(name))
        }
        NodeKind::Rel => {
            let args = from_repr_args(&repr.args)?;
            Ok(relation(label()?, args))
        }
        NodeKind::Op => {
            let args = from_repr_args(&repr.args)?;
            Ok(operation(label()?, args))
        }
        NodeKind::Text => Ok(text(label()?)),
        NodeKind::Number => match repr.value {
            Some(Literal::Number(value)) if value.is_finite() => Ok(number(value)),
            _ => Err("NUMBER node requires a finite numeric value".to_string()),
        },
        NodeKind::Bool => match repr.value {
            Some(Literal::Bool(value)) => Ok(boolean(value)),
            _ => Err("BOOL node requires a boolean value".to_string()),
        },
        NodeKind::List => Ok(list_node(from_repr_args(&repr.args)?)),
        NodeKind::Struct => {
            let mut fields = Vec::with_capacity(repr.fields.len());
            for (key, value) in &repr.fields {
                fields.push((key.clone(), from_repr(value)?));
            }
            Ok(struct_node(fields))
        }
        NodeKind::Nil => Ok(nil()),
    }
}

fn from_repr_args(reprs: &[NodeRepr]) -> Result<Vec<Node>, String> {
    reprs.iter().map(from_repr).collect()
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_repr(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = NodeRepr::deserialize(deserializer)?;
        from_repr(&repr).map_err(serde::de::Error::custom)
    }
}
