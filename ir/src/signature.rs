//! Typed signatures for relations and operators.
//!
//! The registry is an immutable `label -> (arity, expected sorts)` mapping
//! consulted before interning. Checked construction rejects ill-typed nodes
//! with a typed error and never coerces.

use crate::kind::{NodeKind, Sort};
use crate::node::{relation, operation, struct_node, Node};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Declared signature of one relation or operator label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Label this signature belongs to.
    pub name: String,
    /// Expected argument sorts, in order.
    pub args: Vec<Sort>,
    /// Sort of the constructed node.
    pub returns: Sort,
}

impl Signature {
    /// Build a signature.
    #[must_use]
    pub fn new(name: &str, args: Vec<Sort>, returns: Sort) -> Self {
        Signature {
            name: name.to_string(),
            args,
            returns,
        }
    }
}

/// Construction failure raised before interning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructError {
    /// Relation label not present in the registry.
    #[error("unknown relation {0:?}")]
    UnknownRelation(String),
    /// Operator label not present in the registry.
    #[error("unknown operator {0:?}")]
    UnknownOperator(String),
    /// Wrong number of arguments for a registered label.
    #[error("arity mismatch for {label:?}: expected {expected}, got {got}")]
    ArityMismatch {
        /// Offending label.
        label: String,
        /// Declared arity.
        expected: usize,
        /// Supplied arity.
        got: usize,
    },
    /// Argument or field sort does not satisfy the declared sort.
    #[error("sort mismatch for {label:?}: expected {expected}, got {got}")]
    SortMismatch {
        /// Offending label or field key.
        label: String,
        /// Declared sort.
        expected: Sort,
        /// Inferred sort of the supplied node.
        got: Sort,
    },
    /// A struct key appeared more than once.
    #[error("duplicate struct field {0:?}")]
    DuplicateField(String),
}

/// Infer the sort of a node from its kind.
#[must_use]
pub fn infer_sort(node: &Node) -> Sort {
    match node.kind() {
        NodeKind::Entity => Sort::Thing,
        NodeKind::Rel => Sort::Prop,
        NodeKind::Op => Sort::Operator,
        NodeKind::Struct => Sort::State,
        NodeKind::List => Sort::List,
        NodeKind::Text => Sort::Text,
        NodeKind::Number => Sort::Number,
        NodeKind::Bool => Sort::Bool,
        NodeKind::Var | NodeKind::Nil => Sort::Any,
    }
}

/// Immutable signature tables for relations, operators, and well-known
/// struct fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRegistry {
    relations: BTreeMap<String, Signature>,
    operators: BTreeMap<String, Signature>,
    fields: BTreeMap<String, Sort>,
}

impl Default for SignatureRegistry {
    fn default() -> Self {
        Self::core()
    }
}

impl SignatureRegistry {
    /// Empty registry.
    #[must_use]
    pub fn empty() -> Self {
        SignatureRegistry {
            relations: BTreeMap::new(),
            operators: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Registry bootstrapped with the core ontology relations and the full
    /// operator library.
    #[must_use]
    pub fn core() -> Self {
        let mut registry = Self::empty();

        // Core ontology relations.
        registry.declare_relation("IS_A", vec![Sort::Thing, Sort::Thing]);
        registry.declare_relation("INSTANCE_OF", vec![Sort::Thing, Sort::Thing]);
        registry.declare_relation("PART_OF", vec![Sort::Thing, Sort::Thing]);
        registry.declare_relation("HAS_PART", vec![Sort::Thing, Sort::Thing]);
        registry.declare_relation("HAS", vec![Sort::Thing, Sort::Thing]);
        registry.declare_relation("CAUSE", vec![Sort::Thing, Sort::Thing]);
        registry.declare_relation("EFFECT", vec![Sort::Thing, Sort::Thing]);
        registry.declare_relation("BEFORE", vec![Sort::Thing, Sort::Thing]);
        registry.declare_relation("AFTER", vec![Sort::Thing, Sort::Thing]);
        registry.declare_relation("EQUAL", vec![Sort::Any, Sort::Any]);
        registry.declare_relation("DIFFERENT", vec![Sort::Any, Sort::Any]);
        registry.declare_relation("DESCRIBES", vec![Sort::Context, Sort::Thing]);

        // Operator library signatures. Trailing arguments are optional in
        // practice (operators tolerate missing args), so arity checking
        // applies to explicit checked construction only.
        registry.declare_operator("NORMALIZE", vec![Sort::State], Sort::State);
        registry.declare_operator("INFER", vec![], Sort::State);
        registry.declare_operator("ANSWER", vec![Sort::Any], Sort::Answer);
        registry.declare_operator("EXPLAIN", vec![Sort::Any], Sort::Answer);
        registry.declare_operator("SUMMARIZE", vec![], Sort::Answer);
        registry.declare_operator("COMPARE", vec![Sort::Any, Sort::Any], Sort::Prop);
        registry.declare_operator("EXTRACT", vec![Sort::State, Sort::Text], Sort::Any);
        registry.declare_operator("MAP", vec![Sort::List, Sort::Operator], Sort::List);
        registry.declare_operator("REDUCE", vec![Sort::List, Sort::Operator], Sort::Any);
        registry.declare_operator("REWRITE", vec![Sort::Any], Sort::Any);
        registry.declare_operator("EXPAND", vec![Sort::Any], Sort::State);
        registry.declare_operator("ALIGN", vec![], Sort::State);
        registry.declare_operator("STABILIZE", vec![], Sort::State);

        // Well-known struct field sorts.
        registry.declare_field("subject", Sort::Thing);
        registry.declare_field("action", Sort::Thing);
        registry.declare_field("object", Sort::Thing);
        registry.declare_field("context", Sort::Context);
        registry.declare_field("modifier", Sort::List);
        registry.declare_field("goal", Sort::Goal);
        registry.declare_field("state", Sort::State);
        registry.declare_field("answer", Sort::Answer);

        registry
    }

    /// Register a relation signature (returns `Prop`).
    pub fn declare_relation(&mut self, name: &str, args: Vec<Sort>) {
        self.relations
            .insert(name.to_string(), Signature::new(name, args, Sort::Prop));
    }

    /// Register an operator signature.
    pub fn declare_operator(&mut self, name: &str, args: Vec<Sort>, returns: Sort) {
        self.operators
            .insert(name.to_string(), Signature::new(name, args, returns));
    }

    /// Register a well-known struct field sort.
    pub fn declare_field(&mut self, key: &str, sort: Sort) {
        self.fields.insert(key.to_string(), sort);
    }

    /// Look up a relation signature.
    #[must_use]
    pub fn relation_signature(&self, name: &str) -> Option<&Signature> {
        self.relations.get(name)
    }

    /// Look up an operator signature.
    #[must_use]
    pub fn operator_signature(&self, name: &str) -> Option<&Signature> {
        self.operators.get(name)
    }

    /// Construct a relation, validating label, arity, and argument sorts.
    ///
    /// # Errors
    ///
    /// Returns a [`ConstructError`] on unknown label, arity mismatch, or
    /// sort mismatch; nothing is interned on failure.
    pub fn checked_relation(&self, name: &str, args: Vec<Node>) -> Result<Node, ConstructError> {
        let signature = self
            .relations
            .get(name)
            .ok_or_else(|| ConstructError::UnknownRelation(name.to_string()))?;
        check_args(name, signature, &args)?;
        Ok(relation(name, args))
    }

    /// Construct an operation, validating label, arity, and argument sorts.
    ///
    /// # Errors
    ///
    /// Returns a [`ConstructError`] on unknown label, arity mismatch, or
    /// sort mismatch; nothing is interned on failure.
    pub fn checked_operation(&self, name: &str, args: Vec<Node>) -> Result<Node, ConstructError> {
        let signature = self
            .operators
            .get(name)
            .ok_or_else(|| ConstructError::UnknownOperator(name.to_string()))?;
        check_args(name, signature, &args)?;
        Ok(operation(name, args))
    }

    /// Construct a struct, rejecting duplicate keys and field sort
    /// violations.
    ///
    /// # Errors
    ///
    /// Returns a [`ConstructError`] on a repeated key or a known field
    /// carrying a value of the wrong sort.
    pub fn checked_struct(&self, fields: Vec<(String, Node)>) -> Result<Node, ConstructError> {
        let mut seen = BTreeMap::new();
        for (key, value) in &fields {
            if seen.insert(key.clone(), ()).is_some() {
                return Err(ConstructError::DuplicateField(key.clone()));
            }
            if let Some(expected) = self.fields.get(key) {
                let got = infer_sort(value);
                if !got.satisfies(*expected) {
                    return Err(ConstructError::SortMismatch {
                        label: key.clone(),
                        expected: *expected,
                        got,
                    });
                }
            }
        }
        Ok(struct_node(fields))
    }

    /// Validate an existing node tree against the registry.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConstructError`] found in a depth-first walk.
    pub fn check(&self, node: &Node) -> Result<Sort, ConstructError> {
        match node.kind() {
            NodeKind::Rel => {
                let name = node.label().unwrap_or_default();
                let signature = self
                    .relations
                    .get(name)
                    .ok_or_else(|| ConstructError::UnknownRelation(name.to_string()))?
                    .clone();
                self.check_children(name, &signature, node)?;
                Ok(signature.returns)
            }
            NodeKind::Op => {
                let name = node.label().unwrap_or_default();
                let signature = self
                    .operators
                    .get(name)
                    .ok_or_else(|| ConstructError::UnknownOperator(name.to_string()))?
                    .clone();
                self.check_children(name, &signature, node)?;
                Ok(signature.returns)
            }
            NodeKind::Struct => {
                for (key, value) in node.fields() {
                    let got = self.check(value)?;
                    if let Some(expected) = self.fields.get(key) {
                        if !got.satisfies(*expected) {
                            return Err(ConstructError::SortMismatch {
                                label: key.clone(),
                                expected: *expected,
                                got,
                            });
                        }
                    }
                }
                Ok(Sort::State)
            }
            NodeKind::List => {
                for item in node.args() {
                    self.check(item)?;
                }
                Ok(Sort::List)
            }
            _ => Ok(infer_sort(node)),
        }
    }

    fn check_children(
        &self,
        name: &str,
        signature: &Signature,
        node: &Node,
    ) -> Result<(), ConstructError> {
        if node.args().len() != signature.args.len() {
            return Err(ConstructError::ArityMismatch {
                label: name.to_string(),
                expected: signature.args.len(),
                got: node.args().len(),
            });
        }
        for (arg, expected) in node.args().iter().zip(&signature.args) {
            let got = self.check(arg)?;
            if !got.satisfies(*expected) {
                return Err(ConstructError::SortMismatch {
                    label: name.to_string(),
                    expected: *expected,
                    got,
                });
            }
        }
        Ok(())
    }
}

fn check_args(name: &str, signature: &Signature, args: &[Node]) -> Result<(), ConstructError> {
    if args.len() != signature.args.len() {
        return Err(ConstructError::ArityMismatch {
            label: name.to_string(),
            expected: signature.args.len(),
            got: args.len(),
        });
    }
    for (arg, expected) in args.iter().zip(&signature.args) {
        let got = infer_sort(arg);
        if !got.satisfies(*expected) {
            return Err(ConstructError::SortMismatch {
                label: name.to_string(),
                expected: *expected,
                got,
            });
        }
    }
    Ok(())
}
