//! Typed immutable IR for deterministic symbolic computation.
//!
//! This crate provides the foundational representation shared by the reactive
//! engine and the bytecode VM:
//!
//! - **Nodes** ([`node::Node`]): a tagged, immutable, content-addressed tree
//!   representation with ten kinds (`ENTITY`, `REL`, `OP`, `STRUCT`, `LIST`,
//!   `TEXT`, `NUMBER`, `BOOL`, `VAR`, `NIL`).
//! - **Interning** ([`arena`]): every constructed node is canonicalized and
//!   interned in a process-wide content-addressed arena, so structural
//!   equality is handle equality and hashing is O(1).
//! - **Fingerprints** ([`fingerprint::Fingerprint`]): deterministic SHA-256
//!   content digests over the canonical structure, stable across processes.
//! - **Signatures** ([`signature::SignatureRegistry`]): typed arity/sort
//!   checking for relation and operator construction.
//! - **Serialization** ([`sexpr`], [`json`]): canonical ASCII-only
//!   S-expression and JSON forms with a round-trip guarantee.
//!
//! All values are immutable after construction. The intern arena is
//! append-only: insertion is serialized, entries are never mutated, and
//! concurrent readers never observe partial construction.

pub mod arena;
pub mod fingerprint;
pub mod json;
pub mod kind;
pub mod node;
pub mod sexpr;
pub mod signature;

pub use fingerprint::Fingerprint;
pub use json::{from_json, to_json};
pub use kind::{NodeKind, Sort};
pub use node::{
    boolean, empty_struct, entity, list_node, nil, normalize, number, operation, relation,
    struct_node, text, var, Literal, Node,
};
pub use sexpr::{parse_sexpr, to_sexpr, ParseError};
pub use signature::{infer_sort, ConstructError, Signature, SignatureRegistry};
