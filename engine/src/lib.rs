//! Reactive fixpoint evaluator for the symbolic IR.
//!
//! The engine threads an immutable state record ([`state::Isr`]) through a
//! closed library of pure state-transition operators ([`ops::Operator`])
//! until convergence: an accepted answer, a repeated state signature, or an
//! exhausted step budget. Every applied operator appends one step to the
//! [`trace::Trace`] and extends its rolling content digest, so identical
//! `(seed, config)` inputs reproduce byte-identical traces across runs,
//! processes, and conforming implementations.

pub mod engine;
pub mod ops;
pub mod rules;
pub mod state;
pub mod trace;

pub use engine::{run_pipeline, run_seed, RunResult, TerminalReason};
pub use ops::{apply_operator, Operator};
pub use rules::{apply_rules, substitute, unify, Bindings, RuleError, MAX_UNIFY_DEPTH};
pub use state::{initial_isr, Isr, Rule, SessionConfig};
pub use trace::{Trace, TraceStep};
