//! Ordered, content-digested log of operator applications.
//!
//! The digest is a rolling SHA-256 chain: each recorded step hashes the
//! previous digest together with a canonical step line, so two traces are
//! equal iff every step matched in order. Quality is chained by bit
//! pattern, not by decimal rendering, so no formatting choice can make two
//! different runs collide.

use sema_ir::Fingerprint;
use serde::{Deserialize, Serialize};

/// One applied operator, as observed after the transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// Operator label.
    pub op: String,
    /// Quality after the step.
    pub quality: f64,
    /// Relation count after the step.
    pub relations: usize,
    /// Context count after the step.
    pub context: usize,
}

/// Ordered step log plus rolling content digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    steps: Vec<TraceStep>,
    digest: Fingerprint,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace {
    /// Empty trace with the fixed genesis digest.
    #[must_use]
    pub fn new() -> Self {
        Trace {
            steps: Vec::new(),
            digest: Fingerprint::digest(b"sema-trace/1"),
        }
    }

    /// Append one step and extend the rolling digest.
    pub fn record(&mut self, step: TraceStep) {
        let line = format!(
            "{}|{}|{:016x}|{}|{}",
            self.steps.len(),
            step.op,
            step.quality.to_bits(),
            step.relations,
            step.context,
        );
        let mut payload = Vec::with_capacity(32 + line.len());
        payload.extend_from_slice(self.digest.as_bytes());
        payload.extend_from_slice(line.as_bytes());
        self.digest = Fingerprint::digest(&payload);
        self.steps.push(step);
    }

    /// Recorded steps, in application order.
    #[must_use]
    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    /// Rolling digest over all steps so far.
    #[must_use]
    pub fn digest(&self) -> Fingerprint {
        self.digest
    }

    /// Number of recorded steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no step has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
