//! Reactive state record and session configuration.

use sema_ir::{
    empty_struct, operation, to_sexpr, Fingerprint, Node, NodeKind, SignatureRegistry,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One inference rule: every premise must unify against the fact set for the
/// conclusion to be derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Patterns (with `?` variables) that must all match.
    pub premises: Vec<Node>,
    /// Template instantiated with the matched bindings.
    pub conclusion: Node,
}

impl Rule {
    /// Build a rule from premises and a conclusion template.
    #[must_use]
    pub fn new(premises: Vec<Node>, conclusion: Node) -> Self {
        Rule {
            premises,
            conclusion,
        }
    }
}

/// Immutable session configuration threaded by reference into every operator
/// and VM call. Never a singleton; isolated runs cannot observe each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Step budget for one engine run.
    pub max_steps: usize,
    /// Quality level at which a non-empty answer terminates the run.
    pub quality_threshold: f64,
    /// Floor applied by SUMMARIZE and targeted by STABILIZE.
    pub summary_floor: f64,
    /// Whether NORMALIZE collapses relations sharing a non-text-argument
    /// signature.
    pub aggressive_normalize: bool,
    /// Ordered rule base consumed by INFER.
    pub rules: Vec<Rule>,
    /// Background ontology facts visible to INFER.
    pub ontology: Vec<Node>,
    /// Typed signatures for checked construction at the boundary.
    pub registry: SignatureRegistry,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_steps: 32,
            quality_threshold: 0.6,
            summary_floor: 0.5,
            aggressive_normalize: false,
            rules: Vec::new(),
            ontology: Vec::new(),
            registry: SignatureRegistry::core(),
        }
    }
}

/// The reactive state record.
///
/// Immutable per step: every transition builds a new value; sequences hold
/// shared node handles, so cloning copies pointers, never structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Isr {
    /// Background ontology facts (never mutated by operators).
    pub ontology: Vec<Node>,
    /// Asserted and derived relations.
    pub relations: Vec<Node>,
    /// Working context: seed, intermediate results, in-band notes.
    pub context: Vec<Node>,
    /// Pending goals, drained FIFO when the operator queue runs dry.
    pub goals: VecDeque<Node>,
    /// Pending operators, applied FIFO.
    pub ops_queue: VecDeque<Node>,
    /// Current answer struct (empty until an answering operator runs).
    pub answer: Node,
    /// Quality estimate in `[0, 1]`.
    pub quality: f64,
}

impl Isr {
    /// Whether an answer has been produced.
    #[must_use]
    pub fn has_answer(&self) -> bool {
        !self.answer.fields().is_empty()
    }

    /// Content signature over `{relations, context, ops_queue, quality,
    /// answer}`, used for consecutive-state fixpoint detection.
    #[must_use]
    pub fn state_signature(&self) -> Fingerprint {
        let mut payload = String::new();
        for section in [&self.relations, &self.context] {
            for node in section.iter() {
                payload.push_str(&to_sexpr(node));
                payload.push('\n');
            }
            payload.push('|');
        }
        for node in &self.ops_queue {
            payload.push_str(&to_sexpr(node));
            payload.push('\n');
        }
        payload.push('|');
        payload.push_str(&format!("{:016x}", self.quality.to_bits()));
        payload.push('|');
        payload.push_str(&to_sexpr(&self.answer));
        Fingerprint::digest(payload.as_bytes())
    }
}

/// Build the initial state for a seed node.
///
/// The seed becomes the first context entry; any `REL` nodes under the
/// seed's `relations` list field are lifted into the relation set; goals
/// hold a deferred `ANSWER`/`EXPLAIN` pair over the seed; the starting
/// operator queue is `NORMALIZE(seed), ALIGN, INFER`.
#[must_use]
pub fn initial_isr(seed: &Node, config: &SessionConfig) -> Isr {
    Isr {
        ontology: config.ontology.clone(),
        relations: relations_from_seed(seed),
        context: vec![seed.clone()],
        goals: VecDeque::from(vec![
            operation("ANSWER", [seed.clone()]),
            operation("EXPLAIN", [seed.clone()]),
        ]),
        ops_queue: VecDeque::from(vec![
            operation("NORMALIZE", [seed.clone()]),
            operation("ALIGN", []),
            operation("INFER", []),
        ]),
        answer: empty_struct(),
        quality: 0.0,
    }
}

fn relations_from_seed(seed: &Node) -> Vec<Node> {
    let Some(list) = seed.field("relations") else {
        return Vec::new();
    };
    if list.kind() != NodeKind::List {
        return Vec::new();
    }
    list.args()
        .iter()
        .filter(|node| node.kind() == NodeKind::Rel)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sema_ir::{entity, list_node, relation, struct_node, text};

    #[test]
    fn initial_state_lifts_seed_relations() {
        let seed = struct_node(vec![
            ("subject", entity("car")),
            (
                "relations",
                list_node([
                    relation("PART_OF", [entity("wheel"), entity("car")]),
                    text("not a relation"),
                ]),
            ),
        ]);
        let isr = initial_isr(&seed, &SessionConfig::default());
        assert_eq!(isr.relations.len(), 1);
        assert_eq!(isr.context, vec![seed]);
        assert_eq!(isr.goals.len(), 2);
        assert_eq!(isr.ops_queue.len(), 3);
        assert!(!isr.has_answer());
        assert_eq!(isr.quality, 0.0);
    }

    #[test]
    fn state_signature_tracks_content_not_identity() {
        let seed = struct_node(vec![("subject", entity("car"))]);
        let config = SessionConfig::default();
        let a = initial_isr(&seed, &config);
        let b = initial_isr(&seed, &config);
        assert_eq!(a.state_signature(), b.state_signature());

        let mut c = initial_isr(&seed, &config);
        c.quality = 0.5;
        assert_ne!(a.state_signature(), c.state_signature());
    }

    #[test]
    fn config_serde_round_trip() {
        let config = SessionConfig {
            aggressive_normalize: true,
            rules: vec![Rule::new(
                vec![relation("PART_OF", [sema_ir::var("?X"), sema_ir::var("?Y")])],
                relation("HAS", [sema_ir::var("?Y"), sema_ir::var("?X")]),
            )],
            ..SessionConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
