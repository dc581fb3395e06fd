//! The convergence loop.
//!
//! States are [`Isr`] values; the transition applies one operator popped
//! FIFO from `ops_queue`. The loop is terminal when a non-empty answer
//! meets the quality threshold, when the state signature repeats (per step,
//! and at queue-drain boundaries, where a repeat means the closing sequence
//! cycled without progress), or when the step budget is exhausted — the
//! last is a normal outcome, never an error. Identical `(seed, config)`
//! inputs reproduce byte-identical traces and final states.

use crate::ops::apply_operator;
use crate::state::{initial_isr, Isr, SessionConfig};
use crate::trace::{Trace, TraceStep};
use sema_ir::{operation, Fingerprint, Node};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TerminalReason {
    /// Non-empty answer at or above the quality threshold.
    Answered,
    /// State signature repeated without progress.
    Fixpoint,
    /// `max_steps` exhausted; the state and trace are still well-formed.
    BudgetExhausted,
}

/// Outcome of one engine run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunResult {
    /// Final state.
    pub isr: Isr,
    /// Ordered, digested step log.
    pub trace: Trace,
    /// Terminal condition that stopped the loop.
    pub reason: TerminalReason,
    /// Number of operator applications.
    pub steps: usize,
}

/// Run the default pipeline for a seed node.
#[must_use]
pub fn run_seed(seed: &Node, config: &SessionConfig) -> RunResult {
    let isr = initial_isr(seed, config);
    run_loop(isr, routing_hint(seed), config)
}

/// Run an explicit operator queue over a seed node, replacing the default
/// starting queue. Used by external producers that plan their own pipeline.
#[must_use]
pub fn run_pipeline(seed: &Node, ops: Vec<Node>, config: &SessionConfig) -> RunResult {
    let mut isr = initial_isr(seed, config);
    isr.ops_queue = VecDeque::from(ops);
    run_loop(isr, routing_hint(seed), config)
}

/// Routing hint read from the seed's `route` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routing {
    Default,
    Query,
    Assertion,
}

fn routing_hint(seed: &Node) -> Routing {
    match seed.field("route").and_then(Node::label) {
        Some("query") => Routing::Query,
        Some("assertion") => Routing::Assertion,
        _ => Routing::Default,
    }
}

/// Closing sequence injected when both the operator queue and the goal
/// queue run dry before termination.
fn closing_sequence(routing: Routing) -> Vec<Node> {
    let labels: &[&str] = match routing {
        Routing::Default => &["ALIGN", "STABILIZE", "SUMMARIZE"],
        Routing::Query => &["NORMALIZE", "INFER", "SUMMARIZE"],
        Routing::Assertion => &["NORMALIZE", "ANSWER", "EXPLAIN", "SUMMARIZE"],
    };
    labels.iter().map(|label| operation(label, [])).collect()
}

fn run_loop(mut isr: Isr, routing: Routing, config: &SessionConfig) -> RunResult {
    let mut trace = Trace::new();
    let mut previous_signature = isr.state_signature();
    let mut drain_signature: Option<Fingerprint> = None;
    let mut steps = 0usize;
    let mut reason = TerminalReason::BudgetExhausted;

    while steps < config.max_steps {
        if isr.ops_queue.is_empty() {
            if isr.has_answer() && isr.quality >= config.quality_threshold {
                reason = TerminalReason::Answered;
                break;
            }
            if let Some(goal) = isr.goals.pop_front() {
                isr.ops_queue.push_back(goal);
            } else {
                // Injecting the closing sequence over a state identical to
                // the previous injection would cycle forever; stop instead.
                let signature = isr.state_signature();
                if drain_signature == Some(signature) {
                    reason = TerminalReason::Fixpoint;
                    break;
                }
                drain_signature = Some(signature);
                isr.ops_queue.extend(closing_sequence(routing));
            }
        }
        let op = isr
            .ops_queue
            .pop_front()
            .expect("operator queue refilled above");

        steps += 1;
        isr = apply_operator(&isr, &op, config);
        let step = TraceStep {
            op: op.label().unwrap_or_default().to_string(),
            quality: isr.quality,
            relations: isr.relations.len(),
            context: isr.context.len(),
        };
        debug!(
            op = step.op.as_str(),
            quality = step.quality,
            relations = step.relations,
            "applied operator"
        );
        trace.record(step);

        if isr.has_answer() && isr.quality >= config.quality_threshold {
            reason = TerminalReason::Answered;
            break;
        }
        let signature = isr.state_signature();
        if signature == previous_signature {
            reason = TerminalReason::Fixpoint;
            break;
        }
        previous_signature = signature;
    }

    info!(
        steps,
        ?reason,
        quality = isr.quality,
        digest = %trace.digest(),
        "engine run terminated"
    );
    RunResult {
        isr,
        trace,
        reason,
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Rule;
    use sema_ir::{entity, list_node, relation, struct_node, text, to_json, var};

    fn seed() -> Node {
        struct_node(vec![
            ("subject", entity("car")),
            ("action", text("exists")),
        ])
    }

    #[test]
    fn identical_inputs_reproduce_identical_traces() {
        let config = SessionConfig::default();
        let a = run_seed(&seed(), &config);
        let b = run_seed(&seed(), &config);
        assert_eq!(a.trace.digest(), b.trace.digest());
        assert_eq!(a.trace.steps(), b.trace.steps());
        assert_eq!(to_json(&a.isr.answer), to_json(&b.isr.answer));
        assert_eq!(a.isr.state_signature(), b.isr.state_signature());
        assert_eq!(a.reason, b.reason);
    }

    #[test]
    fn default_run_terminates_with_an_answer() {
        let result = run_seed(&seed(), &SessionConfig::default());
        assert_eq!(result.reason, TerminalReason::Answered);
        assert!(result.isr.has_answer());
        assert!(result.isr.quality >= 0.6);
        assert!(result.steps <= 32);
    }

    #[test]
    fn budget_exhaustion_is_a_normal_outcome() {
        let config = SessionConfig {
            max_steps: 1,
            ..SessionConfig::default()
        };
        let result = run_seed(&seed(), &config);
        assert_eq!(result.reason, TerminalReason::BudgetExhausted);
        assert_eq!(result.steps, 1);
        assert_eq!(result.trace.len(), 1);
    }

    #[test]
    fn unreachable_threshold_ends_in_a_fixpoint() {
        // With an unreachable quality threshold the closing sequence cycles
        // once without progress and the repeat stops the loop well before
        // the budget.
        let config = SessionConfig {
            quality_threshold: 2.0,
            ..SessionConfig::default()
        };
        let result = run_pipeline(&seed(), vec![operation("ALIGN", [])], &config);
        assert_eq!(result.reason, TerminalReason::Fixpoint);
        assert!(result.steps < config.max_steps);
    }

    #[test]
    fn query_routing_replaces_the_closing_sequence() {
        let routed = struct_node(vec![
            ("subject", entity("car")),
            ("route", text("query")),
        ]);
        let mut isr = initial_isr(&routed, &SessionConfig::default());
        isr.goals.clear();
        isr.ops_queue.clear();
        let result = run_loop(isr, Routing::Query, &SessionConfig::default());
        let ops: Vec<&str> = result.trace.steps().iter().map(|s| s.op.as_str()).collect();
        assert!(ops.starts_with(&["NORMALIZE", "INFER", "SUMMARIZE"]));
    }

    #[test]
    fn goals_drain_before_the_closing_sequence() {
        let result = run_pipeline(&seed(), vec![], &SessionConfig::default());
        let first = &result.trace.steps()[0];
        assert_eq!(first.op, "ANSWER");
    }

    #[test]
    fn inference_runs_inside_the_default_pipeline() {
        let config = SessionConfig {
            rules: vec![Rule::new(
                vec![relation("PART_OF", [var("?X"), var("?Y")])],
                relation("HAS", [var("?Y"), var("?X")]),
            )],
            ..SessionConfig::default()
        };
        let seed = struct_node(vec![
            ("subject", entity("car")),
            (
                "relations",
                list_node([relation("PART_OF", [entity("wheel"), entity("car")])]),
            ),
        ]);
        let result = run_seed(&seed, &config);
        assert!(result
            .isr
            .relations
            .contains(&relation("HAS", [entity("car"), entity("wheel")])));
    }
}
