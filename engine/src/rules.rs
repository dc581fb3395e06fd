//! Pattern-variable unification and rule application.
//!
//! `unify` is a pure function over a persistent substitution map: it never
//! mutates its input bindings, carries an explicit occurs check, and bounds
//! recursion depth so malformed rule bases cannot recurse unboundedly.

use sema_ir::{Node, NodeKind};
use std::collections::BTreeMap;
use thiserror::Error;

/// Variable name to bound term, ordered for deterministic iteration.
pub type Bindings = BTreeMap<String, Node>;

/// Hard recursion bound for unification and substitution.
pub const MAX_UNIFY_DEPTH: usize = 32;

/// Rule application failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// A conclusion template referenced a variable no premise bound.
    #[error("unbound variable {0} in conclusion template")]
    UnboundVariable(String),
    /// Recursion exceeded [`MAX_UNIFY_DEPTH`].
    #[error("substitution exceeded depth bound")]
    DepthExceeded,
}

/// Attempt to unify `pattern` against `term` under existing bindings.
///
/// Returns the extended bindings on success, `None` on mismatch, occurs
/// violation, or depth exhaustion. The input map is never modified.
#[must_use]
pub fn unify(pattern: &Node, term: &Node, bindings: &Bindings) -> Option<Bindings> {
    unify_at(pattern, term, bindings, 0)
}

fn unify_at(pattern: &Node, term: &Node, bindings: &Bindings, depth: usize) -> Option<Bindings> {
    if depth > MAX_UNIFY_DEPTH {
        return None;
    }
    if pattern.kind() == NodeKind::Var {
        let name = pattern.label().unwrap_or_default();
        if let Some(bound) = bindings.get(name) {
            return (bound == term).then(|| bindings.clone());
        }
        if occurs(name, term) {
            return None;
        }
        let mut extended = bindings.clone();
        extended.insert(name.to_string(), term.clone());
        return Some(extended);
    }
    if pattern.kind() != term.kind() || pattern.label() != term.label() {
        return None;
    }
    if pattern.args().len() != term.args().len() {
        return None;
    }
    if pattern.literal() != term.literal() {
        return None;
    }
    let mut current = bindings.clone();
    for (p_arg, t_arg) in pattern.args().iter().zip(term.args()) {
        current = unify_at(p_arg, t_arg, &current, depth + 1)?;
    }
    Some(current)
}

fn occurs(name: &str, term: &Node) -> bool {
    if term.kind() == NodeKind::Var && term.label() == Some(name) {
        return true;
    }
    term.args().iter().any(|arg| occurs(name, arg))
        || term.fields().iter().any(|(_, value)| occurs(name, value))
}

/// Instantiate a template with bindings.
///
/// # Errors
///
/// Returns [`RuleError::UnboundVariable`] when the template references an
/// unbound variable, or [`RuleError::DepthExceeded`] past the depth bound.
pub fn substitute(template: &Node, bindings: &Bindings) -> Result<Node, RuleError> {
    substitute_at(template, bindings, 0)
}

fn substitute_at(template: &Node, bindings: &Bindings, depth: usize) -> Result<Node, RuleError> {
    if depth > MAX_UNIFY_DEPTH {
        return Err(RuleError::DepthExceeded);
    }
    match template.kind() {
        NodeKind::Var => {
            let name = template.label().unwrap_or_default();
            bindings
                .get(name)
                .cloned()
                .ok_or_else(|| RuleError::UnboundVariable(name.to_string()))
        }
        NodeKind::Rel | NodeKind::Op => {
            let args = template
                .args()
                .iter()
                .map(|arg| substitute_at(arg, bindings, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            let label = template.label().unwrap_or_default();
            Ok(match template.kind() {
                NodeKind::Rel => sema_ir::relation(label, args),
                _ => sema_ir::operation(label, args),
            })
        }
        NodeKind::List => {
            let items = template
                .args()
                .iter()
                .map(|arg| substitute_at(arg, bindings, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sema_ir::list_node(items))
        }
        NodeKind::Struct => {
            let fields = template
                .fields()
                .iter()
                .map(|(key, value)| {
                    substitute_at(value, bindings, depth + 1).map(|node| (key.clone(), node))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sema_ir::struct_node(fields))
        }
        _ => Ok(template.clone()),
    }
}

/// Derive every conclusion producible from `facts` under `rules`.
///
/// Matching is exhaustive backtracking in rule order, then fact order, so
/// the derived sequence is deterministic. Conclusions whose instantiation
/// fails (unbound variable) are skipped; they never abort the run.
#[must_use]
pub fn apply_rules(facts: &[Node], rules: &[crate::state::Rule]) -> Vec<Node> {
    let mut produced = Vec::new();
    for rule in rules {
        let mut matches = Vec::new();
        backtrack(&rule.premises, 0, &Bindings::new(), facts, &mut matches);
        for bindings in matches {
            if let Ok(conclusion) = substitute(&rule.conclusion, &bindings) {
                produced.push(conclusion);
            }
        }
    }
    produced
}

fn backtrack(
    premises: &[Node],
    idx: usize,
    bindings: &Bindings,
    facts: &[Node],
    out: &mut Vec<Bindings>,
) {
    if idx >= premises.len() {
        out.push(bindings.clone());
        return;
    }
    for fact in facts {
        if let Some(extended) = unify(&premises[idx], fact, bindings) {
            backtrack(premises, idx + 1, &extended, facts, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Rule;
    use sema_ir::{entity, number, relation, var};

    #[test]
    fn unify_binds_variables() {
        let pattern = relation("PART_OF", [var("?X"), var("?Y")]);
        let fact = relation("PART_OF", [entity("wheel"), entity("car")]);
        let bindings = unify(&pattern, &fact, &Bindings::new()).unwrap();
        assert_eq!(bindings.get("?X"), Some(&entity("wheel")));
        assert_eq!(bindings.get("?Y"), Some(&entity("car")));
    }

    #[test]
    fn unify_respects_existing_bindings() {
        let pattern = relation("EQUAL", [var("?X"), var("?X")]);
        let same = relation("EQUAL", [entity("a"), entity("a")]);
        let different = relation("EQUAL", [entity("a"), entity("b")]);
        assert!(unify(&pattern, &same, &Bindings::new()).is_some());
        assert!(unify(&pattern, &different, &Bindings::new()).is_none());
    }

    #[test]
    fn unify_is_pure() {
        let bindings = Bindings::new();
        let pattern = relation("HAS", [var("?X"), var("?Y")]);
        let fact = relation("HAS", [entity("car"), entity("wheel")]);
        let _ = unify(&pattern, &fact, &bindings);
        assert!(bindings.is_empty());
    }

    #[test]
    fn occurs_check_rejects_self_reference() {
        let pattern = var("?X");
        let cyclic = relation("HAS", [var("?X"), entity("car")]);
        assert!(unify(&pattern, &cyclic, &Bindings::new()).is_none());
    }

    #[test]
    fn literals_must_match_exactly() {
        let pattern = relation("EQUAL", [number(1.0), var("?X")]);
        let fact = relation("EQUAL", [number(2.0), entity("a")]);
        assert!(unify(&pattern, &fact, &Bindings::new()).is_none());
    }

    #[test]
    fn substitution_reports_unbound_variables() {
        let template = relation("HAS", [var("?Y"), var("?X")]);
        let err = substitute(&template, &Bindings::new()).unwrap_err();
        assert_eq!(err, RuleError::UnboundVariable("?Y".to_string()));
    }

    #[test]
    fn apply_rules_derives_in_deterministic_order() {
        let facts = vec![
            relation("PART_OF", [entity("wheel"), entity("car")]),
            relation("PART_OF", [entity("engine"), entity("car")]),
        ];
        let rules = vec![Rule::new(
            vec![relation("PART_OF", [var("?X"), var("?Y")])],
            relation("HAS", [var("?Y"), var("?X")]),
        )];
        let derived = apply_rules(&facts, &rules);
        assert_eq!(
            derived,
            vec![
                relation("HAS", [entity("car"), entity("wheel")]),
                relation("HAS", [entity("car"), entity("engine")]),
            ]
        );
    }

    #[test]
    fn multi_premise_rules_join_bindings() {
        let facts = vec![
            relation("PART_OF", [entity("wheel"), entity("car")]),
            relation("PART_OF", [entity("car"), entity("fleet")]),
        ];
        let rules = vec![Rule::new(
            vec![
                relation("PART_OF", [var("?X"), var("?Y")]),
                relation("PART_OF", [var("?Y"), var("?Z")]),
            ],
            relation("PART_OF", [var("?X"), var("?Z")]),
        )];
        let derived = apply_rules(&facts, &rules);
        assert_eq!(
            derived,
            vec![relation("PART_OF", [entity("wheel"), entity("fleet")])]
        );
    }
}
