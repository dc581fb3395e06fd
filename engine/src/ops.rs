//! The operator library (Φ).
//!
//! Every operator is a pure transition `Isr × args × SessionConfig → Isr`:
//! the input state is never mutated, queues are never shared mutably with
//! the caller, and the result is always a well-formed state. Soft failures
//! (wrong argument shapes) leave the state unchanged or drop an in-band
//! note into context; they never abort the run.

use crate::rules::apply_rules;
use crate::state::{Isr, SessionConfig};
use sema_ir::{
    empty_struct, entity, list_node, normalize, number, operation, relation, struct_node, text,
    to_sexpr, Fingerprint, Node, NodeKind,
};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Closed set of state-transition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Operator {
    Normalize,
    Infer,
    Answer,
    Explain,
    Summarize,
    Compare,
    Extract,
    Map,
    Reduce,
    Rewrite,
    Expand,
    Align,
    Stabilize,
}

impl Operator {
    /// Canonical operator label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Normalize => "NORMALIZE",
            Operator::Infer => "INFER",
            Operator::Answer => "ANSWER",
            Operator::Explain => "EXPLAIN",
            Operator::Summarize => "SUMMARIZE",
            Operator::Compare => "COMPARE",
            Operator::Extract => "EXTRACT",
            Operator::Map => "MAP",
            Operator::Reduce => "REDUCE",
            Operator::Rewrite => "REWRITE",
            Operator::Expand => "EXPAND",
            Operator::Align => "ALIGN",
            Operator::Stabilize => "STABILIZE",
        }
    }

    /// Resolve a label (case-insensitive) to an operator.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Some(match label.to_ascii_uppercase().as_str() {
            "NORMALIZE" => Operator::Normalize,
            "INFER" => Operator::Infer,
            "ANSWER" => Operator::Answer,
            "EXPLAIN" => Operator::Explain,
            "SUMMARIZE" => Operator::Summarize,
            "COMPARE" => Operator::Compare,
            "EXTRACT" => Operator::Extract,
            "MAP" => Operator::Map,
            "REDUCE" => Operator::Reduce,
            "REWRITE" => Operator::Rewrite,
            "EXPAND" => Operator::Expand,
            "ALIGN" => Operator::Align,
            "STABILIZE" => Operator::Stabilize,
            _ => return None,
        })
    }

    /// All operators, in declaration order.
    #[must_use]
    pub fn all() -> &'static [Operator] {
        &[
            Operator::Normalize,
            Operator::Infer,
            Operator::Answer,
            Operator::Explain,
            Operator::Summarize,
            Operator::Compare,
            Operator::Extract,
            Operator::Map,
            Operator::Reduce,
            Operator::Rewrite,
            Operator::Expand,
            Operator::Align,
            Operator::Stabilize,
        ]
    }
}

/// Apply one operator node to the state.
///
/// Unknown operator labels are a soft no-op: the state is returned
/// unchanged and the skip is logged.
#[must_use]
pub fn apply_operator(isr: &Isr, op: &Node, config: &SessionConfig) -> Isr {
    let label = op.label().unwrap_or_default();
    let Some(operator) = Operator::from_label(label) else {
        debug!(label, "skipping unknown operator");
        return isr.clone();
    };
    let args = op.args();
    match operator {
        Operator::Normalize => op_normalize(isr, config),
        Operator::Infer => op_infer(isr, config),
        Operator::Answer => op_answer(isr, args),
        Operator::Explain => op_explain(isr, args),
        Operator::Summarize => op_summarize(isr, config),
        Operator::Compare => op_compare(isr, args),
        Operator::Extract => op_extract(isr, args),
        Operator::Map => op_map(isr, args),
        Operator::Reduce => op_reduce(isr, args),
        Operator::Rewrite => op_rewrite(isr, args),
        Operator::Expand => op_expand(isr, args),
        Operator::Align => op_align(isr),
        Operator::Stabilize => op_stabilize(isr, config),
    }
}

fn clamp_quality(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Fixed total order for relation sets: label first, then full canonical
/// serialization.
fn relation_sort_key(node: &Node) -> (String, String) {
    (
        node.label().unwrap_or_default().to_string(),
        to_sexpr(node),
    )
}

fn dedup_by_identity(nodes: &[Node]) -> Vec<Node> {
    let mut seen: HashSet<Fingerprint> = HashSet::with_capacity(nodes.len());
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let normalized = normalize(node);
        if seen.insert(normalized.fingerprint()) {
            out.push(normalized);
        }
    }
    out
}

// ---- NORMALIZE ------------------------------------------------------------

fn op_normalize(isr: &Isr, config: &SessionConfig) -> Isr {
    let total = isr.relations.len();
    let mut relations = dedup_by_identity(&isr.relations);
    let removed = total - relations.len();

    let mut aggressive_removed = 0;
    if config.aggressive_normalize {
        let before = relations.len();
        relations = collapse_light_duplicates(relations);
        aggressive_removed = before - relations.len();
    }

    relations.sort_by_key(relation_sort_key);
    let deduped = relations.len();

    let mut context = isr.context.clone();
    let mut quality = isr.quality.max(0.3);
    if removed + aggressive_removed > 0 {
        quality = clamp_quality(quality + 0.05);
        let mut report = vec![
            ("op", text("NORMALIZE")),
            ("total", number(total as f64)),
            ("deduped", number(deduped as f64)),
            ("removed", number(removed as f64)),
        ];
        if config.aggressive_normalize {
            report.push(("aggressive_removed", number(aggressive_removed as f64)));
        }
        context.push(struct_node(report));
    }

    debug!(total, deduped, removed, aggressive_removed, "normalized relations");
    Isr {
        relations,
        context,
        quality,
        ..isr.clone()
    }
}

/// Collapse relations that differ only in TEXT arguments onto one
/// representative per `(label, non-text args)` key. Tie-break: the
/// lexicographically smallest canonical serialization wins.
fn collapse_light_duplicates(relations: Vec<Node>) -> Vec<Node> {
    let mut groups: BTreeMap<String, Node> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for node in relations {
        let key = light_key(&node);
        match groups.get_mut(&key) {
            None => {
                order.push(key.clone());
                groups.insert(key, node);
            }
            Some(existing) => {
                if to_sexpr(&node) < to_sexpr(existing) {
                    *existing = node;
                }
            }
        }
    }
    order
        .into_iter()
        .map(|key| groups.remove(&key).unwrap_or_else(sema_ir::nil))
        .collect()
}

fn light_key(node: &Node) -> String {
    let mut key = String::new();
    key.push_str(node.label().unwrap_or_default());
    for arg in node.args() {
        if arg.kind() != NodeKind::Text {
            key.push('|');
            key.push_str(&arg.fingerprint().to_hex());
        }
    }
    key
}

// ---- INFER ----------------------------------------------------------------

fn op_infer(isr: &Isr, config: &SessionConfig) -> Isr {
    let mut facts: Vec<Node> = Vec::with_capacity(isr.ontology.len() + isr.relations.len());
    facts.extend(isr.ontology.iter().cloned());
    facts.extend(isr.relations.iter().cloned());

    let derived = apply_rules(&facts, &config.rules);
    if derived.is_empty() {
        return isr.clone();
    }

    let mut seen: HashSet<Fingerprint> =
        isr.relations.iter().map(|rel| normalize(rel).fingerprint()).collect();
    let mut relations = isr.relations.clone();
    let mut added = 0usize;
    for conclusion in derived {
        let normalized = normalize(&conclusion);
        if seen.insert(normalized.fingerprint()) {
            relations.push(normalized);
            added += 1;
        }
    }
    if added == 0 {
        // Fixpoint: everything derivable is already present.
        return isr.clone();
    }
    debug!(added, "derived new relations");
    Isr {
        relations,
        quality: clamp_quality(isr.quality + 0.05),
        ..isr.clone()
    }
}

// ---- Answer-producing operators -------------------------------------------

fn op_answer(isr: &Isr, args: &[Node]) -> Isr {
    let payload = answer_target(isr, args);
    let rendered = render_answer(&payload);
    Isr {
        answer: struct_node(vec![("answer", rendered)]),
        quality: clamp_quality(isr.quality + 0.2),
        ..isr.clone()
    }
}

fn op_explain(isr: &Isr, args: &[Node]) -> Isr {
    let focus = answer_target(isr, args);
    let summary = format!(
        "Derived from {} relations and {} context entries.",
        isr.relations.len(),
        isr.context.len()
    );
    Isr {
        answer: struct_node(vec![
            ("answer", text(&summary)),
            ("focus", text(focus.kind().as_str())),
        ]),
        ..isr.clone()
    }
}

fn op_summarize(isr: &Isr, config: &SessionConfig) -> Isr {
    let highlights: Vec<&str> = isr
        .relations
        .iter()
        .take(3)
        .filter_map(Node::label)
        .collect();
    let body = if highlights.is_empty() {
        "no relations".to_string()
    } else {
        highlights.join(", ")
    };
    Isr {
        answer: struct_node(vec![("answer", text(&format!("Summary: {body}.")))]),
        quality: isr.quality.max(config.summary_floor),
        ..isr.clone()
    }
}

/// Target of ANSWER/EXPLAIN: the explicit argument when present, otherwise
/// the seed at the head of context.
fn answer_target(isr: &Isr, args: &[Node]) -> Node {
    args.first()
        .or_else(|| isr.context.first())
        .cloned()
        .unwrap_or_else(empty_struct)
}

fn render_answer(payload: &Node) -> Node {
    if payload.kind() == NodeKind::Text {
        return payload.clone();
    }
    let mut pieces = Vec::new();
    for key in ["subject", "action", "object", "modifier"] {
        if let Some(value) = payload.field(key) {
            let piece = field_phrase(value);
            if !piece.is_empty() {
                pieces.push(piece);
            }
        }
    }
    let mut sentence = pieces.join(" ");
    if sentence.is_empty() {
        sentence = "No answer determined".to_string();
    } else {
        let mut chars = sentence.chars();
        if let Some(first) = chars.next() {
            sentence = first.to_uppercase().collect::<String>() + chars.as_str();
        }
    }
    sentence.push('.');
    text(&sentence)
}

fn field_phrase(value: &Node) -> String {
    match value.kind() {
        NodeKind::Entity | NodeKind::Text => value.label().unwrap_or_default().to_string(),
        NodeKind::List => value
            .args()
            .iter()
            .filter_map(Node::label)
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

// ---- Structural operators -------------------------------------------------

fn op_compare(isr: &Isr, args: &[Node]) -> Isr {
    let [left, right] = args else {
        return isr.clone();
    };
    let verdict = if left == right { "EQUAL" } else { "DIFFERENT" };
    let fact = relation(verdict, [left.clone(), right.clone()]);
    let mut context = isr.context.clone();
    context.push(fact.clone());
    let mut relations = isr.relations.clone();
    relations.push(fact);
    Isr {
        context,
        relations,
        ..isr.clone()
    }
}

fn op_extract(isr: &Isr, args: &[Node]) -> Isr {
    let [target, key] = args else {
        return isr.clone();
    };
    if target.kind() != NodeKind::Struct {
        return isr.clone();
    }
    let Some(value) = key.label().and_then(|key| target.field(key)) else {
        return isr.clone();
    };
    let mut context = isr.context.clone();
    context.push(value.clone());
    Isr {
        context,
        ..isr.clone()
    }
}

fn op_map(isr: &Isr, args: &[Node]) -> Isr {
    let Some(source) = args.first().filter(|node| node.kind() == NodeKind::List) else {
        return isr.clone();
    };
    let template = args.get(1).filter(|node| node.kind() == NodeKind::Op);
    let mapped: Vec<Node> = source
        .args()
        .iter()
        .map(|item| match template {
            Some(op) => operation(op.label().unwrap_or("MAP_ITEM"), [item.clone()]),
            None => item.clone(),
        })
        .collect();
    let mut context = isr.context.clone();
    context.push(list_node(mapped));
    Isr {
        context,
        ..isr.clone()
    }
}

fn op_reduce(isr: &Isr, args: &[Node]) -> Isr {
    let mut context = isr.context.clone();
    let Some(source) = args.first().filter(|node| node.kind() == NodeKind::List) else {
        // In-band soft failure note; the loop keeps converging.
        context.push(struct_node(vec![
            ("op", text("REDUCE")),
            ("note", text("expected list")),
        ]));
        return Isr {
            context,
            ..isr.clone()
        };
    };
    let items = source.args();
    let all_numeric = !items.is_empty()
        && items.iter().all(|item| item.number_value().is_some());
    let result = if all_numeric {
        let sum: f64 = items.iter().filter_map(Node::number_value).sum();
        number(sum)
    } else {
        struct_node(vec![("count", number(items.len() as f64))])
    };
    context.push(result);
    Isr {
        context,
        ..isr.clone()
    }
}

fn op_rewrite(isr: &Isr, args: &[Node]) -> Isr {
    let Some(target) = args.first() else {
        return isr.clone();
    };
    let mut context = isr.context.clone();
    context.push(normalize(target));
    Isr {
        context,
        ..isr.clone()
    }
}

fn op_expand(isr: &Isr, args: &[Node]) -> Isr {
    let existing: HashSet<Fingerprint> =
        isr.relations.iter().map(Node::fingerprint).collect();
    let additions: Vec<Node> = args
        .iter()
        .filter(|arg| arg.kind() == NodeKind::Entity)
        .map(|arg| relation("IS_A", [arg.clone(), entity("thing")]))
        .filter(|rel| !existing.contains(&rel.fingerprint()))
        .collect();
    if additions.is_empty() {
        return isr.clone();
    }
    let mut relations = isr.relations.clone();
    relations.extend(additions);
    Isr {
        relations,
        ..isr.clone()
    }
}

fn op_align(isr: &Isr) -> Isr {
    let mut relations = dedup_by_identity(&isr.relations);
    relations.sort_by_key(relation_sort_key);
    let context = dedup_preserving_order(&isr.context);
    Isr {
        relations,
        context,
        ..isr.clone()
    }
}

fn dedup_preserving_order(nodes: &[Node]) -> Vec<Node> {
    let mut seen: HashSet<Fingerprint> = HashSet::with_capacity(nodes.len());
    nodes
        .iter()
        .filter(|node| seen.insert(node.fingerprint()))
        .cloned()
        .collect()
}

fn op_stabilize(isr: &Isr, config: &SessionConfig) -> Isr {
    let nudged = (isr.quality + 0.1).min(0.95);
    Isr {
        quality: config.quality_threshold.max(nudged).min(0.95),
        ..isr.clone()
    }
}
