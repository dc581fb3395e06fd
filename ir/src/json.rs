//! Canonical JSON form.
//!
//! The emitter is hand-written so the output is byte-stable: object keys in
//! the fixed order `kind`, `label`, `value`, `args`, `fields`; struct fields
//! sorted by key; compact separators; ASCII-only with `\uXXXX` escapes.
//! Parsing accepts any key order and re-canonicalizes through the
//! constructors, so `from_json(to_json(normalize(x))) == normalize(x)`.

use crate::kind::NodeKind;
use crate::node::{
    boolean, entity, format_number, list_node, nil, number, operation, relation, struct_node,
    text, var, Literal, Node,
};
use crate::sexpr::ParseError;

/// Escape a string into canonical ASCII-only JSON string contents
/// (no surrounding quotes).
pub(crate) fn escape_json_ascii(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ch if (ch as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", ch as u32));
            }
            ch if ch.is_ascii() => out.push(ch),
            ch => {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
}

fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    escape_json_ascii(value, &mut out);
    out.push('"');
    out
}

/// Serialize a node to its canonical JSON form.
#[must_use]
pub fn to_json(node: &Node) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &Node, out: &mut String) {
    out.push_str("{\"kind\":");
    out.push_str(&quoted(node.kind().as_str()));
    if let Some(label) = node.label() {
        out.push_str(",\"label\":");
        out.push_str(&quoted(label));
    }
    match node.literal() {
        Some(Literal::Number(value)) => {
            out.push_str(",\"value\":");
            out.push_str(&format_number(value));
        }
        Some(Literal::Bool(value)) => {
            out.push_str(",\"value\":");
            out.push_str(if value { "true" } else { "false" });
        }
        None => {}
    }
    if !node.args().is_empty() {
        out.push_str(",\"args\":[");
        for (idx, arg) in node.args().iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            write_node(arg, out);
        }
        out.push(']');
    }
    if !node.fields().is_empty() {
        out.push_str(",\"fields\":{");
        for (idx, (key, value)) in node.fields().iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&quoted(key));
            out.push(':');
            write_node(value, out);
        }
        out.push('}');
    }
    out.push('}');
}

/// Parse a node from its JSON form (any key order).
///
/// # Errors
///
/// Returns a [`ParseError`] on malformed JSON or an object that does not
/// satisfy the node grammar.
pub fn from_json(source: &str) -> Result<Node, ParseError> {
    let value: serde_json::Value =
        serde_json::from_str(source).map_err(|err| ParseError::InvalidJson(err.to_string()))?;
    node_from_value(&value)
}

fn node_from_value(value: &serde_json::Value) -> Result<Node, ParseError> {
    let object = value
        .as_object()
        .ok_or_else(|| ParseError::InvalidJson("node must be a JSON object".to_string()))?;
    let kind_name = object
        .get("kind")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ParseError::InvalidJson("missing \"kind\"".to_string()))?;
    let kind = NodeKind::from_str_opt(kind_name)
        .ok_or_else(|| ParseError::InvalidJson(format!("unknown kind {kind_name:?}")))?;
    let label = object.get("label").and_then(serde_json::Value::as_str);
    let args = match object.get("args") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(node_from_value)
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ParseError::InvalidJson("\"args\" must be an array".to_string()));
        }
        None => Vec::new(),
    };
    let fields = match object.get("fields") {
        Some(serde_json::Value::Object(map)) => {
            let mut fields = Vec::with_capacity(map.len());
            for (key, value) in map {
                fields.push((key.clone(), node_from_value(value)?));
            }
            fields
        }
        Some(_) => {
            return Err(ParseError::InvalidJson(
                "\"fields\" must be an object".to_string(),
            ));
        }
        None => Vec::new(),
    };

    let require_label = || {
        label
            .map(str::to_string)
            .ok_or_else(|| ParseError::InvalidJson(format!("{kind_name} node missing label")))
    };
    match kind {
        NodeKind::Entity => Ok(entity(&require_label()?)),
        NodeKind::Rel => Ok(relation(&require_label()?, args)),
        NodeKind::Op => Ok(operation(&require_label()?, args)),
        NodeKind::Var => {
            let name = require_label()?;
            if !name.starts_with('?') {
                return Err(ParseError::InvalidJson(format!(
                    "VAR label {name:?} must start with '?'"
                )));
            }
            Ok(var(&name))
        }
        NodeKind::Text => Ok(text(&require_label()?)),
        NodeKind::Number => {
            let raw = object
                .get("value")
                .and_then(serde_json::Value::as_f64)
                .filter(|value| value.is_finite())
                .ok_or_else(|| {
                    ParseError::InvalidJson("NUMBER node requires a finite value".to_string())
                })?;
            Ok(number(raw))
        }
        NodeKind::Bool => {
            let raw = object
                .get("value")
                .and_then(serde_json::Value::as_bool)
                .ok_or_else(|| {
                    ParseError::InvalidJson("BOOL node requires a boolean value".to_string())
                })?;
            Ok(boolean(raw))
        }
        NodeKind::List => Ok(list_node(args)),
        NodeKind::Struct => Ok(struct_node(fields)),
        NodeKind::Nil => Ok(nil()),
    }
}
