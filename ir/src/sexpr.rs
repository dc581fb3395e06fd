//! Canonical S-expression form.
//!
//! Grammar (ASCII-only; TEXT literals use JSON string escaping):
//!
//! ```text
//! node   := "(" KIND ":" label node* ")"        ; ENTITY, REL, OP, VAR
//!         | "(" "STRUCT" ("(" key node ")")* ")"
//!         | "[" node* "]"                        ; LIST
//!         | "(" "TEXT:" string ")"
//!         | "(" "NUMBER" ":" literal ")"
//!         | "(" "BOOL" ":" ("true"|"false") ")"
//!         | "NIL"
//! ```
//!
//! Struct fields are emitted in sorted key order, so serializing a canonical
//! node is byte-stable and `parse_sexpr(to_sexpr(normalize(x))) ==
//! normalize(x)`.

use crate::json::escape_json_ascii;
use crate::kind::NodeKind;
use crate::node::{
    boolean, entity, format_number, list_node, nil, number, operation, relation, struct_node,
    text, var, Literal, Node,
};
use thiserror::Error;

/// Parse failure for either canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Input ended inside an expression.
    #[error("unexpected end of input")]
    UnexpectedEnd,
    /// A token that does not fit the grammar at this position.
    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),
    /// A string literal was opened but never closed.
    #[error("unclosed string literal")]
    UnclosedString,
    /// A NUMBER/BOOL/TEXT payload that cannot be decoded.
    #[error("invalid literal: {0}")]
    InvalidLiteral(String),
    /// Input continued after a complete expression.
    #[error("trailing tokens after expression")]
    TrailingTokens,
    /// Malformed canonical JSON document.
    #[error("invalid json: {0}")]
    InvalidJson(String),
}

/// Serialize a node to its canonical S-expression form.
#[must_use]
pub fn to_sexpr(node: &Node) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &Node, out: &mut String) {
    match node.kind() {
        NodeKind::Entity | NodeKind::Var | NodeKind::Op | NodeKind::Rel => {
            out.push('(');
            out.push_str(node.kind().as_str());
            out.push(':');
            out.push_str(node.label().unwrap_or_default());
            for arg in node.args() {
                out.push(' ');
                write_node(arg, out);
            }
            out.push(')');
        }
        NodeKind::Struct => {
            out.push_str("(STRUCT");
            for (key, value) in node.fields() {
                out.push_str(" (");
                out.push_str(key);
                out.push(' ');
                write_node(value, out);
                out.push(')');
            }
            out.push(')');
        }
        NodeKind::List => {
            out.push('[');
            for (idx, item) in node.args().iter().enumerate() {
                if idx > 0 {
                    out.push(' ');
                }
                write_node(item, out);
            }
            out.push(']');
        }
        NodeKind::Text => {
            out.push_str("(TEXT:\"");
            escape_json_ascii(node.label().unwrap_or_default(), out);
            out.push_str("\")");
        }
        NodeKind::Number => {
            out.push_str("(NUMBER:");
            out.push_str(&format_number(node.number_value().unwrap_or_default()));
            out.push(')');
        }
        NodeKind::Bool => {
            out.push_str("(BOOL:");
            out.push_str(if node.bool_value() == Some(true) {
                "true"
            } else {
                "false"
            });
            out.push(')');
        }
        NodeKind::Nil => out.push_str("NIL"),
    }
}

// ---- Tokenizer ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Str(String),
    Atom(String),
}

fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut buf = String::new();
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            ch if ch.is_whitespace() => flush(&mut buf, &mut tokens),
            '(' => {
                flush(&mut buf, &mut tokens);
                tokens.push(Token::LParen);
            }
            ')' => {
                flush(&mut buf, &mut tokens);
                tokens.push(Token::RParen);
            }
            '[' => {
                flush(&mut buf, &mut tokens);
                tokens.push(Token::LBracket);
            }
            ']' => {
                flush(&mut buf, &mut tokens);
                tokens.push(Token::RBracket);
            }
            '"' => {
                flush(&mut buf, &mut tokens);
                tokens.push(Token::Str(read_string(&mut chars)?));
            }
            ch => buf.push(ch),
        }
    }
    flush(&mut buf, &mut tokens);
    Ok(tokens)
}

fn flush(buf: &mut String, tokens: &mut Vec<Token>) {
    if !buf.is_empty() {
        tokens.push(Token::Atom(std::mem::take(buf)));
    }
}

fn read_string(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String, ParseError> {
    let mut out = String::new();
    loop {
        let ch = chars.next().ok_or(ParseError::UnclosedString)?;
        match ch {
            '"' => return Ok(out),
            '\\' => {
                let escape = chars.next().ok_or(ParseError::UnclosedString)?;
                match escape {
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    '/' => out.push('/'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'b' => out.push('\u{08}'),
                    'f' => out.push('\u{0c}'),
                    'u' => out.push(read_unicode_escape(chars)?),
                    other => {
                        return Err(ParseError::InvalidLiteral(format!(
                            "unknown escape \\{other}"
                        )));
                    }
                }
            }
            ch => out.push(ch),
        }
    }
}

fn read_unicode_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<char, ParseError> {
    let high = read_hex4(chars)?;
    if (0xd800..0xdc00).contains(&high) {
        // Surrogate pair: expect an immediate \uXXXX low half.
        if chars.next() != Some('\\') || chars.next() != Some('u') {
            return Err(ParseError::InvalidLiteral(
                "unpaired high surrogate".to_string(),
            ));
        }
        let low = read_hex4(chars)?;
        if !(0xdc00..0xe000).contains(&low) {
            return Err(ParseError::InvalidLiteral(
                "invalid low surrogate".to_string(),
            ));
        }
        let code = 0x10000 + ((high - 0xd800) << 10) + (low - 0xdc00);
        char::from_u32(code).ok_or_else(|| ParseError::InvalidLiteral("invalid codepoint".into()))
    } else {
        char::from_u32(high).ok_or_else(|| ParseError::InvalidLiteral("invalid codepoint".into()))
    }
}

fn read_hex4(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<u32, ParseError> {
    let mut value = 0u32;
    for _ in 0..4 {
        let ch = chars.next().ok_or(ParseError::UnclosedString)?;
        let digit = ch
            .to_digit(16)
            .ok_or_else(|| ParseError::InvalidLiteral(format!("bad hex digit {ch:?}")))?;
        value = value * 16 + digit;
    }
    Ok(value)
}

// ---- Parser ---------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Result<Token, ParseError> {
        let token = self.tokens.get(self.pos).cloned().ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expect(&mut self, token: &Token) -> Result<(), ParseError> {
        let got = self.next()?;
        if got == *token {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken(format!("{got:?}")))
        }
    }

    fn parse_node(&mut self) -> Result<Node, ParseError> {
        match self.next()? {
            Token::Atom(atom) if atom == "NIL" => Ok(nil()),
            Token::Str(content) => Ok(text(&content)),
            Token::LParen => self.parse_form(),
            Token::LBracket => {
                let mut items = Vec::new();
                while self.peek() != Some(&Token::RBracket) {
                    items.push(self.parse_node()?);
                }
                self.expect(&Token::RBracket)?;
                Ok(list_node(items))
            }
            other => Err(ParseError::UnexpectedToken(format!("{other:?}"))),
        }
    }

    fn parse_form(&mut self) -> Result<Node, ParseError> {
        let head = match self.next()? {
            Token::Atom(atom) => atom,
            other => return Err(ParseError::UnexpectedToken(format!("{other:?}"))),
        };
        if head == "STRUCT" {
            return self.parse_struct_fields();
        }
        let (prefix, label) = head
            .split_once(':')
            .ok_or_else(|| ParseError::UnexpectedToken(head.clone()))?;
        let mut args = Vec::new();
        while self.peek() != Some(&Token::RParen) {
            args.push(self.parse_node()?);
        }
        self.expect(&Token::RParen)?;
        match prefix {
            "ENTITY" => Ok(entity(label)),
            "REL" => Ok(relation(label, args)),
            "OP" => Ok(operation(label, args)),
            "VAR" => {
                if !label.starts_with('?') {
                    return Err(ParseError::InvalidLiteral(format!(
                        "VAR label {label:?} must start with '?'"
                    )));
                }
                Ok(var(label))
            }
            "NUMBER" => {
                let value: f64 = label
                    .parse()
                    .map_err(|_| ParseError::InvalidLiteral(format!("bad number {label:?}")))?;
                if !value.is_finite() {
                    return Err(ParseError::InvalidLiteral(format!(
                        "non-finite number {label:?}"
                    )));
                }
                Ok(number(value))
            }
            "BOOL" => match label {
                "true" => Ok(boolean(true)),
                "false" => Ok(boolean(false)),
                other => Err(ParseError::InvalidLiteral(format!("bad bool {other:?}"))),
            },
            "TEXT" => {
                // Canonical form is (TEXT:"literal"); the quoted literal was
                // tokenized as a string argument.
                if label.is_empty() && args.len() == 1 && args[0].kind() == NodeKind::Text {
                    Ok(args.remove(0))
                } else if !label.is_empty() && args.is_empty() {
                    Ok(text(label))
                } else {
                    Err(ParseError::InvalidLiteral("malformed TEXT literal".into()))
                }
            }
            other => Err(ParseError::UnexpectedToken(format!("unknown prefix {other}"))),
        }
    }

    fn parse_struct_fields(&mut self) -> Result<Node, ParseError> {
        let mut fields = Vec::new();
        while self.peek() == Some(&Token::LParen) {
            self.expect(&Token::LParen)?;
            let key = match self.next()? {
                Token::Atom(atom) => atom,
                other => return Err(ParseError::UnexpectedToken(format!("{other:?}"))),
            };
            let value = self.parse_node()?;
            self.expect(&Token::RParen)?;
            fields.push((key, value));
        }
        self.expect(&Token::RParen)?;
        Ok(struct_node(fields))
    }
}

/// Parse a node from its S-expression form.
///
/// # Errors
///
/// Returns a [`ParseError`] on malformed input or trailing tokens.
pub fn parse_sexpr(source: &str) -> Result<Node, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.parse_node()?;
    if parser.peek().is_some() {
        return Err(ParseError::TrailingTokens);
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::normalize;

    fn sample() -> Node {
        struct_node(vec![
            ("subject", entity("car")),
            ("action", text("exists")),
            (
                "relations",
                list_node([relation("PART_OF", [entity("wheel"), entity("car")])]),
            ),
            ("count", number(2.0)),
            ("flag", boolean(true)),
            ("empty", nil()),
        ])
    }

    #[test]
    fn emits_canonical_text() {
        let node = relation("HAS", [entity("car"), entity("wheel")]);
        assert_eq!(
            to_sexpr(&node),
            "(REL:HAS (ENTITY:car) (ENTITY:wheel))"
        );
    }

    #[test]
    fn round_trip_law() {
        let normalized = normalize(&sample());
        let parsed = parse_sexpr(&to_sexpr(&normalized)).unwrap();
        assert_eq!(parsed, normalized);
    }

    #[test]
    fn text_escapes_are_ascii_and_round_trip() {
        let node = text("line\nbreak \"quoted\" caf\u{e9}");
        let rendered = to_sexpr(&node);
        assert!(rendered.is_ascii());
        assert_eq!(parse_sexpr(&rendered).unwrap(), node);
    }

    #[test]
    fn variables_round_trip() {
        let pattern = relation("PART_OF", [var("?X"), var("?Y")]);
        assert_eq!(parse_sexpr(&to_sexpr(&pattern)).unwrap(), pattern);
    }

    #[test]
    fn rejects_trailing_tokens() {
        assert_eq!(
            parse_sexpr("(ENTITY:car) junk"),
            Err(ParseError::TrailingTokens)
        );
    }

    #[test]
    fn rejects_unclosed_string() {
        assert_eq!(
            parse_sexpr("(TEXT:\"oops)"),
            Err(ParseError::UnclosedString)
        );
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert!(matches!(
            parse_sexpr("(WIDGET:thing)"),
            Err(ParseError::UnexpectedToken(_))
        ));
    }
}
