//! Parameterized Cypher construction
//!
//! The graph store accepts query parameters as a `CYPHER k=v ...` prefix on
//! the query string. Building that prefix requires escaping string values;
//! the escaping lives here as a pure function so it can be tested in
//! isolation instead of being inlined at every call site.

use std::fmt::Write;

/// A single query parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Param>),
}

impl Param {
    /// Convenience constructor for string parameters.
    pub fn str(value: impl Into<String>) -> Self {
        Param::Str(value.into())
    }

    /// A string parameter, or null when the value is absent.
    pub fn opt_str(value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => Param::Str(v.into()),
            None => Param::Null,
        }
    }

    fn encode(&self, out: &mut String) {
        match self {
            Param::Null => out.push_str("null"),
            Param::Str(s) => {
                out.push('"');
                out.push_str(&escape_str(s));
                out.push('"');
            }
            Param::Int(i) => {
                let _ = write!(out, "{}", i);
            }
            Param::Float(f) => {
                let _ = write!(out, "{}", f);
            }
            Param::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Param::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.encode(out);
                }
                out.push(']');
            }
        }
    }
}

/// Escape a string for inclusion in a double-quoted Cypher literal.
///
/// Backslashes and double quotes are backslash-escaped; newlines, carriage
/// returns and tabs become their two-character escape sequences; remaining
/// control characters become `\uXXXX`. A value can therefore never terminate
/// the quoted literal or inject query text.
pub fn escape_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Build the full query string: `CYPHER name=value ... <query>`.
///
/// With no parameters the query is returned unchanged.
pub fn with_params(params: &[(&str, Param)], query: &str) -> String {
    if params.is_empty() {
        return query.to_string();
    }
    let mut out = String::from("CYPHER");
    for (name, value) in params {
        out.push(' ');
        out.push_str(name);
        out.push('=');
        value.encode(&mut out);
    }
    out.push(' ');
    out.push_str(query);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_plain_passthrough() {
        assert_eq!(escape_str("Robin has brown hair."), "Robin has brown hair.");
    }

    #[test]
    fn test_escape_quotes_and_backslashes() {
        assert_eq!(escape_str(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_str(r"a\b"), r"a\\b");
    }

    #[test]
    fn test_escape_whitespace_controls() {
        assert_eq!(escape_str("a\nb\tc\r"), "a\\nb\\tc\\r");
    }

    #[test]
    fn test_escape_other_control_chars() {
        assert_eq!(escape_str("a\u{0001}b"), "a\\u0001b");
    }

    #[test]
    fn test_escape_neutralizes_injection() {
        let hostile = r#"x"}) DETACH DELETE n //"#;
        let escaped = escape_str(hostile);
        // Every quote must be escaped so the literal cannot be terminated.
        assert_eq!(escaped, r#"x\"}) DETACH DELETE n //"#);
        assert!(!escaped.contains(r#"x"}"#));
    }

    #[test]
    fn test_with_params_empty() {
        assert_eq!(with_params(&[], "MATCH (n) RETURN n"), "MATCH (n) RETURN n");
    }

    #[test]
    fn test_with_params_scalars() {
        let query = with_params(
            &[
                ("name", Param::str("Acme")),
                ("count", Param::Int(3)),
                ("score", Param::Float(0.85)),
                ("active", Param::Bool(true)),
                ("missing", Param::Null),
            ],
            "RETURN $name",
        );
        assert_eq!(
            query,
            "CYPHER name=\"Acme\" count=3 score=0.85 active=true missing=null RETURN $name"
        );
    }

    #[test]
    fn test_with_params_list() {
        let query = with_params(
            &[(
                "ids",
                Param::List(vec![Param::str("a"), Param::str("b")]),
            )],
            "RETURN $ids",
        );
        assert_eq!(query, "CYPHER ids=[\"a\", \"b\"] RETURN $ids");
    }

    #[test]
    fn test_with_params_escapes_strings() {
        let query = with_params(
            &[("fact", Param::str("said \"no\""))],
            "RETURN $fact",
        );
        assert_eq!(query, "CYPHER fact=\"said \\\"no\\\"\" RETURN $fact");
    }
}
