//! Placeholder translation for drivers that use numbered markers.
//!
//! Portable statements carry either `?` positional markers or `@name`
//! named markers. Engines such as PostgreSQL expect `$1..$N` instead, so
//! the network adapter rewrites the statement text and builds the ordered
//! value list here. Quoted regions are left untouched.

use crate::error::{Error, Result};
use crate::params::Params;
use crate::types::Value;

/// A statement rewritten into numbered-placeholder dialect together with
/// the values to bind, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    /// Statement text with `$1..$N` markers.
    pub sql: String,
    /// Values in `$N` order.
    pub values: Vec<Value>,
}

/// Rewrites `?` and `@name` markers into `$1..$N` and resolves values.
///
/// Positional markers are numbered in source order and mapped to the
/// bundle positionally. Named markers are numbered by first occurrence;
/// later occurrences of the same name reuse the earlier number. Names in
/// the bundle that never appear in the statement are not passed to the
/// driver.
///
/// The scan is byte-wise; every marker is ASCII, so multi-byte text
/// inside identifiers or literals passes through verbatim.
///
/// # Errors
///
/// Returns [`Error::Bind`] when a `?` has no corresponding positional
/// value or an `@name` is absent from the bundle.
pub fn translate(sql: &str, params: &Params) -> Result<Translated> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut values = Vec::new();
    let mut named_order: Vec<&str> = Vec::new();
    let mut positional_index = 0usize;

    // Start of the verbatim run not yet copied to `out`.
    let mut run_start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => i = skip_quoted(bytes, i),
            b'?' => {
                let value = match params {
                    Params::Positional(values) => values.get(positional_index),
                    _ => None,
                };
                let Some(value) = value else {
                    return Err(Error::bind(format!("?{}", positional_index + 1)));
                };
                values.push(value.clone());
                positional_index += 1;
                out.push_str(&sql[run_start..i]);
                out.push('$');
                out.push_str(&values.len().to_string());
                i += 1;
                run_start = i;
            }
            b'@' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && is_ident_byte(bytes[end]) {
                    end += 1;
                }
                if end == start {
                    // A lone '@' is not a marker.
                    i += 1;
                    continue;
                }
                let name = &sql[start..end];
                let number = match named_order.iter().position(|n| *n == name) {
                    Some(pos) => pos + 1,
                    None => {
                        let Some(value) = params.lookup(name) else {
                            return Err(Error::bind(format!("@{name}")));
                        };
                        values.push(value.clone());
                        named_order.push(name);
                        named_order.len()
                    }
                };
                out.push_str(&sql[run_start..i]);
                out.push('$');
                out.push_str(&number.to_string());
                i = end;
                run_start = i;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[run_start..]);

    Ok(Translated { sql: out, values })
}

/// Splits a multi-statement script on top-level `;`, respecting quotes.
///
/// Empty fragments (trailing semicolons, blank lines) are dropped.
pub fn split_script(script: &str) -> Vec<String> {
    let bytes = script.as_bytes();
    let mut statements = Vec::new();
    let mut run_start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => i = skip_quoted(bytes, i),
            b';' => {
                let statement = script[run_start..i].trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                i += 1;
                run_start = i;
            }
            _ => i += 1,
        }
    }
    let statement = script[run_start..].trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    statements
}

/// Returns the index one past the closing quote, honoring doubled-quote
/// escapes (`''` inside a string literal). Quote bytes are ASCII, so no
/// multi-byte sequence can match one.
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if i + 1 < bytes.len() && bytes[i + 1] == quote {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_markers_number_in_source_order() {
        let params = Params::positional(vec![Value::Text("a".into()), Value::Integer(1)]);
        let t = translate("INSERT INTO t VALUES (?, ?)", &params).unwrap();
        assert_eq!(t.sql, "INSERT INTO t VALUES ($1, $2)");
        assert_eq!(t.values, vec![Value::Text("a".into()), Value::Integer(1)]);
    }

    #[test]
    fn named_markers_number_by_first_occurrence() {
        let params = Params::named(vec![
            ("n", Value::Text("x".into())),
            ("r", Value::Text("admin".into())),
        ]);
        let t = translate(
            "SELECT * FROM u WHERE name=@n AND role=@r OR alias=@n",
            &params,
        )
        .unwrap();
        assert_eq!(t.sql, "SELECT * FROM u WHERE name=$1 AND role=$2 OR alias=$1");
        assert_eq!(
            t.values,
            vec![Value::Text("x".into()), Value::Text("admin".into())]
        );
    }

    #[test]
    fn unreferenced_names_are_dropped() {
        let params = Params::named(vec![
            ("used", Value::Integer(1)),
            ("unused", Value::Integer(2)),
        ]);
        let t = translate("SELECT @used", &params).unwrap();
        assert_eq!(t.values, vec![Value::Integer(1)]);
    }

    #[test]
    fn unresolved_named_marker_is_a_bind_error() {
        let err = translate("SELECT @missing", &Params::Empty).unwrap_err();
        assert!(matches!(err, Error::Bind { ref marker } if marker == "@missing"));
    }

    #[test]
    fn missing_positional_value_is_a_bind_error() {
        let params = Params::positional(vec![Value::Integer(1)]);
        let err = translate("SELECT ?, ?", &params).unwrap_err();
        assert!(matches!(err, Error::Bind { ref marker } if marker == "?2"));
    }

    #[test]
    fn quoted_markers_are_untouched() {
        let params = Params::positional(vec![Value::Integer(1)]);
        let t = translate("SELECT '?', \"@col\", ? FROM t", &params).unwrap();
        assert_eq!(t.sql, "SELECT '?', \"@col\", $1 FROM t");
        assert_eq!(t.values, vec![Value::Integer(1)]);
    }

    #[test]
    fn doubled_quotes_stay_inside_literals() {
        let t = translate("SELECT 'it''s @not a marker'", &Params::Empty).unwrap();
        assert_eq!(t.sql, "SELECT 'it''s @not a marker'");
        assert!(t.values.is_empty());
    }

    #[test]
    fn multibyte_text_passes_through_verbatim() {
        let params = Params::positional(vec![Value::Integer(1)]);
        let t = translate("SELECT 'héllo • wörld', ? FROM tàble", &params).unwrap();
        assert_eq!(t.sql, "SELECT 'héllo • wörld', $1 FROM tàble");
    }

    #[test]
    fn lone_at_sign_is_not_a_marker() {
        let t = translate("SELECT 'a' @ 'b'", &Params::Empty).unwrap();
        assert_eq!(t.sql, "SELECT 'a' @ 'b'");
    }

    #[test]
    fn split_script_respects_quotes() {
        let parts = split_script("INSERT INTO t VALUES ('a;b'); DELETE FROM t;");
        assert_eq!(
            parts,
            vec![
                "INSERT INTO t VALUES ('a;b')".to_string(),
                "DELETE FROM t".to_string()
            ]
        );
    }

    #[test]
    fn split_script_drops_empty_fragments() {
        let parts = split_script(";;SELECT 1;;");
        assert_eq!(parts, vec!["SELECT 1".to_string()]);
    }
}
