// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shape normalization of obfuscated statements.
//!
//! Statements that differ only in literal values, parameter-binding style,
//! letter case or formatting normalize to the same text, so their
//! identifiers can be used to group query statistics.

use lazy_static::lazy_static;
use regex::Regex;
use xxhash_rust::xxh3::xxh3_64;

lazy_static! {
    /// `%(name)s`, `%s` and `:name` bind parameters.
    static ref PARAMS_REGEX: Regex =
        Regex::new(r"%\([^)]*\)s|%s|:\w+").expect("failed creating regex");

    /// Parenthesized lists made only of placeholders, e.g. `(?, ?, ?)`.
    static ref VALUES_REGEX: Regex =
        Regex::new(r"\(\s*\?(?:\s*,\s*\?)*\s*\)").expect("failed creating regex");

    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").expect("failed creating regex");

    /// Whitespace on either side of punctuation carries no meaning.
    static ref PUNCTUATION_SPACING_REGEX: Regex =
        Regex::new(r"\s*([^\w\s])\s*").expect("failed creating regex");
}

/// Normalizes an already obfuscated statement.
#[must_use]
pub fn normalize(obfuscated: &str) -> String {
    let sql = PARAMS_REGEX.replace_all(obfuscated, "?");
    let sql = VALUES_REGEX.replace_all(&sql, "(?)");
    let sql = WHITESPACE_REGEX.replace_all(sql.trim(), " ");
    let sql = PUNCTUATION_SPACING_REGEX.replace_all(&sql, "$1");
    sql.to_lowercase()
}

/// Stable identifier of a normalized statement, as 16 lowercase hex digits.
#[must_use]
pub fn identifier(normalized: &str) -> String {
    format!("{:016x}", xxh3_64(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_styles_normalize_identically() {
        let expected = "select*from t where a=? and b=?";
        assert_eq!(normalize("SELECT * FROM t WHERE a = %(a)s AND b = %(b)s"), expected);
        assert_eq!(normalize("SELECT * FROM t WHERE a = %s AND b = %s"), expected);
        assert_eq!(normalize("SELECT * FROM t WHERE a = :a AND b = :b"), expected);
        assert_eq!(normalize("SELECT * FROM t WHERE a = ? AND b = ?"), expected);
    }

    #[test]
    fn test_value_lists_collapse() {
        assert_eq!(
            normalize("SELECT * FROM t WHERE id IN (?, ?, ?)"),
            normalize("SELECT * FROM t WHERE id IN (?)")
        );
        assert_eq!(
            normalize("INSERT INTO t (a, b) VALUES (?, ?)"),
            "insert into t(a,b)values(?)"
        );
    }

    #[test]
    fn test_whitespace_and_case_collapse() {
        assert_eq!(
            normalize("  SELECT   a\n\tFROM  T  "),
            normalize("select a from t")
        );
    }

    #[test]
    fn test_identifier_is_stable_and_distinguishes_shapes() {
        let a = identifier("select*from t where id=?");
        assert_eq!(a, identifier("select*from t where id=?"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, identifier("select*from u where id=?"));
    }
}
