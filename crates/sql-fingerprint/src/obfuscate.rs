// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Comment stripping and literal obfuscation.
//!
//! Quoted literals are removed by a small scanner (the dollar-quote and
//! bracket-quote grammars need a matching closing tag, which `regex` cannot
//! express), then the remaining unquoted literals are replaced by a single
//! regex pass. If a quote character survives both passes the statement could
//! not be tokenised reliably and is replaced wholesale by the placeholder.

use crate::database::QuotingStyle;
use lazy_static::lazy_static;
use regex::Regex;

/// Token substituted for every literal.
pub const PLACEHOLDER: &str = "?";

lazy_static! {
    static ref COMMENTS_REGEX: Regex =
        Regex::new(r"(?s)/\*.*?(?:\*/|\z)|(?:#|--)[^\r\n]*").expect("failed creating regex");

    /// UUIDs, hex literals, numbers and boolean/null keywords. The first group
    /// captures the preceding character so identifiers such as `t1` or `$1`
    /// are left alone.
    static ref LITERALS_REGEX: Regex = Regex::new(
        r"(?i)(^|[^\w$?])(?:\{?(?:[0-9a-f]-*){32}\}?|0x[0-9a-f]+|[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:e[+-]?\d+)?|true\b|false\b|null\b)"
    )
    .expect("failed creating regex");
}

/// Removes `#` / `--` line comments and `/* */` block comments.
///
/// A block comment that is never closed runs to the end of the text.
#[must_use]
pub fn uncomment(sql: &str) -> String {
    COMMENTS_REGEX.replace_all(sql, "").into_owned()
}

/// Replaces every literal in `sql` with [`PLACEHOLDER`].
#[must_use]
pub fn obfuscate(sql: &str, style: QuotingStyle) -> String {
    let unquoted = replace_quoted_literals(sql, style);
    let obfuscated = LITERALS_REGEX.replace_all(&unquoted, "${1}?");

    if obfuscated.contains(style.quote_chars()) {
        return PLACEHOLDER.to_string();
    }
    obfuscated.into_owned()
}

fn replace_quoted_literals(sql: &str, style: QuotingStyle) -> String {
    let bytes = sql.as_bytes();
    let mut result = String::with_capacity(sql.len());
    let mut flushed = 0;
    let mut i = 0;

    while i < bytes.len() {
        let mut start = i;
        let literal_end = match bytes[i] {
            b'q' | b'Q' if style == QuotingStyle::SingleBracket => bracket_literal_end(bytes, i),
            b'\'' if style == QuotingStyle::SingleDouble => {
                Some(string_literal_end(bytes, i, b'\'', true))
            }
            b'\'' if is_escape_string(bytes, i, style) => {
                start = i - 1;
                Some(string_literal_end(bytes, i, b'\'', true))
            }
            b'\'' => Some(string_literal_end(bytes, i, b'\'', false)),
            b'"' if style == QuotingStyle::SingleDouble => {
                Some(string_literal_end(bytes, i, b'"', true))
            }
            b'$' if style == QuotingStyle::SingleDollar => dollar_literal_end(sql, i),
            _ => None,
        };

        match literal_end {
            // Unterminated string: keep the quote so the caller rejects the statement.
            Some(None) => break,
            Some(Some(end)) => {
                result.push_str(&sql[flushed..start]);
                result.push_str(PLACEHOLDER);
                flushed = end;
                i = end;
            }
            None => i += 1,
        }
    }

    result.push_str(&sql[flushed..]);
    result
}

/// `E'...'` in the dollar-quoting dialect, the only form there in which a
/// backslash escapes the next character.
fn is_escape_string(bytes: &[u8], quote: usize, style: QuotingStyle) -> bool {
    if style != QuotingStyle::SingleDollar || quote == 0 {
        return false;
    }
    let prefix = quote - 1;
    if !matches!(bytes[prefix], b'e' | b'E') {
        return false;
    }
    prefix == 0 || !(bytes[prefix - 1].is_ascii_alphanumeric() || bytes[prefix - 1] == b'_')
}

/// End of a `'...'` or `"..."` literal starting at `start`, honouring doubled
/// quotes and, with `backslash_escapes`, backslash escapes. `None` when the
/// literal is unterminated.
fn string_literal_end(
    bytes: &[u8],
    start: usize,
    quote: u8,
    backslash_escapes: bool,
) -> Option<usize> {
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' if backslash_escapes => j += 2,
            c if c == quote => {
                if bytes.get(j + 1) == Some(&quote) {
                    j += 2;
                } else {
                    return Some(j + 1);
                }
            }
            _ => j += 1,
        }
    }
    None
}

/// `$tag$ ... $tag$`; an unmatched opening tag consumes the rest of the text.
fn dollar_literal_end(sql: &str, start: usize) -> Option<Option<usize>> {
    let bytes = sql.as_bytes();
    let mut j = start + 1;
    if j < bytes.len() && bytes[j].is_ascii_digit() {
        return None;
    }
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    if bytes.get(j) != Some(&b'$') {
        return None;
    }

    let tag = &sql[start..=j];
    let body_start = j + 1;
    let end = sql[body_start..]
        .find(tag)
        .map_or(sql.len(), |pos| body_start + pos + tag.len());
    Some(Some(end))
}

/// `q'[ ... ]'` and friends; an unmatched opening consumes the rest of the text.
fn bracket_literal_end(bytes: &[u8], start: usize) -> Option<Option<usize>> {
    if start > 0 && (bytes[start - 1].is_ascii_alphanumeric() || bytes[start - 1] == b'_') {
        return None;
    }
    if bytes.get(start + 1) != Some(&b'\'') {
        return None;
    }
    let close = match bytes.get(start + 2) {
        Some(b'[') => b']',
        Some(b'{') => b'}',
        Some(b'(') => b')',
        Some(b'<') => b'>',
        _ => return None,
    };

    let mut j = start + 3;
    while j + 1 < bytes.len() {
        if bytes[j] == close && bytes[j + 1] == b'\'' {
            return Some(Some(j + 2));
        }
        j += 1;
    }
    Some(Some(bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncomment_line_and_block_comments() {
        assert_eq!(uncomment("SELECT 1 -- trailing"), "SELECT 1 ");
        assert_eq!(uncomment("SELECT 1 # mysql style\nFROM t"), "SELECT 1 \nFROM t");
        assert_eq!(uncomment("SELECT /* hint */ 1"), "SELECT  1");
    }

    #[test]
    fn test_uncomment_unterminated_block_runs_to_end() {
        assert_eq!(uncomment("SELECT a /* never closed FROM t"), "SELECT a ");
    }

    #[test]
    fn test_obfuscate_single_quotes_and_numbers() {
        assert_eq!(
            obfuscate("SELECT * FROM users WHERE name = 'bob' AND age > 21", QuotingStyle::Single),
            "SELECT * FROM users WHERE name = ? AND age > ?"
        );
    }

    #[test]
    fn test_obfuscate_doubled_quote_escape() {
        assert_eq!(
            obfuscate("SELECT 'it''s' FROM t", QuotingStyle::Single),
            "SELECT ? FROM t"
        );
    }

    #[test]
    fn test_obfuscate_keeps_double_quoted_identifiers_for_single_style() {
        assert_eq!(
            obfuscate(r#"SELECT "Name" FROM "Users" WHERE id = 5"#, QuotingStyle::Single),
            r#"SELECT "Name" FROM "Users" WHERE id = ?"#
        );
    }

    #[test]
    fn test_obfuscate_double_quoted_strings_for_mysql() {
        assert_eq!(
            obfuscate(r#"SELECT * FROM t WHERE a = "secret""#, QuotingStyle::SingleDouble),
            "SELECT * FROM t WHERE a = ?"
        );
    }

    #[test]
    fn test_obfuscate_dollar_quotes() {
        assert_eq!(
            obfuscate("SELECT $body$ it's here $body$, $$x$$ FROM t", QuotingStyle::SingleDollar),
            "SELECT ?, ? FROM t"
        );
    }

    #[test]
    fn test_obfuscate_keeps_positional_parameters() {
        assert_eq!(
            obfuscate("SELECT * FROM t WHERE a = $1 AND b = 2", QuotingStyle::SingleDollar),
            "SELECT * FROM t WHERE a = $1 AND b = ?"
        );
    }

    #[test]
    fn test_obfuscate_oracle_bracket_quotes() {
        assert_eq!(
            obfuscate("SELECT q'[it's]' FROM dual", QuotingStyle::SingleBracket),
            "SELECT ? FROM dual"
        );
        assert_eq!(
            obfuscate("SELECT q'{a}', q'<b>' FROM dual", QuotingStyle::SingleBracket),
            "SELECT ?, ? FROM dual"
        );
    }

    #[test]
    fn test_obfuscate_uuid_hex_bool_null() {
        assert_eq!(
            obfuscate(
                "UPDATE t SET a = 0xFF, b = TRUE, c = null WHERE id = 550e8400-e29b-41d4-a716-446655440000",
                QuotingStyle::Single
            ),
            "UPDATE t SET a = ?, b = ?, c = ? WHERE id = ?"
        );
    }

    #[test]
    fn test_obfuscate_leaves_identifiers_with_digits() {
        assert_eq!(
            obfuscate("SELECT col1 FROM table2 WHERE x=-1.5e3", QuotingStyle::Single),
            "SELECT col1 FROM table2 WHERE x=?"
        );
    }

    #[test]
    fn test_obfuscate_unterminated_quote_hides_whole_statement() {
        assert_eq!(
            obfuscate("SELECT * FROM t WHERE a = 'unterminated", QuotingStyle::Single),
            PLACEHOLDER
        );
        assert_eq!(
            obfuscate(r#"SELECT * FROM t WHERE a = "open"#, QuotingStyle::SingleDouble),
            PLACEHOLDER
        );
    }

    #[test]
    fn test_backslash_is_literal_in_standard_strings() {
        let expected = "SELECT * FROM files WHERE path = ?";
        for style in [
            QuotingStyle::Single,
            QuotingStyle::SingleDollar,
            QuotingStyle::SingleBracket,
        ] {
            assert_eq!(
                obfuscate(r"SELECT * FROM files WHERE path = 'C:\'", style),
                expected
            );
            assert_eq!(
                obfuscate(r"SELECT * FROM files WHERE path = 'C:\tmp'", style),
                expected
            );
        }
    }

    #[test]
    fn test_backslash_escapes_in_mysql_strings() {
        assert_eq!(
            obfuscate(r"SELECT * FROM t WHERE a = 'it\'s' AND b = 1", QuotingStyle::SingleDouble),
            "SELECT * FROM t WHERE a = ? AND b = ?"
        );
        assert_eq!(
            obfuscate(r"SELECT * FROM t WHERE a = 'C:\'", QuotingStyle::SingleDouble),
            PLACEHOLDER
        );
    }

    #[test]
    fn test_postgres_escape_strings() {
        assert_eq!(
            obfuscate(r"SELECT * FROM t WHERE a = E'it\'s' AND b = 1", QuotingStyle::SingleDollar),
            "SELECT * FROM t WHERE a = ? AND b = ?"
        );
        assert_eq!(
            obfuscate(r"SELECT * FROM t WHERE name'x'", QuotingStyle::SingleDollar),
            "SELECT * FROM t WHERE name?"
        );
    }

    #[test]
    fn test_obfuscate_is_idempotent() {
        let once = obfuscate("SELECT * FROM t WHERE a = 'x' AND b IN (1, 2, 3)", QuotingStyle::Single);
        assert_eq!(obfuscate(&once, QuotingStyle::Single), once);
    }

    #[test]
    fn test_obfuscate_non_ascii_text() {
        assert_eq!(
            obfuscate("SELECT 'héllo' AS größe FROM t", QuotingStyle::Single),
            "SELECT ? AS größe FROM t"
        );
    }
}
