// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operation and target extraction.
//!
//! The leading keyword selects a [`SqlOperation`]; each operation knows which
//! clause names its target (`FROM`, `INTO`, `TABLE`, ...). Targets may be
//! written bare or quoted with `"`, `'`, backticks, brackets or braces, and
//! are joined with their schema qualifier.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Call,
    Show,
    Set,
    Exec,
    Execute,
    Alter,
    Commit,
    Rollback,
}

impl SqlOperation {
    fn from_keyword(keyword: &str) -> Option<Self> {
        let operation = match keyword.to_ascii_lowercase().as_str() {
            "select" => SqlOperation::Select,
            "insert" => SqlOperation::Insert,
            "update" => SqlOperation::Update,
            "delete" => SqlOperation::Delete,
            "create" => SqlOperation::Create,
            "drop" => SqlOperation::Drop,
            "call" => SqlOperation::Call,
            "show" => SqlOperation::Show,
            "set" => SqlOperation::Set,
            "exec" => SqlOperation::Exec,
            "execute" => SqlOperation::Execute,
            "alter" => SqlOperation::Alter,
            "commit" => SqlOperation::Commit,
            "rollback" => SqlOperation::Rollback,
            _ => return None,
        };
        Some(operation)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SqlOperation::Select => "select",
            SqlOperation::Insert => "insert",
            SqlOperation::Update => "update",
            SqlOperation::Delete => "delete",
            SqlOperation::Create => "create",
            SqlOperation::Drop => "drop",
            SqlOperation::Call => "call",
            SqlOperation::Show => "show",
            SqlOperation::Set => "set",
            SqlOperation::Exec => "exec",
            SqlOperation::Execute => "execute",
            SqlOperation::Alter => "alter",
            SqlOperation::Commit => "commit",
            SqlOperation::Rollback => "rollback",
        }
    }

    fn target_regex(self) -> Option<&'static Regex> {
        let regex: &'static Regex = match self {
            SqlOperation::Select | SqlOperation::Delete => &FROM_REGEX,
            SqlOperation::Insert => &INTO_REGEX,
            SqlOperation::Update => &UPDATE_REGEX,
            SqlOperation::Create | SqlOperation::Drop => &TABLE_REGEX,
            SqlOperation::Call => &CALL_REGEX,
            SqlOperation::Show => &SHOW_REGEX,
            SqlOperation::Set => &SET_REGEX,
            SqlOperation::Exec | SqlOperation::Execute => &EXEC_REGEX,
            SqlOperation::Alter => &ALTER_REGEX,
            SqlOperation::Commit | SqlOperation::Rollback => return None,
        };
        Some(regex)
    }
}

impl fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quoted or bare identifier, optionally schema-qualified. Every alternative
/// contributes two groups: the first name and the optional qualified name.
const IDENTIFIER: &str = concat!(
    r#"(?:"((?:[^"]|"")+)"(?:\."((?:[^"]|"")+)")?"#,
    r"|'((?:[^']|'')+)'(?:\.'((?:[^']|'')+)')?",
    r"|`((?:[^`]|``)+)`(?:\.`((?:[^`]|``)+)`)?",
    r"|\[\s*([^\s\]]+)\s*\](?:\.\[\s*([^\s\]]+)\s*\])?",
    r"|\{\s*([^\s}]+)\s*\}()",
    r"|\(\s*([^\s)]+)\s*\)()",
    r"|([^\s()\[\],.;]+)(?:\.([^\s()\[\],;]+))?)",
);

lazy_static! {
    static ref LEADING_KEYWORD_REGEX: Regex =
        Regex::new(r"^\s*(\w+)").expect("failed creating regex");
    static ref FROM_REGEX: Regex =
        Regex::new(&format!(r"(?is)\s+FROM\s+{IDENTIFIER}")).expect("failed creating regex");
    static ref INTO_REGEX: Regex =
        Regex::new(&format!(r"(?is)\s+INTO\s+{IDENTIFIER}")).expect("failed creating regex");
    static ref UPDATE_REGEX: Regex =
        Regex::new(&format!(r"(?is)^\s*UPDATE\s+{IDENTIFIER}")).expect("failed creating regex");
    static ref TABLE_REGEX: Regex = Regex::new(&format!(
        r"(?is)\s+TABLE\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?{IDENTIFIER}"
    ))
    .expect("failed creating regex");
    static ref CALL_REGEX: Regex =
        Regex::new(r"(?is)^\s*CALL\s+(\w+(?:\.\w+)*)").expect("failed creating regex");
    static ref SHOW_REGEX: Regex =
        Regex::new(r"(?is)^\s*SHOW\s+(.*?)[\s;]*$").expect("failed creating regex");
    static ref SET_REGEX: Regex =
        Regex::new(r"(?is)^\s*SET\s+(\w+)").expect("failed creating regex");
    static ref EXEC_REGEX: Regex =
        Regex::new(r"(?is)^\s*EXEC(?:UTE)?\s+(\w+(?:\.\w+)*)").expect("failed creating regex");
    static ref ALTER_REGEX: Regex =
        Regex::new(r"(?is)^\s*ALTER\s+(\w+)").expect("failed creating regex");
}

/// Operation named by the statement's leading keyword, if it is one we know.
#[must_use]
pub fn parse_operation(sql: &str) -> Option<SqlOperation> {
    LEADING_KEYWORD_REGEX
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .and_then(|keyword| SqlOperation::from_keyword(keyword.as_str()))
}

/// Table or procedure the statement acts on, lowercased. Empty when the
/// operation has no target or none can be found.
#[must_use]
pub fn parse_target(sql: &str, operation: Option<SqlOperation>) -> String {
    operation
        .and_then(SqlOperation::target_regex)
        .and_then(|regex| regex.captures(sql))
        .map(|caps| join_identifier(&caps))
        .unwrap_or_default()
        .to_lowercase()
}

fn join_identifier(caps: &Captures<'_>) -> String {
    caps.iter()
        .skip(1)
        .flatten()
        .map(|m| m.as_str())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(sql: &str) -> String {
        parse_target(sql, parse_operation(sql))
    }

    #[test]
    fn test_parse_operation() {
        assert_eq!(parse_operation("  SELECT 1"), Some(SqlOperation::Select));
        assert_eq!(parse_operation("insert into t values (1)"), Some(SqlOperation::Insert));
        assert_eq!(parse_operation("EXECUTE proc"), Some(SqlOperation::Execute));
        assert_eq!(parse_operation("VACUUM t"), None);
        assert_eq!(parse_operation(""), None);
    }

    #[test]
    fn test_select_and_delete_targets() {
        assert_eq!(target("SELECT * FROM users WHERE id = 1"), "users");
        assert_eq!(target("select a from public.users"), "public.users");
        assert_eq!(target("DELETE FROM \"Sessions\" WHERE x = 1"), "sessions");
        assert_eq!(target("SELECT * FROM `db`.`orders`"), "db.orders");
        assert_eq!(target("SELECT * FROM [dbo].[Accounts]"), "dbo.accounts");
        assert_eq!(target("SELECT * FROM {items}"), "items");
    }

    #[test]
    fn test_select_without_from_has_no_target() {
        assert_eq!(target("SELECT 1"), "");
    }

    #[test]
    fn test_insert_update_create_drop_targets() {
        assert_eq!(target("INSERT INTO logs (a) VALUES (1)"), "logs");
        assert_eq!(target("UPDATE accounts SET a = 1"), "accounts");
        assert_eq!(target("CREATE TABLE IF NOT EXISTS metrics (id int)"), "metrics");
        assert_eq!(target("DROP TABLE old_stuff"), "old_stuff");
    }

    #[test]
    fn test_procedure_and_session_targets() {
        assert_eq!(target("CALL billing.charge(1, 2)"), "billing.charge");
        assert_eq!(target("EXEC sp_who"), "sp_who");
        assert_eq!(target("SHOW TABLES"), "tables");
        assert_eq!(target("SET search_path TO public"), "search_path");
        assert_eq!(target("ALTER TABLE t ADD COLUMN c int"), "table");
    }

    #[test]
    fn test_statement_separator_is_not_part_of_target() {
        assert_eq!(target("SELECT * FROM users;"), "users");
        assert_eq!(target("DELETE FROM sessions;"), "sessions");
        assert_eq!(target("UPDATE accounts; "), "accounts");
        assert_eq!(target("SELECT * FROM public.users;"), "public.users");
        assert_eq!(target("INSERT INTO logs;"), "logs");
        assert_eq!(target("SHOW TABLES;"), "tables");
    }

    #[test]
    fn test_transaction_control_has_no_target() {
        assert_eq!(target("COMMIT"), "");
        assert_eq!(target("ROLLBACK"), "");
    }
}
