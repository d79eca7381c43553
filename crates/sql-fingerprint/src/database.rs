// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Database dialect descriptors.
//!
//! A [`DatabaseDescriptor`] tells the fingerprint engine how a dialect quotes
//! literals and how (or whether) it can be asked for an execution plan. The
//! descriptors for the known products are built from an explicit match on
//! [`DatabaseProduct`] rather than looked up in a runtime registry.

use crate::parse::SqlOperation;
use std::fmt;

/// Literal quoting grammar used when obfuscating statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotingStyle {
    /// `'...'` strings only; `"..."` are identifiers.
    Single,
    /// `'...'` and `"..."` are both string literals.
    SingleDouble,
    /// `'...'` strings plus `$tag$...$tag$` dollar quoting.
    SingleDollar,
    /// `'...'` strings plus `q'[...]'`, `q'{...}'`, `q'(...)'` and `q'<...>'`.
    SingleBracket,
}

impl QuotingStyle {
    /// Characters that must not survive obfuscation for this grammar.
    pub(crate) fn quote_chars(self) -> &'static [char] {
        match self {
            QuotingStyle::SingleDouble => &['\'', '"'],
            QuotingStyle::Single | QuotingStyle::SingleDollar | QuotingStyle::SingleBracket => {
                &['\'']
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatabaseProduct {
    Postgres,
    MySql,
    Sqlite,
    Oracle,
    SqlServer,
    Other(String),
}

impl fmt::Display for DatabaseProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseProduct::Postgres => write!(f, "Postgres"),
            DatabaseProduct::MySql => write!(f, "MySQL"),
            DatabaseProduct::Sqlite => write!(f, "SQLite"),
            DatabaseProduct::Oracle => write!(f, "Oracle"),
            DatabaseProduct::SqlServer => write!(f, "MSSQL"),
            DatabaseProduct::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Describes one database dialect.
///
/// Two descriptors compare equal when every field matches, which is what the
/// fingerprint cache keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseDescriptor {
    pub product: DatabaseProduct,
    pub quoting_style: QuotingStyle,
    /// Keyword prefixed to a statement to obtain its plan, e.g. `EXPLAIN`.
    pub explain_query: Option<String>,
    /// Operations the dialect can explain.
    pub explain_stmts: Vec<SqlOperation>,
}

impl DatabaseDescriptor {
    #[must_use]
    pub fn for_product(product: DatabaseProduct) -> Self {
        let (quoting_style, explain_query, explain_stmts) = match &product {
            DatabaseProduct::Postgres => (
                QuotingStyle::SingleDollar,
                Some("EXPLAIN"),
                vec![
                    SqlOperation::Select,
                    SqlOperation::Insert,
                    SqlOperation::Update,
                    SqlOperation::Delete,
                ],
            ),
            DatabaseProduct::MySql => (
                QuotingStyle::SingleDouble,
                Some("EXPLAIN"),
                vec![SqlOperation::Select],
            ),
            DatabaseProduct::Sqlite => (
                QuotingStyle::SingleDouble,
                Some("EXPLAIN QUERY PLAN"),
                vec![
                    SqlOperation::Select,
                    SqlOperation::Insert,
                    SqlOperation::Update,
                    SqlOperation::Delete,
                ],
            ),
            DatabaseProduct::Oracle => (QuotingStyle::SingleBracket, None, Vec::new()),
            DatabaseProduct::SqlServer | DatabaseProduct::Other(_) => {
                (QuotingStyle::Single, None, Vec::new())
            }
        };

        Self {
            product,
            quoting_style,
            explain_query: explain_query.map(str::to_string),
            explain_stmts,
        }
    }

    /// Whether `operation` may be prefixed with this dialect's explain keyword.
    #[must_use]
    pub fn can_explain(&self, operation: Option<SqlOperation>) -> bool {
        match (&self.explain_query, operation) {
            (Some(_), Some(operation)) => self.explain_stmts.contains(&operation),
            _ => false,
        }
    }
}

impl Default for DatabaseDescriptor {
    fn default() -> Self {
        Self::for_product(DatabaseProduct::Other("Database".to_string()))
    }
}
