// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Execution-plan retrieval for slow statements.
//!
//! Plans are fetched through caller-supplied [`DatabaseClient`]s over a small
//! connection cache ([`SqlConnections`]) that lives for one harvest. Every
//! failure is logged at debug level and yields `None`: a missing plan never
//! affects the rest of the report.

use crate::database::DatabaseProduct;
use crate::errors::ExplainError;
use crate::fingerprint::{QueryFingerprint, RecordSql};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Arguments used to open a connection. Part of the pool key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConnectParams {
    pub args: Vec<String>,
    pub kwargs: BTreeMap<String, String>,
}

/// Columns and rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplainPlan {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// A database driver able to open connections for explain queries.
pub trait DatabaseClient: Send + Sync {
    /// Identity of the driver; part of the pool key.
    fn name(&self) -> &str;

    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DatabaseConnection>, ExplainError>;
}

pub trait DatabaseConnection: Send {
    fn execute(
        &mut self,
        query: &str,
        cursor_params: &[Value],
        parameters: &[Value],
    ) -> Result<ExplainPlan, ExplainError>;

    /// Rolls back anything the explain may have started and closes the connection.
    fn close(&mut self) -> Result<(), ExplainError>;
}

/// Everything captured alongside a slow statement to explain it later.
#[derive(Clone)]
pub struct ExplainRequest {
    pub client: Arc<dyn DatabaseClient>,
    pub connect_params: ConnectParams,
    pub cursor_params: Vec<Value>,
    pub sql_parameters: Vec<Value>,
    /// Overrides `sql_parameters` when present.
    pub execute_params: Option<Vec<Value>>,
}

impl fmt::Debug for ExplainRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplainRequest")
            .field("client", &self.client.name())
            .field("connect_params", &self.connect_params)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConnectionKey {
    client: String,
    params: ConnectParams,
}

/// Bounded cache of open connections, evicting the least recently used.
pub struct SqlConnections {
    maximum: usize,
    // Least recently used first.
    entries: Vec<(ConnectionKey, Box<dyn DatabaseConnection>)>,
}

impl SqlConnections {
    #[must_use]
    pub fn new(maximum: usize) -> Self {
        Self {
            maximum: maximum.max(1),
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a pooled connection for `client` and `params`, opening one if needed.
    pub fn connection(
        &mut self,
        client: &dyn DatabaseClient,
        params: &ConnectParams,
    ) -> Result<&mut dyn DatabaseConnection, ExplainError> {
        let key = ConnectionKey {
            client: client.name().to_string(),
            params: params.clone(),
        };

        if let Some(position) = self.entries.iter().position(|(k, _)| *k == key) {
            let entry = self.entries.remove(position);
            self.entries.push(entry);
        } else {
            if self.entries.len() >= self.maximum {
                let (evicted, mut connection) = self.entries.remove(0);
                debug!("Evicting explain connection for {}", evicted.client);
                if let Err(e) = connection.close() {
                    debug!("Failed to close evicted connection: {e}");
                }
            }
            let connection = client.connect(params)?;
            self.entries.push((key, connection));
        }

        match self.entries.last_mut() {
            Some((_, connection)) => Ok(connection.as_mut()),
            None => Err(ExplainError::Connect("connection cache is empty".to_string())),
        }
    }

    /// Closes every pooled connection.
    pub fn cleanup(&mut self) {
        for (key, mut connection) in self.entries.drain(..) {
            if let Err(e) = connection.close() {
                debug!("Failed to close explain connection for {}: {e}", key.client);
            }
        }
    }
}

impl Drop for SqlConnections {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// How much of a returned plan is blanked before it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanObfuscation {
    /// Cost estimates, sub-plan and init-plan references, parameters and numbers.
    #[default]
    Light,
    /// Everything `Light` blanks plus every quoted string.
    Strict,
}

impl std::str::FromStr for PlanObfuscation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" | "simple" => Ok(PlanObfuscation::Light),
            "strict" | "obfuscate" => Ok(PlanObfuscation::Strict),
            other => Err(format!("invalid explain plan obfuscation '{other}'")),
        }
    }
}

/// Whether `sql` holds more than one statement; a trailing separator is allowed.
fn has_multiple_statements(sql: &str) -> bool {
    sql.trim_end().trim_end_matches(';').contains(';')
}

/// Runs the dialect's explain query for `statement`.
#[must_use]
pub fn explain_plan(
    connections: &mut SqlConnections,
    statement: &QueryFingerprint,
    request: &ExplainRequest,
    record_sql: RecordSql,
    obfuscation: PlanObfuscation,
) -> Option<ExplainPlan> {
    if record_sql == RecordSql::Off {
        return None;
    }
    if has_multiple_statements(statement.raw()) {
        debug!("Not explaining multi-statement SQL");
        return None;
    }

    let database = statement.database();
    if !database.can_explain(statement.operation()) {
        return None;
    }
    let explain_query = database.explain_query.as_deref()?;
    let query = format!("{explain_query} {}", statement.raw());

    let connection = match connections.connection(request.client.as_ref(), &request.connect_params)
    {
        Ok(connection) => connection,
        Err(e) => {
            debug!("Unable to open connection for explain plan: {e}");
            return None;
        }
    };

    let parameters = request
        .execute_params
        .as_deref()
        .unwrap_or(&request.sql_parameters);
    let plan = match connection.execute(&query, &request.cursor_params, parameters) {
        Ok(plan) => plan,
        Err(e) => {
            debug!("Error fetching explain plan for {}: {e}", database.product);
            return None;
        }
    };

    if plan.columns.is_empty() && plan.rows.is_empty() {
        return None;
    }
    if record_sql == RecordSql::Raw {
        return Some(plan);
    }
    Some(obfuscate_plan(&database.product, plan, obfuscation))
}

/// Applies the dialect's plan post-processor, if it has one.
#[must_use]
pub fn obfuscate_plan(
    product: &DatabaseProduct,
    plan: ExplainPlan,
    obfuscation: PlanObfuscation,
) -> ExplainPlan {
    match product {
        DatabaseProduct::Postgres => obfuscate_postgres_plan(plan, obfuscation),
        _ => plan,
    }
}

lazy_static! {
    static ref PG_COST_REGEX: Regex =
        Regex::new(r"cost=[\d.]+\.\.[\d.]+ rows=\d+ width=\d+").expect("failed creating regex");
    static ref PG_ACTUAL_REGEX: Regex =
        Regex::new(r"actual time=[\d.]+\.\.[\d.]+ rows=\d+ loops=\d+")
            .expect("failed creating regex");
    static ref PG_SUBPLAN_REGEX: Regex =
        Regex::new(r"\b(SubPlan|InitPlan)\s+\d+").expect("failed creating regex");
    static ref PG_PARAM_REGEX: Regex = Regex::new(r"\$\d+").expect("failed creating regex");
    static ref PG_NUMERIC_REGEX: Regex =
        Regex::new(r"(^|[^\w$?.])[+-]?\d+(?:\.\d+)?(?:e[+-]?\d+)?").expect("failed creating regex");
    static ref PG_STRING_REGEX: Regex =
        Regex::new(r"'(?:[^']|'')*'").expect("failed creating regex");
}

fn obfuscate_postgres_plan(plan: ExplainPlan, obfuscation: PlanObfuscation) -> ExplainPlan {
    if plan.columns.len() != 1 || plan.columns[0] != "QUERY PLAN" {
        return plan;
    }

    let rows = plan
        .rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|value| match value {
                    Value::String(line) => Value::String(obfuscate_plan_line(&line, obfuscation)),
                    other => other,
                })
                .collect()
        })
        .collect();

    ExplainPlan {
        columns: plan.columns,
        rows,
    }
}

fn obfuscate_plan_line(line: &str, obfuscation: PlanObfuscation) -> String {
    let line = PG_COST_REGEX.replace_all(line, "cost=?..? rows=? width=?");
    let line = PG_ACTUAL_REGEX.replace_all(&line, "actual time=?..? rows=? loops=?");
    let line = PG_SUBPLAN_REGEX.replace_all(&line, "$1 ?");
    let line = PG_PARAM_REGEX.replace_all(&line, "$$?");
    let line = match obfuscation {
        PlanObfuscation::Strict => PG_STRING_REGEX.replace_all(&line, "?").into_owned(),
        PlanObfuscation::Light => line.into_owned(),
    };
    PG_NUMERIC_REGEX.replace_all(&line, "${1}?").into_owned()
}
