// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! SQL fingerprinting for slow-query reporting.
//!
//! Given raw SQL and a [`DatabaseDescriptor`], a [`QueryFingerprint`] yields an
//! obfuscated rendering that is safe to transmit, a normalized shape, a
//! stable identifier for grouping statements by shape, and the parsed
//! operation and target table. [`explain_plan`] fetches (and obfuscates)
//! execution plans through a bounded [`SqlConnections`] cache.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod database;
pub mod errors;
pub mod explain;
pub mod fingerprint;
pub mod normalize;
pub mod obfuscate;
pub mod parse;

pub use database::{DatabaseDescriptor, DatabaseProduct, QuotingStyle};
pub use errors::ExplainError;
pub use explain::{
    explain_plan, obfuscate_plan, ConnectParams, DatabaseClient, DatabaseConnection,
    ExplainPlan, ExplainRequest, PlanObfuscation, SqlConnections,
};
pub use fingerprint::{fingerprint_of, truncate_sql, QueryFingerprint, RecordSql};
pub use obfuscate::PLACEHOLDER;
pub use parse::SqlOperation;
