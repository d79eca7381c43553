// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Memoized per-statement fingerprints and their process-wide weak cache.

use crate::database::DatabaseDescriptor;
use crate::normalize::{identifier, normalize};
use crate::obfuscate::{obfuscate, uncomment};
use crate::parse::{parse_operation, parse_target, SqlOperation};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tracing::trace;

/// Dead entries are swept once the cache grows past this many keys.
const CACHE_SWEEP_THRESHOLD: usize = 1024;

/// How SQL text may leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSql {
    /// Never transmit SQL text.
    Off,
    /// Transmit the statement verbatim.
    Raw,
    /// Transmit the statement with every literal replaced.
    #[default]
    Obfuscated,
}

impl std::str::FromStr for RecordSql {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(RecordSql::Off),
            "raw" => Ok(RecordSql::Raw),
            "obfuscated" => Ok(RecordSql::Obfuscated),
            other => Err(format!("invalid record_sql mode '{other}'")),
        }
    }
}

/// A statement together with lazily computed, memoized derived forms.
#[derive(Debug)]
pub struct QueryFingerprint {
    raw: String,
    database: DatabaseDescriptor,
    uncommented: OnceLock<String>,
    obfuscated: OnceLock<String>,
    normalized: OnceLock<String>,
    identifier: OnceLock<String>,
    operation: OnceLock<Option<SqlOperation>>,
    target: OnceLock<String>,
}

impl QueryFingerprint {
    /// Builds an uncached fingerprint. Prefer [`fingerprint_of`].
    #[must_use]
    pub fn new(sql: impl Into<String>, database: DatabaseDescriptor) -> Self {
        Self {
            raw: sql.into(),
            database,
            uncommented: OnceLock::new(),
            obfuscated: OnceLock::new(),
            normalized: OnceLock::new(),
            identifier: OnceLock::new(),
            operation: OnceLock::new(),
            target: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn database(&self) -> &DatabaseDescriptor {
        &self.database
    }

    pub fn uncommented(&self) -> &str {
        self.uncommented.get_or_init(|| uncomment(&self.raw))
    }

    pub fn obfuscated(&self) -> &str {
        self.obfuscated
            .get_or_init(|| obfuscate(self.uncommented(), self.database.quoting_style))
    }

    pub fn normalized(&self) -> &str {
        self.normalized.get_or_init(|| normalize(self.obfuscated()))
    }

    /// Hash of [`Self::normalized`]; equal shapes share an identifier.
    pub fn identifier(&self) -> &str {
        self.identifier.get_or_init(|| identifier(self.normalized()))
    }

    pub fn operation(&self) -> Option<SqlOperation> {
        *self
            .operation
            .get_or_init(|| parse_operation(self.uncommented()))
    }

    pub fn target(&self) -> &str {
        self.target
            .get_or_init(|| parse_target(self.uncommented(), self.operation()))
    }

    /// This statement cut to at most `maximum` bytes. Statements within the
    /// limit are returned as is; longer ones are fingerprinted anew from the
    /// shortened text.
    #[must_use]
    pub fn truncated(self: &Arc<Self>, maximum: usize) -> Arc<QueryFingerprint> {
        if self.raw.len() <= maximum {
            return Arc::clone(self);
        }
        fingerprint_of(truncate_sql(&self.raw, maximum), &self.database)
    }

    /// SQL text suitable for reporting under `mode`.
    pub fn formatted(&self, mode: RecordSql) -> &str {
        match mode {
            RecordSql::Off => "",
            RecordSql::Raw => &self.raw,
            RecordSql::Obfuscated => self.obfuscated(),
        }
    }
}

/// Longest prefix of `sql` of at most `maximum` bytes that ends on a
/// character boundary.
#[must_use]
pub fn truncate_sql(sql: &str, maximum: usize) -> &str {
    if sql.len() <= maximum {
        return sql;
    }
    let mut end = maximum;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

type CacheKey = (String, DatabaseDescriptor);

lazy_static! {
    static ref FINGERPRINT_CACHE: Mutex<HashMap<CacheKey, Weak<QueryFingerprint>>> =
        Mutex::new(HashMap::new());
}

/// Returns the shared fingerprint for `sql` on `database`.
///
/// The cache holds only weak references: an entry lives as long as some
/// caller keeps the returned `Arc`, so repeated queries share one instance
/// while memory stays bounded by what is actually in use.
#[must_use]
pub fn fingerprint_of(sql: &str, database: &DatabaseDescriptor) -> Arc<QueryFingerprint> {
    #[allow(clippy::expect_used)]
    let mut cache = FINGERPRINT_CACHE.lock().expect("lock poisoned");

    let key = (sql.to_string(), database.clone());
    if let Some(existing) = cache.get(&key).and_then(Weak::upgrade) {
        return existing;
    }

    if cache.len() >= CACHE_SWEEP_THRESHOLD {
        let before = cache.len();
        cache.retain(|_, entry| entry.strong_count() > 0);
        trace!("Swept {} dead fingerprint cache entries", before - cache.len());
    }

    let fingerprint = Arc::new(QueryFingerprint::new(sql, database.clone()));
    cache.insert(key, Arc::downgrade(&fingerprint));
    fingerprint
}

#[cfg(test)]
pub(crate) fn cached_entries() -> usize {
    #[allow(clippy::expect_used)]
    let cache = FINGERPRINT_CACHE.lock().expect("lock poisoned");
    cache.len()
}
