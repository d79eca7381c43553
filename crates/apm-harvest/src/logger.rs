// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for agent output.
//!
//! Every line is prefixed with `APM_AGENT` so agent logs can be told apart
//! from the host application's own output:
//!
//! ```text
//! APM_AGENT | INFO | Reporting to collector for application "checkout"
//! APM_AGENT | DEBUG | harvest{count=3}: Completed harvest in 0.02 seconds
//! ```

use crate::errors::ConfigError;
use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Formats events as `APM_AGENT | LEVEL | [spans: ]message fields`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "APM_AGENT | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global subscriber writing agent logs to stdout.
///
/// `level` is an [`EnvFilter`] directive such as `info` or
/// `apm_harvest=debug,sql_fingerprint=trace`.
pub fn init_logging(level: &str) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| ConfigError::InvalidConfig(format!("invalid log filter '{level}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(Formatter)
        .try_init()
        .map_err(|e| ConfigError::InvalidConfig(format!("logging already initialized: {e}")))
}
