// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for the monitor.
//!
//! Every line is prefixed with `JS_MONITOR` so monitor output can be told apart
//! from the host's own logs:
//!
//! ```text
//! JS_MONITOR | WARN | CONFIG | invalid report url 'ftp://x': unsupported scheme
//! JS_MONITOR | DEBUG | flush{batch=3}: QUEUE | Flushing batch 3 (2 events) via Beacon
//! ```

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::error::LoggerError;

/// Formats events as `JS_MONITOR | LEVEL | [spans: ]message fields`.
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
        write!(&mut writer, "JS_MONITOR | {} | ", metadata.level())?;

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

/// Filter directive for `level`, with the HTTP stack silenced.
#[must_use]
pub fn env_filter_directive(level: &str) -> String {
    format!("h2=off,hyper=off,rustls=off,reqwest=off,{level}")
}

/// Installs a global subscriber writing to stderr at `level`
/// (for example `"info"` or `"js_monitor=debug"`).
///
/// Fails if the level does not parse or a global subscriber is already set.
pub fn init(level: &str) -> Result<(), LoggerError> {
    let filter = EnvFilter::try_new(env_filter_directive(level))?;
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
