// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Auto-configuration from the embedding element or the environment.
//!
//! The loader script carries its configuration as data attributes:
//!
//! ```html
//! <script src="monitor.js" data-pid="my-app" data-report="https://collector.example.com/report"></script>
//! ```
//!
//! Both `pid` and `report` are required. Without them the monitor stays dormant.

use std::env;

use tracing::debug;

use crate::agent::Monitor;
use crate::config::PartialConfig;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Builds a partial config from element attributes.
///
/// Keys may be given with or without the `data-` prefix. Unknown keys and
/// unparsable optional values are skipped.
#[must_use]
pub fn from_script_attributes<I, K, V>(attributes: I) -> PartialConfig
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut partial = PartialConfig::default();
    for (key, value) in attributes {
        let key = key.as_ref();
        let value = value.as_ref().trim();
        match key.strip_prefix("data-").unwrap_or(key) {
            "pid" => partial.project_id = Some(value.to_string()),
            "report" => partial.report_url = Some(value.to_string()),
            "sample-rate" => partial.sample_rate = value.parse().ok(),
            "max-queue-size" => partial.max_queue_size = value.parse().ok(),
            "flush-interval" => partial.flush_interval_ms = value.parse().ok(),
            _ => {}
        }
    }
    if partial.project_id.is_none() || partial.report_url.is_none() {
        debug!("BOOTSTRAP | Script attributes lack pid or report, monitor stays dormant");
    }
    partial
}

/// A monitor configured from element attributes. Not started.
#[must_use]
pub fn monitor_from_script<I, K, V>(attributes: I) -> Monitor
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let monitor = Monitor::new();
    monitor.configure(&from_script_attributes(attributes));
    monitor
}

/// A monitor configured from `JS_MONITOR_*` environment variables. Not started.
#[must_use]
pub fn monitor_from_env() -> Monitor {
    let monitor = Monitor::new();
    monitor.configure(&PartialConfig::from_env());
    monitor
}

/// `JS_MONITOR_LOG_LEVEL`, or `info`.
#[must_use]
pub fn log_level_from_env() -> String {
    env::var("JS_MONITOR_LOG_LEVEL")
        .ok()
        .map(|level| level.trim().to_lowercase())
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}
