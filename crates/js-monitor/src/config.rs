// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! A [`Config`] is always complete: it starts from defaults and every
//! [`PartialConfig`] handed to [`ConfigStore::configure`] is merged over the
//! current value. The agent only becomes active when both the project id and
//! the report url are present and well formed; otherwise it stays dormant.

use std::env;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ConfigError;

pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 30;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 5_000;
pub const DEFAULT_MAX_FINGERPRINTS: usize = 100;
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 200;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
/// Browsers cap a single beacon payload at 64KiB.
pub const DEFAULT_MAX_BEACON_BYTES: usize = 64 * 1024;

const MAX_PROJECT_ID_LEN: usize = 128;

/// Validated agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: String,
    pub report_url: String,
    /// Fraction of distinct fingerprints that are kept, in (0, 1].
    pub sample_rate: f64,
    pub max_queue_size: usize,
    pub flush_interval_ms: u64,
    /// True only when `project_id` and `report_url` are valid.
    pub enabled: bool,
    pub dedup_window_ms: u64,
    /// Upper bound on fingerprints remembered by the dedup stage.
    pub max_fingerprints: usize,
    pub max_delivery_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub request_timeout_ms: u64,
    pub max_beacon_bytes: usize,
    /// Error and rejection messages matching any of these are never reported.
    pub ignore_errors: Vec<Regex>,
    /// Poll period for performance timings. `None` leaves collection to the host.
    pub performance_interval_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            report_url: String::new(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            enabled: false,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            max_fingerprints: DEFAULT_MAX_FINGERPRINTS,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            retry_backoff_base_ms: DEFAULT_RETRY_BACKOFF_BASE_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_beacon_bytes: DEFAULT_MAX_BEACON_BYTES,
            ignore_errors: Vec::new(),
            performance_interval_ms: None,
        }
    }
}

/// A configuration update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialConfig {
    #[serde(alias = "pid")]
    pub project_id: Option<String>,
    #[serde(alias = "report")]
    pub report_url: Option<String>,
    pub sample_rate: Option<f64>,
    pub max_queue_size: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    /// `Some(false)` keeps the agent dormant even with a valid config.
    pub enabled: Option<bool>,
    pub dedup_window_ms: Option<u64>,
    pub max_fingerprints: Option<usize>,
    pub max_delivery_attempts: Option<u32>,
    pub retry_backoff_base_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub max_beacon_bytes: Option<usize>,
    pub ignore_errors: Option<Vec<String>>,
    pub performance_interval_ms: Option<u64>,
}

impl PartialConfig {
    #[must_use]
    pub fn new(project_id: impl Into<String>, report_url: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            report_url: Some(report_url.into()),
            ..Default::default()
        }
    }

    /// Reads `JS_MONITOR_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            project_id: env::var("JS_MONITOR_PID").ok(),
            report_url: env::var("JS_MONITOR_REPORT_URL").ok(),
            sample_rate: env::var("JS_MONITOR_SAMPLE_RATE")
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok()),
            max_queue_size: env::var("JS_MONITOR_MAX_QUEUE_SIZE")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok()),
            flush_interval_ms: env::var("JS_MONITOR_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok()),
            enabled: env::var("JS_MONITOR_ENABLED")
                .ok()
                .map(|val| val.to_lowercase() != "false"),
            ..Default::default()
        }
    }
}

impl Config {
    /// Loads a config from `JS_MONITOR_*` environment variables.
    ///
    /// Fails when any variable is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let (config, errors) = Self::default().merge(&PartialConfig::from_env());
        match errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(config),
        }
    }

    /// Merges `partial` over `self`.
    ///
    /// Returns the merged config and every problem found. Invalid optional
    /// fields keep their previous value. An invalid project id or report url
    /// leaves the result dormant.
    #[must_use]
    pub fn merge(&self, partial: &PartialConfig) -> (Config, Vec<ConfigError>) {
        let mut next = self.clone();
        let mut errors = Vec::new();

        if let Some(project_id) = &partial.project_id {
            next.project_id = project_id.trim().to_string();
        }
        if let Some(report_url) = &partial.report_url {
            next.report_url = report_url.trim().to_string();
        }

        if let Some(rate) = partial.sample_rate {
            if rate > 0.0 && rate <= 1.0 {
                next.sample_rate = rate;
            } else {
                errors.push(ConfigError::InvalidField {
                    field: "sample_rate",
                    reason: format!("{rate} is outside (0, 1]"),
                });
            }
        }
        merge_positive(
            &mut next.max_queue_size,
            partial.max_queue_size,
            "max_queue_size",
            &mut errors,
        );
        merge_positive(
            &mut next.flush_interval_ms,
            partial.flush_interval_ms,
            "flush_interval_ms",
            &mut errors,
        );
        merge_positive(
            &mut next.max_fingerprints,
            partial.max_fingerprints,
            "max_fingerprints",
            &mut errors,
        );
        merge_positive(
            &mut next.max_delivery_attempts,
            partial.max_delivery_attempts,
            "max_delivery_attempts",
            &mut errors,
        );
        merge_positive(
            &mut next.request_timeout_ms,
            partial.request_timeout_ms,
            "request_timeout_ms",
            &mut errors,
        );
        merge_positive(
            &mut next.max_beacon_bytes,
            partial.max_beacon_bytes,
            "max_beacon_bytes",
            &mut errors,
        );
        merge_positive(
            &mut next.performance_interval_ms,
            partial.performance_interval_ms.map(Some),
            "performance_interval_ms",
            &mut errors,
        );
        if let Some(window) = partial.dedup_window_ms {
            next.dedup_window_ms = window;
        }
        if let Some(base) = partial.retry_backoff_base_ms {
            next.retry_backoff_base_ms = base;
        }
        if let Some(patterns) = &partial.ignore_errors {
            match compile_patterns(patterns) {
                Ok(compiled) => next.ignore_errors = compiled,
                Err(error) => errors.push(error),
            }
        }

        let identity = validate_project_id(&next.project_id)
            .and_then(|()| validate_report_url(&next.report_url));
        if let Err(error) = &identity {
            errors.insert(0, error.clone());
        }
        let kill_switch = partial.enabled == Some(false)
            || (partial.enabled.is_none() && self.is_kill_switched());
        next.enabled = identity.is_ok() && !kill_switch;

        (next, errors)
    }

    // A previously valid config that is disabled was switched off explicitly.
    fn is_kill_switched(&self) -> bool {
        !self.enabled
            && validate_project_id(&self.project_id).is_ok()
            && validate_report_url(&self.report_url).is_ok()
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

trait Positive {
    fn is_positive(&self) -> bool;
}

impl Positive for usize {
    fn is_positive(&self) -> bool {
        *self > 0
    }
}

impl Positive for u64 {
    fn is_positive(&self) -> bool {
        *self > 0
    }
}

impl Positive for u32 {
    fn is_positive(&self) -> bool {
        *self > 0
    }
}

impl<T: Positive> Positive for Option<T> {
    fn is_positive(&self) -> bool {
        self.as_ref().map_or(true, Positive::is_positive)
    }
}

fn merge_positive<T: Positive + std::fmt::Debug>(
    slot: &mut T,
    value: Option<T>,
    field: &'static str,
    errors: &mut Vec<ConfigError>,
) {
    let Some(value) = value else {
        return;
    };
    if value.is_positive() {
        *slot = value;
    } else {
        errors.push(ConfigError::InvalidField {
            field,
            reason: format!("{value:?} must be greater than 0"),
        });
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidField {
                field: "ignore_errors",
                reason: e.to_string(),
            })
        })
        .collect()
}

/// A project id is 1 to 128 ASCII alphanumerics, `-`, `_` or `.`.
pub fn validate_project_id(project_id: &str) -> Result<(), ConfigError> {
    if project_id.is_empty() {
        return Err(ConfigError::MissingProjectId);
    }
    let valid_chars = project_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if project_id.len() > MAX_PROJECT_ID_LEN || !valid_chars {
        return Err(ConfigError::InvalidProjectId(project_id.to_string()));
    }
    Ok(())
}

/// The report url must be an absolute http(s) url with a host.
pub fn validate_report_url(report_url: &str) -> Result<(), ConfigError> {
    if report_url.is_empty() {
        return Err(ConfigError::MissingReportUrl);
    }
    let invalid = |reason: &str| ConfigError::InvalidReportUrl {
        url: report_url.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(report_url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(())
}

/// Holds the current [`Config`] behind cheap snapshot reads.
///
/// Every capture path checks [`ConfigStore::is_enabled`] first, so reads only
/// clone an `Arc`.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<Arc<Config>>,
}

impl ConfigStore {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn get(&self) -> Arc<Config> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.get().enabled
    }

    /// Merges `partial` over the current config and stores the result.
    ///
    /// Returns the new snapshot along with every rejected field.
    pub fn configure(&self, partial: &PartialConfig) -> (Arc<Config>, Vec<ConfigError>) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (next, errors) = guard.merge(partial);
        for error in &errors {
            warn!("CONFIG | {error}");
        }
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        debug!(
            "CONFIG | project={} enabled={} sample_rate={} max_queue_size={} flush_interval_ms={}",
            next.project_id,
            next.enabled,
            next.sample_rate,
            next.max_queue_size,
            next.flush_interval_ms
        );
        (next, errors)
    }
}
