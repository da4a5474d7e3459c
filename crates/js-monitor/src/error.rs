// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the monitor.
//!
//! None of these errors ever reach the host application. They are logged,
//! counted in [`crate::diagnostics::Diagnostics`], and otherwise swallowed.

use reqwest::StatusCode;

/// Invalid or missing configuration. The agent stays dormant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("project id is missing")]
    MissingProjectId,

    #[error("invalid project id '{0}'")]
    InvalidProjectId(String),

    #[error("report url is missing")]
    MissingReportUrl,

    #[error("invalid report url '{url}': {reason}")]
    InvalidReportUrl { url: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// A capture source failed internally while translating a host signal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureFault {
    #[error("capture source '{source_name}' panicked: {message}")]
    Panicked {
        source_name: &'static str,
        message: String,
    },
}

/// A batch could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("collector answered with status {0}")]
    Status(StatusCode),

    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryFailure {
    /// Whether another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Serialize(_) | Self::Cancelled)
    }
}

/// The global log subscriber could not be installed.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("invalid log level: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to install log subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}
