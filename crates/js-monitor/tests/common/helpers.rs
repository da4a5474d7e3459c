// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use js_monitor::{Monitor, PartialConfig};

use super::mocks::RecordingTransport;

pub const PROJECT_ID: &str = "test-app";
pub const REPORT_URL: &str = "https://collector.example.com/report";

/// A valid config with a flush interval long enough to never fire on its own.
pub fn partial_config() -> PartialConfig {
    PartialConfig {
        flush_interval_ms: Some(3_600_000),
        ..PartialConfig::new(PROJECT_ID, REPORT_URL)
    }
}

/// A configured, started monitor wired to a recording transport.
///
/// Must be called inside a tokio runtime.
pub fn started_monitor(partial: PartialConfig) -> (Monitor, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let monitor = Monitor::new().with_transport(transport.clone());
    assert!(monitor.configure(&partial), "test config must be valid");
    assert!(monitor.start());
    (monitor, transport)
}

/// Lets spawned tasks run until `condition` holds, for at most 100 short sleeps.
#[allow(dead_code)]
pub async fn settle(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}
