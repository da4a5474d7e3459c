// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;

use js_monitor::bootstrap::{log_level_from_env, monitor_from_env, DEFAULT_LOG_LEVEL};
use js_monitor::error::ConfigError;
use js_monitor::Config;
use serial_test::serial;

const VARS: [&str; 7] = [
    "JS_MONITOR_PID",
    "JS_MONITOR_REPORT_URL",
    "JS_MONITOR_SAMPLE_RATE",
    "JS_MONITOR_MAX_QUEUE_SIZE",
    "JS_MONITOR_FLUSH_INTERVAL_MS",
    "JS_MONITOR_ENABLED",
    "JS_MONITOR_LOG_LEVEL",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_config_from_env() {
    clear_env();
    env::set_var("JS_MONITOR_PID", "env-app");
    env::set_var("JS_MONITOR_REPORT_URL", "https://collector.example.com/report");
    env::set_var("JS_MONITOR_SAMPLE_RATE", "0.25");
    env::set_var("JS_MONITOR_MAX_QUEUE_SIZE", " 12 ");
    env::set_var("JS_MONITOR_FLUSH_INTERVAL_MS", "soon");

    let config = Config::from_env().expect("valid env config");
    assert!(config.enabled);
    assert_eq!(config.project_id, "env-app");
    assert!((config.sample_rate - 0.25).abs() < f64::EPSILON);
    assert_eq!(config.max_queue_size, 12);
    assert_eq!(
        config.flush_interval_ms,
        js_monitor::config::DEFAULT_FLUSH_INTERVAL_MS
    );
    clear_env();
}

#[test]
#[serial]
fn test_config_from_env_requires_project_id() {
    clear_env();
    env::set_var("JS_MONITOR_REPORT_URL", "https://collector.example.com/report");
    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::MissingProjectId)
    ));
    clear_env();
}

#[test]
#[serial]
fn test_config_from_env_rejects_out_of_range_rate() {
    clear_env();
    env::set_var("JS_MONITOR_PID", "env-app");
    env::set_var("JS_MONITOR_REPORT_URL", "https://collector.example.com/report");
    env::set_var("JS_MONITOR_SAMPLE_RATE", "1.5");
    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::InvalidField {
            field: "sample_rate",
            ..
        })
    ));
    clear_env();
}

#[test]
#[serial]
fn test_monitor_from_env_kill_switch() {
    clear_env();
    env::set_var("JS_MONITOR_PID", "env-app");
    env::set_var("JS_MONITOR_REPORT_URL", "https://collector.example.com/report");
    assert!(monitor_from_env().is_enabled());

    env::set_var("JS_MONITOR_ENABLED", "FALSE");
    let monitor = monitor_from_env();
    assert!(!monitor.is_enabled());
    assert_eq!(monitor.diagnostics().config_rejections, 0);
    clear_env();
}

#[test]
#[serial]
fn test_monitor_from_empty_env_is_dormant() {
    clear_env();
    let monitor = monitor_from_env();
    assert!(!monitor.is_enabled());
    assert!(!monitor.capture_event("ignored", serde_json::Value::Null));
}

#[test]
#[serial]
fn test_log_level_from_env() {
    clear_env();
    assert_eq!(log_level_from_env(), DEFAULT_LOG_LEVEL);
    env::set_var("JS_MONITOR_LOG_LEVEL", " DEBUG ");
    assert_eq!(log_level_from_env(), "debug");
    env::set_var("JS_MONITOR_LOG_LEVEL", "");
    assert_eq!(log_level_from_env(), DEFAULT_LOG_LEVEL);
    clear_env();
}
