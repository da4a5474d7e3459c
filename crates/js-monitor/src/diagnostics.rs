// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self-diagnostic counters.
//!
//! Faults inside the monitor are never raised into the host. They are counted
//! here instead, and the host may read a [`DiagnosticsSnapshot`] at any time.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Diagnostics {
    captured: AtomicU64,
    ignored: AtomicU64,
    sampled_out: AtomicU64,
    deduplicated: AtomicU64,
    overflow_dropped: AtomicU64,
    capture_faults: AtomicU64,
    config_rejections: AtomicU64,
    batches_sent: AtomicU64,
    events_sent: AtomicU64,
    delivery_failures: AtomicU64,
    beacon_fallbacks: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Events accepted by the filter and queued.
    pub captured: u64,
    pub ignored: u64,
    pub sampled_out: u64,
    pub deduplicated: u64,
    /// Events evicted from a full queue before they could be flushed.
    pub overflow_dropped: u64,
    pub capture_faults: u64,
    pub config_rejections: u64,
    pub batches_sent: u64,
    pub events_sent: u64,
    /// Batches dropped after exhausting every delivery attempt.
    pub delivery_failures: u64,
    /// Beacon sends that were refused and went through the retryable path.
    pub beacon_fallbacks: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl Diagnostics {
            $(
                pub fn $name(&self, n: u64) {
                    self.$field.fetch_add(n, Ordering::Relaxed);
                }
            )*

            #[must_use]
            pub fn snapshot(&self) -> DiagnosticsSnapshot {
                DiagnosticsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counter! {
    add_captured => captured,
    add_ignored => ignored,
    add_sampled_out => sampled_out,
    add_deduplicated => deduplicated,
    add_overflow_dropped => overflow_dropped,
    add_capture_faults => capture_faults,
    add_config_rejections => config_rejections,
    add_batches_sent => batches_sent,
    add_events_sent => events_sent,
    add_delivery_failures => delivery_failures,
    add_beacon_fallbacks => beacon_fallbacks,
}
