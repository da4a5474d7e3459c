// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Performance timing capture.
//!
//! Raw timing entries come from an injectable [`TimingReader`]. Each supported
//! entry is normalized into a `PerformanceMark` event and reported at most
//! once. The source remembers which entries of the latest read were already
//! ingested. Entries the host evicts from its timeline are forgotten with it,
//! so memory follows the size of the host's buffer.
//!
//! Navigation entries are held back until the load event has ended, so their
//! phase metrics are complete when reported.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fnv::{FnvBuildHasher, FnvHashSet};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{guard, CaptureSource, EventSink};
use crate::config::Config;
use crate::event::{Event, Fingerprint, PerformancePayload};

const NAME: &str = "performance";

const SUPPORTED_ENTRY_TYPES: [&str; 5] = ["navigation", "resource", "paint", "mark", "measure"];

/// Source of raw performance entries, typically the host's performance timeline.
pub trait TimingReader: Send + Sync {
    /// Every entry currently buffered by the host, already reported or not.
    fn entries(&self) -> Vec<TimingEntry>;
}

/// Timestamps of a navigation entry, in milliseconds since the time origin.
/// A zero means the phase has not happened yet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NavigationTiming {
    pub domain_lookup_start: f64,
    pub domain_lookup_end: f64,
    pub connect_start: f64,
    pub connect_end: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub response_end: f64,
    pub dom_interactive: f64,
    pub dom_complete: f64,
    pub load_event_end: f64,
}

/// One raw entry as exposed by the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingEntry {
    pub entry_type: String,
    pub name: String,
    pub start_time: f64,
    pub duration: f64,
    pub initiator_type: Option<String>,
    pub transfer_size: Option<u64>,
    /// Present on navigation entries only.
    pub navigation: Option<NavigationTiming>,
}

impl TimingEntry {
    #[must_use]
    pub fn new(entry_type: impl Into<String>, name: impl Into<String>, start_time: f64, duration: f64) -> Self {
        Self {
            entry_type: entry_type.into(),
            name: name.into(),
            start_time,
            duration,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceTrigger {
    /// Poll the reader on a timer while registered.
    Interval(Duration),
    /// Only collect when the host calls [`PerformanceSource::collect`].
    OnDemand,
}

impl PerformanceTrigger {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        match config.performance_interval_ms {
            Some(ms) if ms > 0 => Self::Interval(Duration::from_millis(ms)),
            _ => Self::OnDemand,
        }
    }
}

/// Converts a raw entry, or returns `None` for unsupported or incomplete ones.
#[must_use]
pub fn normalize(entry: &TimingEntry) -> Option<PerformancePayload> {
    if !SUPPORTED_ENTRY_TYPES.contains(&entry.entry_type.as_str()) {
        return None;
    }
    if !entry.start_time.is_finite() || !entry.duration.is_finite() {
        return None;
    }

    let mut metrics = BTreeMap::new();
    if entry.entry_type == "navigation" {
        let timing = entry.navigation.unwrap_or_default();
        if timing.load_event_end <= 0.0 {
            return None;
        }
        let origin = entry.start_time;
        let phases = [
            ("dns", timing.domain_lookup_start, timing.domain_lookup_end),
            ("tcp", timing.connect_start, timing.connect_end),
            ("ttfb", timing.request_start, timing.response_start),
            ("response", timing.response_start, timing.response_end),
            ("dom_interactive", origin, timing.dom_interactive),
            ("dom_complete", origin, timing.dom_complete),
            ("load", origin, timing.load_event_end),
        ];
        for (metric, start, end) in phases {
            if end > 0.0 && end >= start {
                metrics.insert(metric.to_string(), round(end - start));
            }
        }
    }

    Some(PerformancePayload {
        entry_type: entry.entry_type.clone(),
        name: entry.name.clone(),
        start_time: round(entry.start_time),
        duration: round(entry.duration),
        initiator_type: entry.initiator_type.clone(),
        transfer_size: entry.transfer_size,
        metrics,
    })
}

/// Rounds to microsecond precision.
fn round(ms: f64) -> f64 {
    (ms * 1_000.0).round() / 1_000.0
}

struct Collector {
    reader: Arc<dyn TimingReader>,
    /// Fingerprints ingested and still present in the latest read.
    reported: Mutex<FnvHashSet<Fingerprint>>,
}

impl Collector {
    fn collect(&self, sink: &EventSink) -> usize {
        let Some(entries) = guard(NAME, sink.diagnostics(), || self.reader.entries()) else {
            return 0;
        };
        let mut reported = self.reported.lock().unwrap_or_else(PoisonError::into_inner);
        let mut live = FnvHashSet::with_capacity_and_hasher(reported.len(), FnvBuildHasher::default());
        let mut ingested = 0;
        for entry in &entries {
            let Some(Some(payload)) = guard(NAME, sink.diagnostics(), || normalize(entry)) else {
                continue;
            };
            let event = Event::performance(payload);
            let fingerprint = event.fingerprint();
            if reported.contains(&fingerprint) || live.contains(&fingerprint) {
                live.insert(fingerprint);
                continue;
            }
            // Not marked while the sink refuses it, so the next read retries.
            if sink.ingest(event) {
                live.insert(fingerprint);
                ingested += 1;
            }
        }
        *reported = live;
        ingested
    }
}

/// Captures navigation, resource, paint, mark and measure timings.
pub struct PerformanceSource {
    collector: Arc<Collector>,
    trigger: PerformanceTrigger,
    sink: Option<EventSink>,
    poller: Option<CancellationToken>,
}

impl PerformanceSource {
    #[must_use]
    pub fn new(reader: Arc<dyn TimingReader>, trigger: PerformanceTrigger) -> Self {
        Self {
            collector: Arc::new(Collector {
                reader,
                reported: Mutex::new(FnvHashSet::default()),
            }),
            trigger,
            sink: None,
            poller: None,
        }
    }

    #[must_use]
    pub fn trigger(&self) -> PerformanceTrigger {
        self.trigger
    }

    /// Switches to `trigger`, restarting the poller if the source is registered.
    pub fn set_trigger(&mut self, trigger: PerformanceTrigger) {
        if trigger == self.trigger {
            return;
        }
        debug!("PERFORMANCE | Trigger changed to {trigger:?}");
        self.trigger = trigger;
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        if let (PerformanceTrigger::Interval(period), Some(sink)) = (trigger, self.sink.clone()) {
            self.spawn_poller(period, sink);
        }
    }

    /// Reads the timeline now and reports entries not seen before.
    ///
    /// Returns how many events were ingested. Does nothing while unregistered.
    pub fn collect(&self) -> usize {
        match &self.sink {
            Some(sink) => self.collector.collect(sink),
            None => 0,
        }
    }

    fn spawn_poller(&mut self, period: Duration, sink: EventSink) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("PERFORMANCE | No runtime available, timings are only collected on demand");
            return;
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let collector = Arc::clone(&self.collector);
        runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let ingested = collector.collect(&sink);
                        if ingested > 0 {
                            debug!("PERFORMANCE | Collected {ingested} timing entries");
                        }
                    }
                    () = token.cancelled() => break,
                }
            }
        });
        self.poller = Some(cancel);
    }
}

impl CaptureSource for PerformanceSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn register(&mut self, sink: EventSink) {
        if self.sink.is_some() {
            return;
        }
        if let PerformanceTrigger::Interval(period) = self.trigger {
            self.spawn_poller(period, sink.clone());
        }
        self.sink = Some(sink);
    }

    fn unregister(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        self.sink = None;
    }
}

impl Drop for PerformanceSource {
    fn drop(&mut self) {
        self.unregister();
    }
}
