// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ignore rules, sampling and time-window deduplication.
//!
//! Events are checked in this order:
//! 1. **Ignore rules**: error and rejection messages matching a configured
//!    pattern are dropped.
//! 2. **Sampling**: decided once per fingerprint and remembered, so a
//!    sampled-out error type stays sampled out instead of flapping.
//! 3. **Dedup**: an event is dropped if the same fingerprint was accepted less
//!    than `dedup_window_ms` before it.
//!
//! The set of tracked fingerprints is bounded. When it is full the least
//! recently accepted fingerprint is evicted first.

use std::collections::VecDeque;

use fnv::FnvHashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use tracing::trace;

use crate::config::Config;
use crate::event::{Event, Fingerprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Ignored,
    SampledOut,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tracked {
    last_accepted: Option<u64>,
    /// `None` until the first event under the current sample rate.
    sampled_in: Option<bool>,
}

#[derive(Debug)]
pub struct DedupFilter {
    window_ms: u64,
    max_fingerprints: usize,
    sample_rate: f64,
    ignore: Vec<Regex>,
    tracked: FnvHashMap<Fingerprint, Tracked>,
    /// Least recently touched at the front.
    order: VecDeque<Fingerprint>,
    rng: StdRng,
}

impl DedupFilter {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic sampling decisions, for tests.
    #[must_use]
    pub fn with_seed(config: &Config, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &Config, rng: StdRng) -> Self {
        Self {
            window_ms: config.dedup_window_ms,
            max_fingerprints: config.max_fingerprints.max(1),
            sample_rate: config.sample_rate,
            ignore: config.ignore_errors.clone(),
            tracked: FnvHashMap::default(),
            order: VecDeque::new(),
            rng,
        }
    }

    /// Applies a new configuration without forgetting dedup state.
    ///
    /// A changed sample rate invalidates every cached sampling decision.
    #[allow(clippy::float_cmp)]
    pub fn reconfigure(&mut self, config: &Config) {
        self.window_ms = config.dedup_window_ms;
        self.ignore = config.ignore_errors.clone();
        if self.sample_rate != config.sample_rate {
            self.sample_rate = config.sample_rate;
            for tracked in self.tracked.values_mut() {
                tracked.sampled_in = None;
            }
        }
        self.max_fingerprints = config.max_fingerprints.max(1);
        self.evict_overflow();
    }

    pub fn check(&mut self, event: &Event) -> Verdict {
        if let Some(message) = event.payload().message() {
            if self.ignore.iter().any(|pattern| pattern.is_match(message)) {
                return Verdict::Ignored;
            }
        }

        let fingerprint = event.fingerprint();
        let mut tracked = self.tracked.get(&fingerprint).copied().unwrap_or_default();

        let sampled_in = match tracked.sampled_in {
            Some(decision) => decision,
            None => {
                let decision = self.sample_rate >= 1.0 || self.rng.gen::<f64>() < self.sample_rate;
                tracked.sampled_in = Some(decision);
                decision
            }
        };
        if !sampled_in {
            self.store(fingerprint, tracked);
            return Verdict::SampledOut;
        }

        if let Some(last) = tracked.last_accepted {
            if event.timestamp().saturating_sub(last) < self.window_ms {
                trace!("FILTER | duplicate {fingerprint} within {}ms", self.window_ms);
                return Verdict::Duplicate;
            }
        }

        tracked.last_accepted = Some(event.timestamp());
        self.store(fingerprint, tracked);
        Verdict::Accept
    }

    #[must_use]
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    fn store(&mut self, fingerprint: Fingerprint, tracked: Tracked) {
        if self.tracked.insert(fingerprint, tracked).is_some() {
            if let Some(pos) = self.order.iter().position(|fp| *fp == fingerprint) {
                self.order.remove(pos);
            }
        }
        self.order.push_back(fingerprint);
        self.evict_overflow();
    }

    fn evict_overflow(&mut self) {
        while self.order.len() > self.max_fingerprints {
            if let Some(oldest) = self.order.pop_front() {
                self.tracked.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::PartialConfig;
    use crate::event::{ErrorPayload, Payload};

    fn config(partial: PartialConfig) -> Config {
        let (config, errors) = Config::default().merge(&PartialConfig {
            project_id: Some("app".to_string()),
            report_url: Some("https://c.example.com".to_string()),
            ..partial
        });
        assert!(errors.is_empty(), "{errors:?}");
        config
    }

    fn error_at(message: &str, timestamp: u64) -> Event {
        Event::at(Payload::Error(ErrorPayload::new(message)), timestamp)
    }

    #[test]
    fn test_duplicate_within_window_is_dropped() {
        let mut filter = DedupFilter::new(&config(PartialConfig {
            dedup_window_ms: Some(5_000),
            ..Default::default()
        }));
        assert_eq!(filter.check(&error_at("boom", 10_000)), Verdict::Accept);
        assert_eq!(filter.check(&error_at("boom", 12_000)), Verdict::Duplicate);
        assert_eq!(filter.check(&error_at("other", 12_000)), Verdict::Accept);
    }

    #[test]
    fn test_window_measured_from_last_accepted() {
        let mut filter = DedupFilter::new(&config(PartialConfig {
            dedup_window_ms: Some(5_000),
            ..Default::default()
        }));
        assert_eq!(filter.check(&error_at("boom", 0)), Verdict::Accept);
        assert_eq!(filter.check(&error_at("boom", 4_999)), Verdict::Duplicate);
        // The duplicate did not extend the window.
        assert_eq!(filter.check(&error_at("boom", 5_000)), Verdict::Accept);
    }

    #[test]
    fn test_zero_window_disables_dedup() {
        let mut filter = DedupFilter::new(&config(PartialConfig {
            dedup_window_ms: Some(0),
            ..Default::default()
        }));
        assert_eq!(filter.check(&error_at("boom", 1)), Verdict::Accept);
        assert_eq!(filter.check(&error_at("boom", 1)), Verdict::Accept);
    }

    #[test]
    fn test_ignore_rules() {
        let mut filter = DedupFilter::new(&config(PartialConfig {
            ignore_errors: Some(vec!["^Script error".to_string()]),
            ..Default::default()
        }));
        assert_eq!(
            filter.check(&error_at("Script error.", 0)),
            Verdict::Ignored
        );
        assert_eq!(filter.check(&error_at("Real error", 0)), Verdict::Accept);
        assert_eq!(
            filter.check(&Event::custom("Script error", serde_json::Value::Null)),
            Verdict::Accept
        );
    }

    #[test]
    fn test_sampling_is_sticky_per_fingerprint() {
        let mut filter = DedupFilter::with_seed(
            &config(PartialConfig {
                sample_rate: Some(0.5),
                dedup_window_ms: Some(0),
                ..Default::default()
            }),
            7,
        );
        for i in 0..50 {
            let message = format!("error {i}");
            let first = filter.check(&error_at(&message, 0));
            for t in 1..5 {
                assert_eq!(filter.check(&error_at(&message, t)), first, "{message}");
            }
        }
    }

    #[test]
    fn test_sampling_rate_is_roughly_respected() {
        let mut filter = DedupFilter::with_seed(
            &config(PartialConfig {
                sample_rate: Some(0.25),
                max_fingerprints: Some(10_000),
                ..Default::default()
            }),
            42,
        );
        let accepted = (0..2_000)
            .filter(|i| filter.check(&error_at(&format!("e{i}"), 0)) == Verdict::Accept)
            .count();
        assert!((350..650).contains(&accepted), "accepted {accepted}");
    }

    #[test]
    fn test_tracking_is_bounded_and_evicts_oldest() {
        let mut filter = DedupFilter::new(&config(PartialConfig {
            max_fingerprints: Some(2),
            ..Default::default()
        }));
        assert_eq!(filter.check(&error_at("a", 0)), Verdict::Accept);
        assert_eq!(filter.check(&error_at("b", 0)), Verdict::Accept);
        assert_eq!(filter.check(&error_at("c", 0)), Verdict::Accept);
        assert_eq!(filter.tracked_len(), 2);

        // "a" was evicted, so it is accepted again; "c" is still remembered.
        assert_eq!(filter.check(&error_at("a", 1)), Verdict::Accept);
        assert_eq!(filter.check(&error_at("c", 1)), Verdict::Duplicate);
    }

    #[test]
    fn test_reconfigure_shrinks_and_resamples() {
        let mut filter = DedupFilter::with_seed(
            &config(PartialConfig {
                sample_rate: Some(0.0001),
                ..Default::default()
            }),
            1,
        );
        for i in 0..10 {
            filter.check(&error_at(&format!("e{i}"), 0));
        }
        assert_eq!(filter.tracked_len(), 10);

        filter.reconfigure(&config(PartialConfig {
            sample_rate: Some(1.0),
            max_fingerprints: Some(4),
            ..Default::default()
        }));
        assert_eq!(filter.tracked_len(), 4);
        assert_eq!(filter.check(&error_at("e9", 60_000)), Verdict::Accept);
    }
}
