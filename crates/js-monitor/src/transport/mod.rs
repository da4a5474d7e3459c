// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch delivery.
//!
//! Two primitives are exposed by a [`Transport`]:
//!
//! - **Beacon**: fire-and-forget. The call returns as soon as the send is
//!   queued and the outcome is never observed. This is the only path that
//!   survives page teardown.
//! - **Request**: one awaited POST whose status is checked.
//!
//! The [`Dispatcher`] picks between them using an explicit [`DeliveryMode`]
//! and owns the retry loop for the request path.

pub mod http;
pub mod payload;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::error::DeliveryFailure;
use crate::event::Batch;

pub use http::HttpTransport;

/// Delivery primitives. Both read the endpoint, size limits and timeouts from
/// the config snapshot they are given, so a reconfiguration applies to the
/// next send.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Queues `body` for best-effort delivery. `false` means the send was refused.
    fn send_beacon(&self, config: &Config, body: Vec<u8>) -> bool;

    /// Sends `body` once and waits for a success status.
    async fn send_request(&self, config: &Config, body: Vec<u8>) -> Result<(), DeliveryFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Best-effort beacon, falling back to the retryable path when refused.
    /// Mandatory for flushes triggered by page teardown.
    Beacon,
    /// Awaited request with retries.
    Confirmed,
}

/// A batch in flight on the retryable path.
#[derive(Debug)]
pub struct DeliveryAttempt {
    pub batch: Batch,
    pub attempt_count: u32,
    pub last_error: Option<DeliveryFailure>,
}

impl DeliveryAttempt {
    #[must_use]
    pub fn new(batch: Batch) -> Self {
        Self {
            batch,
            attempt_count: 0,
            last_error: None,
        }
    }
}

/// Backoff before attempt `attempt + 1`, after `attempt` failures.
#[must_use]
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(1_u64 << exponent))
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    diagnostics: Arc<Diagnostics>,
    cancel: CancellationToken,
    runtime: Handle,
}

impl Dispatcher {
    /// Fallback deliveries are spawned on `runtime`, so the dispatcher may be
    /// driven from threads outside it.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        diagnostics: Arc<Diagnostics>,
        cancel: CancellationToken,
        runtime: Handle,
    ) -> Self {
        Self {
            transport,
            diagnostics,
            cancel,
            runtime,
        }
    }

    /// Offers `batch` to the beacon primitive once, without any fallback.
    ///
    /// Returns `false` only when the transport refused the beacon. A batch
    /// that cannot be serialized is dropped and counted.
    pub fn try_beacon(&self, batch: &Batch, config: &Config) -> bool {
        if batch.is_empty() {
            return true;
        }
        let body = match payload::encode(batch) {
            Ok(body) => body,
            Err(e) => {
                self.drop_batch(batch, &DeliveryFailure::from(e));
                return true;
            }
        };

        let _runtime = self.runtime.enter();
        if !self.transport.send_beacon(config, body) {
            return false;
        }
        debug!(
            "TRANSPORT | Beacon queued for batch {} ({} events)",
            batch.sequence,
            batch.len()
        );
        self.record_sent(batch);
        true
    }

    /// Hands `batch` to the beacon primitive without awaiting anything.
    ///
    /// If the beacon is refused the batch moves to the retryable path on a
    /// spawned task. Returns whether the beacon accepted the batch.
    pub fn send_beacon(&self, batch: Batch, config: &Arc<Config>) -> bool {
        if self.try_beacon(&batch, config) {
            return true;
        }
        warn!(
            "TRANSPORT | Beacon refused for batch {}, falling back to request",
            batch.sequence
        );
        self.diagnostics.add_beacon_fallbacks(1);
        self.spawn_confirmed(batch, Arc::clone(config));
        false
    }

    /// Runs [`Dispatcher::send_confirmed`] on the runtime without waiting for it.
    pub fn spawn_confirmed(&self, batch: Batch, config: Arc<Config>) {
        let dispatcher = self.clone();
        self.runtime
            .spawn(async move {
                dispatcher.send_confirmed(batch, &config).await;
            });
    }

    /// Delivers `batch` with retries and exponential backoff.
    ///
    /// Returns `true` once the collector accepted the batch. After
    /// `max_delivery_attempts` failures, or on cancellation, the batch is
    /// dropped and counted.
    pub async fn send_confirmed(&self, batch: Batch, config: &Config) -> bool {
        if batch.is_empty() {
            return true;
        }
        let body = match payload::encode(&batch) {
            Ok(body) => body,
            Err(e) => {
                self.drop_batch(&batch, &DeliveryFailure::from(e));
                return false;
            }
        };

        let mut attempt = DeliveryAttempt::new(batch);
        let max_attempts = config.max_delivery_attempts.max(1);
        loop {
            attempt.attempt_count += 1;
            let result = tokio::select! {
                result = self.transport.send_request(config, body.clone()) => result,
                () = self.cancel.cancelled() => Err(DeliveryFailure::Cancelled),
            };

            let delay = match result {
                Ok(()) => {
                    debug!(
                        "TRANSPORT | Delivered batch {} after {} attempt(s)",
                        attempt.batch.sequence, attempt.attempt_count
                    );
                    self.record_sent(&attempt.batch);
                    return true;
                }
                Err(e) => {
                    if !e.is_retryable() || attempt.attempt_count >= max_attempts {
                        self.drop_batch(&attempt.batch, &e);
                        return false;
                    }
                    let delay = backoff_delay(config.retry_backoff_base_ms, attempt.attempt_count);
                    debug!(
                        "TRANSPORT | Attempt {} for batch {} failed: {e}, retrying in {}ms",
                        attempt.attempt_count,
                        attempt.batch.sequence,
                        delay.as_millis()
                    );
                    attempt.last_error = Some(e);
                    delay
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel.cancelled() => {
                    self.drop_batch(&attempt.batch, &DeliveryFailure::Cancelled);
                    return false;
                }
            }
        }
    }

    fn record_sent(&self, batch: &Batch) {
        self.diagnostics.add_batches_sent(1);
        self.diagnostics.add_events_sent(batch.len() as u64);
    }

    fn drop_batch(&self, batch: &Batch, failure: &DeliveryFailure) {
        error!(
            "TRANSPORT | Dropping batch {} ({} events): {failure}",
            batch.sequence,
            batch.len()
        );
        self.diagnostics.add_delivery_failures(1);
    }
}
