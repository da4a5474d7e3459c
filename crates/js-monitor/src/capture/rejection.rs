// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use super::signals::{HostSignal, ListenerId, SignalKind, SignalSource};
use super::{CaptureSource, EventSink};
use crate::event::{normalize_message, Event};

const NAME: &str = "unhandled-rejection";

/// Reason recorded for a rejection without one (`Promise.reject()`).
const UNKNOWN_REASON: &str = "undefined";

/// Captures unhandled promise rejections reported by the host.
///
/// The stack is best-effort: hosts only have one when the rejection reason
/// was an error object.
pub struct RejectionSource {
    signals: Arc<dyn SignalSource>,
    subscription: Option<ListenerId>,
}

impl RejectionSource {
    #[must_use]
    pub fn new(signals: Arc<dyn SignalSource>) -> Self {
        Self {
            signals,
            subscription: None,
        }
    }
}

impl CaptureSource for RejectionSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn register(&mut self, sink: EventSink) {
        if self.subscription.is_some() {
            return;
        }
        let listener = Arc::new(move |signal: &HostSignal| {
            if let HostSignal::UnhandledRejection(report) = signal {
                sink.capture(NAME, || {
                    let mut payload = report.clone();
                    if normalize_message(&payload.reason).is_empty() {
                        payload.reason = UNKNOWN_REASON.to_string();
                    }
                    Event::rejection(payload)
                });
            }
        });
        self.subscription = Some(
            self.signals
                .subscribe(SignalKind::UnhandledRejection, listener),
        );
    }

    fn unregister(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.signals.unsubscribe(id);
        }
    }
}

impl Drop for RejectionSource {
    fn drop(&mut self) {
        self.unregister();
    }
}
