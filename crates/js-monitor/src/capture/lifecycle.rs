// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::debug;

use super::signals::{HostSignal, ListenerId, SignalKind, SignalSource, VisibilityState};
use super::{guard, CaptureSource, EventSink};
use crate::transport::DeliveryMode;

const NAME: &str = "lifecycle";

const TEARDOWN_SIGNALS: [SignalKind; 3] = [
    SignalKind::VisibilityChange,
    SignalKind::PageHide,
    SignalKind::Unload,
];

/// Flushes the queue through the beacon path when the page is hidden or torn
/// down. The batch is handed off before the signal's handlers return.
/// Produces no events of its own.
pub struct LifecycleListener {
    signals: Arc<dyn SignalSource>,
    subscriptions: Vec<ListenerId>,
}

impl LifecycleListener {
    #[must_use]
    pub fn new(signals: Arc<dyn SignalSource>) -> Self {
        Self {
            signals,
            subscriptions: Vec::new(),
        }
    }
}

fn is_teardown(signal: &HostSignal) -> bool {
    matches!(
        signal,
        HostSignal::VisibilityChange(VisibilityState::Hidden)
            | HostSignal::PageHide
            | HostSignal::Unload
    )
}

impl CaptureSource for LifecycleListener {
    fn name(&self) -> &'static str {
        NAME
    }

    fn register(&mut self, sink: EventSink) {
        if !self.subscriptions.is_empty() {
            return;
        }
        let listener = Arc::new(move |signal: &HostSignal| {
            if is_teardown(signal) {
                guard(NAME, sink.diagnostics(), || {
                    debug!("LIFECYCLE | {:?}, flushing via beacon", signal.kind());
                    sink.flush(DeliveryMode::Beacon);
                });
            }
        });
        self.subscriptions = TEARDOWN_SIGNALS
            .iter()
            .map(|kind| self.signals.subscribe(*kind, listener.clone()))
            .collect();
    }

    fn unregister(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.signals.unsubscribe(id);
        }
    }
}

impl Drop for LifecycleListener {
    fn drop(&mut self) {
        self.unregister();
    }
}
