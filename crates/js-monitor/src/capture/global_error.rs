// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use super::signals::{HostSignal, ListenerId, SignalKind, SignalSource};
use super::{CaptureSource, EventSink};
use crate::event::{normalize_message, Event};

const NAME: &str = "global-error";

/// Message recorded when the host reports an error without one.
const UNKNOWN_ERROR: &str = "Unknown error";

/// Captures uncaught errors reported by the host.
pub struct GlobalErrorSource {
    signals: Arc<dyn SignalSource>,
    subscription: Option<ListenerId>,
}

impl GlobalErrorSource {
    #[must_use]
    pub fn new(signals: Arc<dyn SignalSource>) -> Self {
        Self {
            signals,
            subscription: None,
        }
    }
}

impl CaptureSource for GlobalErrorSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn register(&mut self, sink: EventSink) {
        if self.subscription.is_some() {
            return;
        }
        let listener = Arc::new(move |signal: &HostSignal| {
            if let HostSignal::Error(report) = signal {
                sink.capture(NAME, || {
                    let mut payload = report.clone();
                    if normalize_message(&payload.message).is_empty() {
                        payload.message = UNKNOWN_ERROR.to_string();
                    }
                    Event::error(payload)
                });
            }
        });
        self.subscription = Some(self.signals.subscribe(SignalKind::Error, listener));
    }

    fn unregister(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.signals.unsubscribe(id);
        }
    }
}

impl Drop for GlobalErrorSource {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::signals::{ErrorReport, HostSignals};
    use crate::capture::testing;
    use crate::event::{EventKind, Payload};

    #[test]
    fn test_error_signal_becomes_event() {
        let signals = Arc::new(HostSignals::new());
        let (sink, recorder) = testing::sink(true);
        let mut source = GlobalErrorSource::new(signals.clone());
        source.register(sink);

        let report = ErrorReport::new("TypeError: x is undefined")
            .with_location("https://app.example.com/main.js", 10, 4)
            .with_stack("at main (main.js:10:4)");
        signals.emit(&HostSignal::Error(report.clone()));
        signals.emit(&HostSignal::Error(ErrorReport::new("  ")));

        let events = recorder.ingested();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::Error);
        assert_eq!(events[0].payload(), &Payload::Error(report));
        assert_eq!(events[1].payload().message(), Some(UNKNOWN_ERROR));
    }

    #[test]
    fn test_dormant_or_unregistered_captures_nothing() {
        let signals = Arc::new(HostSignals::new());
        let (sink, recorder) = testing::sink(false);
        let mut source = GlobalErrorSource::new(signals.clone());
        source.register(sink);
        signals.emit(&HostSignal::Error(ErrorReport::new("ignored")));
        assert!(recorder.ingested().is_empty());

        source.unregister();
        assert_eq!(signals.listener_count(SignalKind::Error), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let signals = Arc::new(HostSignals::new());
        let (sink, _recorder) = testing::sink(true);
        {
            let mut source = GlobalErrorSource::new(signals.clone());
            source.register(sink);
            assert_eq!(signals.listener_count(SignalKind::Error), 1);
        }
        assert_eq!(signals.listener_count(SignalKind::Error), 0);
    }
}
