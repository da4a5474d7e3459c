// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The public [`Monitor`] object.
//!
//! A `Monitor` owns its configuration, the capture sources and the queue
//! service. Nothing it does ever raises into the host: invalid input leaves it
//! dormant, and faults only show up in [`Monitor::diagnostics`].
//!
//! ```rust,ignore
//! let monitor = Monitor::new();
//! monitor.configure(&PartialConfig::new("my-app", "https://collector.example.com/report"));
//! monitor.start();
//!
//! monitor.signals().emit(&HostSignal::Error(ErrorReport::new("boom")));
//! monitor.capture_event("checkout", serde_json::json!({ "step": 2 }));
//!
//! monitor.stop().await;
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{
    CaptureSource, ErrorReport, EventSink, GlobalErrorSource, HostSignals, LifecycleListener,
    PerformanceSource, PerformanceTrigger, RejectionSource, SignalSource, TimingReader,
};
use crate::config::{Config, ConfigStore, PartialConfig};
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::event::{ErrorPayload, Event};
use crate::queue_service::{QueueHandle, QueueService};
use crate::transport::{Dispatcher, HttpTransport, Transport};

const MANUAL_SOURCE: &str = "manual";

/// Everything that only exists between `start` and `stop`.
struct Running {
    queue: QueueHandle,
    sink: EventSink,
    sources: Vec<Box<dyn CaptureSource>>,
    performance: Option<PerformanceSource>,
    cancel: CancellationToken,
    service: JoinHandle<()>,
}

pub struct Monitor {
    config: Arc<ConfigStore>,
    diagnostics: Arc<Diagnostics>,
    signals: Arc<HostSignals>,
    signal_source: Arc<dyn SignalSource>,
    transport: Option<Arc<dyn Transport>>,
    timing_reader: Option<Arc<dyn TimingReader>>,
    running: Mutex<Option<Running>>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// A dormant monitor. Call [`Monitor::configure`] and then [`Monitor::start`].
    #[must_use]
    pub fn new() -> Self {
        let signals = Arc::new(HostSignals::new());
        Self {
            config: Arc::new(ConfigStore::default()),
            diagnostics: Arc::new(Diagnostics::default()),
            signal_source: signals.clone(),
            signals,
            transport: None,
            timing_reader: None,
            running: Mutex::new(None),
        }
    }

    /// Replaces the HTTP transport, for example with a recording one in tests.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Subscribes capture sources to `source` instead of [`Monitor::signals`].
    #[must_use]
    pub fn with_signal_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.signal_source = source;
        self
    }

    /// Enables performance capture from `reader`.
    #[must_use]
    pub fn with_timing_reader(mut self, reader: Arc<dyn TimingReader>) -> Self {
        self.timing_reader = Some(reader);
        self
    }

    /// Merges `partial` into the current configuration.
    ///
    /// Returns whether the monitor is enabled afterwards. Rejected fields are
    /// logged and counted, never raised. A running monitor picks up the new
    /// parameters immediately, and one that became dormant drops its queue.
    pub fn configure(&self, partial: &PartialConfig) -> bool {
        let (config, errors) = self.config.configure(partial);
        self.diagnostics.add_config_rejections(errors.len() as u64);

        if let Some(running) = self.lock().as_mut() {
            if config.enabled {
                running.queue.reconfigure(Arc::clone(&config));
                if let Some(performance) = running.performance.as_mut() {
                    performance.set_trigger(PerformanceTrigger::from_config(&config));
                }
            } else {
                debug!("AGENT | Monitor is now dormant, discarding queued events");
                running.queue.discard();
            }
        }
        config.enabled
    }

    /// Registers every capture source and starts the queue service.
    ///
    /// Must be called from within a tokio runtime. Does nothing while dormant
    /// or when already running. Returns whether the monitor is running.
    pub fn start(&self) -> bool {
        let config = self.config.get();
        if !config.enabled {
            debug!("AGENT | Monitor is dormant, not starting");
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("AGENT | No tokio runtime available, monitor not started");
            return false;
        };

        let mut running = self.lock();
        if running.is_some() {
            return true;
        }
        *running = Some(self.launch(&runtime, &config));
        info!(
            "AGENT | Monitor started for project {} reporting to {}",
            config.project_id, config.report_url
        );
        true
    }

    fn launch(&self, runtime: &Handle, config: &Arc<Config>) -> Running {
        let transport = self
            .transport
            .clone()
            .unwrap_or_else(|| Arc::new(HttpTransport::new()));
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            transport,
            Arc::clone(&self.diagnostics),
            cancel.clone(),
            runtime.clone(),
        );

        let (service, queue) = QueueService::new(
            Arc::clone(config),
            dispatcher,
            Arc::clone(&self.diagnostics),
            cancel.clone(),
        );
        let service = runtime.spawn(service.run());

        let sink = EventSink::new(
            queue.intake(),
            Arc::clone(&self.config),
            Arc::clone(&self.diagnostics),
        );
        let mut sources: Vec<Box<dyn CaptureSource>> = Vec::with_capacity(3);
        sources.push(Box::new(GlobalErrorSource::new(Arc::clone(&self.signal_source))));
        sources.push(Box::new(RejectionSource::new(Arc::clone(&self.signal_source))));
        sources.push(Box::new(LifecycleListener::new(Arc::clone(&self.signal_source))));
        for source in &mut sources {
            source.register(sink.clone());
            debug!("AGENT | Registered capture source {}", source.name());
        }
        let performance = self.timing_reader.as_ref().map(|reader| {
            let mut source =
                PerformanceSource::new(Arc::clone(reader), PerformanceTrigger::from_config(config));
            source.register(sink.clone());
            source
        });

        Running {
            queue,
            sink,
            sources,
            performance,
            cancel,
            service,
        }
    }

    /// Unregisters every source, beacon-flushes what is queued and stops the
    /// queue service. Pending retries are cancelled. Calling it again is a no-op.
    ///
    /// Lifecycle signals hand the queue off on their own, but only `stop`
    /// releases the sources and the service task. A host tearing the page
    /// down should emit its lifecycle signal and then call `stop`.
    pub async fn stop(&self) {
        let Some(mut running) = self.lock().take() else {
            return;
        };
        for source in &mut running.sources {
            source.unregister();
        }
        if let Some(performance) = running.performance.as_mut() {
            performance.unregister();
        }

        if let Err(e) = running.queue.shutdown().await {
            error!("AGENT | {e}");
        }
        running.cancel.cancel();
        if let Err(e) = running.service.await {
            error!("AGENT | Queue service task failed: {e}");
        }
        info!("AGENT | Monitor stopped");
    }

    /// Captures a Rust error, using its `source()` chain as the stack.
    pub fn capture_error<E: std::error::Error + ?Sized>(&self, error: &E) -> bool {
        self.capture(|| Event::error(ErrorPayload::from_error(error)))
    }

    /// Captures an error described field by field, as the host would report it.
    pub fn capture_error_report(&self, report: ErrorReport) -> bool {
        self.capture(|| Event::error(report))
    }

    /// Captures a named custom event.
    pub fn capture_event(&self, name: &str, data: serde_json::Value) -> bool {
        self.capture(|| Event::custom(name, data))
    }

    fn capture(&self, build: impl FnOnce() -> Event) -> bool {
        match self.sink() {
            Some(sink) => sink.capture(MANUAL_SOURCE, build),
            None => false,
        }
    }

    /// Reads the performance timeline now. Returns how many entries were captured.
    pub fn collect_performance(&self) -> usize {
        self.lock()
            .as_ref()
            .and_then(|running| running.performance.as_ref())
            .map_or(0, PerformanceSource::collect)
    }

    /// Sends the current queue through the confirmed path and waits for the
    /// outcome. Returns `true` once the collector accepted the batch, or when
    /// there was nothing to send.
    pub async fn flush(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let Some(queue) = self.lock().as_ref().map(|running| running.queue.clone()) else {
            return false;
        };
        queue.flush_confirmed().await
    }

    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        self.config.get()
    }

    /// Where the host delivers errors, rejections and lifecycle changes.
    ///
    /// Ignored by the monitor when a custom source was set with
    /// [`Monitor::with_signal_source`].
    #[must_use]
    pub fn signals(&self) -> &Arc<HostSignals> {
        &self.signals
    }

    fn sink(&self) -> Option<EventSink> {
        self.lock().as_ref().map(|running| running.sink.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        // The service performs a final beacon flush when cancelled.
        if let Some(running) = self.lock().take() {
            running.cancel.cancel();
        }
    }
}
