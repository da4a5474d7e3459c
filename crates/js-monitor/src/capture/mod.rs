// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Capture sources.
//!
//! Each source listens to one kind of host activity and turns it into
//! [`Event`]s. Sources are registered and removed independently, and all of
//! them feed the same [`EventSink`].
//!
//! A source never lets a fault reach the host: its body runs inside
//! [`guard`], which contains panics and counts them as capture faults.

pub mod global_error;
pub mod lifecycle;
pub mod performance;
pub mod rejection;
pub mod signals;

use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::config::ConfigStore;
use crate::diagnostics::Diagnostics;
use crate::error::CaptureFault;
use crate::event::Event;
use crate::transport::DeliveryMode;

pub use global_error::GlobalErrorSource;
pub use lifecycle::LifecycleListener;
pub use performance::{PerformanceSource, PerformanceTrigger, TimingEntry, TimingReader};
pub use rejection::RejectionSource;
pub use signals::{
    ErrorReport, HostSignal, HostSignals, Listener, ListenerId, RejectionReport, SignalKind,
    SignalSource, VisibilityState,
};

pub trait CaptureSource: Send {
    fn name(&self) -> &'static str;

    /// Starts feeding `sink`. Registering twice is a no-op.
    fn register(&mut self, sink: EventSink);

    /// Stops producing events. Unregistering an idle source is a no-op.
    fn unregister(&mut self);
}

/// Receiving end of captured events.
///
/// Both calls complete on the caller's thread: an event is filtered and
/// queued, and a flush has handed its batch off, before they return.
pub trait Intake: Debug + Send + Sync {
    /// Returns `false` once the intake is closed.
    fn ingest(&self, event: Event) -> bool;

    fn flush(&self, mode: DeliveryMode) -> bool;
}

/// Ingestion entry point shared by every capture source.
#[derive(Debug, Clone)]
pub struct EventSink {
    intake: Arc<dyn Intake>,
    config: Arc<ConfigStore>,
    diagnostics: Arc<Diagnostics>,
}

impl EventSink {
    #[must_use]
    pub fn new(
        intake: Arc<dyn Intake>,
        config: Arc<ConfigStore>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            intake,
            config,
            diagnostics,
        }
    }

    /// Filters and queues `event`. Returns `false` when the agent is dormant
    /// or stopped.
    pub fn ingest(&self, event: Event) -> bool {
        if !self.config.is_enabled() {
            return false;
        }
        if !self.intake.ingest(event) {
            trace!("CAPTURE | Queue is closed, dropping event");
            return false;
        }
        true
    }

    /// Builds an event inside [`guard`] and ingests it.
    pub fn capture(&self, source_name: &'static str, build: impl FnOnce() -> Event) -> bool {
        if !self.config.is_enabled() {
            return false;
        }
        match guard(source_name, &self.diagnostics, build) {
            Some(event) => self.ingest(event),
            None => false,
        }
    }

    /// Hands the queued batch off through `mode` before returning.
    pub fn flush(&self, mode: DeliveryMode) -> bool {
        self.config.is_enabled() && self.intake.flush(mode)
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }
}

/// Runs `f`, containing any panic as a [`CaptureFault`].
///
/// A fault is logged and counted, and the observation is dropped.
pub fn guard<T>(
    source_name: &'static str,
    diagnostics: &Diagnostics,
    f: impl FnOnce() -> T,
) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let fault = CaptureFault::Panicked {
                source_name,
                message: panic_message(payload.as_ref()),
            };
            warn!("CAPTURE | {fault}");
            diagnostics.add_capture_faults(1);
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
