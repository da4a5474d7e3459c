// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host signal plumbing.
//!
//! The host delivers its uncaught errors, unhandled rejections and page
//! lifecycle changes through a [`SignalSource`]. [`HostSignals`] is the
//! in-process implementation: the host calls [`HostSignals::emit`] and every
//! listener for that kind runs synchronously on the calling thread.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::event::{ErrorPayload, RejectionPayload};

/// Uncaught error as reported by the host.
pub type ErrorReport = ErrorPayload;

/// Unhandled rejection as reported by the host.
pub type RejectionReport = RejectionPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Error,
    UnhandledRejection,
    VisibilityChange,
    PageHide,
    Unload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostSignal {
    Error(ErrorReport),
    UnhandledRejection(RejectionReport),
    VisibilityChange(VisibilityState),
    PageHide,
    Unload,
}

impl HostSignal {
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Error(_) => SignalKind::Error,
            Self::UnhandledRejection(_) => SignalKind::UnhandledRejection,
            Self::VisibilityChange(_) => SignalKind::VisibilityChange,
            Self::PageHide => SignalKind::PageHide,
            Self::Unload => SignalKind::Unload,
        }
    }
}

pub type Listener = Arc<dyn Fn(&HostSignal) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Subscription capability for host signals.
pub trait SignalSource: Send + Sync {
    fn subscribe(&self, kind: SignalKind, listener: Listener) -> ListenerId;

    /// Removing an unknown id is a no-op.
    fn unsubscribe(&self, id: ListenerId);
}

struct Registration {
    id: ListenerId,
    kind: SignalKind,
    listener: Listener,
}

#[derive(Default)]
pub struct HostSignals {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Registration>>,
}

impl fmt::Debug for HostSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSignals")
            .field("listeners", &self.lock().len())
            .finish()
    }
}

impl HostSignals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every listener subscribed to the signal's kind.
    ///
    /// The signal is only borrowed, so the host's own handling of it is
    /// unaffected. A panicking listener is contained. Returns how many
    /// listeners ran.
    pub fn emit(&self, signal: &HostSignal) -> usize {
        let kind = signal.kind();
        // Listeners run outside the lock so they may (un)subscribe.
        let listeners: Vec<Listener> = self
            .lock()
            .iter()
            .filter(|registration| registration.kind == kind)
            .map(|registration| Arc::clone(&registration.listener))
            .collect();

        for listener in &listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(signal))).is_err() {
                warn!("SIGNALS | Listener for {kind:?} panicked");
            }
        }
        listeners.len()
    }

    #[must_use]
    pub fn listener_count(&self, kind: SignalKind) -> usize {
        self.lock()
            .iter()
            .filter(|registration| registration.kind == kind)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SignalSource for HostSignals {
    fn subscribe(&self, kind: SignalKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Registration { id, kind, listener });
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.lock().retain(|registration| registration.id != id);
    }
}
