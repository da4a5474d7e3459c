// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Filter, queue and flush scheduling.
//!
//! ```text
//!    ┌──────────────┐
//!    │ QueueHandle  │ (capture sources, facade)
//!    └──────┬───────┘
//!           │ ingest / flush, on the caller's thread
//!           v
//!    ┌──────────────┐   Reschedule / Shutdown   ┌──────────────┐
//!    │   Batcher    │ <──────────────────────── │ QueueService │ flush timer
//!    └──────┬───────┘                           └──────────────┘
//!           │ Batch
//!           v
//!    ┌──────────────┐
//!    │  Dispatcher  │
//!    └──────────────┘
//! ```
//!
//! The [`Batcher`] owns the filter and the queue behind one lock, so taking a
//! batch and resetting the queue can never race with an enqueue. Capture and
//! lifecycle flushes complete inside the host's handler turn: a queue that
//! reaches its bound is handed to the beacon before the capture call returns.
//!
//! If that beacon is refused the batch stays queued and a handoff is pending.
//! Until the next timer, lifecycle or explicit flush, further events evict the
//! oldest queued event. The [`QueueService`] task only drives the flush timer
//! and the final flush on shutdown.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::capture::Intake;
use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::event::Event;
use crate::filter::{DedupFilter, Verdict};
use crate::queue::EventQueue;
use crate::transport::{DeliveryMode, Dispatcher};

#[derive(Debug)]
pub enum QueueCommand {
    /// The flush deadline may have moved.
    Reschedule,
    /// Beacon-flush what is left and stop. `ack` fires once the batch is handed off.
    Shutdown(oneshot::Sender<()>),
}

struct BatchState {
    config: Arc<Config>,
    filter: DedupFilter,
    queue: EventQueue,
    last_flush: Instant,
    handoff_pending: bool,
    closed: bool,
}

pub struct Batcher {
    state: Mutex<BatchState>,
    dispatcher: Dispatcher,
    diagnostics: Arc<Diagnostics>,
}

impl fmt::Debug for Batcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Batcher");
        if let Ok(state) = self.state.try_lock() {
            debug
                .field("queued", &state.queue.len())
                .field("handoff_pending", &state.handoff_pending)
                .field("closed", &state.closed);
        }
        debug.finish_non_exhaustive()
    }
}

impl Batcher {
    fn new(
        config: Arc<Config>,
        filter: DedupFilter,
        dispatcher: Dispatcher,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let state = BatchState {
            queue: EventQueue::new(config.max_queue_size),
            config,
            filter,
            last_flush: Instant::now(),
            handoff_pending: false,
            closed: false,
        };
        Self {
            state: Mutex::new(state),
            dispatcher,
            diagnostics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: Event) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        match state.filter.check(&event) {
            Verdict::Accept => {
                self.diagnostics.add_captured(1);
                if state.queue.push(event).is_some() {
                    self.diagnostics.add_overflow_dropped(1);
                }
            }
            Verdict::Ignored => self.diagnostics.add_ignored(1),
            Verdict::SampledOut => self.diagnostics.add_sampled_out(1),
            Verdict::Duplicate => self.diagnostics.add_deduplicated(1),
        }
        if state.queue.is_full() && !state.handoff_pending {
            trace!(
                "QUEUE | Queue reached {} events, flushing",
                state.queue.max_size()
            );
            self.flush_full(&mut state);
        }
        true
    }

    /// Offers a full queue to the beacon. A refused batch is put back.
    fn flush_full(&self, state: &mut BatchState) {
        let batch = state.queue.take_batch(&state.config.project_id);
        if self.dispatcher.try_beacon(&batch, &state.config) {
            state.last_flush = Instant::now();
            return;
        }
        warn!(
            "QUEUE | Beacon refused for batch {}, holding {} events until the next flush",
            batch.sequence,
            batch.len()
        );
        let evicted = state.queue.restore(batch);
        if evicted > 0 {
            self.diagnostics.add_overflow_dropped(evicted as u64);
        }
        state.handoff_pending = true;
    }

    fn flush_locked(&self, state: &mut BatchState, mode: DeliveryMode) -> bool {
        state.last_flush = Instant::now();
        state.handoff_pending = false;
        if state.queue.is_empty() {
            return true;
        }

        let batch = state.queue.take_batch(&state.config.project_id);
        debug!(
            "QUEUE | Flushing batch {} ({} events) via {mode:?}",
            batch.sequence,
            batch.len()
        );
        match mode {
            DeliveryMode::Beacon => self.dispatcher.send_beacon(batch, &state.config),
            DeliveryMode::Confirmed => {
                self.dispatcher
                    .spawn_confirmed(batch, Arc::clone(&state.config));
                true
            }
        }
    }

    /// Takes the queue and waits until the collector confirms it or the
    /// batch is dropped.
    async fn flush_confirmed(&self) -> bool {
        let taken = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.closed {
                return false;
            }
            state.last_flush = Instant::now();
            state.handoff_pending = false;
            if state.queue.is_empty() {
                None
            } else {
                let batch = state.queue.take_batch(&state.config.project_id);
                Some((batch, Arc::clone(&state.config)))
            }
        };
        let Some((batch, config)) = taken else {
            return true;
        };
        debug!(
            "QUEUE | Flushing batch {} ({} events) via {:?}",
            batch.sequence,
            batch.len(),
            DeliveryMode::Confirmed
        );
        self.dispatcher.send_confirmed(batch, &config).await
    }

    fn next_flush_at(&self) -> Instant {
        let state = self.lock();
        state.last_flush + state.config.flush_interval()
    }

    /// Flushes through the beacon if the interval has elapsed since the last
    /// flush. An empty queue only restarts the interval.
    fn flush_if_due(&self) {
        let mut state = self.lock();
        if state.closed || Instant::now() < state.last_flush + state.config.flush_interval() {
            return;
        }
        if state.queue.is_empty() {
            state.last_flush = Instant::now();
            return;
        }
        trace!("QUEUE | Flush interval elapsed, flushing");
        self.flush_locked(&mut state, DeliveryMode::Beacon);
    }

    fn reconfigure(&self, config: Arc<Config>) {
        let mut state = self.lock();
        state.filter.reconfigure(&config);
        let evicted = state.queue.resize(config.max_queue_size);
        if evicted > 0 {
            self.diagnostics.add_overflow_dropped(evicted as u64);
        }
        state.config = config;
        if state.queue.is_full() && !state.handoff_pending && !state.closed {
            self.flush_full(&mut state);
        }
        debug!("QUEUE | Applied new configuration");
    }

    fn discard(&self) {
        let mut state = self.lock();
        state.handoff_pending = false;
        let dropped = state.queue.clear();
        if dropped > 0 {
            debug!("QUEUE | Discarded {dropped} queued events");
        }
    }

    /// Beacon-flushes what is left. Later calls are no-ops.
    fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        self.flush_locked(&mut state, DeliveryMode::Beacon);
        state.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Intake for Batcher {
    fn ingest(&self, event: Event) -> bool {
        self.push(event)
    }

    fn flush(&self, mode: DeliveryMode) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        self.flush_locked(&mut state, mode)
    }
}

#[derive(Clone, Debug)]
pub struct QueueHandle {
    batcher: Arc<Batcher>,
    tx: mpsc::UnboundedSender<QueueCommand>,
}

impl QueueHandle {
    /// The intake capture sources feed.
    #[must_use]
    pub fn intake(&self) -> Arc<dyn Intake> {
        self.batcher.clone()
    }

    pub fn ingest(&self, event: Event) -> bool {
        self.batcher.push(event)
    }

    /// Hands the queue off before returning. A confirmed flush continues on a
    /// spawned task.
    pub fn flush(&self, mode: DeliveryMode) -> bool {
        Intake::flush(&*self.batcher, mode)
    }

    /// Flushes through the retryable path and waits until the batch is
    /// confirmed or dropped.
    pub async fn flush_confirmed(&self) -> bool {
        self.batcher.flush_confirmed().await
    }

    pub fn reconfigure(&self, config: Arc<Config>) {
        self.batcher.reconfigure(config);
        if self.tx.send(QueueCommand::Reschedule).is_err() {
            trace!("QUEUE | Queue service is gone, flush timer not rescheduled");
        }
    }

    /// Drops queued events without sending them.
    pub fn discard(&self) {
        self.batcher.discard();
    }

    /// Stops the service after a final beacon flush.
    pub async fn shutdown(&self) -> Result<(), String> {
        let (ack, response) = oneshot::channel();
        self.tx
            .send(QueueCommand::Shutdown(ack))
            .map_err(|e| format!("Failed to send shutdown command: {e}"))?;
        response
            .await
            .map_err(|e| format!("Failed to receive shutdown response: {e}"))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.batcher.is_closed()
    }
}

pub struct QueueService {
    batcher: Arc<Batcher>,
    rx: mpsc::UnboundedReceiver<QueueCommand>,
    cancel: CancellationToken,
}

impl QueueService {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        dispatcher: Dispatcher,
        diagnostics: Arc<Diagnostics>,
        cancel: CancellationToken,
    ) -> (Self, QueueHandle) {
        let filter = DedupFilter::new(&config);
        Self::with_filter(config, filter, dispatcher, diagnostics, cancel)
    }

    #[must_use]
    pub fn with_filter(
        config: Arc<Config>,
        filter: DedupFilter,
        dispatcher: Dispatcher,
        diagnostics: Arc<Diagnostics>,
        cancel: CancellationToken,
    ) -> (Self, QueueHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let batcher = Arc::new(Batcher::new(config, filter, dispatcher, diagnostics));
        let service = Self {
            batcher: Arc::clone(&batcher),
            rx,
            cancel,
        };
        (service, QueueHandle { batcher, tx })
    }

    /// Drives the flush timer until shutdown, cancellation, or every handle is
    /// dropped. Each exit path performs a final beacon flush.
    pub async fn run(mut self) {
        debug!("QUEUE | Queue service started");

        loop {
            let deadline = self.batcher.next_flush_at();
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(QueueCommand::Reschedule) => {}
                    Some(QueueCommand::Shutdown(ack)) => {
                        debug!("QUEUE | Queue service shutting down, performing final flush");
                        self.batcher.close();
                        if ack.send(()).is_err() {
                            error!("QUEUE | Failed to send shutdown response - receiver dropped");
                        }
                        break;
                    }
                    None => {
                        debug!("QUEUE | All handles dropped, performing final flush");
                        self.batcher.close();
                        break;
                    }
                },
                () = sleep_until(deadline) => self.batcher.flush_if_due(),
                () = self.cancel.cancelled() => {
                    debug!("QUEUE | Queue service cancelled, performing final flush");
                    self.batcher.close();
                    break;
                }
            }
        }

        debug!("QUEUE | Queue service stopped");
    }
}
