// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # js-monitor
//!
//! An embeddable telemetry agent. It captures runtime errors, unhandled
//! rejections, performance timings and custom events from its host and
//! delivers them in batches to a remote collector identified by a project id.
//!
//! ## Pipeline
//!
//! ```text
//!   capture sources ──> EventSink ──> Batcher ──> Dispatcher ──> collector
//!                                     filter,     beacon / request
//!                                     queue
//!                                       ^
//!                          QueueService (flush timer, shutdown)
//! ```
//!
//! - [`capture`]: host signal plumbing and the capture sources
//! - [`filter`]: ignore rules, sampling, time-window dedup
//! - [`queue`] and [`queue_service`]: the bounded buffer, its batcher and the
//!   flush timer task
//! - [`transport`]: beacon and retryable delivery
//! - [`agent`]: the public [`Monitor`]
//!
//! The monitor never panics into the host, and the thread that reports a
//! signal never waits on the network. Faults are counted in [`diagnostics`].

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_copy_implementations)]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod bootstrap;
pub mod capture;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod filter;
pub mod logger;
pub mod queue;
pub mod queue_service;
pub mod transport;

pub use agent::Monitor;
pub use capture::{ErrorReport, HostSignal, HostSignals, RejectionReport, VisibilityState};
pub use config::{Config, PartialConfig};
pub use diagnostics::DiagnosticsSnapshot;
pub use event::{Event, EventKind, Fingerprint};
pub use transport::{DeliveryMode, Transport};
