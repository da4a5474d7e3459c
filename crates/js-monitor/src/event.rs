// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Observable occurrences and their fingerprints.
//!
//! Every [`Event`] carries a [`Fingerprint`]: a 64-bit FNV-1a hash over the
//! event kind and its normalized payload fields. Two occurrences that only
//! differ in whitespace or cache-busting query strings share a fingerprint,
//! which is what the dedup stage keys on.

use std::collections::BTreeMap;
use std::hash::Hasher;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use derive_more::Display;
use fnv::FnvHasher;
use regex::Regex;
use serde::{Serialize, Serializer};

/// Frames kept in a stack signature.
const STACK_SIGNATURE_FRAMES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Error,
    Rejection,
    PerformanceMark,
    Custom,
}

/// Stable hash of an event's normalized payload.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{_0:016x}")]
pub struct Fingerprint(pub u64);

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An uncaught error or an error handed to `capture_error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorPayload {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, filename: impl Into<String>, lineno: u32, colno: u32) -> Self {
        self.filename = Some(filename.into());
        self.lineno = Some(lineno);
        self.colno = Some(colno);
        self
    }

    /// Builds a payload from a Rust error, using its `source()` chain as the stack.
    #[must_use]
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        let mut frames = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            frames.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            stack: (!frames.is_empty()).then(|| frames.join("\n")),
            ..Default::default()
        }
    }
}

/// An unhandled promise rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectionPayload {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// A normalized navigation, resource, paint or user timing entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformancePayload {
    pub entry_type: String,
    pub name: String,
    /// Milliseconds since the time origin.
    pub start_time: f64,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_size: Option<u64>,
    /// Named phase durations, for example `dns` or `ttfb`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

/// An event raised by the host through `capture_event`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomPayload {
    pub name: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Error(ErrorPayload),
    Rejection(RejectionPayload),
    PerformanceMark(PerformancePayload),
    Custom(CustomPayload),
}

impl Payload {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::Error(_) => EventKind::Error,
            Payload::Rejection(_) => EventKind::Rejection,
            Payload::PerformanceMark(_) => EventKind::PerformanceMark,
            Payload::Custom(_) => EventKind::Custom,
        }
    }

    /// Message used by ignore rules. Only errors and rejections have one.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Payload::Error(error) => Some(&error.message),
            Payload::Rejection(rejection) => Some(&rejection.reason),
            Payload::PerformanceMark(_) | Payload::Custom(_) => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = FingerprintHasher::new(self.kind());
        match self {
            Payload::Error(error) => {
                hasher.field(&normalize_message(&error.message));
                hasher.field(&stack_signature(error.stack.as_deref().unwrap_or_default()));
                hasher.field(&strip_cache_busters(
                    error.filename.as_deref().unwrap_or_default(),
                ));
            }
            Payload::Rejection(rejection) => {
                hasher.field(&normalize_message(&rejection.reason));
                hasher.field(&stack_signature(
                    rejection.stack.as_deref().unwrap_or_default(),
                ));
            }
            Payload::PerformanceMark(entry) => {
                hasher.field(&entry.entry_type);
                hasher.field(&entry.name);
                hasher.field(&((entry.start_time * 1_000.0).round() as i64).to_string());
            }
            Payload::Custom(custom) => {
                hasher.field(&custom.name);
                // serde_json maps keep keys sorted, so this is canonical.
                hasher.field(&custom.data.to_string());
            }
        }
        hasher.finish()
    }
}

struct FingerprintHasher(FnvHasher);

impl FingerprintHasher {
    fn new(kind: EventKind) -> Self {
        let mut hasher = FnvHasher::default();
        hasher.write_u8(kind as u8);
        Self(hasher)
    }

    fn field(&mut self, value: &str) {
        self.0.write(value.as_bytes());
        // Separator so ("ab", "c") and ("a", "bc") hash differently.
        self.0.write_u8(0xff);
    }

    fn finish(&self) -> Fingerprint {
        Fingerprint(self.0.finish())
    }
}

/// An immutable observation, ready to be queued and delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    kind: EventKind,
    timestamp: u64,
    fingerprint: Fingerprint,
    payload: Payload,
}

impl Event {
    /// Creates an event stamped with the current wall-clock time.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self::at(payload, now_millis())
    }

    /// Creates an event with an explicit timestamp in milliseconds since the epoch.
    #[must_use]
    pub fn at(payload: Payload, timestamp: u64) -> Self {
        Self {
            kind: payload.kind(),
            timestamp,
            fingerprint: payload.fingerprint(),
            payload,
        }
    }

    #[must_use]
    pub fn error(payload: ErrorPayload) -> Self {
        Self::new(Payload::Error(payload))
    }

    #[must_use]
    pub fn rejection(payload: RejectionPayload) -> Self {
        Self::new(Payload::Rejection(payload))
    }

    #[must_use]
    pub fn performance(payload: PerformancePayload) -> Self {
        Self::new(Payload::PerformanceMark(payload))
    }

    #[must_use]
    pub fn custom(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(Payload::Custom(CustomPayload {
            name: name.into(),
            data,
        }))
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// An ordered group of events handed to the transport as one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Monotonic per-agent sequence number, for logs and diagnostics.
    pub sequence: u64,
    pub project_id: String,
    pub events: Vec<Event>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Milliseconds since the UNIX epoch. A clock set before 1970 reads as 0.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Trims a message and collapses internal whitespace.
#[must_use]
pub fn normalize_message(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Top frames of a stack trace, trimmed and without cache-busting query strings.
#[must_use]
pub fn stack_signature(stack: &str) -> String {
    stack
        .lines()
        .map(str::trim)
        .filter(|frame| !frame.is_empty())
        .take(STACK_SIGNATURE_FRAMES)
        .map(|frame| strip_cache_busters(&normalize_message(frame)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_cache_busters(location: &str) -> String {
    static QUERY: OnceLock<Option<Regex>> = OnceLock::new();
    let query = QUERY.get_or_init(|| Regex::new(r"[?#][^\s:)]*").ok());
    match query {
        Some(query) => query.replace_all(location, "").into_owned(),
        None => location.to_string(),
    }
}
