// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Report body sent to the collector.
//!
//! ```text
//! {"pid":"my-app","events":[{"kind":"error","timestamp":...,"fingerprint":"...","payload":{...}}]}
//! ```

use serde::Serialize;

use crate::event::{Batch, Event};

/// Both delivery paths use a CORS-safelisted type so a single collector route
/// accepts beacons and confirmed requests.
pub const CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReportBody<'a> {
    pub pid: &'a str,
    pub events: &'a [Event],
}

impl<'a> From<&'a Batch> for ReportBody<'a> {
    fn from(batch: &'a Batch) -> Self {
        Self {
            pid: &batch.project_id,
            events: &batch.events,
        }
    }
}

pub fn encode(batch: &Batch) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ReportBody::from(batch))
}
