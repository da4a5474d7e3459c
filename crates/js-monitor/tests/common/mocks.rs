// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock transports

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use js_monitor::error::DeliveryFailure;
use js_monitor::{Config, Transport};
use reqwest::StatusCode;

/// One body handed to the transport, decoded.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Delivery {
    pub url: String,
    pub body: serde_json::Value,
}

impl Delivery {
    /// Event kinds in delivery order.
    #[allow(dead_code)]
    pub fn kinds(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| event["kind"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// `payload.message`, `payload.reason` or `payload.name` of every event.
    #[allow(dead_code)]
    pub fn labels(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| {
                let payload = &event["payload"];
                ["message", "reason", "name"]
                    .iter()
                    .find_map(|field| payload[*field].as_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }

    pub fn events(&self) -> Vec<serde_json::Value> {
        self.body["events"].as_array().cloned().unwrap_or_default()
    }
}

/// Records every beacon and request instead of touching the network.
#[derive(Debug)]
pub struct RecordingTransport {
    accept_beacons: AtomicBool,
    request_failures: Mutex<VecDeque<StatusCode>>,
    beacons: Mutex<Vec<Delivery>>,
    requests: Mutex<Vec<Delivery>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            accept_beacons: AtomicBool::new(true),
            request_failures: Mutex::new(VecDeque::new()),
            beacons: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn refuse_beacons(&self) {
        self.accept_beacons.store(false, Ordering::SeqCst);
    }

    pub fn accept_beacons(&self) {
        self.accept_beacons.store(true, Ordering::SeqCst);
    }

    /// The next requests answer with these statuses, in order.
    pub fn fail_requests(&self, statuses: impl IntoIterator<Item = StatusCode>) {
        self.request_failures.lock().unwrap().extend(statuses);
    }

    pub fn beacons(&self) -> Vec<Delivery> {
        self.beacons.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<Delivery> {
        self.requests.lock().unwrap().clone()
    }

    /// Every delivery that reached the transport, beacons first.
    pub fn deliveries(&self) -> Vec<Delivery> {
        let mut all = self.beacons();
        all.extend(self.requests());
        all
    }

    pub fn delivered_events(&self) -> usize {
        self.deliveries()
            .iter()
            .map(|delivery| delivery.events().len())
            .sum()
    }
}

fn decode(url: &str, body: &[u8]) -> Delivery {
    Delivery {
        url: url.to_string(),
        body: serde_json::from_slice(body).expect("report body is JSON"),
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    fn send_beacon(&self, config: &Config, body: Vec<u8>) -> bool {
        if !self.accept_beacons.load(Ordering::SeqCst) {
            return false;
        }
        self.beacons
            .lock()
            .unwrap()
            .push(decode(&config.report_url, &body));
        true
    }

    async fn send_request(&self, config: &Config, body: Vec<u8>) -> Result<(), DeliveryFailure> {
        self.requests
            .lock()
            .unwrap()
            .push(decode(&config.report_url, &body));
        match self.request_failures.lock().unwrap().pop_front() {
            Some(status) => Err(DeliveryFailure::Status(status)),
            None => Ok(()),
        }
    }
}
