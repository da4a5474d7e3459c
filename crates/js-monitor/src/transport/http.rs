// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tokio::runtime::Handle;
use tracing::{debug, error};

use super::payload;
use super::Transport;
use crate::config::Config;
use crate::error::DeliveryFailure;

/// [`Transport`] backed by a shared `reqwest` client.
///
/// Endpoint, beacon size limit and request timeout come from the config
/// passed to each send. Beacons are spawned as detached tasks that no
/// cancellation reaches, so a beacon queued during shutdown still goes out
/// while the runtime lives.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }

    fn post(&self, config: &Config, body: Vec<u8>) -> reqwest::RequestBuilder {
        self.client
            .post(&config.report_url)
            .header(CONTENT_TYPE, payload::CONTENT_TYPE)
            .timeout(config.request_timeout())
            .body(body)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client() -> reqwest::Client {
    match reqwest::Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(30)))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("TRANSPORT | Failed to build HTTP client: {e}, using reqwest defaults");
            reqwest::Client::new()
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn send_beacon(&self, config: &Config, body: Vec<u8>) -> bool {
        if body.len() > config.max_beacon_bytes {
            debug!(
                "TRANSPORT | Beacon body of {} bytes exceeds {} bytes",
                body.len(),
                config.max_beacon_bytes
            );
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("TRANSPORT | No runtime available for beacon");
            return false;
        };

        let request = self.post(config, body);
        runtime.spawn(async move {
            if let Err(e) = request.send().await {
                debug!("TRANSPORT | Beacon failed: {e}");
            }
        });
        true
    }

    async fn send_request(&self, config: &Config, body: Vec<u8>) -> Result<(), DeliveryFailure> {
        let response = self.post(config, body).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryFailure::Status(status))
        }
    }
}
