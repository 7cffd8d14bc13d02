// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of batches to the bulk indexing endpoint.
//!
//! Each batch is sent as a single JSON `POST <base>/api/_bulkv2` with basic
//! authentication:
//!
//! ```json
//! { "index": "app-logs",
//!   "records": [ { "@timestamp": "2024-03-01T12:30:00Z", "message": "...", "file": "..." } ] }
//! ```
//!
//! Submissions are attempted once. Failed batches are reported to the caller and
//! never retried here.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::SinkError;
use crate::record::Batch;

const BULK_PATH: &str = "/api/_bulkv2";

#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Delivers one batch. Called with the buffer lock held, so at most one
    /// submission per buffer is in flight at any time.
    async fn submit(&self, batch: &Batch) -> Result<(), SinkError>;
}

/// Settings needed to reach the indexing service.
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    pub base_url: String,
    pub user: String,
    pub password: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(HttpSink {
            client,
            endpoint: bulk_endpoint(&config.base_url),
            user: config.user,
            password: config.password,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BatchSink for HttpSink {
    async fn submit(&self, batch: &Batch) -> Result<(), SinkError> {
        let body = serde_json::to_vec(batch)?;
        let time = Instant::now();

        let resp = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Status { status, body });
        }

        debug!(
            "LOGS | Submitted {} records to index {} in {} ms",
            batch.len(),
            batch.index(),
            time.elapsed().as_millis()
        );
        Ok(())
    }
}

fn bulk_endpoint(base_url: &str) -> String {
    format!("{}{BULK_PATH}", base_url.trim_end_matches('/'))
}
