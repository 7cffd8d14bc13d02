// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of a running collector: ingestion task, buffer and shutdown.
//!
//! `start` spawns one supervised ingestion task that tails the file, parses each
//! line and appends it to the buffer. `stop` cancels ingestion, waits for the
//! task to finish its current append, then performs the final flush.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{FlushBuffer, FlushStats};
use crate::config::CollectorConfig;
use crate::error::{ConfigError, SinkError, SourceError};
use crate::record::RecordParser;
use crate::sink::BatchSink;
use crate::source::FileTailer;

const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Running,
    Stopping,
    Stopped,
}

impl CollectorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CollectorState::Running,
            1 => CollectorState::Stopping,
            _ => CollectorState::Stopped,
        }
    }
}

/// Settings for the ingestion task.
#[derive(Debug, Clone)]
struct IngestConfig {
    file_path: PathBuf,
    poll_interval: Duration,
    restart_backoff: Option<Duration>,
}

pub struct LogCollector {
    buffer: Arc<FlushBuffer>,
    cancel_token: CancellationToken,
    ingestion: Mutex<Option<JoinHandle<()>>>,
    state: AtomicU8,
}

impl LogCollector {
    /// Starts tailing `config.file_path` and shipping to `sink`.
    ///
    /// The config is validated first and nothing is spawned if it is invalid.
    /// Ingestion also halts when `parent_token` is cancelled, but the final
    /// flush only happens through [`LogCollector::stop`].
    pub fn start(
        config: &CollectorConfig,
        sink: Arc<dyn BatchSink>,
        parent_token: &CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let buffer = Arc::new(FlushBuffer::new(config.buffer_config(), sink));
        let cancel_token = parent_token.child_token();
        let parser = RecordParser::new(config.file_path.to_string_lossy());
        let ingest_config = IngestConfig {
            file_path: config.file_path.clone(),
            poll_interval: config.poll_interval,
            restart_backoff: config.restart_backoff,
        };

        let ingestion = tokio::spawn(supervise_ingestion(
            ingest_config,
            parser,
            Arc::clone(&buffer),
            cancel_token.clone(),
        ));
        info!("LOGS | Collector started for {}", config.file_path.display());

        Ok(LogCollector {
            buffer,
            cancel_token,
            ingestion: Mutex::new(Some(ingestion)),
            state: AtomicU8::new(CollectorState::Running as u8),
        })
    }

    /// Stops ingestion and flushes what is left. Only the first call does any
    /// work; later calls return `Ok(())` immediately.
    pub async fn stop(&self) -> Result<(), SinkError> {
        if self
            .state
            .compare_exchange(
                CollectorState::Running as u8,
                CollectorState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            debug!("LOGS | Collector already stopping");
            return Ok(());
        }

        info!("LOGS | Stopping collector");
        self.cancel_token.cancel();
        if let Some(ingestion) = self.ingestion.lock().await.take() {
            if let Err(e) = ingestion.await {
                error!("LOGS | Ingestion task ended abnormally: {e}");
            }
        }

        let result = self.buffer.close().await;
        self.state
            .store(CollectorState::Stopped as u8, Ordering::Release);

        let stats = self.buffer.stats();
        info!(
            "LOGS | Collector stopped: {} records in {} batches shipped, {} records dropped",
            stats.records_submitted, stats.batches_submitted, stats.records_dropped
        );
        result
    }

    #[must_use]
    pub fn state(&self) -> CollectorState {
        CollectorState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn stats(&self) -> FlushStats {
        self.buffer.stats()
    }
}

/// Runs ingestion until cancelled. A source error ends it, unless a restart
/// backoff is configured, in which case the file is reopened after waiting.
async fn supervise_ingestion(
    config: IngestConfig,
    parser: RecordParser,
    buffer: Arc<FlushBuffer>,
    cancel_token: CancellationToken,
) {
    let mut backoff = config.restart_backoff;

    loop {
        let result = match FileTailer::open(&config.file_path, config.poll_interval).await {
            Ok(tailer) => {
                backoff = config.restart_backoff;
                ingest(tailer, &parser, &buffer, &cancel_token).await
            }
            Err(e) => Err(e),
        };

        let e = match result {
            Ok(()) => {
                debug!("LOGS | Ingestion cancelled");
                return;
            }
            Err(e) => e,
        };

        let Some(delay) = backoff else {
            error!("LOGS | Ingestion stopped: {e}");
            return;
        };
        warn!(
            "LOGS | Ingestion failed, restarting in {} ms: {e}",
            delay.as_millis()
        );
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => return,
            () = sleep(delay) => {}
        }
        backoff = Some(delay.saturating_mul(2).min(MAX_RESTART_BACKOFF));
    }
}

async fn ingest(
    mut tailer: FileTailer,
    parser: &RecordParser,
    buffer: &FlushBuffer,
    cancel_token: &CancellationToken,
) -> Result<(), SourceError> {
    loop {
        let line = tokio::select! {
            biased;
            () = cancel_token.cancelled() => return Ok(()),
            line = tailer.next_line() => line?,
        };

        let record = parser.parse(&line);
        if let Err(e) = buffer.append(record).await {
            error!("LOGS | Failed to ship batch, records dropped: {e}");
        }
    }
}
