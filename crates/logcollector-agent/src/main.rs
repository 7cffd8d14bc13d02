// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logcollector::{
    collector::LogCollector,
    config::{CollectorConfig, DEFAULT_ENV_FILE, ENV_ENV_FILE, ENV_LOG_LEVEL},
    sink::{BatchSink, HttpSink},
};

#[tokio::main]
pub async fn main() -> ExitCode {
    // Read directly so that a bad config can still be reported at the requested level.
    let log_level = env::var(ENV_LOG_LEVEL)
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info"),
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let env_file = env::var_os(ENV_ENV_FILE)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE));
    let config = match CollectorConfig::from_env_with_file(&env_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading log collector configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let sink: Arc<dyn BatchSink> = match HttpSink::new(config.sink_config()) {
        Ok(sink) => {
            debug!("Shipping to {}", sink.endpoint());
            Arc::new(sink)
        }
        Err(e) => {
            error!("Error creating HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown_token = CancellationToken::new();
    let collector = match LogCollector::start(&config, sink, &shutdown_token) {
        Ok(collector) => collector,
        Err(e) => {
            error!("Error starting log collector: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Log collector started. Press Ctrl+C to stop.");

    wait_for_shutdown_signal().await;
    shutdown_token.cancel();

    match collector.stop().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Final flush failed: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("Unable to listen for SIGTERM: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for Ctrl+C: {e}");
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Unable to listen for Ctrl+C: {e}");
            }
        }
        _ = terminate.recv() => debug!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for Ctrl+C: {e}");
    }
}
