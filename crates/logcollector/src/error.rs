// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors raised while reading configuration at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Failed to read env file {path}: {reason}")]
    EnvFile { path: PathBuf, reason: String },
}

/// Errors reported by a batch sink when a submission fails.
///
/// The batch that produced the error has already been removed from the buffer;
/// callers decide whether to log, count or resubmit it.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to serialize batch: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to reach sink: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Sink responded with {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Errors that end the ingestion task for the tailed file
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
