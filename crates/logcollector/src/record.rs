// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records and the parser that turns raw lines into them.
//!
//! A line that is a JSON object carrying `@timestamp`, `message` and `file` is
//! decoded as-is. Anything else becomes a plain-text record stamped with the
//! current time and the tailed file's path, so no line is ever dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A single log line, as shipped to the indexing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "file")]
    pub source: String,
}

impl LogRecord {
    #[must_use]
    pub fn new(message: impl Into<String>, source: impl Into<String>) -> Self {
        LogRecord {
            timestamp: Utc::now(),
            message: message.into(),
            source: source.into(),
        }
    }
}

/// Immutable snapshot of a drained buffer, tagged with its destination index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    index: String,
    records: Vec<LogRecord>,
}

impl Batch {
    #[must_use]
    pub fn new(index: String, records: Vec<LogRecord>) -> Self {
        Batch { index, records }
    }

    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }

    #[must_use]
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Converts raw lines from one source file into [`LogRecord`]s.
#[derive(Debug, Clone)]
pub struct RecordParser {
    source: String,
}

impl RecordParser {
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        RecordParser {
            source: source.into(),
        }
    }

    /// Never fails: malformed structured input is shipped as plain text.
    #[must_use]
    pub fn parse(&self, line: &str) -> LogRecord {
        parse_line(line, &self.source)
    }
}

#[must_use]
pub fn parse_line(line: &str, source: &str) -> LogRecord {
    // Cheap pre-check so plain text never pays for a full decode attempt.
    if line.trim_start().starts_with('{') {
        match serde_json::from_str::<LogRecord>(line) {
            Ok(record) => return record,
            Err(e) => trace!("LOGS | Line is not a structured record, shipping as text: {e}"),
        }
    }
    LogRecord::new(line, source)
}
