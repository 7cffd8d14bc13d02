// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships the lines of one growing log file to a bulk indexing endpoint.
//!
//! ```text
//!   FileTailer ──> RecordParser ──> FlushBuffer ──> BatchSink (HTTP POST)
//!        ^                               ^
//!        └──────── LogCollector ─────────┘   (cancellation, final flush)
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod collector;
pub mod config;
pub mod error;
pub mod record;
pub mod sink;
pub mod source;
