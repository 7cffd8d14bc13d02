// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Follows a single growing file and yields complete lines in append order.
//!
//! The file is read from its start and then polled for growth. Rotation is
//! detected on every EOF:
//! - the file got shorter than what was already read (truncated in place), or
//! - the path now names a different file (moved away and recreated).
//!
//! In both cases the file is reopened from offset 0. A path that is briefly
//! missing during rotation is waited on.
//!
//! A line longer than [`MAX_LINE_BYTES`] is split into chunks of that size, so
//! a writer that never emits a newline cannot grow memory without bound.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::SourceError;

pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Identifies the file behind a path, so a recreated file can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn file_identity(metadata: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: metadata.dev(),
        ino: metadata.ino(),
    })
}

#[cfg(not(unix))]
fn file_identity(_metadata: &Metadata) -> Option<FileIdentity> {
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rotation {
    None,
    Truncated,
    Replaced,
    Missing,
}

pub struct FileTailer {
    path: PathBuf,
    reader: BufReader<File>,
    identity: Option<FileIdentity>,
    /// Bytes consumed from the current file, including any partial line.
    offset: u64,
    /// Bytes of a line whose terminating newline has not been written yet.
    partial: Vec<u8>,
    poll_interval: Duration,
    max_line_bytes: usize,
}

impl FileTailer {
    pub async fn open(
        path: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Result<Self, SourceError> {
        let path = path.into();
        let (reader, identity) = open_reader(&path).await?;
        info!("LOGS | Tailing {}", path.display());
        Ok(FileTailer {
            path,
            reader,
            identity,
            offset: 0,
            partial: Vec::new(),
            poll_interval,
            max_line_bytes: MAX_LINE_BYTES,
        })
    }

    #[cfg(test)]
    fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// Waits for and returns the next complete line, without its line ending.
    ///
    /// Never returns at end of file; it polls until more data shows up. Errors
    /// are limited to failures reading or reopening the file.
    pub async fn next_line(&mut self) -> Result<String, SourceError> {
        loop {
            // One byte past the cap leaves room for the newline of a line that fits.
            let limit = (self.max_line_bytes + 1).saturating_sub(self.partial.len()) as u64;
            let read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.partial)
                .await
                .map_err(|source| SourceError::Read {
                    path: self.path.clone(),
                    source,
                })?;
            self.offset += read as u64;

            if self.partial.last() == Some(&b'\n') {
                return Ok(self.take_line());
            }
            if self.partial.len() > self.max_line_bytes {
                warn!(
                    "LOGS | Line in {} exceeds {} bytes, splitting it",
                    self.path.display(),
                    self.max_line_bytes
                );
                let rest = self.partial.split_off(self.max_line_bytes);
                let chunk = std::mem::replace(&mut self.partial, rest);
                return Ok(into_string(chunk));
            }
            if read > 0 {
                // Partial line; keep reading in case the rest is already there.
                continue;
            }

            match self.check_rotation().await? {
                Rotation::None | Rotation::Missing => sleep(self.poll_interval).await,
                Rotation::Truncated | Rotation::Replaced => self.reopen().await?,
            }
        }
    }

    fn take_line(&mut self) -> String {
        let mut line = std::mem::take(&mut self.partial);
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        into_string(line)
    }

    async fn check_rotation(&self) -> Result<Rotation, SourceError> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Rotation::Missing),
            Err(source) => {
                return Err(SourceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let identity = file_identity(&metadata);
        if identity.is_some() && identity != self.identity {
            return Ok(Rotation::Replaced);
        }
        if metadata.len() < self.offset {
            return Ok(Rotation::Truncated);
        }
        Ok(Rotation::None)
    }

    async fn reopen(&mut self) -> Result<(), SourceError> {
        if !self.partial.is_empty() {
            debug!(
                "LOGS | Discarding {} bytes of an unterminated line from {}",
                self.partial.len(),
                self.path.display()
            );
        }
        let (reader, identity) = open_reader(&self.path).await?;
        info!("LOGS | {} was rotated, reopening", self.path.display());
        self.reader = reader;
        self.identity = identity;
        self.offset = 0;
        self.partial.clear();
        Ok(())
    }
}

fn into_string(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

async fn open_reader(
    path: &Path,
) -> Result<(BufReader<File>, Option<FileIdentity>), SourceError> {
    let open_err = |source| SourceError::Open {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).await.map_err(open_err)?;
    let metadata = file.metadata().await.map_err(open_err)?;
    Ok((BufReader::new(file), file_identity(&metadata)))
}
