// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::Url;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::buffer::BufferConfig;
use crate::error::ConfigError;
use crate::sink::HttpSinkConfig;

pub const ENV_LOG_FILE: &str = "LOGCOLLECTOR_LOGFILE";
pub const ENV_URL: &str = "ZINC_URL";
pub const ENV_USER: &str = "ZINC_USER";
pub const ENV_PASSWORD: &str = "ZINC_PASSWORD";
pub const ENV_INDEX: &str = "LOGCOLLECTOR_INDEXNAME";
pub const ENV_BUFFER_SIZE: &str = "LOGCOLLECTOR_BUFFERSIZE";
pub const ENV_BUFFER_TIMEOUT: &str = "LOGCOLLECTOR_BUFFERTIMEOUT";
pub const ENV_POLL_INTERVAL_MS: &str = "LOGCOLLECTOR_POLL_INTERVAL_MS";
pub const ENV_REQUEST_TIMEOUT: &str = "LOGCOLLECTOR_REQUEST_TIMEOUT";
pub const ENV_RESTART_BACKOFF: &str = "LOGCOLLECTOR_RESTART_BACKOFF";
pub const ENV_LOG_LEVEL: &str = "LOGCOLLECTOR_LOG_LEVEL";
pub const ENV_ENV_FILE: &str = "LOGCOLLECTOR_ENV_FILE";

/// Env file read when `LOGCOLLECTOR_ENV_FILE` is unset
pub const DEFAULT_ENV_FILE: &str = ".env";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LOG_LEVEL: &str = "info";
/// Upper bound for every duration setting; keeps deadline arithmetic in range.
const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for one collector: a tailed file and the index it ships to
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// File to tail
    pub file_path: PathBuf,
    /// Base URL of the indexing service, without the bulk path
    pub url: String,
    pub user: String,
    pub password: String,
    /// Destination index name
    pub index: String,
    /// Record count that forces a flush
    pub buffer_size: usize,
    /// Time since the last append that forces a flush
    pub flush_timeout: Duration,
    /// How often the tailer checks the file for new data
    pub poll_interval: Duration,
    /// Timeout for a single bulk request
    pub request_timeout: Duration,
    /// Delay before reopening the file after a source error; `None` ends ingestion instead
    pub restart_backoff: Option<Duration>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl CollectorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create configuration from environment variables, falling back to the
    /// entries of an env file for names the environment does not set. A
    /// missing file is the same as an empty one.
    pub fn from_env_with_file(path: &Path) -> Result<Self, ConfigError> {
        let file_vars = read_env_file(path)?;
        Self::from_lookup(|name| env::var(name).ok().or_else(|| file_vars.get(name).cloned()))
    }

    /// Create configuration from any key/value source, e.g. a map in tests
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let optional = |name: &'static str| -> Option<String> {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let buffer_size = parse_number(ENV_BUFFER_SIZE, &required(ENV_BUFFER_SIZE)?)?;
        let flush_timeout = Duration::from_secs(parse_number(
            ENV_BUFFER_TIMEOUT,
            &required(ENV_BUFFER_TIMEOUT)?,
        )?);
        let poll_interval = optional(ENV_POLL_INTERVAL_MS)
            .map(|value| parse_number(ENV_POLL_INTERVAL_MS, &value).map(Duration::from_millis))
            .transpose()?
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let request_timeout = optional(ENV_REQUEST_TIMEOUT)
            .map(|value| parse_number(ENV_REQUEST_TIMEOUT, &value).map(Duration::from_secs))
            .transpose()?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let restart_backoff = optional(ENV_RESTART_BACKOFF)
            .map(|value| parse_number(ENV_RESTART_BACKOFF, &value).map(Duration::from_secs))
            .transpose()?;

        let config = Self {
            file_path: PathBuf::from(required(ENV_LOG_FILE)?),
            url: required(ENV_URL)?,
            user: required(ENV_USER)?,
            password: required(ENV_PASSWORD)?,
            index: required(ENV_INDEX)?,
            buffer_size: usize::try_from(buffer_size).map_err(|_| ConfigError::Invalid {
                name: ENV_BUFFER_SIZE,
                reason: format!("{buffer_size} is too large"),
            })?,
            flush_timeout,
            poll_interval,
            request_timeout,
            restart_backoff,
            log_level: optional(ENV_LOG_LEVEL)
                .map(|level| level.to_lowercase())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing(ENV_LOG_FILE));
        }

        match Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::Invalid {
                    name: ENV_URL,
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                })
            }
            Err(e) => {
                return Err(ConfigError::Invalid {
                    name: ENV_URL,
                    reason: e.to_string(),
                })
            }
        }

        for (name, value) in [
            (ENV_USER, &self.user),
            (ENV_PASSWORD, &self.password),
            (ENV_INDEX, &self.index),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }

        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                name: ENV_BUFFER_SIZE,
                reason: "must be greater than 0".to_string(),
            });
        }
        for (name, duration) in [
            (ENV_BUFFER_TIMEOUT, self.flush_timeout),
            (ENV_POLL_INTERVAL_MS, self.poll_interval),
            (ENV_REQUEST_TIMEOUT, self.request_timeout),
        ] {
            if duration.is_zero() {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must be greater than 0".to_string(),
                });
            }
            check_max_duration(name, duration)?;
        }
        if let Some(backoff) = self.restart_backoff {
            check_max_duration(ENV_RESTART_BACKOFF, backoff)?;
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid {
                name: ENV_LOG_LEVEL,
                reason: format!(
                    "'{}' is not one of: trace, debug, info, warn, error",
                    self.log_level
                ),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            index: self.index.clone(),
            size_threshold: self.buffer_size,
            flush_timeout: self.flush_timeout,
        }
    }

    #[must_use]
    pub fn sink_config(&self) -> HttpSinkConfig {
        HttpSinkConfig {
            base_url: self.url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let env_file_err = |e: dotenvy::Error| ConfigError::EnvFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    match dotenvy::from_path_iter(path) {
        Ok(entries) => entries
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(env_file_err),
        Err(e) if e.not_found() => {
            debug!("LOGS | No env file at {}", path.display());
            Ok(HashMap::new())
        }
        Err(e) => Err(env_file_err(e)),
    }
}

fn check_max_duration(name: &'static str, duration: Duration) -> Result<(), ConfigError> {
    if duration > MAX_DURATION {
        return Err(ConfigError::Invalid {
            name,
            reason: format!(
                "{} s exceeds the maximum of {} s",
                duration.as_secs(),
                MAX_DURATION.as_secs()
            ),
        });
    }
    Ok(())
}

fn parse_number(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("'{value}' is not a non-negative integer: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            (ENV_LOG_FILE, "/var/log/app.log"),
            (ENV_URL, "http://localhost:4080"),
            (ENV_USER, "admin"),
            (ENV_PASSWORD, "secret"),
            (ENV_INDEX, "app-logs"),
            (ENV_BUFFER_SIZE, "100"),
            (ENV_BUFFER_TIMEOUT, "10"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<CollectorConfig, ConfigError> {
        CollectorConfig::from_lookup(|name| env.get(name).map(|v| (*v).to_string()))
    }

    #[test]
    fn test_full_config_with_defaults() {
        let config = load(&base_env()).unwrap();

        assert_eq!(config.file_path, PathBuf::from("/var/log/app.log"));
        assert_eq!(config.url, "http://localhost:4080");
        assert_eq!(config.user, "admin");
        assert_eq!(config.password, "secret");
        assert_eq!(config.index, "app-logs");
        assert_eq!(config.buffer_size, 100);
        assert_eq!(config.flush_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.restart_backoff, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_optional_settings() {
        let mut env = base_env();
        env.insert(ENV_POLL_INTERVAL_MS, "50");
        env.insert(ENV_REQUEST_TIMEOUT, "3");
        env.insert(ENV_RESTART_BACKOFF, "2");
        env.insert(ENV_LOG_LEVEL, "DEBUG");

        let config = load(&env).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.restart_backoff, Some(Duration::from_secs(2)));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_each_required_setting_is_enforced() {
        for name in [
            ENV_LOG_FILE,
            ENV_URL,
            ENV_USER,
            ENV_PASSWORD,
            ENV_INDEX,
            ENV_BUFFER_SIZE,
            ENV_BUFFER_TIMEOUT,
        ] {
            let mut env = base_env();
            env.remove(name);
            match load(&env) {
                Err(ConfigError::Missing(missing)) => assert_eq!(missing, name),
                other => panic!("expected {name} to be required, got {other:?}"),
            }

            let mut env = base_env();
            env.insert(name, "   ");
            assert!(load(&env).is_err(), "blank {name} should be rejected");
        }
    }

    #[test]
    fn test_invalid_numbers() {
        for (name, value) in [
            (ENV_BUFFER_SIZE, "0"),
            (ENV_BUFFER_SIZE, "ten"),
            (ENV_BUFFER_SIZE, "-1"),
            (ENV_BUFFER_TIMEOUT, "0"),
            (ENV_BUFFER_TIMEOUT, "1.5"),
            (ENV_POLL_INTERVAL_MS, "0"),
            (ENV_REQUEST_TIMEOUT, "soon"),
            (ENV_RESTART_BACKOFF, "x"),
        ] {
            let mut env = base_env();
            env.insert(name, value);
            match load(&env) {
                Err(ConfigError::Invalid { name: invalid, .. }) => assert_eq!(invalid, name),
                other => panic!("expected {name}={value} to be invalid, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_durations_beyond_maximum_are_rejected() {
        for (name, value) in [
            (ENV_BUFFER_TIMEOUT, "18446744073709551615"),
            (ENV_BUFFER_TIMEOUT, "86401"),
            (ENV_REQUEST_TIMEOUT, "18446744073709551615"),
            (ENV_RESTART_BACKOFF, "18446744073709551615"),
            (ENV_POLL_INTERVAL_MS, "86400001"),
        ] {
            let mut env = base_env();
            env.insert(name, value);
            match load(&env) {
                Err(ConfigError::Invalid { name: invalid, .. }) => assert_eq!(invalid, name),
                other => panic!("expected {name}={value} to be rejected, got {other:?}"),
            }
        }

        let mut env = base_env();
        env.insert(ENV_BUFFER_TIMEOUT, "86400");
        assert_eq!(
            load(&env).unwrap().flush_timeout,
            Duration::from_secs(86_400)
        );
    }

    #[test]
    fn test_env_file_fills_unset_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# collector settings\n\
             LOGCOLLECTOR_LOGFILE=/srv/app.log\n\
             ZINC_URL=http://zinc:4080\n\
             ZINC_USER=admin\n\
             ZINC_PASSWORD=\"s3cret\"\n\
             LOGCOLLECTOR_INDEXNAME=from-file\n\
             LOGCOLLECTOR_BUFFERSIZE=5\n\
             LOGCOLLECTOR_BUFFERTIMEOUT=2\n",
        )
        .unwrap();

        let config = CollectorConfig::from_env_with_file(&path).unwrap();
        assert_eq!(config.file_path, PathBuf::from("/srv/app.log"));
        assert_eq!(config.url, "http://zinc:4080");
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.index, "from-file");
        assert_eq!(config.buffer_size, 5);
        assert_eq!(config.flush_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_missing_env_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("absent.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn test_malformed_env_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "ZINC_URL='unterminated\n").unwrap();

        assert!(matches!(
            CollectorConfig::from_env_with_file(&path),
            Err(ConfigError::EnvFile { .. })
        ));
    }

    #[test]
    fn test_invalid_url() {
        for url in ["localhost:4080", "ftp://localhost", "not a url"] {
            let mut env = base_env();
            env.insert(ENV_URL, url);
            assert!(
                matches!(load(&env), Err(ConfigError::Invalid { name: ENV_URL, .. })),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_log_level() {
        let mut env = base_env();
        env.insert(ENV_LOG_LEVEL, "verbose");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid {
                name: ENV_LOG_LEVEL,
                ..
            })
        ));
    }

    #[test]
    fn test_derived_configs() {
        let config = load(&base_env()).unwrap();

        let buffer = config.buffer_config();
        assert_eq!(buffer.index, "app-logs");
        assert_eq!(buffer.size_threshold, 100);
        assert_eq!(buffer.flush_timeout, Duration::from_secs(10));

        let sink = config.sink_config();
        assert_eq!(sink.base_url, "http://localhost:4080");
        assert_eq!(sink.user, "admin");
        assert_eq!(sink.password, "secret");
    }
}
