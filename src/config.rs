//! Server configuration.
//!
//! Reads the classic line-oriented `key value` format:
//!
//! ```text
//! # socks5d.conf
//! port        1080
//! buffer_size 8192
//! log_level   info
//! ```
//!
//! `#` starts a comment, blank lines are skipped, and unknown keys are
//! ignored so a config file can be shared with other tools. Missing keys
//! take their defaults.

use std::path::Path;

use tracing::level_filters::LevelFilter;

use crate::error::{Error, Result};

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// TCP listen port
    pub port: u16,
    /// Size in bytes of each per-direction relay buffer
    pub buffer_size: usize,
    /// Log level name: trace/debug/info/warn/error/critical/off
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1080,
            buffer_size: 8192,
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from file contents.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for line in content.lines() {
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };

            let mut tokens = line.split_whitespace();
            let key = match tokens.next() {
                Some(key) => key,
                None => continue,
            };
            let value = tokens
                .next()
                .ok_or_else(|| Error::config(format!("missing value for key `{key}`")))?;

            match key {
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| Error::config(format!("invalid port `{value}`")))?;
                }
                "buffer_size" => {
                    config.buffer_size = value
                        .parse()
                        .map_err(|_| Error::config(format!("invalid buffer_size `{value}`")))?;
                    if config.buffer_size == 0 {
                        return Err(Error::config("buffer_size must be at least 1"));
                    }
                }
                "log_level" => {
                    config.log_level = value.to_string();
                }
                _ => {} // unknown keys are ignored
            }
        }

        Ok(config)
    }

    /// Map the configured level name to a tracing filter.
    ///
    /// `critical` maps to ERROR (tracing has no critical level) and an
    /// unrecognized name maps to OFF, matching the lookup behavior of the
    /// logging library this server originally shipped with.
    pub fn log_filter(&self) -> LevelFilter {
        match self.log_level.as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "info" => LevelFilter::INFO,
            "warn" => LevelFilter::WARN,
            "error" | "critical" => LevelFilter::ERROR,
            _ => LevelFilter::OFF,
        }
    }
}
