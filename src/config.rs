//! Configuration file management for linkcheck.
//!
//! Settings come from three places, merged in order of increasing priority:
//!
//! 1. Default values
//! 2. Configuration file (`linkcheck.toml` or the one passed with `--config`)
//! 3. Command-line arguments
//!
//! # Example Configuration File
//!
//! ```toml
//! urls = ["https://example.com", "http://example.org"]
//! output = "text"
//! dial_timeout_secs = 5
//! http_timeout_secs = 5
//! selected_headers = ["Content-Type", "Date", "Server"]
//!
//! [rate_limit]
//! per_second = 10.0
//! burst = 10
//!
//! [prometheus]
//! enabled = false
//! address = "http://localhost:9091"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::classifier;
use crate::probe;
use crate::ratelimit::{self, RateLimiter};
use crate::render::{OutputFormat, DEFAULT_SELECTED_HEADERS};

pub const DEFAULT_CONFIG_FILE: &str = "linkcheck.toml";

/// Main configuration structure.
///
/// Every field is optional so partial configurations can be layered with
/// [`Config::merge_with`].
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    /// URLs to inspect; none means an interactive chat session
    pub urls: Option<Vec<String>>,
    /// Output format: text, json, summary
    pub output: Option<String>,
    /// Timeout for the certificate check's TCP dial and handshake
    pub dial_timeout_secs: Option<u64>,
    /// Timeout for the classifier's HTTP request
    pub http_timeout_secs: Option<u64>,
    /// Header names shown in the text reply
    pub selected_headers: Option<Vec<String>>,
    /// Admission control for chat checks
    pub rate_limit: Option<RateLimitConfig>,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// Token bucket settings for `/check` commands.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Tokens added per second
    pub per_second: Option<f64>,
    /// Bucket capacity
    pub burst: Option<u32>,
}

/// Prometheus integration configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    pub enabled: Option<bool>,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use linkcheck::config::Config;
    /// let config = Config::from_file("linkcheck.toml")?;
    /// # Ok::<(), linkcheck::config::ConfigError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Configuration with every field set to its default.
    ///
    /// # Default Values
    ///
    /// - `urls`: None (interactive session)
    /// - `output`: "text"
    /// - `dial_timeout_secs` / `http_timeout_secs`: 5
    /// - `selected_headers`: Content-Type, Date, Server
    /// - `rate_limit`: 10 per second, burst 10
    /// - `prometheus.enabled`: false
    /// - `prometheus.address`: "http://localhost:9091"
    pub fn defaults() -> Self {
        Config {
            urls: None,
            output: Some(OutputFormat::Text.to_string()),
            dial_timeout_secs: Some(probe::DEFAULT_TIMEOUT_SECS),
            http_timeout_secs: Some(classifier::DEFAULT_TIMEOUT_SECS),
            selected_headers: Some(
                DEFAULT_SELECTED_HEADERS
                    .iter()
                    .map(|h| h.to_string())
                    .collect(),
            ),
            rate_limit: Some(RateLimitConfig {
                per_second: Some(ratelimit::DEFAULT_PER_SECOND),
                burst: Some(ratelimit::DEFAULT_BURST),
            }),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// # Example
    ///
    /// ```
    /// # use linkcheck::config::Config;
    /// let defaults = Config::defaults();
    /// let file_config = Config::from_file("linkcheck.toml").unwrap_or_default();
    /// let merged = defaults.merge_with(file_config);
    /// assert!(merged.output.is_some());
    /// ```
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.urls.is_some() {
            self.urls = other.urls;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
        if other.dial_timeout_secs.is_some() {
            self.dial_timeout_secs = other.dial_timeout_secs;
        }
        if other.http_timeout_secs.is_some() {
            self.http_timeout_secs = other.http_timeout_secs;
        }
        if other.selected_headers.is_some() {
            self.selected_headers = other.selected_headers;
        }
        if let Some(other_rate) = other.rate_limit {
            if let Some(ref mut self_rate) = self.rate_limit {
                if other_rate.per_second.is_some() {
                    self_rate.per_second = other_rate.per_second;
                }
                if other_rate.burst.is_some() {
                    self_rate.burst = other_rate.burst;
                }
            } else {
                self.rate_limit = Some(other_rate);
            }
        }
        if let Some(other_prom) = other.prometheus {
            if let Some(ref mut self_prom) = self.prometheus {
                if other_prom.enabled.is_some() {
                    self_prom.enabled = other_prom.enabled;
                }
                if other_prom.address.is_some() {
                    self_prom.address = other_prom.address;
                }
            } else {
                self.prometheus = Some(other_prom);
            }
        }
        self
    }

    /// Creates a Config from command-line arguments for merging.
    ///
    /// Only the arguments that were given (`Some`) override other layers.
    /// A single `timeout_secs` applies to both the dial and the HTTP request.
    pub fn from_cli_args(
        urls: Option<Vec<String>>,
        output: Option<String>,
        timeout_secs: Option<u64>,
        prometheus: Option<bool>,
        prometheus_address: Option<String>,
    ) -> Self {
        Config {
            urls,
            output,
            dial_timeout_secs: timeout_secs,
            http_timeout_secs: timeout_secs,
            selected_headers: None,
            rate_limit: None,
            prometheus: Some(PrometheusConfig {
                enabled: prometheus,
                address: prometheus_address,
            }),
        }
    }

    /// Checks a merged configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dial_timeout_secs == Some(0) || self.http_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "timeouts must be at least one second".to_string(),
            ));
        }
        if let Some(output) = &self.output {
            OutputFormat::from_str(output).map_err(|_| {
                ConfigError::Validation(format!(
                    "unknown output format '{}', expected text, json or summary",
                    output
                ))
            })?;
        }
        if let Some(rate) = &self.rate_limit {
            if let Some(per_second) = rate.per_second {
                if !per_second.is_finite() || per_second <= 0.0 {
                    return Err(ConfigError::Validation(
                        "rate_limit.per_second must be a positive number".to_string(),
                    ));
                }
            }
        }
        if let Some(urls) = &self.urls {
            if urls.iter().any(|u| u.trim().is_empty()) {
                return Err(ConfigError::Validation("empty URL in urls".to_string()));
            }
        }
        Ok(())
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output
            .as_deref()
            .and_then(|o| OutputFormat::from_str(o).ok())
            .unwrap_or(OutputFormat::Text)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs.unwrap_or(probe::DEFAULT_TIMEOUT_SECS))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(
            self.http_timeout_secs
                .unwrap_or(classifier::DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        let rate = self.rate_limit.as_ref();
        RateLimiter::new(
            rate.and_then(|r| r.per_second)
                .unwrap_or(ratelimit::DEFAULT_PER_SECOND),
            rate.and_then(|r| r.burst).unwrap_or(ratelimit::DEFAULT_BURST),
        )
    }

    pub fn headers(&self) -> Vec<String> {
        self.selected_headers.clone().unwrap_or_else(|| {
            DEFAULT_SELECTED_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect()
        })
    }

    /// Push gateway address when pushing is enabled.
    pub fn prometheus_address(&self) -> Option<String> {
        let prom = self.prometheus.as_ref()?;
        if prom.enabled.unwrap_or(false) {
            Some(
                prom.address
                    .clone()
                    .unwrap_or_else(|| "http://localhost:9091".to_string()),
            )
        } else {
            None
        }
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            urls: Some(vec![
                "https://example.com".to_string(),
                "http://example.com".to_string(),
                "https://self-signed.badssl.com".to_string(),
                "https://expired.badssl.com".to_string(),
            ]),
            ..Config::defaults()
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (invalid values)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
