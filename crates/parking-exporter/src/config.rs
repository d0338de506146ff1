//! Exporter configuration.

use reqwest::Url;
use thiserror::Error;

use std::{
    env,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use parking_metrics::Format;

use crate::{scheduler::Schedule, upstream::DEFAULT_UPSTREAM_URL};

/// Error loading or validating [`ExporterConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for `{var}`: {message}")]
    InvalidVar {
        /// Name of the variable.
        var: &'static str,
        /// Description of the problem.
        message: String,
    },
    /// Refresh schedule parameters are invalid.
    #[error("invalid refresh schedule: {0}")]
    Schedule(&'static str),
    /// Upstream request timeout doesn't fit into the refresh interval.
    #[error("request timeout {timeout:?} must be less than the refresh interval {interval:?}")]
    Timeout {
        /// Configured request timeout.
        timeout: Duration,
        /// Configured refresh interval.
        interval: Duration,
    },
}

/// Exporter configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Address the metrics server binds to.
    pub bind_address: SocketAddr,
    /// Feature layer query endpoint of the upstream (without query parameters).
    pub upstream_url: Url,
    /// Timeout for a single upstream request.
    pub request_timeout: Duration,
    /// Schedule of refresh cycles.
    pub schedule: Schedule,
    /// Export format. If not set, the format is negotiated per request based on the `Accept` header.
    pub format: Option<Format>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            bind_address: (Ipv4Addr::UNSPECIFIED, Self::DEFAULT_PORT).into(),
            upstream_url: Url::parse(DEFAULT_UPSTREAM_URL).expect("default upstream URL is valid"),
            request_timeout: Duration::from_secs(30),
            schedule: Schedule::default(),
            format: None,
        }
    }
}

impl ExporterConfig {
    /// Default port for the metrics server.
    pub const DEFAULT_PORT: u16 = 4276;

    const BIND_ADDR_VAR: &'static str = "PARKING_EXPORTER_BIND_ADDR";
    const UPSTREAM_URL_VAR: &'static str = "PARKING_EXPORTER_UPSTREAM_URL";
    const REQUEST_TIMEOUT_VAR: &'static str = "PARKING_EXPORTER_REQUEST_TIMEOUT_SECS";
    const INTERVAL_VAR: &'static str = "PARKING_EXPORTER_INTERVAL_SECS";
    const OFFSET_VAR: &'static str = "PARKING_EXPORTER_OFFSET_SECS";
    const FORMAT_VAR: &'static str = "PARKING_EXPORTER_FORMAT";

    /// Loads configuration from environment variables, falling back to defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the variables has an invalid value, or if the resulting
    /// configuration is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let var = |name: &'static str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(raw) = var(Self::BIND_ADDR_VAR) {
            config.bind_address = parse_var(Self::BIND_ADDR_VAR, &raw, str::parse)?;
        }
        if let Some(raw) = var(Self::UPSTREAM_URL_VAR) {
            config.upstream_url = parse_var(Self::UPSTREAM_URL_VAR, &raw, Url::parse)?;
        }
        if let Some(raw) = var(Self::REQUEST_TIMEOUT_VAR) {
            config.request_timeout = parse_var(Self::REQUEST_TIMEOUT_VAR, &raw, parse_secs)?;
        }

        let mut interval = config.schedule.interval();
        let mut offset = config.schedule.offset();
        if let Some(raw) = var(Self::INTERVAL_VAR) {
            interval = parse_var(Self::INTERVAL_VAR, &raw, parse_secs)?;
        }
        if let Some(raw) = var(Self::OFFSET_VAR) {
            offset = parse_var(Self::OFFSET_VAR, &raw, parse_secs)?;
        }
        config.schedule = Schedule::new(interval, offset)?;

        if let Some(raw) = var(Self::FORMAT_VAR) {
            let format = Format::from_name(raw.trim()).ok_or_else(|| ConfigError::InvalidVar {
                var: Self::FORMAT_VAR,
                message: format!("unknown format `{raw}`; expected `openmetrics` or `prometheus`"),
            })?;
            config.format = Some(format);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that this configuration is consistent.
    ///
    /// # Errors
    ///
    /// Returns an error if the request timeout is zero or not less than the refresh interval.
    /// Otherwise, a hanging request could delay the following refresh cycles.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let interval = self.schedule.interval();
        if self.request_timeout.is_zero() || self.request_timeout >= interval {
            return Err(ConfigError::Timeout {
                timeout: self.request_timeout,
                interval,
            });
        }
        Ok(())
    }
}

fn parse_var<T, E: ToString>(
    var: &'static str,
    raw: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, ConfigError> {
    parse(raw.trim()).map_err(|err| ConfigError::InvalidVar {
        var,
        message: err.to_string(),
    })
}

fn parse_secs(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw.parse().map_err(|err| format!("{err}"))?;
    Duration::try_from_secs_f64(secs).map_err(|err| err.to_string())
}
