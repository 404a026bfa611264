//! Configuration management for the Tollgate filter.
//!
//! The gateway hands the filter a JSON object once per route attachment.
//! Absent fields fall back to defaults and the result is validated before the
//! filter sees any request.

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{Result, TollgateError};
use crate::ratelimit::Period;

/// Status code sent when a request is rejected and none is configured.
pub const DEFAULT_ERROR_CODE: u16 = 429;
/// Response body sent when a request is rejected and none is configured.
pub const DEFAULT_ERROR_MESSAGE: &str = "API rate limit exceeded!";

/// How the rate limited subject is identified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitBy {
    /// The client's source address
    #[default]
    Ip,
    /// The value of a configured request header
    Header,
    /// The request path
    Path,
}

/// Where counters are kept.
///
/// Only the gateway's shared store is supported; any other configured
/// policy falls back to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Policy {
    /// The gateway's shared key-value store
    #[default]
    Local,
}

/// Immutable per-attachment filter configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawFilterConfig")]
pub struct FilterConfig {
    /// Requests allowed per second (0 disables the window)
    pub second: i32,
    /// Requests allowed per minute
    pub minute: i32,
    /// Requests allowed per hour
    pub hour: i32,
    /// Requests allowed per day
    pub day: i32,
    /// Requests allowed per month
    pub month: i32,
    /// Requests allowed per year
    pub year: i32,

    /// Identifier strategy
    pub limit_by: LimitBy,
    /// Header holding the identifier when `limit_by` is `header`
    pub header_name: Option<String>,
    /// Counter policy
    pub policy: Policy,

    /// Admit requests when the counter store cannot be read
    pub fault_tolerant: bool,
    /// Omit the aggregate `X-RateLimit-*` headers
    pub hide_client_headers: bool,
    /// Status code of the rejection response
    pub error_code: u16,
    /// Body of the rejection response
    pub error_message: String,
}

/// Wire form of the configuration, before defaults are applied.
#[derive(Debug, Deserialize)]
struct RawFilterConfig {
    #[serde(default)]
    second: i32,
    #[serde(default)]
    minute: i32,
    #[serde(default)]
    hour: i32,
    #[serde(default)]
    day: i32,
    #[serde(default)]
    month: i32,
    #[serde(default)]
    year: i32,
    limit_by: Option<LimitBy>,
    header_name: Option<String>,
    policy: Option<String>,
    #[serde(default)]
    fault_tolerant: bool,
    #[serde(default)]
    hide_client_headers: bool,
    #[serde(default)]
    error_code: u16,
    error_message: Option<String>,
}

impl TryFrom<RawFilterConfig> for FilterConfig {
    type Error = TollgateError;

    fn try_from(raw: RawFilterConfig) -> Result<Self> {
        let limit_by = raw.limit_by.unwrap_or_else(|| {
            debug!(field = "limit_by", value = "ip", "Applying configuration default");
            LimitBy::Ip
        });

        let policy = match raw.policy.as_deref() {
            None => {
                debug!(field = "policy", value = "local", "Applying configuration default");
                Policy::Local
            }
            Some("local") => Policy::Local,
            Some(other) => {
                warn!(field = "policy", value = other, "Unsupported counter policy, using local");
                Policy::Local
            }
        };

        let error_code = if raw.error_code == 0 {
            debug!(field = "error_code", value = DEFAULT_ERROR_CODE, "Applying configuration default");
            DEFAULT_ERROR_CODE
        } else {
            raw.error_code
        };

        let error_message = raw.error_message.unwrap_or_else(|| {
            debug!(field = "error_message", "Applying configuration default");
            DEFAULT_ERROR_MESSAGE.to_string()
        });

        let config = Self {
            second: raw.second,
            minute: raw.minute,
            hour: raw.hour,
            day: raw.day,
            month: raw.month,
            year: raw.year,
            limit_by,
            header_name: raw.header_name,
            policy,
            fault_tolerant: raw.fault_tolerant,
            hide_client_headers: raw.hide_client_headers,
            error_code,
            error_message,
        };
        config.validate()?;

        Ok(config)
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            second: 0,
            minute: 0,
            hour: 0,
            day: 0,
            month: 0,
            year: 0,
            limit_by: LimitBy::Ip,
            header_name: None,
            policy: Policy::Local,
            fault_tolerant: false,
            hide_client_headers: false,
            error_code: DEFAULT_ERROR_CODE,
            error_message: DEFAULT_ERROR_MESSAGE.to_string(),
        }
    }
}

impl FilterConfig {
    /// Decode the JSON payload handed over by the gateway.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TollgateError::Config(format!("Failed to parse filter config: {}", e)))
    }

    /// Load configuration from a YAML or JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading filter configuration");

        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| TollgateError::Config(format!("Failed to parse filter config: {}", e)))
    }

    /// The configured limit for a period. Zero or negative means disabled.
    pub fn limit(&self, period: Period) -> i32 {
        match period {
            Period::Second => self.second,
            Period::Minute => self.minute,
            Period::Hour => self.hour,
            Period::Day => self.day,
            Period::Month => self.month,
            Period::Year => self.year,
        }
    }

    /// Periods with an enabled limit, in enumeration order.
    pub fn tracked_periods(&self) -> impl Iterator<Item = (Period, i32)> + '_ {
        Period::ALL
            .into_iter()
            .map(|period| (period, self.limit(period)))
            .filter(|(_, limit)| *limit > 0)
    }

    fn validate(&self) -> Result<()> {
        if self.limit_by == LimitBy::Header
            && self.header_name.as_deref().map_or(true, str::is_empty)
        {
            return Err(TollgateError::Config(
                "header_name is required when limit_by is header".to_string(),
            ));
        }

        if !(100..=599).contains(&self.error_code) {
            return Err(TollgateError::Config(format!(
                "error_code {} is not a valid HTTP status",
                self.error_code
            )));
        }

        Ok(())
    }
}
