//! Engine configuration file.
//!
//! ```json
//! {
//!   "licensing": { "url": "https://licensing.example.com", "nodelocked": false },
//!   "drm": { "frequency_mhz": 125 },
//!   "settings": { "ws_retry_period_long": 60, "ws_retry_period_short": 2 }
//! }
//! ```

use acceldrm_hw::FrequencySettings;
use acceldrm_types::{DrmError, DrmResult};
use acceldrm_ws::{duration_from_secs, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Complete configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrmConfig {
    pub licensing: LicensingConfig,
    #[serde(default)]
    pub drm: DrmSection,
    #[serde(default)]
    pub design: DesignSection,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_product: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicensingConfig {
    pub url: String,
    #[serde(default)]
    pub nodelocked: bool,
    /// Directory holding node-locked request and licence files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrmSection {
    pub frequency_mhz: f64,
    pub bypass_frequency_detection: bool,
}

impl Default for DrmSection {
    fn default() -> Self {
        Self {
            frequency_mhz: 125.0,
            bypass_frequency_detection: false,
        }
    }
}

/// Board identity forwarded to the licensing service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udid: Option<String>,
}

/// Tunables. Durations are seconds except `frequency_detection_period` (ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ws_retry_period_long: f64,
    pub ws_retry_period_short: f64,
    pub ws_request_timeout: f64,
    pub ws_connection_timeout: f64,
    pub ws_api_retry_duration: f64,
    pub frequency_detection_period: u64,
    pub frequency_detection_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_cache_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_user: Option<String>,
    pub log_message_level: LogLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ws_retry_period_long: 60.0,
            ws_retry_period_short: 2.0,
            ws_request_timeout: 30.0,
            ws_connection_timeout: 10.0,
            ws_api_retry_duration: 60.0,
            frequency_detection_period: 100,
            frequency_detection_threshold: 12.0,
            token_cache_dir: None,
            credential_user: None,
            log_message_level: LogLevel::Info,
        }
    }
}

impl DrmConfig {
    /// Creates a configuration with default settings for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            licensing: LicensingConfig {
                url: url.into(),
                nodelocked: false,
                license_dir: None,
            },
            drm: DrmSection::default(),
            design: DesignSection::default(),
            settings: Settings::default(),
            derived_product: None,
        }
    }

    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> DrmResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DrmError::ExternFail(format!(
                "cannot read configuration file {}: {e}",
                path.display()
            ))
        })?;
        let config = Self::from_json(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a configuration document.
    pub fn from_json(text: &str) -> DrmResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| DrmError::BadFormat(format!("invalid configuration file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value that does not need hardware or network access.
    pub fn validate(&self) -> DrmResult<()> {
        if self.licensing.url.trim().is_empty() {
            return Err(DrmError::BadArg("licensing.url must not be empty".into()));
        }
        if self.licensing.nodelocked && self.licensing.license_dir.is_none() {
            return Err(DrmError::BadArg(
                "licensing.license_dir is required in node-locked mode".into(),
            ));
        }
        self.retry_policy()?.validate()?;

        let threshold = self.settings.frequency_detection_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(DrmError::BadArg(format!(
                "frequency_detection_threshold must be a positive percentage, got {threshold}"
            )));
        }
        if self.settings.frequency_detection_period == 0 {
            return Err(DrmError::BadArg(
                "frequency_detection_period must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Retry policy from the `ws_*` settings.
    pub fn retry_policy(&self) -> DrmResult<RetryPolicy> {
        let s = &self.settings;
        Ok(RetryPolicy {
            short_period: duration_from_secs("ws_retry_period_short", s.ws_retry_period_short)?,
            long_period: duration_from_secs("ws_retry_period_long", s.ws_retry_period_long)?,
            request_timeout: duration_from_secs("ws_request_timeout", s.ws_request_timeout)?,
            connection_timeout: duration_from_secs(
                "ws_connection_timeout",
                s.ws_connection_timeout,
            )?,
            api_retry_duration: duration_from_secs(
                "ws_api_retry_duration",
                s.ws_api_retry_duration,
            )?,
        })
    }

    #[must_use]
    pub fn frequency_settings(&self) -> FrequencySettings {
        FrequencySettings {
            nominal_mhz: self.drm.frequency_mhz,
            period: Duration::from_millis(self.settings.frequency_detection_period),
            threshold_percent: self.settings.frequency_detection_threshold,
            bypass: self.drm.bypass_frequency_detection,
        }
    }
}

/// Level used for caller-supplied log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Emits `message` at this level.
    pub fn emit(self, message: &str) {
        match self {
            Self::Error => error!(target: "acceldrm::user", "{}", message),
            Self::Warn => warn!(target: "acceldrm::user", "{}", message),
            Self::Info => info!(target: "acceldrm::user", "{}", message),
            Self::Debug => debug!(target: "acceldrm::user", "{}", message),
            Self::Trace => trace!(target: "acceldrm::user", "{}", message),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = DrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(DrmError::BadArg(format!("unknown log level '{other}'"))),
        }
    }
}
