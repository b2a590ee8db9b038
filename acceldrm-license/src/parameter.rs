//! Named parameters of the get/set interface.

use acceldrm_types::{DrmError, DrmResult};
use std::fmt;
use std::str::FromStr;

/// Who may read or write a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
    /// Set from the configuration at construction, read-only afterwards.
    ReadWriteOnce,
}

impl Access {
    #[must_use]
    pub fn readable(self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    #[must_use]
    pub fn writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

macro_rules! parameters {
    ($($variant:ident => $key:literal, $access:ident;)+) => {
        /// Every recognized parameter.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Parameter {
            $($variant,)+
        }

        impl Parameter {
            /// All parameters, in table order.
            pub const ALL: &'static [Parameter] = &[$(Parameter::$variant,)+];

            /// External key string.
            #[must_use]
            pub const fn key(self) -> &'static str {
                match self {
                    $(Parameter::$variant => $key,)+
                }
            }

            #[must_use]
            pub const fn access(self) -> Access {
                match self {
                    $(Parameter::$variant => Access::$access,)+
                }
            }
        }
    };
}

parameters! {
    LicenseType => "license_type", ReadOnly;
    LicenseDuration => "license_duration", ReadOnly;
    LicenseStatus => "license_status", ReadOnly;
    LicenseTimeLeft => "license_time_left", ReadOnly;
    NumActivators => "num_activators", ReadOnly;
    ActivatorsStatus => "activators_status", ReadOnly;
    SessionId => "session_id", ReadOnly;
    SessionStatus => "session_status", ReadOnly;
    SessionState => "session_state", ReadOnly;
    MeteredData => "metered_data", ReadOnly;
    MeteringDetail => "metering_detail", ReadOnly;
    MeteringAcknowledged => "metering_acknowledged", ReadOnly;
    NumLicenseLoaded => "num_license_loaded", ReadOnly;
    DrmFrequency => "drm_frequency", ReadOnly;
    DrmFrequencyInit => "drm_frequency_init", ReadOnly;
    AxiFrequency => "axi_frequency", ReadOnly;
    FrequencyDetectionMethod => "frequency_detection_method", ReadOnly;
    ControllerVersion => "controller_version", ReadOnly;
    MailboxSize => "mailbox_size", ReadOnly;
    ProductInfo => "product_info", ReadOnly;
    TokenString => "token_string", ReadOnly;
    TokenValidity => "token_validity", ReadOnly;
    TokenTimeLeft => "token_time_left", ReadOnly;
    HealthPeriod => "health_period", ReadOnly;
    HealthRetry => "health_retry", ReadOnly;
    HealthRetrySleep => "health_retry_sleep", ReadOnly;
    ApiVersion => "api_version", ReadOnly;
    HostId => "host_id", ReadOnly;
    NodelockedRequestFile => "nodelocked_request_file", ReadOnly;
    ListAll => "list_all", ReadOnly;
    DumpAll => "dump_all", ReadOnly;
    WsRetryPeriodLong => "ws_retry_period_long", ReadWrite;
    WsRetryPeriodShort => "ws_retry_period_short", ReadWrite;
    WsRequestTimeout => "ws_request_timeout", ReadWrite;
    WsConnectionTimeout => "ws_connection_timeout", ReadWrite;
    WsApiRetryDuration => "ws_api_retry_duration", ReadWrite;
    CustomField => "custom_field", ReadWrite;
    MailboxData => "mailbox_data", ReadWrite;
    DerivedProduct => "derived_product", ReadWrite;
    LogMessageLevel => "log_message_level", ReadWrite;
    FrequencyDetectionPeriod => "frequency_detection_period", ReadWriteOnce;
    FrequencyDetectionThreshold => "frequency_detection_threshold", ReadWriteOnce;
    BypassFrequencyDetection => "bypass_frequency_detection", ReadWriteOnce;
    LogMessage => "log_message", WriteOnly;
    TriggerAsyncCallback => "trigger_async_callback", WriteOnly;
    BadOauth2Token => "bad_oauth2_token", WriteOnly;
}

impl Parameter {
    /// Looks up a parameter by key.
    ///
    /// # Errors
    ///
    /// Returns `BadArg` for an unknown key.
    pub fn from_key(key: &str) -> DrmResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.key() == key)
            .ok_or_else(|| DrmError::BadArg(format!("unknown parameter '{key}'")))
    }

    /// Fails with `BadArg` unless the parameter may be read.
    pub fn check_readable(self) -> DrmResult<()> {
        if self.access().readable() {
            Ok(())
        } else {
            Err(DrmError::BadArg(format!("parameter '{}' is write-only", self.key())))
        }
    }

    /// Fails with `BadArg` unless the parameter may be written.
    pub fn check_writable(self) -> DrmResult<()> {
        match self.access() {
            Access::ReadOnly => Err(DrmError::BadArg(format!(
                "parameter '{}' is read-only",
                self.key()
            ))),
            Access::ReadWriteOnce => Err(DrmError::BadArg(format!(
                "parameter '{}' can only be set in the configuration file",
                self.key()
            ))),
            Access::WriteOnly | Access::ReadWrite => Ok(()),
        }
    }

    /// Parameters included in `dump_all`.
    pub fn dumpable() -> impl Iterator<Item = Parameter> {
        Self::ALL
            .iter()
            .copied()
            .filter(|p| p.access().readable() && !matches!(p, Self::ListAll | Self::DumpAll))
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Parameter {
    type Err = DrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s)
    }
}
