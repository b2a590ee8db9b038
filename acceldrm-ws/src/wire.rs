//! JSON bodies exchanged with the licensing service.

use acceldrm_types::{ProductId, SessionId};
use serde::{Deserialize, Serialize};

/// Kind of entitlement-session request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Open,
    Running,
    Health,
    Close,
}

/// Licensing mode requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseMode {
    #[serde(rename = "metering")]
    Metering,
    #[serde(rename = "nodelocked")]
    NodeLocked,
}

/// Hardware description sent with every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignReport {
    pub controller_version: String,
    pub activators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udid: Option<String>,
}

/// Usage since session start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringReport {
    pub per_activator: Vec<u64>,
    pub total: u64,
}

impl MeteringReport {
    pub fn new(per_activator: Vec<u64>) -> Self {
        let total = per_activator.iter().sum();
        Self {
            per_activator,
            total,
        }
    }
}

/// Body of an entitlement-session open or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub request: RequestKind,
    pub session_id: SessionId,
    pub mode: LicenseMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductId>,
    pub design: DesignReport,
    pub metering: MeteringReport,
    pub drm_frequency_mhz: f64,
    pub host_id: String,
}

/// Licence granted by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseGrant {
    /// Hex-encoded licence key.
    pub key: String,
    /// Licence validity in seconds.
    #[serde(rename = "timeoutSecond")]
    pub timeout_second: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringAck {
    pub acknowledged: u64,
}

/// Server-driven heartbeat settings, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrmConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_period: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_retry: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_retry_sleep: Option<f64>,
}

/// Reply to any entitlement-session request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseGrant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metering: Option<MeteringAck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drm_config: Option<DrmConfigUpdate>,
}
