//! Licensing web service access for acceldrm.
//!
//! Provides:
//! - Credential loading (with per-user variants)
//! - OAuth2 client-credentials tokens, cached in memory and on disk
//! - The retry policy: foreground retry budget and the adaptive
//!   long/short background scheduler
//! - [`WsClient`], which opens and updates entitlement sessions and maps
//!   every HTTP failure onto the [`acceldrm_types::DrmError`] taxonomy

mod client;
mod credentials;
mod retry;
mod token;
pub mod wire;

pub use client::{classify_status, WsClient};
pub use credentials::Credentials;
pub use retry::{
    duration_from_secs, retry_foreground, RetryPolicy, RetryScheduler, RetryState,
};
pub use token::{AuthToken, TokenCache};
pub use wire::{
    DesignReport, DrmConfigUpdate, LicenseGrant, LicenseMode, MeteringAck, MeteringReport,
    RequestKind, SessionRequest, SessionResponse,
};
