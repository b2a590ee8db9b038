//! Session state.

use acceldrm_types::{DrmError, DrmResult, SessionId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::info;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Active,
    Paused,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One continuous licence-holding period.
///
/// The id is set exactly while the state is `Active` or `Paused`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: Option<SessionId>,
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    license_duration: Duration,
    licenses_loaded: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self::idle()
    }
}

impl Session {
    #[must_use]
    pub fn idle() -> Self {
        Self {
            id: None,
            state: SessionState::Idle,
            started_at: None,
            license_duration: Duration::ZERO,
            licenses_loaded: 0,
        }
    }

    /// Starts a new active session with `id`.
    pub fn begin(&mut self, id: SessionId) {
        info!("Session {} started", id);
        *self = Self {
            id: Some(id),
            state: SessionState::Active,
            started_at: Some(Utc::now()),
            license_duration: Duration::ZERO,
            licenses_loaded: 0,
        };
    }

    pub fn pause(&mut self) -> DrmResult<()> {
        match self.state {
            SessionState::Active => {
                self.state = SessionState::Paused;
                Ok(())
            }
            state => Err(DrmError::BadUsage(format!("cannot pause a session that is {state}"))),
        }
    }

    pub fn resume(&mut self) -> DrmResult<()> {
        match self.state {
            SessionState::Paused => {
                self.state = SessionState::Active;
                Ok(())
            }
            state => Err(DrmError::BadUsage(format!("cannot resume a session that is {state}"))),
        }
    }

    /// Returns to `Idle`, clearing the id.
    pub fn close(&mut self) {
        if let Some(id) = &self.id {
            info!("Session {} closed", id);
        }
        *self = Self::idle();
    }

    pub fn record_license(&mut self, duration: Duration) {
        self.license_duration = duration;
        self.licenses_loaded += 1;
    }

    #[must_use]
    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while `Active` or `Paused`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state != SessionState::Idle
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn license_duration(&self) -> Duration {
        self.license_duration
    }

    #[must_use]
    pub fn licenses_loaded(&self) -> u32 {
        self.licenses_loaded
    }
}
