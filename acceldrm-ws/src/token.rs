//! Bearer tokens and their cache.
//!
//! Tokens are cached in memory and in a per-identity JSON file so that later
//! engine instances reuse a still-valid token without a network call.

use acceldrm_types::{DrmError, DrmResult};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 5;

/// OAuth2 access token with its expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl AuthToken {
    /// Creates a token issued now.
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        let lifetime = i64::try_from(expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        Self {
            access_token: access_token.into(),
            expires_in,
            expires_at: Utc::now()
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Returns true if the token is not about to expire.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.expires_at - TimeDelta::seconds(EXPIRY_MARGIN_SECS) > Utc::now()
    }

    /// Time left before expiry.
    #[must_use]
    pub fn time_left(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Cache for the token of one (service URL, client id) identity.
#[derive(Debug)]
pub struct TokenCache {
    path: Option<PathBuf>,
    current: Mutex<Option<AuthToken>>,
}

impl TokenCache {
    /// Creates a cache backed by a file in `dir`, or memory-only with `None`.
    pub fn new(dir: Option<&Path>, url: &str, client_id: &str) -> Self {
        let path = dir.map(|dir| dir.join(Self::file_name(url, client_id)));
        Self {
            path,
            current: Mutex::new(None),
        }
    }

    /// Default cache directory: `<user cache dir>/acceldrm`.
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("acceldrm"))
    }

    fn file_name(url: &str, client_id: &str) -> String {
        let digest = Sha256::digest(format!("{url}|{client_id}").as_bytes());
        format!("token-{}.json", &hex::encode(digest)[..16])
    }

    fn current(&self) -> MutexGuard<'_, Option<AuthToken>> {
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Cache file location, if the cache is file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the cached token if it is still valid, reading the cache file
    /// when memory holds nothing usable.
    pub fn load(&self) -> Option<AuthToken> {
        let mut current = self.current();
        if let Some(token) = current.as_ref().filter(|t| t.is_valid()) {
            return Some(token.clone());
        }

        let path = self.path.as_ref()?;
        let text = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<AuthToken>(&text) {
            Ok(token) if token.is_valid() => {
                info!("Loaded OAuth2 token from cache file {}", path.display());
                *current = Some(token.clone());
                Some(token)
            }
            Ok(_) => {
                debug!("Cached OAuth2 token in {} has expired", path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable token cache {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Returns the in-memory token even if expired.
    #[must_use]
    pub fn peek(&self) -> Option<AuthToken> {
        self.current().clone()
    }

    /// Stores a fresh token in memory and in the cache file.
    pub fn store(&self, token: AuthToken) -> DrmResult<()> {
        if let Some(path) = &self.path {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    DrmError::ExternFail(format!(
                        "cannot create token cache directory {}: {e}",
                        dir.display()
                    ))
                })?;
            }
            let json = serde_json::to_string_pretty(&token)?;
            std::fs::write(path, json).map_err(|e| {
                DrmError::ExternFail(format!("cannot write token cache {}: {e}", path.display()))
            })?;
            info!("Saved OAuth2 token to cache file {}", path.display());
        }
        *self.current() = Some(token);
        Ok(())
    }

    /// Forgets the token in memory and on disk.
    pub fn invalidate(&self) {
        *self.current() = None;
        if let Some(path) = &self.path {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("Cannot remove token cache {}: {}", path.display(), e);
                }
            }
        }
        debug!("OAuth2 token invalidated");
    }

    /// Replaces the cached access token with an invalid value, keeping its
    /// expiry, so the next request is rejected with 401.
    pub fn corrupt(&self) {
        let mut current = self.current();
        if let Some(token) = current.as_mut() {
            token.access_token = format!("{}-invalid", token.access_token);
            if let Some(path) = &self.path {
                if let Ok(json) = serde_json::to_string_pretty(&*token) {
                    let _ = std::fs::write(path, json);
                }
            }
            warn!("OAuth2 token corrupted on request");
        }
    }

    /// Drops the in-memory copy only; the cache file stays for other instances.
    pub fn clear_memory(&self) {
        *self.current() = None;
    }
}
