//! OAuth2 client credentials.

use acceldrm_types::{DrmError, DrmResult};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Client id/secret pair used for the client-credentials grant.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Reads a credential file.
    ///
    /// With `user` set, the `client_id__<user>__`/`client_secret__<user>__`
    /// keys are used instead of the plain ones.
    pub fn from_file(path: &Path, user: Option<&str>) -> DrmResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DrmError::ExternFail(format!(
                "cannot read credential file {}: {e}",
                path.display()
            ))
        })?;
        debug!("Loaded credentials from {}", path.display());
        Self::from_json(&text, user)
    }

    /// Parses credentials from a JSON document.
    pub fn from_json(text: &str, user: Option<&str>) -> DrmResult<Self> {
        let doc: Map<String, Value> = serde_json::from_str(text)
            .map_err(|e| DrmError::BadFormat(format!("invalid credential file: {e}")))?;

        let key = |base: &str| match user {
            Some(user) => format!("{base}__{user}__"),
            None => base.to_string(),
        };
        let field = |name: String| -> DrmResult<String> {
            match doc.get(&name) {
                Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
                Some(_) => Err(DrmError::BadFormat(format!(
                    "credential '{name}' must be a non-empty string"
                ))),
                None => Err(DrmError::BadArg(format!(
                    "credential file has no '{name}' entry"
                ))),
            }
        };

        Ok(Self {
            client_id: field(key("client_id"))?,
            client_secret: field(key("client_secret"))?,
        })
    }
}
