//! HTTP client for the licensing service.

use crate::credentials::Credentials;
use crate::retry::{retry_foreground, RetryPolicy};
use crate::token::{AuthToken, TokenCache};
use crate::wire::{SessionRequest, SessionResponse};
use acceldrm_types::{DrmError, DrmResult};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Maps an unsuccessful HTTP status onto the error taxonomy.
///
/// The service's `detail` field is used as the message when present.
pub fn classify_status(status: u16, body: &str) -> DrmError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().chars().take(200).collect());

    match status {
        408 | 429 | 502 | 503 | 504 => DrmError::WsMayRetry(format!("HTTP {status}: {detail}")),
        400..=499 => DrmError::WsReqError {
            status,
            message: detail,
        },
        _ => DrmError::WsError(format!("HTTP {status}: {detail}")),
    }
}

fn classify_transport(err: reqwest::Error) -> DrmError {
    if err.is_timeout() {
        DrmError::WsMayRetry(format!("request timed out: {err}"))
    } else if err.is_connect() {
        DrmError::WsMayRetry(format!("cannot connect to licensing service: {err}"))
    } else if err.is_decode() {
        DrmError::BadFormat(format!("invalid response from licensing service: {err}"))
    } else {
        DrmError::WsError(format!("request failed: {err}"))
    }
}

fn build_http(policy: &RetryPolicy) -> DrmResult<Client> {
    Client::builder()
        .connect_timeout(policy.connection_timeout)
        .build()
        .map_err(|e| DrmError::ExternFail(format!("cannot create HTTP client: {e}")))
}

/// Licensing service client bound to one service URL and credential.
#[derive(Debug)]
pub struct WsClient {
    base_url: String,
    credentials: Credentials,
    tokens: TokenCache,
    policy: RwLock<RetryPolicy>,
    http: RwLock<Client>,
}

impl WsClient {
    /// Creates a client. `cache_dir` selects the token cache directory;
    /// `None` keeps tokens in memory only.
    ///
    /// # Errors
    ///
    /// Returns `BadArg` for an empty URL or an invalid policy.
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        cache_dir: Option<&Path>,
        policy: RetryPolicy,
    ) -> DrmResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(DrmError::BadArg("licensing URL is empty".into()));
        }
        policy.validate()?;

        let tokens = TokenCache::new(cache_dir, &base_url, &credentials.client_id);
        let http = build_http(&policy)?;
        debug!("Licensing service client for {}", base_url);

        Ok(Self {
            base_url,
            credentials,
            tokens,
            policy: RwLock::new(policy),
            http: RwLock::new(http),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn token_cache(&self) -> &TokenCache {
        &self.tokens
    }

    fn policy_guard(&self) -> RwLockReadGuard<'_, RetryPolicy> {
        self.policy.read().unwrap_or_else(|p| p.into_inner())
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        *self.policy_guard()
    }

    /// Replaces the retry policy, rebuilding the HTTP client when the
    /// connection timeout changes.
    pub fn set_policy(&self, policy: RetryPolicy) -> DrmResult<()> {
        policy.validate()?;
        if policy.connection_timeout != self.policy().connection_timeout {
            let http = build_http(&policy)?;
            *self.http.write().unwrap_or_else(|p| p.into_inner()) = http;
        }
        *self.policy.write().unwrap_or_else(|p| p.into_inner()) = policy;
        debug!("Retry policy updated: {:?}", policy);
        Ok(())
    }

    fn http(&self) -> Client {
        self.http.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    // ── Tokens ───────────────────────────────────────────────────

    /// Returns a valid token, requesting one within the foreground retry
    /// budget if none is cached.
    pub async fn token(&self) -> DrmResult<AuthToken> {
        if let Some(token) = self.tokens.load() {
            return Ok(token);
        }
        let policy = self.policy();
        retry_foreground(&policy, "token request", || self.fetch_token()).await
    }

    async fn current_token(&self) -> DrmResult<AuthToken> {
        match self.tokens.load() {
            Some(token) => Ok(token),
            None => self.fetch_token().await,
        }
    }

    /// Performs one client-credentials token request and caches the result.
    pub async fn fetch_token(&self) -> DrmResult<AuthToken> {
        let policy = self.policy();
        debug!("Requesting OAuth2 token from {}", self.base_url);

        let response = self
            .http()
            .post(format!("{}/o/token/", self.base_url))
            .timeout(policy.request_timeout)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }

        let body: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| DrmError::BadFormat(format!("invalid token response: {e}")))?;
        let token = AuthToken::new(
            body.access_token,
            body.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
        );
        info!("Obtained OAuth2 token valid for {} s", token.expires_in);
        self.tokens.store(token.clone())?;
        Ok(token)
    }

    /// Corrupts the cached token so the next request goes through the 401 path.
    pub fn poison_token(&self) {
        self.tokens.corrupt();
    }

    /// Drops the in-memory auth context. The on-disk cache is kept.
    pub fn release_auth(&self) {
        self.tokens.clear_memory();
    }

    // ── Entitlement sessions ─────────────────────────────────────

    /// Opens an entitlement session. Single attempt.
    pub async fn open_session(&self, body: &SessionRequest) -> DrmResult<SessionResponse> {
        let url = format!("{}/auth/api/v2/entitlement_session/", self.base_url);
        self.send_authorized(Method::POST, &url, body).await
    }

    /// Sends a `running`, `health` or `close` update. Single attempt.
    pub async fn update_session(&self, body: &SessionRequest) -> DrmResult<SessionResponse> {
        let url = format!(
            "{}/auth/api/v2/entitlement_session/{}/",
            self.base_url, body.session_id
        );
        self.send_authorized(Method::PATCH, &url, body).await
    }

    async fn send_authorized(
        &self,
        method: Method,
        url: &str,
        body: &SessionRequest,
    ) -> DrmResult<SessionResponse> {
        let token = self.current_token().await?;
        match self.send(method.clone(), url, body, &token).await {
            Err(DrmError::WsReqError { status: 401, .. }) => {
                warn!("OAuth2 token rejected, requesting a new one");
                self.tokens.invalidate();
                let token = self.fetch_token().await?;
                self.send(method, url, body, &token).await
            }
            other => other,
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: &SessionRequest,
        token: &AuthToken,
    ) -> DrmResult<SessionResponse> {
        let policy = self.policy();
        debug!("{} {} ({:?})", method, url, body.request);

        let response = self
            .http()
            .request(method, url)
            .bearer_auth(&token.access_token)
            .timeout(policy.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(SessionResponse::default());
        }
        serde_json::from_str(&text)
            .map_err(|e| DrmError::BadFormat(format!("invalid response from licensing service: {e}")))
    }
}
