//! Shared helpers: a simulated board and a mock licensing service.

#![allow(dead_code)]

use acceldrm_hw::SimulatedController;
use acceldrm_license::{AsyncCallback, DrmConfig, DrmManager};
use acceldrm_types::{ProductId, ProductInfo};
use acceldrm_ws::Credentials;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SESSION_PATH: &str = "/auth/api/v2/entitlement_session/";
pub const LICENSE_KEY: &str = "00112233445566778899AABBCCDDEEFF";

static NEXT_RESOURCE: AtomicUsize = AtomicUsize::new(0);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A two-activator board carrying product information.
pub fn sim() -> SimulatedController {
    let resource = format!("license-test-{}", NEXT_RESOURCE.fetch_add(1, Ordering::SeqCst));
    SimulatedController::new(resource).with_product_info(&ProductInfo {
        product_id: ProductId::new("acme", "accel", "matrix_core"),
        pkg_version: Some("1.0.0".into()),
    })
}

/// Mock service plus a scratch directory for tokens and licence files.
pub struct TestEnv {
    pub server: MockServer,
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn start() -> Self {
        init_tracing();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/o/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;
        Self {
            server,
            dir: TempDir::new().unwrap(),
        }
    }

    /// Fast timings so background behaviour is observable within seconds.
    pub fn config(&self) -> DrmConfig {
        let mut config = DrmConfig::new(self.server.uri());
        config.settings.ws_retry_period_long = 1.0;
        config.settings.ws_retry_period_short = 0.2;
        config.settings.ws_request_timeout = 2.0;
        config.settings.ws_connection_timeout = 1.0;
        config.settings.ws_api_retry_duration = 1.0;
        config.settings.frequency_detection_period = 30;
        config.settings.token_cache_dir = Some(self.dir.path().join("tokens"));
        config
    }

    pub fn manager(&self, sim: &SimulatedController) -> DrmManager {
        self.manager_with(self.config(), sim, None)
    }

    pub fn manager_with(
        &self,
        config: DrmConfig,
        sim: &SimulatedController,
        callback: Option<AsyncCallback>,
    ) -> DrmManager {
        DrmManager::with_config(config, credentials(), Box::new(sim.clone()), callback).unwrap()
    }

    /// Serves open, running, health and close requests. Every open grants a
    /// `licence_secs` licence and sets the heartbeat to `health_period`.
    pub async fn mount_sessions(&self, licence_secs: f64, health_period: f64) {
        Mock::given(method("POST"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(open_response(
                licence_secs,
                health_period,
            )))
            .mount(&self.server)
            .await;
        Mock::given(method("PATCH"))
            .and(path_regex(r"^/auth/api/v2/entitlement_session/[0-9A-F]{16}/$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "license": { "key": LICENSE_KEY, "timeoutSecond": licence_secs },
                "metering": { "acknowledged": 0 }
            })))
            .mount(&self.server)
            .await;
    }

    /// Overrides replies to `kind` requests. Lower `priority` values win;
    /// the catch-all session mocks use the default of 5.
    pub async fn mount_request(
        &self,
        kind: &str,
        response: ResponseTemplate,
        priority: u8,
        times: Option<u64>,
    ) {
        let mock = Mock::given(method("PATCH"))
            .and(body_partial_json(json!({ "request": kind })))
            .respond_with(response)
            .with_priority(priority);
        let mock = match times {
            Some(n) => mock.up_to_n_times(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }

    /// Bodies of every entitlement-session request received so far.
    pub async fn session_requests(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path().starts_with(SESSION_PATH))
            .filter_map(|r| serde_json::from_slice(&r.body).ok())
            .collect()
    }

    /// Number of session requests of `kind` received so far.
    pub async fn count(&self, kind: &str) -> usize {
        self.session_requests()
            .await
            .iter()
            .filter(|b| b["request"] == kind)
            .count()
    }

    pub async fn token_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/o/token/")
            .count()
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("test-client", "test-secret")
}

pub fn open_response(licence_secs: f64, health_period: f64) -> Value {
    json!({
        "license": { "key": LICENSE_KEY, "timeoutSecond": licence_secs },
        "metering": { "acknowledged": 0 },
        "drm_config": {
            "health_period": health_period,
            "health_retry": 1,
            "health_retry_sleep": 0.2
        }
    })
}

pub fn health_response(health_period: f64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "drm_config": { "health_period": health_period }
    }))
}
