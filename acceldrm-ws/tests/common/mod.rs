//! Shared helpers for web service tests.

#![allow(dead_code)]

use acceldrm_types::{ProductId, SessionId};
use acceldrm_ws::{
    Credentials, DesignReport, LicenseMode, MeteringReport, RequestKind, RetryPolicy,
    SessionRequest, WsClient,
};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SESSION_PATH: &str = "/auth/api/v2/entitlement_session/";

pub fn credentials() -> Credentials {
    Credentials::new("test-client", "test-secret")
}

/// Short timings so retry tests finish quickly.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        short_period: Duration::from_millis(100),
        long_period: Duration::from_millis(500),
        request_timeout: Duration::from_secs(2),
        connection_timeout: Duration::from_secs(1),
        api_retry_duration: Duration::from_millis(450),
    }
}

pub fn client(server: &MockServer, cache_dir: Option<&Path>) -> WsClient {
    WsClient::new(&server.uri(), credentials(), cache_dir, fast_policy()).unwrap()
}

pub fn token_response(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "expires_in": 3600,
    }))
}

pub async fn mount_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/o/token/"))
        .respond_with(token_response(token))
        .mount(server)
        .await;
}

pub fn license_response() -> serde_json::Value {
    json!({
        "license": { "key": "00112233445566778899AABBCCDDEEFF", "timeoutSecond": 30 },
        "metering": { "acknowledged": 0 },
        "drm_config": { "health_period": 0, "health_retry": 0, "health_retry_sleep": 1 }
    })
}

pub fn request(kind: RequestKind) -> SessionRequest {
    SessionRequest {
        request: kind,
        session_id: SessionId::parse("0123456789ABCDEF").unwrap(),
        mode: LicenseMode::Metering,
        product: Some(ProductId::new("acme", "accel", "matrix_core")),
        design: DesignReport {
            controller_version: "4.2.0".into(),
            activators: vec!["0A:01:00:01".into()],
            board_type: None,
            udid: None,
        },
        metering: MeteringReport::new(vec![0]),
        drm_frequency_mhz: 125.0,
        host_id: "test-host".into(),
    }
}
