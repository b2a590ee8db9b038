//! Session lifecycle against a simulated board and a mock licensing service.

mod common;

use acceldrm_hw::regmap::{activator_base, ACT_METERING_LO};
use acceldrm_license::SessionState;
use acceldrm_types::{DrmError, ErrorCode};
use common::*;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn all_unlocked(status: &Value) -> bool {
    status
        .as_array()
        .is_some_and(|a| !a.is_empty() && a.iter().all(|v| v == true))
}

fn all_locked(status: &Value) -> bool {
    status
        .as_array()
        .is_some_and(|a| !a.is_empty() && a.iter().all(|v| v == false))
}

// ── Open and close ───────────────────────────────────────────────

#[tokio::test]
async fn activate_opens_session_and_unlocks_activators() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    assert_eq!(drm.session_state(), SessionState::Idle);
    assert!(all_locked(&drm.get("activators_status").unwrap()));

    drm.activate(false).await.unwrap();

    let id = drm.get("session_id").unwrap();
    let id = id.as_str().unwrap();
    assert_eq!(id.len(), 16);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(drm.get("session_status").unwrap(), json!(true));
    assert_eq!(drm.get("session_state").unwrap(), json!("active"));
    assert_eq!(drm.get("license_status").unwrap(), json!(true));
    assert_eq!(drm.get("license_duration").unwrap(), json!(30.0));
    assert!(all_unlocked(&drm.get("activators_status").unwrap()));
    assert!(sim.license_active());

    let opens = env.session_requests().await;
    let open = opens.iter().find(|b| b["request"] == "open").unwrap();
    assert_eq!(open["mode"], "metering");
    assert_eq!(open["session_id"], json!(id));
    assert_eq!(
        open["product"],
        json!({ "vendor": "acme", "library": "accel", "name": "matrix_core" })
    );

    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn close_locks_activators_and_forgets_id() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    drm.deactivate(false).await.unwrap();

    assert_eq!(drm.session_state(), SessionState::Idle);
    assert_eq!(drm.session_id(), None);
    assert_eq!(drm.get("session_id").unwrap(), json!(""));
    assert_eq!(drm.get("session_status").unwrap(), json!(false));
    assert_eq!(drm.get("license_status").unwrap(), json!(false));
    assert!(all_locked(&drm.get("activators_status").unwrap()));
    assert_eq!(env.count("close").await, 1);
}

#[tokio::test]
async fn deactivate_on_idle_engine_is_a_no_op() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.deactivate(false).await.unwrap();
    drm.deactivate(true).await.unwrap();
    assert_eq!(drm.session_state(), SessionState::Idle);
    assert!(env.session_requests().await.is_empty());

    drm.activate(false).await.unwrap();
    drm.deactivate(false).await.unwrap();
    drm.deactivate(false).await.unwrap();
    assert_eq!(env.count("close").await, 1);
}

#[tokio::test]
async fn fresh_activation_always_gets_a_new_id() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    let first = drm.session_id().unwrap();
    drm.activate(false).await.unwrap();
    let second = drm.session_id().unwrap();
    assert_ne!(first, second);
    assert_eq!(env.count("open").await, 2);

    drm.deactivate(false).await.unwrap();
    drm.activate(true).await.unwrap();
    let third = drm.session_id().unwrap();
    assert_ne!(second, third);

    drm.deactivate(false).await.unwrap();
}

// ── Pause and resume ─────────────────────────────────────────────

#[tokio::test]
async fn pause_keeps_id_and_licence() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    let id = drm.session_id().unwrap();

    drm.deactivate(true).await.unwrap();
    assert_eq!(drm.session_state(), SessionState::Paused);
    assert_eq!(drm.session_id(), Some(id.clone()));
    assert_eq!(drm.get("session_status").unwrap(), json!(true));
    assert!(all_unlocked(&drm.get("activators_status").unwrap()));

    drm.activate(true).await.unwrap();
    assert_eq!(drm.session_state(), SessionState::Active);
    assert_eq!(drm.session_id(), Some(id));
    assert_eq!(env.count("open").await, 1);

    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn resume_on_active_session_changes_nothing() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    let id = drm.session_id();
    drm.activate(true).await.unwrap();
    assert_eq!(drm.session_id(), id);
    assert_eq!(env.count("open").await, 1);

    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn resume_after_expiry_requests_a_licence_for_the_same_session() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    let id = drm.session_id().unwrap();
    drm.deactivate(true).await.unwrap();

    sim.expire_license();
    assert_eq!(drm.get("license_status").unwrap(), json!(false));
    let running_before = env.count("running").await;

    drm.activate(true).await.unwrap();
    assert_eq!(drm.session_id(), Some(id.clone()));
    assert_eq!(drm.get("license_status").unwrap(), json!(true));
    assert!(env.count("running").await > running_before);

    let bodies = env.session_requests().await;
    assert!(bodies
        .iter()
        .filter(|b| b["request"] == "running")
        .all(|b| b.to_string().contains(id.as_str())));

    drm.deactivate(false).await.unwrap();
}

// ── Licence renewal ──────────────────────────────────────────────

#[tokio::test]
async fn next_licence_is_queued_before_the_current_one_ends() {
    let env = TestEnv::start().await;
    env.mount_sessions(1.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(drm.get("license_status").unwrap(), json!(true));
    let loaded = drm.get("num_license_loaded").unwrap().as_u64().unwrap();
    assert!(loaded >= 3, "only {loaded} licences loaded");
    assert!(env.count("running").await >= 2);
    assert!(sim.licenses_loaded() >= 3);

    drm.deactivate(false).await.unwrap();
    assert!(!sim.license_active());
}

// ── Failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_open_leaves_engine_idle() {
    let env = TestEnv::start().await;
    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "detail": "no entitlement"
        })))
        .expect(1)
        .mount(&env.server)
        .await;
    let sim = sim();
    let mut drm = env.manager(&sim);
    let mut errors = drm.async_errors();

    let err = drm.activate(false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::WsReqError);
    assert!(err.to_string().contains("no entitlement"));
    assert_eq!(drm.session_state(), SessionState::Idle);
    assert_eq!(drm.session_id(), None);
    assert!(!sim.license_active());

    let delivered = errors.take().unwrap();
    assert_eq!(delivered.code, ErrorCode::WsReqError);
}

#[tokio::test]
async fn failed_reopen_keeps_the_running_session() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    let id = drm.session_id();

    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "detail": "seat limit reached"
        })))
        .with_priority(1)
        .up_to_n_times(1)
        .mount(&env.server)
        .await;

    let err = drm.activate(false).await.unwrap_err();
    assert!(matches!(err, DrmError::WsReqError { .. }));
    assert_eq!(drm.session_state(), SessionState::Active);
    assert_eq!(drm.session_id(), id);
    assert_eq!(drm.get("license_status").unwrap(), json!(true));

    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn bus_fault_during_reopen_keeps_the_session_renewing() {
    let env = TestEnv::start().await;
    env.mount_sessions(1.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    let id = drm.session_id();

    sim.fail_read(activator_base(0) + ACT_METERING_LO, -5);
    let err = drm.activate(false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CtlrError);
    sim.clear_faults();

    assert_eq!(drm.session_state(), SessionState::Active);
    assert_eq!(drm.session_id(), id);
    assert_eq!(env.count("open").await, 1);

    // The worker outlives the failed reopen and keeps licences coming.
    let running_before = env.count("running").await;
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(env.count("running").await > running_before);
    assert_eq!(drm.get("license_status").unwrap(), json!(true));

    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn unreachable_service_times_out_within_retry_budget() {
    let env = TestEnv::start().await;
    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&env.server)
        .await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    let started = std::time::Instant::now();
    let err = drm.activate(false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::WsTimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(env.count("open").await >= 2);
    assert_eq!(drm.session_state(), SessionState::Idle);
}

#[tokio::test]
async fn inconsistent_retry_settings_fail_before_any_request() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut config = env.config();
    config.settings.ws_retry_period_long = 0.2;
    config.settings.ws_retry_period_short = 0.2;

    let err = acceldrm_license::DrmManager::with_config(
        config,
        credentials(),
        Box::new(sim.clone()),
        None,
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadArg);
    assert!(env
        .server
        .received_requests()
        .await
        .unwrap_or_default()
        .is_empty());
}

#[tokio::test]
async fn only_one_engine_per_controller() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let drm = env.manager(&sim);

    let err = acceldrm_license::DrmManager::with_config(
        env.config(),
        credentials(),
        Box::new(sim.clone()),
        None,
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadUsage);

    drop(drm);
    let again = env.manager(&sim);
    assert_eq!(again.session_state(), SessionState::Idle);
}
