//! Node-locked licensing: one request, then offline reuse of the stored licence.

mod common;

use acceldrm_license::{DrmConfig, SessionState};
use acceldrm_types::ErrorCode;
use common::*;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::Path;

fn nodelocked_config(env: &TestEnv, dir: &Path) -> DrmConfig {
    let mut config = env.config();
    config.licensing.nodelocked = true;
    config.licensing.license_dir = Some(dir.to_path_buf());
    config.design.udid = Some("board-0001".into());
    config
}

#[tokio::test]
async fn first_activation_requests_and_stores_licence() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let licences = env.dir.path().join("licences");
    let sim = sim();

    {
        let mut drm = env.manager_with(nodelocked_config(&env, &licences), &sim, None);
        assert_eq!(drm.get("license_type").unwrap(), json!("Node-Locked"));

        drm.activate(false).await.unwrap();
        assert_eq!(drm.session_state(), SessionState::Active);
        assert_eq!(drm.get("license_status").unwrap(), json!(true));
        assert_eq!(
            drm.get("activators_status").unwrap(),
            json!([true, true])
        );

        let request_file = drm.get("nodelocked_request_file").unwrap();
        let request_file = Path::new(request_file.as_str().unwrap());
        assert!(request_file.starts_with(&licences));
        let request: Value =
            serde_json::from_str(&std::fs::read_to_string(request_file).unwrap()).unwrap();
        assert_eq!(request["mode"], json!("nodelocked"));
        assert_eq!(request["design"]["udid"], json!("board-0001"));

        assert_eq!(env.count("open").await, 1);

        drm.deactivate(false).await.unwrap();
        assert_eq!(drm.get("license_status").unwrap(), json!(false));
    }

    // No renewals, heartbeats or close requests in node-locked mode.
    assert_eq!(env.session_requests().await.len(), 1);

    let stored = std::fs::read_dir(&licences)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "lic"))
        .count();
    assert_eq!(stored, 1);

    // A later engine on the same design loads the stored licence offline.
    let mut drm = env.manager_with(nodelocked_config(&env, &licences), &sim, None);
    drm.activate(false).await.unwrap();
    assert_eq!(drm.get("license_status").unwrap(), json!(true));
    assert_eq!(env.session_requests().await.len(), 1);
    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn nodelocked_mode_needs_a_licence_directory() {
    let env = TestEnv::start().await;
    let sim = sim();
    let mut config = env.config();
    config.licensing.nodelocked = true;

    let err = acceldrm_license::DrmManager::with_config(
        config,
        credentials(),
        Box::new(sim.clone()),
        None,
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadArg);
}

#[tokio::test]
async fn corrupt_licence_file_is_rejected() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let licences = env.dir.path().join("licences");
    let sim = sim();
    let mut drm = env.manager_with(nodelocked_config(&env, &licences), &sim, None);

    let request_file = drm.get("nodelocked_request_file").unwrap();
    let licence_file = Path::new(request_file.as_str().unwrap()).with_extension("lic");
    std::fs::create_dir_all(&licences).unwrap();
    std::fs::write(&licence_file, "not a licence").unwrap();

    let err = drm.activate(false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadFormat);
    assert_eq!(drm.session_state(), SessionState::Idle);
    assert!(env.session_requests().await.is_empty());
}
