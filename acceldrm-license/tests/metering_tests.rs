//! Usage aggregation across activators and consistency checks.

mod common;

use acceldrm_license::MeteringDiagnosis;
use acceldrm_types::ErrorCode;
use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn metered_data_sums_usage_since_session_start() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    sim.add_usage(0, 1000);
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    assert_eq!(drm.get("metered_data").unwrap(), json!(0));

    sim.add_usage(0, 10);
    sim.add_usage(1, 5);
    assert_eq!(drm.get("metered_data").unwrap(), json!(15));
    assert_eq!(drm.get("metering_detail").unwrap(), json!([10, 5]));

    sim.add_usage(1, 7);
    assert_eq!(drm.get("metered_data").unwrap(), json!(22));

    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn close_reports_usage_and_resets_tallies() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    sim.add_usage(0, 3);
    sim.add_usage(1, 4);
    drm.deactivate(false).await.unwrap();

    let close = env
        .session_requests()
        .await
        .into_iter()
        .find(|b| b["request"] == "close")
        .unwrap();
    assert_eq!(close["metering"]["total"], json!(7));
    assert_eq!(close["metering"]["per_activator"], json!([3, 4]));

    assert_eq!(drm.get("metered_data").unwrap(), json!(0));

    // The next session starts from the current hardware counters.
    drm.activate(false).await.unwrap();
    sim.add_usage(0, 2);
    assert_eq!(drm.get("metered_data").unwrap(), json!(2));
    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn pause_keeps_tallies() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    drm.activate(false).await.unwrap();
    sim.add_usage(0, 9);
    drm.deactivate(true).await.unwrap();
    assert_eq!(drm.get("metered_data").unwrap(), json!(9));
    drm.activate(true).await.unwrap();
    sim.add_usage(0, 1);
    assert_eq!(drm.get("metered_data").unwrap(), json!(10));

    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn acknowledged_usage_comes_from_the_service() {
    let env = TestEnv::start().await;
    env.mount_request(
        "running",
        wiremock::ResponseTemplate::new(200).set_body_json(json!({
            "license": { "key": LICENSE_KEY, "timeoutSecond": 30.0 },
            "metering": { "acknowledged": 42 }
        })),
        1,
        None,
    )
    .await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);

    assert_eq!(drm.get("metering_acknowledged").unwrap(), json!(0));
    drm.activate(false).await.unwrap();
    sim.expire_license();
    drm.deactivate(true).await.unwrap();
    drm.activate(true).await.unwrap();
    assert_eq!(drm.get("metering_acknowledged").unwrap(), json!(42));

    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn counter_going_backwards_is_reported_and_ignored() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);
    let mut errors = drm.async_errors();

    drm.activate(false).await.unwrap();
    sim.add_usage(0, 50);
    assert_eq!(drm.get("metered_data").unwrap(), json!(50));

    sim.set_metering(0, 10);
    assert_eq!(drm.get("metered_data").unwrap(), json!(50));
    let err = errors.take().unwrap();
    assert_eq!(err.code, ErrorCode::CtlrError);

    drm.deactivate(false).await.unwrap();
}

// ── Consistency check ────────────────────────────────────────────

#[tokio::test]
async fn check_metering_diagnoses_each_activator() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let mut drm = env.manager(&sim);
    let mut errors = drm.async_errors();

    drm.activate(false).await.unwrap();
    sim.add_usage(0, 10);
    sim.add_usage(1, 20);
    assert_eq!(drm.get("metered_data").unwrap(), json!(30));

    let checks = drm.check_metering(&[10, 20]).unwrap();
    assert!(checks.iter().all(|c| c.diagnosis.is_consistent()));
    assert!(errors.take().is_none());

    // Usage the local tally has not seen yet, and a caller who agrees with
    // the hardware: the tally is the odd one out.
    sim.add_usage(0, 5);
    let checks = drm.check_metering(&[15, 20]).unwrap();
    assert_eq!(checks[0].diagnosis, MeteringDiagnosis::LocalTallyCorrupted);
    assert_eq!(checks[1].diagnosis, MeteringDiagnosis::Consistent);
    assert_eq!(errors.take().unwrap().code, ErrorCode::CtlrError);

    // Caller agrees with the tally: the controller moved on its own.
    let checks = drm.check_metering(&[10, 20]).unwrap();
    assert_eq!(checks[0].diagnosis, MeteringDiagnosis::ControllerCorrupted);
    assert_eq!(checks[0].local, 10);
    assert_eq!(checks[0].hardware, 15);

    drm.deactivate(false).await.unwrap();
}

#[tokio::test]
async fn check_metering_rejects_wrong_length() {
    let env = TestEnv::start().await;
    env.mount_sessions(30.0, 0.0).await;
    let sim = sim();
    let drm = env.manager(&sim);

    let err = drm.check_metering(&[1]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadArg);
}
