mod common;

use acceldrm_types::{DrmError, ErrorCode};
use acceldrm_ws::{
    duration_from_secs, retry_foreground, RequestKind, RetryPolicy, RetryScheduler, RetryState,
};
use common::{client, fast_policy, mount_token, request, SESSION_PATH};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Policy ──────────────────────────────────────────────────────

#[test]
fn default_policy_is_valid() {
    let policy = RetryPolicy::default();
    assert!(policy.validate().is_ok());
    assert_eq!(policy.long_period, Duration::from_secs(60));
    assert_eq!(policy.short_period, Duration::from_secs(2));
}

#[test]
fn long_period_must_exceed_short_period() {
    for (long, short) in [(2, 2), (1, 2)] {
        let policy = RetryPolicy {
            long_period: Duration::from_secs(long),
            short_period: Duration::from_secs(short),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.validate().unwrap_err().code(), ErrorCode::BadArg);
    }
}

#[test]
fn zero_request_timeout_rejected() {
    let policy = RetryPolicy {
        request_timeout: Duration::ZERO,
        ..RetryPolicy::default()
    };
    assert_eq!(policy.validate().unwrap_err().code(), ErrorCode::BadArg);
}

#[test]
fn durations_from_seconds() {
    assert_eq!(duration_from_secs("x", 1.5).unwrap(), Duration::from_millis(1500));
    assert_eq!(duration_from_secs("x", -1.0).unwrap_err().code(), ErrorCode::BadArg);
    assert_eq!(duration_from_secs("x", f64::NAN).unwrap_err().code(), ErrorCode::BadArg);
}

// ── Adaptive scheduler ──────────────────────────────────────────

fn scheduler(licence_secs: u64) -> (RetryScheduler, Instant) {
    let policy = RetryPolicy {
        long_period: Duration::from_secs(10),
        short_period: Duration::from_secs(3),
        request_timeout: Duration::from_secs(5),
        ..RetryPolicy::default()
    };
    let start = Instant::now();
    (
        RetryScheduler::new(&policy, start + Duration::from_secs(licence_secs)),
        start,
    )
}

#[test]
fn long_gap_then_short_gaps_until_deadline() {
    let (scheduler, start) = scheduler(18);
    let mut now = start;
    let mut gaps = Vec::new();
    while let Some(delay) = scheduler.next_delay(now) {
        gaps.push((scheduler.state_at(now), delay.as_secs()));
        now += delay;
    }

    assert_eq!(gaps[0], (RetryState::Long, 10));
    assert_eq!(
        gaps[1..],
        [
            (RetryState::Short, 3),
            (RetryState::Short, 3),
            (RetryState::Short, 2)
        ]
    );
}

#[test]
fn short_from_the_start_when_deadline_is_close() {
    let (scheduler, start) = scheduler(15);
    assert_eq!(scheduler.state_at(start), RetryState::Short);
    assert_eq!(scheduler.next_delay(start), Some(Duration::from_secs(3)));
}

#[test]
fn no_delay_after_deadline() {
    let (mut scheduler, start) = scheduler(18);
    assert_eq!(scheduler.next_delay(start + Duration::from_secs(18)), None);
    assert_eq!(scheduler.record_attempt(), 1);
    assert_eq!(scheduler.record_attempt(), 2);
    assert_eq!(scheduler.attempts(), 2);
}

// ── Foreground retry ────────────────────────────────────────────

#[tokio::test]
async fn foreground_retry_gives_up_with_timed_out() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let policy = fast_policy();
    let started = Instant::now();

    let err = retry_foreground(&policy, "open", || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(DrmError::WsMayRetry("busy".into()))
    })
    .await
    .unwrap_err();

    let attempts = calls.load(Ordering::SeqCst);
    assert!(attempts >= 2, "only {attempts} attempt(s)");
    match err {
        DrmError::WsTimedOut { attempts: reported, .. } => assert_eq!(reported, attempts),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn foreground_retry_disabled_surfaces_first_failure() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let policy = RetryPolicy {
        api_retry_duration: Duration::ZERO,
        ..fast_policy()
    };

    let err = retry_foreground(&policy, "open", || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(DrmError::WsMayRetry("busy".into()))
    })
    .await
    .unwrap_err();

    assert_eq!(err.code(), ErrorCode::WsMayRetry);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn foreground_retry_recovers() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let value = retry_foreground(&fast_policy(), "open", || async move {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(DrmError::WsMayRetry("busy".into()))
        } else {
            Ok(7)
        }
    })
    .await
    .unwrap();
    assert_eq!(value, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn service_unavailable_is_retried_until_budget() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let ws = client(&server, None);
    let body = request(RequestKind::Open);
    let err = retry_foreground(&ws.policy(), "open", || ws.open_session(&body))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::WsTimedOut);

    let opens = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == SESSION_PATH)
        .count();
    assert!(opens >= 2);
}

#[tokio::test]
async fn rejection_is_not_retried() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({"detail": "no entitlement"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let ws = client(&server, None);
    let body = request(RequestKind::Open);
    let err = retry_foreground(&ws.policy(), "open", || ws.open_session(&body))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DrmError::WsReqError {
            status: 400,
            message: "no entitlement".into()
        }
    );
}
