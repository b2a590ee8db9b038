//! Heartbeat configuration and the background session worker.
//!
//! One worker task runs per active metered session. It keeps one licence
//! queued behind the current one and sends `health` requests while the
//! heartbeat is enabled. Failures never reach the foreground: they go to the
//! async error channel.

use crate::engine::Engine;
use acceldrm_types::{DrmError, SessionId};
use acceldrm_ws::{duration_from_secs, DrmConfigUpdate, RequestKind, RetryScheduler};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Heartbeat settings, driven by the licensing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Gap between health requests; zero disables the heartbeat.
    pub period: Duration,
    /// How long a failing health request is retried.
    pub retry_timeout: Duration,
    /// Gap between health retries.
    pub retry_sleep: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            period: Duration::ZERO,
            retry_timeout: Duration::ZERO,
            retry_sleep: Duration::from_secs(1),
        }
    }
}

impl HealthConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.period.is_zero()
    }

    /// Applies the values present in `update`; invalid values are ignored.
    pub fn apply(&mut self, update: &DrmConfigUpdate) {
        let before = *self;
        let fields = [
            ("health_period", update.health_period, &mut self.period),
            ("health_retry", update.health_retry, &mut self.retry_timeout),
            ("health_retry_sleep", update.health_retry_sleep, &mut self.retry_sleep),
        ];
        for (key, value, slot) in fields {
            let Some(seconds) = value else { continue };
            match duration_from_secs(key, seconds) {
                Ok(duration) => *slot = duration,
                Err(e) => warn!("Ignoring {} from licensing service: {}", key, e),
            }
        }
        if *self != before {
            info!(
                "Health configuration: period {:.1} s, retry {:.1} s, retry sleep {:.1} s",
                self.period.as_secs_f64(),
                self.retry_timeout.as_secs_f64(),
                self.retry_sleep.as_secs_f64()
            );
        }
    }
}

/// Handle on a running background worker.
#[derive(Debug)]
pub(crate) struct SessionWorker {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionWorker {
    pub(crate) fn spawn(engine: Arc<Engine>, id: SessionId) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(engine, id, stop_rx));
        Self { stop, task }
    }

    /// Signals the worker and waits for it to finish.
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!("Session worker ended abnormally: {}", e);
            }
        }
        debug!("Session worker stopped");
    }

    /// Signals the worker without waiting.
    pub(crate) fn abort(self) {
        let _ = self.stop.send(true);
        self.task.abort();
    }
}

fn to_tokio(instant: Instant) -> tokio::time::Instant {
    tokio::time::Instant::from_std(instant)
}

async fn run(engine: Arc<Engine>, id: SessionId, mut stop: watch::Receiver<bool>) {
    let started = Instant::now();
    let mut renewal_due = Some(next_renewal(&engine, started));
    let mut renewal_retry: Option<RetryScheduler> = None;

    let health = engine.state().health;
    let mut health_due = health.is_enabled().then(|| started + health.period);
    let mut health_failures: Option<(Instant, u32)> = None;

    info!("Session worker started for {}", id);

    loop {
        let next = match (renewal_due, health_due) {
            (Some(r), Some(h)) => r.min(h),
            (Some(r), None) => r,
            (None, Some(h)) => h,
            (None, None) => break,
        };

        tokio::select! {
            () = tokio::time::sleep_until(to_tokio(next)) => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        let now = Instant::now();

        if renewal_due.is_some_and(|due| now >= due) {
            let outcome = tokio::select! {
                outcome = renew(&engine, &id) => outcome,
                _ = stop.changed() => break,
            };
            match outcome {
                Ok(()) => {
                    renewal_retry = None;
                    renewal_due = Some(next_renewal(&engine, Instant::now()));
                }
                Err(err) if !err.is_retryable() => {
                    warn!("Licence renewal rejected, stopping renewals: {}", err);
                    engine.reporter.report(&err);
                    renewal_retry = None;
                    renewal_due = None;
                }
                Err(err) => {
                    let now = Instant::now();
                    let scheduler = renewal_retry.get_or_insert_with(|| {
                        let deadline = engine.license_chain_end().unwrap_or(now);
                        RetryScheduler::new(&engine.ws.policy(), deadline)
                    });
                    let attempts = scheduler.record_attempt();
                    match scheduler.next_delay(now) {
                        Some(delay) => {
                            warn!(
                                "Licence renewal failed ({:?} period, attempt {}), retrying in {:.1} s: {}",
                                scheduler.state_at(now),
                                attempts,
                                delay.as_secs_f64(),
                                err
                            );
                            renewal_due = Some(now + delay);
                        }
                        None => {
                            engine.reporter.report(&DrmError::WsTimedOut {
                                attempts,
                                message: format!("licence renewal failed before expiry: {err}"),
                            });
                            break;
                        }
                    }
                }
            }
        }

        if health_due.is_some_and(|due| Instant::now() >= due) {
            let outcome = tokio::select! {
                outcome = engine.exchange(RequestKind::Health, &id) => outcome,
                _ = stop.changed() => break,
            };
            let now = Instant::now();
            let config = engine.state().health;
            match outcome {
                Ok(_) => {
                    health_failures = None;
                    health_due = config.is_enabled().then(|| now + config.period);
                    if health_due.is_none() {
                        info!("Health requests disabled by the licensing service");
                    }
                }
                Err(err) => {
                    let (since, attempts) = health_failures.get_or_insert((now, 0));
                    *attempts += 1;
                    if now.duration_since(*since) + config.retry_sleep > config.retry_timeout {
                        engine.reporter.report(&DrmError::WsTimedOut {
                            attempts: *attempts,
                            message: format!("health request failed: {err}"),
                        });
                        engine.state().health.period = Duration::ZERO;
                        health_due = None;
                    } else {
                        warn!(
                            "Health request failed, retrying in {:.1} s: {}",
                            config.retry_sleep.as_secs_f64(),
                            err
                        );
                        health_due = Some(now + config.retry_sleep);
                    }
                }
            }
        }
    }

    info!("Session worker for {} exiting", id);
}

/// Next renewal instant: as soon as only the current licence remains queued.
fn next_renewal(engine: &Engine, now: Instant) -> Instant {
    let duration = engine.state().session.license_duration();
    match engine.license_chain_end() {
        Ok(end) => end.checked_sub(duration).map_or(now, |due| due.max(now)),
        Err(e) => {
            warn!("Cannot read licence timer: {}", e);
            now
        }
    }
}

async fn renew(engine: &Engine, id: &SessionId) -> Result<(), DrmError> {
    debug!("Requesting next licence for {}", id);
    let response = engine.exchange(RequestKind::Running, id).await?;
    engine.load_response_license(&response)?;
    Ok(())
}
