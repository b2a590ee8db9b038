//! The session controller exposed to applications.

use crate::config::{DrmConfig, LogLevel};
use crate::engine::{Engine, EngineState};
use crate::health::{HealthConfig, SessionWorker};
use crate::metering::{ActivatorCheck, MeteringAggregator};
use crate::nodelocked::NodeLockedFiles;
use crate::parameter::Parameter;
use crate::reporter::{AsyncCallback, AsyncErrorReporter, AsyncErrorSlot};
use crate::session::{Session, SessionState};
use acceldrm_hw::{Controller, Design, FrequencyCalibrator, HardwareHandle, RegisterBus};
use acceldrm_types::{DrmError, DrmResult, ProductId, SessionId};
use acceldrm_ws::{
    duration_from_secs, retry_foreground, Credentials, LicenseGrant, MeteringReport,
    RequestKind, RetryPolicy, TokenCache, WsClient,
};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Licensing engine bound to one DRM controller.
///
/// Session operations are async and must run inside a tokio runtime; the
/// background worker is a tokio task.
pub struct DrmManager {
    engine: Arc<Engine>,
    worker: Option<SessionWorker>,
}

impl std::fmt::Debug for DrmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmManager")
            .field("resource", &self.engine.hw.resource())
            .field("worker", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl DrmManager {
    /// Builds an engine from a configuration file and a credential file.
    pub fn new(
        config_path: &Path,
        credentials_path: &Path,
        bus: Box<dyn RegisterBus>,
        callback: Option<AsyncCallback>,
    ) -> DrmResult<Self> {
        let config = DrmConfig::from_file(config_path)?;
        let credentials =
            Credentials::from_file(credentials_path, config.settings.credential_user.as_deref())?;
        Self::with_config(config, credentials, bus, callback)
    }

    /// Builds an engine from an in-memory configuration.
    ///
    /// Configuration is validated before the hardware is touched; the
    /// controller self-test, activator enumeration and frequency calibration
    /// follow. No network request is made.
    pub fn with_config(
        config: DrmConfig,
        credentials: Credentials,
        bus: Box<dyn RegisterBus>,
        callback: Option<AsyncCallback>,
    ) -> DrmResult<Self> {
        config.validate()?;
        let policy = config.retry_policy()?;
        let reporter = AsyncErrorReporter::new(callback);

        let hw = Arc::new(HardwareHandle::acquire(bus)?);
        let controller = Controller::open(Arc::clone(&hw))?;
        let design = Design::enumerate(&hw)?;

        let product_info = controller.product_info()?;
        let product = match (&product_info, &config.derived_product) {
            (Some(info), Some(derived)) => Some(info.product_id.derive(derived)?),
            (None, Some(_)) => {
                return Err(DrmError::BadArg(
                    "derived_product requires product information in the design".into(),
                ));
            }
            (info, None) => info.as_ref().map(|i| i.product_id.clone()),
        };

        let frequency = config.frequency_settings();
        let calibration = FrequencyCalibrator::new(&controller, &frequency).calibrate()?;
        if let Some(warning) = &calibration.warning {
            reporter.report(warning);
        }

        let cache_dir = config
            .settings
            .token_cache_dir
            .clone()
            .or_else(TokenCache::default_dir);
        let ws = WsClient::new(&config.licensing.url, credentials, cache_dir.as_deref(), policy)?;

        let nodelocked = match (config.licensing.nodelocked, &config.licensing.license_dir) {
            (true, Some(dir)) => Some(NodeLockedFiles::for_design(
                dir,
                product_info.as_ref().map(|i| &i.product_id),
                config.design.udid.as_deref(),
                &design.vlnvs(),
            )),
            _ => None,
        };

        let host_id = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());

        info!(
            "DRM manager ready: {} activator(s), controller {}, {:.3} MHz, {} mode",
            design.len(),
            controller.version(),
            calibration.drm_mhz,
            if nodelocked.is_some() { "node-locked" } else { "metering" }
        );

        let state = EngineState {
            session: Session::idle(),
            metering: MeteringAggregator::new(design.len()),
            health: HealthConfig::default(),
            product,
            log_level: config.settings.log_message_level,
        };

        Ok(Self {
            engine: Arc::new(Engine {
                hw,
                controller,
                design,
                ws,
                reporter,
                calibration,
                frequency,
                board: config.design,
                host_id,
                product_info,
                nodelocked,
                state: Mutex::new(state),
            }),
            worker: None,
        })
    }

    /// Observer of the async error channel.
    #[must_use]
    pub fn async_errors(&self) -> AsyncErrorSlot {
        self.engine.reporter.subscribe()
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.engine.state().session.state()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.engine.state().session.id().cloned()
    }

    fn report<T>(&self, result: DrmResult<T>) -> DrmResult<T> {
        if let Err(e) = &result {
            self.engine.reporter.report(e);
        }
        result
    }

    // ── Session lifecycle ────────────────────────────────────────

    /// Starts or resumes a session.
    ///
    /// With `resume` false a brand-new session is always opened, superseding
    /// any running one. With `resume` true an active session is kept, a
    /// paused one is re-engaged with the same id, and an idle engine opens a
    /// new session. On failure the session state is unchanged.
    pub async fn activate(&mut self, resume: bool) -> DrmResult<()> {
        let result = self.activate_inner(resume).await;
        self.report(result)
    }

    async fn activate_inner(&mut self, resume: bool) -> DrmResult<()> {
        let state = self.session_state();
        match (resume, state) {
            (true, SessionState::Active) => {
                debug!("Session already active");
                Ok(())
            }
            (true, SessionState::Paused) => self.resume().await,
            _ => self.open(state).await,
        }
    }

    async fn open(&mut self, previous: SessionState) -> DrmResult<()> {
        // Read before stopping the worker so a bus failure leaves it running.
        let counters = self.engine.design.metering_counters(&self.engine.hw)?;
        self.stop_worker().await;

        let previous_id = self.session_id();
        let id = SessionId::generate_after(previous_id.as_ref());
        let saved = {
            let mut state = self.engine.state();
            let saved = (state.session.clone(), state.metering.clone(), state.health);
            state.metering.start_session(&counters);
            saved
        };

        let opened = if self.engine.nodelocked.is_some() {
            self.open_nodelocked(&id).await
        } else {
            self.open_metered(&id).await
        };

        if let Err(e) = opened {
            {
                let (session, metering, health) = saved;
                let mut state = self.engine.state();
                state.session = session;
                state.metering = metering;
                state.health = health;
            }
            if previous == SessionState::Active {
                if let Some(old) = previous_id {
                    self.spawn_worker(old);
                }
            }
            return Err(e);
        }

        info!("Session {} active", id);
        Ok(())
    }

    async fn open_metered(&mut self, id: &SessionId) -> DrmResult<()> {
        let engine = Arc::clone(&self.engine);
        let policy = engine.ws.policy();
        let response = retry_foreground(&policy, "session open", || {
            engine.exchange(RequestKind::Open, id)
        })
        .await?;
        let grant = response
            .license
            .ok_or_else(|| DrmError::WsError("licensing service returned no licence".into()))?;

        engine.controller.clear_license()?;
        engine.state().session.begin(id.clone());
        engine.load_grant(&grant)?;
        self.spawn_worker(id.clone());
        Ok(())
    }

    async fn open_nodelocked(&mut self, id: &SessionId) -> DrmResult<()> {
        let engine = Arc::clone(&self.engine);
        let Some(files) = engine.nodelocked.as_ref() else {
            return Err(DrmError::Fatal("node-locked files not configured".into()));
        };

        let grant: LicenseGrant = match files.read_license()? {
            Some(grant) => grant,
            None => {
                let request = engine.build_request(
                    RequestKind::Open,
                    id.clone(),
                    MeteringReport::new(vec![0; engine.design.len()]),
                );
                files.write_request(&request)?;
                let policy = engine.ws.policy();
                let response = retry_foreground(&policy, "node-locked licence request", || {
                    engine.ws.open_session(&request)
                })
                .await?;
                let grant = response.license.ok_or_else(|| {
                    DrmError::WsError("licensing service returned no node-locked licence".into())
                })?;
                files.write_license(&grant)?;
                grant
            }
        };

        engine.controller.clear_license()?;
        engine.state().session.begin(id.clone());
        engine.load_nodelocked(&grant)
    }

    async fn resume(&mut self) -> DrmResult<()> {
        let engine = Arc::clone(&self.engine);
        let Some(id) = self.session_id() else {
            return Err(DrmError::Fatal("paused session has no id".into()));
        };

        if engine.nodelocked.is_none() && !engine.controller.license_active()? {
            info!("Licence of paused session {} expired, requesting a new one", id);
            let policy = engine.ws.policy();
            let response = retry_foreground(&policy, "session resume", || {
                engine.exchange(RequestKind::Running, &id)
            })
            .await?;
            engine.load_response_license(&response)?;
        }

        engine.state().session.resume()?;
        if engine.nodelocked.is_none() {
            self.spawn_worker(id.clone());
        }
        info!("Session {} resumed", id);
        Ok(())
    }

    /// Pauses or closes the session.
    ///
    /// Pausing stops licence renewal and the heartbeat, keeping the id and
    /// the loaded licences; one final health request is sent if the
    /// heartbeat is enabled. Closing sends a close request, locks every
    /// activator and returns to `Idle`. Calling it on an idle engine does
    /// nothing.
    pub async fn deactivate(&mut self, pause: bool) -> DrmResult<()> {
        let result = if pause {
            self.pause().await
        } else {
            self.close().await
        };
        self.report(result)
    }

    async fn pause(&mut self) -> DrmResult<()> {
        self.stop_worker().await;
        let engine = Arc::clone(&self.engine);
        let (id, health) = {
            let mut state = engine.state();
            if state.session.state() != SessionState::Active {
                debug!("Pause ignored, session is {}", state.session.state());
                return Ok(());
            }
            state.session.pause()?;
            (state.session.id().cloned(), state.health)
        };

        info!("Session paused");
        match id {
            Some(id) if health.is_enabled() && engine.nodelocked.is_none() => {
                engine.exchange(RequestKind::Health, &id).await.map(|_| ())
            }
            _ => Ok(()),
        }
    }

    async fn close(&mut self) -> DrmResult<()> {
        self.stop_worker().await;
        let engine = Arc::clone(&self.engine);
        let Some(id) = self.session_id() else {
            debug!("Close ignored, no session");
            return Ok(());
        };

        let closed = if engine.nodelocked.is_none() {
            let policy = engine.ws.policy();
            retry_foreground(&policy, "session close", || {
                engine.exchange(RequestKind::Close, &id)
            })
            .await
            .map(|_| ())
        } else {
            Ok(())
        };
        if let Err(e) = &closed {
            warn!("Close request for {} failed: {}", id, e);
        }

        let cleared = engine.controller.clear_license();
        {
            let mut state = engine.state();
            state.metering.reset();
            state.session.close();
        }
        engine.ws.release_auth();
        cleared?;
        closed
    }

    fn spawn_worker(&mut self, id: SessionId) {
        self.worker = Some(SessionWorker::spawn(Arc::clone(&self.engine), id));
    }

    async fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop().await;
        }
    }

    // ── Metering check ───────────────────────────────────────────

    /// Compares each activator's local tally and hardware counter with the
    /// caller's `expected` usage since session start. Inconsistencies are
    /// reported on the async channel.
    pub fn check_metering(&self, expected: &[u64]) -> DrmResult<Vec<ActivatorCheck>> {
        let engine = &self.engine;
        if expected.len() != engine.design.len() {
            return Err(DrmError::BadArg(format!(
                "expected {} metering values, got {}",
                engine.design.len(),
                expected.len()
            )));
        }
        let counters = engine.design.metering_counters(&engine.hw)?;
        let checks = engine.state().metering.check(&counters, expected);
        for err in checks.iter().filter_map(ActivatorCheck::to_error) {
            engine.reporter.report(&err);
        }
        Ok(checks)
    }

    // ── Parameters ───────────────────────────────────────────────

    /// Reads the parameter named `key`.
    pub fn get(&self, key: &str) -> DrmResult<Value> {
        let param = Parameter::from_key(key)?;
        param.check_readable()?;
        self.read(param)
    }

    /// Reads several parameters into one JSON object.
    pub fn get_json(&self, keys: &[&str]) -> DrmResult<Value> {
        let mut out = Map::new();
        for key in keys {
            out.insert((*key).to_string(), self.get(key)?);
        }
        Ok(Value::Object(out))
    }

    /// Writes the parameter named `key`.
    pub fn set(&self, key: &str, value: Value) -> DrmResult<()> {
        let param = Parameter::from_key(key)?;
        param.check_writable()?;
        self.write(param, value)
    }

    /// Writes every entry of a JSON object, in order.
    pub fn set_json(&self, values: &Value) -> DrmResult<()> {
        let Some(entries) = values.as_object() else {
            return Err(DrmError::BadArg("parameters must be a JSON object".into()));
        };
        for (key, value) in entries {
            self.set(key, value.clone())?;
        }
        Ok(())
    }

    fn read(&self, param: Parameter) -> DrmResult<Value> {
        let engine = &self.engine;
        let secs = |d: Duration| json!(d.as_secs_f64());

        let value = match param {
            Parameter::LicenseType => json!(if engine.nodelocked.is_some() {
                "Node-Locked"
            } else {
                "Floating/Metering"
            }),
            Parameter::LicenseDuration => secs(engine.state().session.license_duration()),
            Parameter::LicenseStatus => json!(engine.controller.license_active()?),
            Parameter::LicenseTimeLeft => secs(engine.license_time_left()?),
            Parameter::NumActivators => json!(engine.design.len()),
            Parameter::ActivatorsStatus => json!(engine.design.unlocked_status(&engine.hw)?),
            Parameter::SessionId => json!(self
                .session_id()
                .map(String::from)
                .unwrap_or_default()),
            Parameter::SessionStatus => json!(engine.state().session.is_open()),
            Parameter::SessionState => json!(self.session_state().as_str()),
            Parameter::MeteredData => json!(self.metering()?.total),
            Parameter::MeteringDetail => json!(self.metering()?.per_activator),
            Parameter::MeteringAcknowledged => json!(engine.state().metering.acknowledged()),
            Parameter::NumLicenseLoaded => json!(engine.state().session.licenses_loaded()),
            Parameter::DrmFrequency => json!(engine.calibration.drm_mhz),
            Parameter::DrmFrequencyInit => json!(engine.frequency.nominal_mhz),
            Parameter::AxiFrequency => json!(engine.calibration.axi_mhz),
            Parameter::FrequencyDetectionMethod => json!(engine.calibration.method.number()),
            Parameter::ControllerVersion => json!(engine.controller.version().to_string()),
            Parameter::MailboxSize => json!(engine.controller.mailbox_size()),
            Parameter::ProductInfo => self.product_info(),
            Parameter::TokenString => {
                json!(engine.ws.token_cache().peek().map(|t| t.access_token))
            }
            Parameter::TokenValidity => {
                json!(engine.ws.token_cache().peek().map(|t| t.expires_in))
            }
            Parameter::TokenTimeLeft => json!(engine
                .ws
                .token_cache()
                .peek()
                .map(|t| t.time_left().as_secs_f64())),
            Parameter::HealthPeriod => secs(engine.state().health.period),
            Parameter::HealthRetry => secs(engine.state().health.retry_timeout),
            Parameter::HealthRetrySleep => secs(engine.state().health.retry_sleep),
            Parameter::ApiVersion => json!(env!("CARGO_PKG_VERSION")),
            Parameter::HostId => json!(engine.host_id),
            Parameter::NodelockedRequestFile => json!(engine
                .nodelocked
                .as_ref()
                .map(|f| f.request_path().display().to_string())),
            Parameter::ListAll => json!(Parameter::ALL.iter().map(|p| p.key()).collect::<Vec<_>>()),
            Parameter::DumpAll => {
                let mut out = Map::new();
                for p in Parameter::dumpable() {
                    out.insert(p.key().to_string(), self.read(p)?);
                }
                Value::Object(out)
            }
            Parameter::WsRetryPeriodLong => secs(engine.ws.policy().long_period),
            Parameter::WsRetryPeriodShort => secs(engine.ws.policy().short_period),
            Parameter::WsRequestTimeout => secs(engine.ws.policy().request_timeout),
            Parameter::WsConnectionTimeout => secs(engine.ws.policy().connection_timeout),
            Parameter::WsApiRetryDuration => secs(engine.ws.policy().api_retry_duration),
            Parameter::CustomField => json!(engine.controller.custom_field()?),
            Parameter::MailboxData => json!(engine.controller.read_mailbox()?),
            Parameter::DerivedProduct => {
                json!(engine.state().product.as_ref().map(ProductId::to_string))
            }
            Parameter::LogMessageLevel => json!(engine.state().log_level.as_str()),
            Parameter::FrequencyDetectionPeriod => {
                json!(engine.frequency.period.as_millis() as u64)
            }
            Parameter::FrequencyDetectionThreshold => json!(engine.frequency.threshold_percent),
            Parameter::BypassFrequencyDetection => json!(engine.frequency.bypass),
            Parameter::LogMessage | Parameter::TriggerAsyncCallback | Parameter::BadOauth2Token => {
                return Err(DrmError::BadArg(format!(
                    "parameter '{}' is write-only",
                    param.key()
                )));
            }
        };
        Ok(value)
    }

    /// Current usage since session start; zero when idle.
    fn metering(&self) -> DrmResult<MeteringReport> {
        if self.engine.state().session.is_open() {
            self.engine.sample_metering()
        } else {
            Ok(MeteringReport::new(self.engine.state().metering.tallies().to_vec()))
        }
    }

    fn product_info(&self) -> Value {
        let engine = &self.engine;
        let Some(info) = &engine.product_info else {
            return Value::Null;
        };
        let mut out = json!({ "product_id": info.product_id });
        if let Some(version) = &info.pkg_version {
            out["pkg_version"] = json!(version);
        }
        if let Some(product) = engine.state().product.as_ref() {
            if *product != info.product_id {
                out["derived_product"] = json!(product);
            }
        }
        out
    }

    fn write(&self, param: Parameter, value: Value) -> DrmResult<()> {
        let engine = &self.engine;
        match param {
            Parameter::WsRetryPeriodLong
            | Parameter::WsRetryPeriodShort
            | Parameter::WsRequestTimeout
            | Parameter::WsConnectionTimeout
            | Parameter::WsApiRetryDuration => {
                let duration = duration_from_secs(param.key(), as_f64(param, &value)?)?;
                let mut policy: RetryPolicy = engine.ws.policy();
                match param {
                    Parameter::WsRetryPeriodLong => policy.long_period = duration,
                    Parameter::WsRetryPeriodShort => policy.short_period = duration,
                    Parameter::WsRequestTimeout => policy.request_timeout = duration,
                    Parameter::WsConnectionTimeout => policy.connection_timeout = duration,
                    _ => policy.api_retry_duration = duration,
                }
                engine.ws.set_policy(policy)
            }
            Parameter::CustomField => engine.controller.set_custom_field(as_u32(param, &value)?),
            Parameter::MailboxData => {
                let words = value
                    .as_array()
                    .ok_or_else(|| type_error(param, "a list of integers"))?
                    .iter()
                    .map(|v| as_u32(param, v))
                    .collect::<DrmResult<Vec<u32>>>()?;
                engine.controller.write_mailbox(&words)
            }
            Parameter::DerivedProduct => {
                let mut state = engine.state();
                if state.session.is_open() {
                    return Err(DrmError::BadUsage(format!(
                        "derived_product cannot change while the session is {}",
                        state.session.state()
                    )));
                }
                let Some(base) = engine.base_product() else {
                    return Err(DrmError::BadArg(
                        "derived_product requires product information in the design".into(),
                    ));
                };
                let product = match &value {
                    Value::Null => base.clone(),
                    Value::String(s) if s.is_empty() => base.clone(),
                    Value::String(s) => base.derive(s)?,
                    _ => return Err(type_error(param, "a vendor/library/name string")),
                };
                info!("Product set to {}", product);
                state.product = Some(product);
                Ok(())
            }
            Parameter::LogMessageLevel => {
                let level: LogLevel = as_str(param, &value)?.parse()?;
                engine.state().log_level = level;
                Ok(())
            }
            Parameter::LogMessage => {
                let level = engine.state().log_level;
                level.emit(as_str(param, &value)?);
                Ok(())
            }
            Parameter::TriggerAsyncCallback => {
                let message = match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                engine.reporter.report(&DrmError::Debug(message));
                Ok(())
            }
            Parameter::BadOauth2Token => {
                engine.ws.poison_token();
                Ok(())
            }
            _ => param.check_writable(),
        }
    }
}

impl Drop for DrmManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if self.engine.state().session.is_open() {
            warn!("DRM manager dropped with an open session");
        }
    }
}

fn type_error(param: Parameter, expected: &str) -> DrmError {
    DrmError::BadArg(format!("parameter '{}' expects {expected}", param.key()))
}

fn as_f64(param: Parameter, value: &Value) -> DrmResult<f64> {
    value.as_f64().ok_or_else(|| type_error(param, "a number"))
}

fn as_u32(param: Parameter, value: &Value) -> DrmResult<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| type_error(param, "an unsigned 32-bit integer"))
}

fn as_str(param: Parameter, value: &Value) -> DrmResult<&str> {
    value.as_str().ok_or_else(|| type_error(param, "a string"))
}
