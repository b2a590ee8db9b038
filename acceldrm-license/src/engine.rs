//! State shared between the session controller and its background worker.

use crate::config::{DesignSection, LogLevel};
use crate::health::HealthConfig;
use crate::metering::MeteringAggregator;
use crate::nodelocked::NodeLockedFiles;
use crate::reporter::AsyncErrorReporter;
use crate::session::Session;
use acceldrm_hw::{
    license_key_words, Calibration, Controller, Design, FrequencySettings, HardwareHandle,
};
use acceldrm_types::{DrmError, DrmResult, ProductId, ProductInfo, SessionId};
use acceldrm_ws::{
    DesignReport, LicenseGrant, LicenseMode, MeteringReport, RequestKind, SessionRequest,
    SessionResponse, WsClient,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Mutable engine state. Never held across an await or while taking the
/// hardware lock.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) session: Session,
    pub(crate) metering: MeteringAggregator,
    pub(crate) health: HealthConfig,
    /// Product sent to the service: the design product or a derived one.
    pub(crate) product: Option<ProductId>,
    pub(crate) log_level: LogLevel,
}

#[derive(Debug)]
pub(crate) struct Engine {
    pub(crate) hw: Arc<HardwareHandle>,
    pub(crate) controller: Controller,
    pub(crate) design: Design,
    pub(crate) ws: WsClient,
    pub(crate) reporter: AsyncErrorReporter,
    pub(crate) calibration: Calibration,
    pub(crate) frequency: FrequencySettings,
    pub(crate) board: DesignSection,
    pub(crate) host_id: String,
    pub(crate) product_info: Option<ProductInfo>,
    pub(crate) nodelocked: Option<NodeLockedFiles>,
    pub(crate) state: Mutex<EngineState>,
}

impl Engine {
    pub(crate) fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn drm_hz(&self) -> f64 {
        self.calibration.drm_mhz * 1e6
    }

    pub(crate) fn mode(&self) -> LicenseMode {
        if self.nodelocked.is_some() {
            LicenseMode::NodeLocked
        } else {
            LicenseMode::Metering
        }
    }

    /// Base product reported by the design ROM.
    pub(crate) fn base_product(&self) -> Option<&ProductId> {
        self.product_info.as_ref().map(|info| &info.product_id)
    }

    fn design_report(&self) -> DesignReport {
        DesignReport {
            controller_version: self.controller.version().to_string(),
            activators: self.design.vlnvs(),
            board_type: self.board.board_type.clone(),
            udid: self.board.udid.clone(),
        }
    }

    /// Reads the activator counters and folds them into the session tallies.
    ///
    /// A counter that went backwards is reported asynchronously; the tallies
    /// keep their last good values.
    pub(crate) fn sample_metering(&self) -> DrmResult<MeteringReport> {
        let counters = self.design.metering_counters(&self.hw)?;
        let (observed, tallies) = {
            let mut state = self.state();
            let observed = state.metering.observe(&counters);
            (observed, state.metering.tallies().to_vec())
        };
        if let Err(e) = observed {
            self.reporter.report(&e);
        }
        Ok(MeteringReport::new(tallies))
    }

    pub(crate) fn build_request(
        &self,
        kind: RequestKind,
        session_id: SessionId,
        metering: MeteringReport,
    ) -> SessionRequest {
        SessionRequest {
            request: kind,
            session_id,
            mode: self.mode(),
            product: self.state().product.clone(),
            design: self.design_report(),
            metering,
            drm_frequency_mhz: self.calibration.drm_mhz,
            host_id: self.host_id.clone(),
        }
    }

    /// Sends one request for session `id` and applies the metering
    /// acknowledgement and heartbeat settings it returns. Single attempt.
    pub(crate) async fn exchange(
        &self,
        kind: RequestKind,
        id: &SessionId,
    ) -> DrmResult<SessionResponse> {
        let metering = self.sample_metering()?;
        let request = self.build_request(kind, id.clone(), metering);
        let response = match kind {
            RequestKind::Open => self.ws.open_session(&request).await?,
            _ => self.ws.update_session(&request).await?,
        };
        self.absorb(&response);
        Ok(response)
    }

    fn absorb(&self, response: &SessionResponse) {
        let mut state = self.state();
        if let Some(ack) = &response.metering {
            state.metering.acknowledge(ack.acknowledged);
        }
        if let Some(update) = &response.drm_config {
            state.health.apply(update);
        }
    }

    /// Queues a granted metered licence behind the current one.
    pub(crate) fn load_grant(&self, grant: &LicenseGrant) -> DrmResult<Duration> {
        let duration = Duration::try_from_secs_f64(grant.timeout_second)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                DrmError::BadFormat(format!(
                    "licence duration must be positive, got {}",
                    grant.timeout_second
                ))
            })?;
        let words = license_key_words(&grant.key)?;
        let ticks = (grant.timeout_second * self.drm_hz()) as u64;
        self.controller.load_license(&words, ticks)?;

        let loaded = {
            let mut state = self.state();
            state.session.record_license(duration);
            state.session.licenses_loaded()
        };
        info!(
            "Loaded licence #{} ({:.1} s, {} ticks)",
            loaded,
            duration.as_secs_f64(),
            ticks
        );
        Ok(duration)
    }

    /// Loads the licence carried by `response`.
    ///
    /// # Errors
    ///
    /// Returns `WsError` if the response holds no licence.
    pub(crate) fn load_response_license(&self, response: &SessionResponse) -> DrmResult<Duration> {
        let grant = response
            .license
            .as_ref()
            .ok_or_else(|| DrmError::WsError("licensing service returned no licence".into()))?;
        self.load_grant(grant)
    }

    pub(crate) fn load_nodelocked(&self, grant: &LicenseGrant) -> DrmResult<()> {
        let words = license_key_words(&grant.key)?;
        self.controller.load_nodelocked(&words)?;
        self.state().session.record_license(Duration::ZERO);
        debug!("Node-locked licence active");
        Ok(())
    }

    /// Time left on the hardware licence timer.
    pub(crate) fn license_time_left(&self) -> DrmResult<Duration> {
        let ticks = self.controller.timer_countdown()?;
        Ok(Duration::try_from_secs_f64(ticks as f64 / self.drm_hz()).unwrap_or(Duration::ZERO))
    }

    /// When the queued licence chain runs out.
    pub(crate) fn license_chain_end(&self) -> DrmResult<Instant> {
        Ok(Instant::now() + self.license_time_left()?)
    }
}
