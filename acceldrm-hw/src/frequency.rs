//! DRM clock frequency calibration.
//!
//! The licence timer runs on the DRM clock, so the declared frequency must
//! be close to the real one or licences would last the wrong time. The
//! measurement method depends on what the controller offers:
//!
//! 1. licence-timer countdown (older controllers, mismatch is only reported)
//! 2. a dedicated 32-bit free-running counter on the DRM clock
//! 3. two dedicated counters, DRM clock and AXI clock

use crate::controller::Controller;
use crate::regmap::{REG_FREQ_COUNTER_AXI, REG_FREQ_COUNTER_DRM};
use acceldrm_types::{DrmError, DrmResult};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long the licence timer is armed while probing, in seconds of nominal clock.
const TIMER_RUN_SECS: f64 = 3600.0;

/// Frequency measurement method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetectionMethod {
    Bypass,
    LicenseTimer,
    DedicatedCounter,
    DualCounter,
}

impl DetectionMethod {
    fn for_controller(controller: &Controller) -> Self {
        let caps = controller.capabilities();
        match (caps.has_drm_counter(), caps.has_axi_counter()) {
            (true, true) => Self::DualCounter,
            (true, false) => Self::DedicatedCounter,
            _ => Self::LicenseTimer,
        }
    }

    /// Method number exposed through `frequency_detection_method`.
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::Bypass => 0,
            Self::LicenseTimer => 1,
            Self::DedicatedCounter => 2,
            Self::DualCounter => 3,
        }
    }

    /// Older controllers only report a mismatch asynchronously.
    #[must_use]
    pub fn raises_on_mismatch(self) -> bool {
        matches!(self, Self::DedicatedCounter | Self::DualCounter)
    }
}

/// Calibration inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencySettings {
    /// Caller-declared DRM clock frequency.
    pub nominal_mhz: f64,
    /// Sampling window.
    pub period: Duration,
    /// Accepted deviation, in percent of the nominal frequency.
    pub threshold_percent: f64,
    /// Trust `nominal_mhz` without measuring.
    pub bypass: bool,
}

impl Default for FrequencySettings {
    fn default() -> Self {
        Self {
            nominal_mhz: 125.0,
            period: Duration::from_millis(100),
            threshold_percent: 12.0,
            bypass: false,
        }
    }
}

/// Calibration result.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub method: DetectionMethod,
    /// Frequency used to convert licence durations into timer ticks.
    pub drm_mhz: f64,
    pub measured_mhz: Option<f64>,
    pub axi_mhz: Option<f64>,
    /// Mismatch on a controller that does not raise; report it asynchronously.
    pub warning: Option<DrmError>,
}

/// One-shot DRM clock measurement.
pub struct FrequencyCalibrator<'a> {
    controller: &'a Controller,
    settings: &'a FrequencySettings,
}

impl<'a> FrequencyCalibrator<'a> {
    pub fn new(controller: &'a Controller, settings: &'a FrequencySettings) -> Self {
        Self {
            controller,
            settings,
        }
    }

    /// Measures the DRM clock and validates it against the declared frequency.
    ///
    /// # Errors
    ///
    /// Returns `BadFrequency` on mismatch (counter-based methods) or when the
    /// detection period would overflow the 32-bit counter.
    pub fn calibrate(&self) -> DrmResult<Calibration> {
        let nominal = self.settings.nominal_mhz;
        if !nominal.is_finite() || nominal <= 0.0 {
            return Err(DrmError::BadArg(format!(
                "DRM frequency must be a positive number of MHz, got {nominal}"
            )));
        }

        if self.settings.bypass {
            info!("Frequency detection bypassed, using {} MHz", nominal);
            return Ok(Calibration {
                method: DetectionMethod::Bypass,
                drm_mhz: nominal,
                measured_mhz: None,
                axi_mhz: None,
                warning: None,
            });
        }

        let method = DetectionMethod::for_controller(self.controller);
        let (measured, axi) = match method {
            DetectionMethod::DualCounter => self.measure_counters(true)?,
            DetectionMethod::DedicatedCounter => self.measure_counters(false)?,
            _ => (self.measure_license_timer()?, None),
        };

        if !measured.is_finite() || measured <= 0.0 {
            return Err(DrmError::CtlrError(format!(
                "DRM clock does not appear to run (method {}, measured {measured} MHz)",
                method.number()
            )));
        }

        let deviation = (measured - nominal).abs() / nominal * 100.0;
        let mut warning = None;
        if deviation > self.settings.threshold_percent {
            let err = DrmError::BadFrequency(format!(
                "measured DRM frequency {measured:.3} MHz differs from configured {nominal} MHz \
                 by {deviation:.1}% (threshold {}%)",
                self.settings.threshold_percent
            ));
            if method.raises_on_mismatch() {
                return Err(err);
            }
            warn!("{}", err);
            warning = Some(err);
        }

        info!(
            "DRM frequency {:.3} MHz (method {}, deviation {:.2}%)",
            measured,
            method.number(),
            deviation
        );

        Ok(Calibration {
            method,
            drm_mhz: measured,
            measured_mhz: Some(measured),
            axi_mhz: axi,
            warning,
        })
    }

    fn check_counter_window(&self) -> DrmResult<()> {
        let max_ticks = self.settings.nominal_mhz
            * 1e6
            * (1.0 + self.settings.threshold_percent / 100.0)
            * self.settings.period.as_secs_f64();
        if max_ticks >= f64::from(u32::MAX) {
            return Err(DrmError::BadFrequency(format!(
                "frequency detection period too long: {} ms would overflow the 32-bit counter at {} MHz",
                self.settings.period.as_millis(),
                self.settings.nominal_mhz
            )));
        }
        Ok(())
    }

    fn sample_counters(&self, dual: bool) -> DrmResult<(u32, u32, Instant)> {
        let mut bus = self.controller.hardware().lock()?;
        let drm = bus.read(REG_FREQ_COUNTER_DRM)?;
        let axi = if dual { bus.read(REG_FREQ_COUNTER_AXI)? } else { 0 };
        Ok((drm, axi, Instant::now()))
    }

    fn measure_counters(&self, dual: bool) -> DrmResult<(f64, Option<f64>)> {
        self.check_counter_window()?;

        let (drm_start, axi_start, start) = self.sample_counters(dual)?;
        std::thread::sleep(self.settings.period);
        let (drm_end, axi_end, end) = self.sample_counters(dual)?;

        let elapsed = end.duration_since(start).as_secs_f64();
        let drm = f64::from(drm_end.wrapping_sub(drm_start)) / elapsed / 1e6;
        let axi = dual.then(|| f64::from(axi_end.wrapping_sub(axi_start)) / elapsed / 1e6);
        Ok((drm, axi))
    }

    fn measure_license_timer(&self) -> DrmResult<f64> {
        let run_ticks = (self.settings.nominal_mhz * 1e6 * TIMER_RUN_SECS) as u64;
        self.controller.start_timer_run(run_ticks)?;

        let first = self.controller.timer_countdown()?;
        let start = Instant::now();
        std::thread::sleep(self.settings.period);
        let second = self.controller.timer_countdown()?;
        let elapsed = start.elapsed().as_secs_f64();

        self.controller.clear_license()?;
        Ok(first.saturating_sub(second) as f64 / elapsed / 1e6)
    }
}
