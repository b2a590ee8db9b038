//! Activators: per-IP usage counters and lock points.
//!
//! Activators sit at fixed strides after the controller. The design is
//! enumerated once by probing each stride for the activator signature and
//! stays read-only afterwards.

use crate::bus::HardwareHandle;
use crate::regmap::*;
use acceldrm_types::{DrmError, DrmResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Vendor/library/name/version identity packed in an activator register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vlnv {
    pub vendor: u8,
    pub library: u8,
    pub name: u8,
    pub version: u8,
}

impl From<u32> for Vlnv {
    fn from(raw: u32) -> Self {
        Self {
            vendor: (raw >> 24) as u8,
            library: (raw >> 16) as u8,
            name: (raw >> 8) as u8,
            version: raw as u8,
        }
    }
}

impl From<Vlnv> for u32 {
    fn from(v: Vlnv) -> Self {
        (u32::from(v.vendor) << 24)
            | (u32::from(v.library) << 16)
            | (u32::from(v.name) << 8)
            | u32::from(v.version)
    }
}

impl fmt::Display for Vlnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}",
            self.vendor, self.library, self.name, self.version
        )
    }
}

/// One metered IP core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activator {
    index: usize,
    base_address: u32,
    vlnv: Vlnv,
}

impl Activator {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    #[must_use]
    pub fn vlnv(&self) -> Vlnv {
        self.vlnv
    }

    /// Returns true if the activator currently lets its IP run.
    pub fn is_unlocked(&self, hw: &HardwareHandle) -> DrmResult<bool> {
        Ok(hw.read(self.base_address + ACT_STATUS)? & ACT_STATUS_UNLOCKED != 0)
    }

    /// Reads the cumulative 64-bit usage counter.
    pub fn metering_counter(&self, hw: &HardwareHandle) -> DrmResult<u64> {
        hw.lock()?.read_u64(
            self.base_address + ACT_METERING_LO,
            self.base_address + ACT_METERING_HI,
        )
    }
}

/// The ordered set of activators in the loaded design.
#[derive(Debug, Clone)]
pub struct Design {
    activators: Vec<Activator>,
}

impl Design {
    /// Walks activator strides until the signature is missing.
    ///
    /// # Errors
    ///
    /// Returns `CtlrError` if no activator answers.
    pub fn enumerate(hw: &HardwareHandle) -> DrmResult<Self> {
        let mut bus = hw.lock()?;
        let mut activators = Vec::new();

        for index in 0..MAX_ACTIVATORS {
            let base_address = activator_base(index);
            if bus.read(base_address + ACT_SIGNATURE)? != ACTIVATOR_SIGNATURE {
                break;
            }
            let vlnv = Vlnv::from(bus.read(base_address + ACT_VLNV)?);
            activators.push(Activator {
                index,
                base_address,
                vlnv,
            });
        }

        if activators.is_empty() {
            return Err(DrmError::CtlrError(format!(
                "no activator found at 0x{ACTIVATOR_BASE:04X}"
            )));
        }

        info!("Found {} activator(s)", activators.len());
        Ok(Self { activators })
    }

    #[must_use]
    pub fn activators(&self) -> &[Activator] {
        &self.activators
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.activators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activators.is_empty()
    }

    /// Reads every activator counter, in activation order.
    pub fn metering_counters(&self, hw: &HardwareHandle) -> DrmResult<Vec<u64>> {
        self.activators
            .iter()
            .map(|a| a.metering_counter(hw))
            .collect()
    }

    /// Reads every activator's unlocked flag, in activation order.
    pub fn unlocked_status(&self, hw: &HardwareHandle) -> DrmResult<Vec<bool>> {
        self.activators.iter().map(|a| a.is_unlocked(hw)).collect()
    }

    /// VLNV strings reported to the licensing service.
    #[must_use]
    pub fn vlnvs(&self) -> Vec<String> {
        self.activators.iter().map(|a| a.vlnv().to_string()).collect()
    }
}
