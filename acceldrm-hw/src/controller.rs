//! DRM controller operations.
//!
//! The controller owns the licence timer, the mailbox, the custom field and
//! the design ROM. Opening it runs the mandatory register self-test.

use crate::bus::HardwareHandle;
use crate::regmap::*;
use acceldrm_types::{DrmError, DrmResult, ProductInfo};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Largest product-info block accepted from the design ROM.
const MAX_PRODUCT_INFO_BYTES: u32 = 4096;

/// Controller IP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ControllerVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl From<u32> for ControllerVersion {
    fn from(raw: u32) -> Self {
        Self {
            major: (raw >> 16) as u8,
            minor: (raw >> 8) as u8,
            patch: raw as u8,
        }
    }
}

impl fmt::Display for ControllerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Optional controller features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(pub u32);

impl Capabilities {
    /// Dedicated free-running counter on the DRM clock.
    #[must_use]
    pub fn has_drm_counter(self) -> bool {
        self.0 & CAP_DRM_COUNTER != 0
    }

    /// Second free-running counter on the AXI clock.
    #[must_use]
    pub fn has_axi_counter(self) -> bool {
        self.0 & CAP_AXI_COUNTER != 0
    }
}

/// Converts a hex licence key into the big-endian words loaded into the controller.
pub fn license_key_words(hex_key: &str) -> DrmResult<Vec<u32>> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| DrmError::BadFormat(format!("licence key is not valid hex: {e}")))?;
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(DrmError::BadFormat(format!(
            "licence key must be a non-empty multiple of 4 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// An opened, self-tested DRM controller.
#[derive(Debug)]
pub struct Controller {
    hw: Arc<HardwareHandle>,
    version: ControllerVersion,
    capabilities: Capabilities,
    mailbox_size: u32,
}

impl Controller {
    /// Runs the self-test and reads the controller identity registers.
    ///
    /// # Errors
    ///
    /// Returns `CtlrError` if any register access fails or a test pattern
    /// does not read back.
    pub fn open(hw: Arc<HardwareHandle>) -> DrmResult<Self> {
        Self::self_test(&hw)?;

        let (version, capabilities, mailbox_size) = {
            let mut bus = hw.lock()?;
            (
                ControllerVersion::from(bus.read(REG_VERSION)?),
                Capabilities(bus.read(REG_CAPABILITIES)?),
                bus.read(REG_MAILBOX_SIZE)?,
            )
        };

        info!(
            "DRM controller {} on {} (mailbox {} words)",
            version,
            hw.resource(),
            mailbox_size
        );

        Ok(Self {
            hw,
            version,
            capabilities,
            mailbox_size,
        })
    }

    /// Writes and reads back the scratch-register patterns.
    pub fn self_test(hw: &HardwareHandle) -> DrmResult<()> {
        let mut bus = hw.lock()?;
        for (offset, pattern) in SELF_TEST_PATTERNS {
            bus.write(offset, pattern)?;
            let read_back = bus.read(offset)?;
            if read_back != pattern {
                return Err(DrmError::CtlrError(format!(
                    "self-test failed at 0x{offset:04X}: wrote 0x{pattern:08X}, read 0x{read_back:08X}"
                )));
            }
        }
        debug!("Controller self-test passed");
        Ok(())
    }

    #[must_use]
    pub fn hardware(&self) -> &Arc<HardwareHandle> {
        &self.hw
    }

    #[must_use]
    pub fn version(&self) -> ControllerVersion {
        self.version
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[must_use]
    pub fn mailbox_size(&self) -> u32 {
        self.mailbox_size
    }

    /// Queues a metered licence lasting `ticks` DRM clock cycles.
    pub fn load_license(&self, words: &[u32], ticks: u64) -> DrmResult<()> {
        let mut bus = self.hw.lock()?;
        for word in words {
            bus.write(REG_LICENSE_DATA, *word)?;
        }
        bus.write_u64(REG_LICENSE_TIMER_LO, REG_LICENSE_TIMER_HI, ticks)?;
        bus.write(REG_COMMAND, CMD_LOAD_LICENSE)?;
        debug!("Loaded licence ({} words, {} ticks)", words.len(), ticks);
        Ok(())
    }

    /// Loads a node-locked licence that never expires.
    pub fn load_nodelocked(&self, words: &[u32]) -> DrmResult<()> {
        let mut bus = self.hw.lock()?;
        for word in words {
            bus.write(REG_LICENSE_DATA, *word)?;
        }
        bus.write(REG_COMMAND, CMD_LOAD_NODELOCKED)?;
        debug!("Loaded node-locked licence ({} words)", words.len());
        Ok(())
    }

    /// Drops every loaded licence; activators lock immediately.
    pub fn clear_license(&self) -> DrmResult<()> {
        self.hw.write(REG_COMMAND, CMD_CLEAR_LICENSE)?;
        debug!("Cleared licence");
        Ok(())
    }

    /// Starts the licence timer without a key so its countdown can be sampled.
    pub fn start_timer_run(&self, ticks: u64) -> DrmResult<()> {
        let mut bus = self.hw.lock()?;
        bus.write_u64(REG_LICENSE_TIMER_LO, REG_LICENSE_TIMER_HI, ticks)?;
        bus.write(REG_COMMAND, CMD_TIMER_RUN)
    }

    pub fn status(&self) -> DrmResult<u32> {
        self.hw.read(REG_STATUS)
    }

    /// Returns true while a licence is active.
    pub fn license_active(&self) -> DrmResult<bool> {
        Ok(self.status()? & STATUS_LICENSE_ACTIVE != 0)
    }

    /// Remaining licence-timer ticks across every queued licence.
    pub fn timer_countdown(&self) -> DrmResult<u64> {
        self.hw
            .lock()?
            .read_u64(REG_TIMER_COUNTDOWN_LO, REG_TIMER_COUNTDOWN_HI)
    }

    pub fn custom_field(&self) -> DrmResult<u32> {
        self.hw.read(REG_CUSTOM_FIELD)
    }

    pub fn set_custom_field(&self, value: u32) -> DrmResult<()> {
        self.hw.write(REG_CUSTOM_FIELD, value)
    }

    /// Reads back the words last written to the mailbox.
    pub fn read_mailbox(&self) -> DrmResult<Vec<u32>> {
        let mut bus = self.hw.lock()?;
        let count = bus.read(REG_MAILBOX_COUNT)?.min(self.mailbox_size);
        (0..count)
            .map(|i| bus.read(MAILBOX_BASE + i * 4))
            .collect()
    }

    /// Writes `words` to the mailbox.
    ///
    /// # Errors
    ///
    /// Returns `BadArg` if the words do not fit.
    pub fn write_mailbox(&self, words: &[u32]) -> DrmResult<()> {
        if words.len() > self.mailbox_size as usize {
            return Err(DrmError::BadArg(format!(
                "trying to write {} words, out of Mailbox memory space ({} words)",
                words.len(),
                self.mailbox_size
            )));
        }
        let mut bus = self.hw.lock()?;
        for (i, word) in words.iter().enumerate() {
            bus.write(MAILBOX_BASE + (i as u32) * 4, *word)?;
        }
        bus.write(REG_MAILBOX_COUNT, words.len() as u32)
    }

    /// Reads the product information block from the design ROM.
    pub fn product_info(&self) -> DrmResult<Option<ProductInfo>> {
        let mut bus = self.hw.lock()?;
        let size = bus.read(REG_PRODUCT_INFO_SIZE)?;
        if size == 0 {
            return Ok(None);
        }
        if size > MAX_PRODUCT_INFO_BYTES {
            return Err(DrmError::BadFormat(format!(
                "product info size {size} exceeds {MAX_PRODUCT_INFO_BYTES} bytes"
            )));
        }

        let mut bytes = Vec::with_capacity(size as usize);
        for i in 0..size.div_ceil(4) {
            bytes.extend_from_slice(&bus.read(PRODUCT_INFO_BASE + i * 4)?.to_le_bytes());
        }
        bytes.truncate(size as usize);

        let info: ProductInfo = serde_json::from_slice(&bytes)
            .map_err(|e| DrmError::BadFormat(format!("invalid product info in ROM: {e}")))?;
        Ok(Some(info))
    }
}
