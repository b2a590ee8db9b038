//! Software emulation of the DRM controller and its activators.
//!
//! `SimulatedController` implements [`RegisterBus`] with real-time clocks, a
//! chaining licence timer, a mailbox, a design ROM and activator counters. It
//! lets the whole engine run without an FPGA and exposes hooks to drive usage
//! and inject register faults.

use crate::bus::{BusError, RegisterBus};
use crate::regmap::*;
use acceldrm_types::ProductInfo;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const DEFAULT_VERSION: u32 = 0x0004_0200;

#[derive(Debug, Clone)]
struct SimActivator {
    vlnv: u32,
    counter: u64,
}

#[derive(Debug)]
struct SimState {
    epoch: Instant,
    version: u32,
    capabilities: u32,
    drm_hz: f64,
    axi_hz: f64,
    scratch: [u32; 2],
    scratch_stuck: bool,
    pending_key: Vec<u32>,
    timer_reg: u64,
    license_deadline: Option<Instant>,
    timer_run_deadline: Option<Instant>,
    nodelocked: bool,
    loaded_keys: Vec<Vec<u32>>,
    custom_field: u32,
    mailbox: Vec<u32>,
    mailbox_count: u32,
    product_info: Vec<u8>,
    activators: Vec<SimActivator>,
    read_faults: HashMap<u32, i32>,
    write_faults: HashMap<u32, i32>,
}

impl SimState {
    fn license_active(&self, now: Instant) -> bool {
        self.nodelocked || self.license_deadline.is_some_and(|d| d > now)
    }

    fn countdown_ticks(&self, now: Instant) -> u64 {
        self.license_deadline
            .or(self.timer_run_deadline)
            .map_or(0, |d| (d.saturating_duration_since(now).as_secs_f64() * self.drm_hz) as u64)
    }

    fn ticks_to_duration(&self, ticks: u64) -> Option<Duration> {
        Duration::try_from_secs_f64(ticks as f64 / self.drm_hz).ok()
    }

    fn read(&self, offset: u32) -> u32 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.epoch).as_secs_f64();
        match offset {
            REG_VERSION => self.version,
            REG_CAPABILITIES => self.capabilities,
            REG_SCRATCH_A if self.scratch_stuck => 0,
            REG_SCRATCH_B if self.scratch_stuck => 0,
            REG_SCRATCH_A => self.scratch[0],
            REG_SCRATCH_B => self.scratch[1],
            REG_STATUS => {
                let mut status = 0;
                if self.license_active(now) {
                    status |= STATUS_LICENSE_ACTIVE;
                }
                if self.nodelocked {
                    status |= STATUS_NODELOCKED;
                }
                status
            }
            REG_LICENSE_TIMER_LO => self.timer_reg as u32,
            REG_LICENSE_TIMER_HI => (self.timer_reg >> 32) as u32,
            REG_TIMER_COUNTDOWN_LO => self.countdown_ticks(now) as u32,
            REG_TIMER_COUNTDOWN_HI => (self.countdown_ticks(now) >> 32) as u32,
            REG_FREQ_COUNTER_DRM => (elapsed * self.drm_hz) as u64 as u32,
            REG_FREQ_COUNTER_AXI => (elapsed * self.axi_hz) as u64 as u32,
            REG_CUSTOM_FIELD => self.custom_field,
            REG_MAILBOX_SIZE => self.mailbox.len() as u32,
            REG_MAILBOX_COUNT => self.mailbox_count,
            REG_PRODUCT_INFO_SIZE => self.product_info.len() as u32,
            o if (MAILBOX_BASE..MAILBOX_BASE + self.mailbox.len() as u32 * 4).contains(&o) => {
                self.mailbox[((o - MAILBOX_BASE) / 4) as usize]
            }
            o if (PRODUCT_INFO_BASE..ACTIVATOR_BASE).contains(&o) => {
                let start = ((o - PRODUCT_INFO_BASE) / 4 * 4) as usize;
                let mut word = [0u8; 4];
                for (i, byte) in word.iter_mut().enumerate() {
                    *byte = self.product_info.get(start + i).copied().unwrap_or(0);
                }
                u32::from_le_bytes(word)
            }
            o if o >= ACTIVATOR_BASE => self.read_activator(o, now),
            _ => 0,
        }
    }

    fn read_activator(&self, offset: u32, now: Instant) -> u32 {
        let index = ((offset - ACTIVATOR_BASE) / ACTIVATOR_STRIDE) as usize;
        let Some(activator) = self.activators.get(index) else {
            return 0;
        };
        match (offset - ACTIVATOR_BASE) % ACTIVATOR_STRIDE {
            ACT_SIGNATURE => ACTIVATOR_SIGNATURE,
            ACT_VLNV => activator.vlnv,
            ACT_STATUS => {
                if self.license_active(now) {
                    ACT_STATUS_UNLOCKED
                } else {
                    0
                }
            }
            ACT_METERING_LO => activator.counter as u32,
            ACT_METERING_HI => (activator.counter >> 32) as u32,
            _ => 0,
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        match offset {
            REG_SCRATCH_A => self.scratch[0] = value,
            REG_SCRATCH_B => self.scratch[1] = value,
            REG_LICENSE_DATA => self.pending_key.push(value),
            REG_LICENSE_TIMER_LO => {
                self.timer_reg = (self.timer_reg & !0xFFFF_FFFF) | u64::from(value);
            }
            REG_LICENSE_TIMER_HI => {
                self.timer_reg = (self.timer_reg & 0xFFFF_FFFF) | (u64::from(value) << 32);
            }
            REG_COMMAND => self.command(value),
            REG_CUSTOM_FIELD => self.custom_field = value,
            REG_MAILBOX_COUNT => self.mailbox_count = value.min(self.mailbox.len() as u32),
            o if (MAILBOX_BASE..MAILBOX_BASE + self.mailbox.len() as u32 * 4).contains(&o) => {
                self.mailbox[((o - MAILBOX_BASE) / 4) as usize] = value;
            }
            _ => {}
        }
    }

    fn command(&mut self, command: u32) {
        let now = Instant::now();
        match command {
            CMD_LOAD_LICENSE => {
                if self.pending_key.is_empty() {
                    return;
                }
                let Some(duration) = self.ticks_to_duration(self.timer_reg) else {
                    return;
                };
                let start = self.license_deadline.filter(|d| *d > now).unwrap_or(now);
                self.license_deadline = start.checked_add(duration);
                self.timer_run_deadline = None;
                self.loaded_keys.push(std::mem::take(&mut self.pending_key));
            }
            CMD_LOAD_NODELOCKED => {
                if self.pending_key.is_empty() {
                    return;
                }
                self.nodelocked = true;
                self.loaded_keys.push(std::mem::take(&mut self.pending_key));
            }
            CMD_CLEAR_LICENSE => {
                self.license_deadline = None;
                self.timer_run_deadline = None;
                self.nodelocked = false;
                self.pending_key.clear();
            }
            CMD_TIMER_RUN => {
                self.timer_run_deadline = self
                    .ticks_to_duration(self.timer_reg)
                    .and_then(|d| now.checked_add(d));
            }
            _ => {}
        }
    }
}

/// Software DRM controller. Clones share the same emulated device.
#[derive(Debug, Clone)]
pub struct SimulatedController {
    resource: String,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedController {
    /// Creates a controller at 125 MHz (AXI 250 MHz) with two activators,
    /// a 16-word mailbox and no product information.
    pub fn new(resource: impl Into<String>) -> Self {
        let state = SimState {
            epoch: Instant::now(),
            version: DEFAULT_VERSION,
            capabilities: CAP_DRM_COUNTER | CAP_AXI_COUNTER,
            drm_hz: 125e6,
            axi_hz: 250e6,
            scratch: [0; 2],
            scratch_stuck: false,
            pending_key: Vec::new(),
            timer_reg: 0,
            license_deadline: None,
            timer_run_deadline: None,
            nodelocked: false,
            loaded_keys: Vec::new(),
            custom_field: 0,
            mailbox: vec![0; 16],
            mailbox_count: 0,
            product_info: Vec::new(),
            activators: Vec::new(),
            read_faults: HashMap::new(),
            write_faults: HashMap::new(),
        };
        Self {
            resource: resource.into(),
            state: Arc::new(Mutex::new(state)),
        }
        .with_activators(2)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Builders ─────────────────────────────────────────────────

    /// Replaces the design with `count` activators.
    #[must_use]
    pub fn with_activators(self, count: usize) -> Self {
        self.state().activators = (0..count)
            .map(|i| SimActivator {
                vlnv: 0x0A01_0000 | ((i as u32 & 0xFF) << 8) | 0x01,
                counter: 0,
            })
            .collect();
        self
    }

    #[must_use]
    pub fn with_drm_frequency_mhz(self, mhz: f64) -> Self {
        self.state().drm_hz = mhz * 1e6;
        self
    }

    #[must_use]
    pub fn with_axi_frequency_mhz(self, mhz: f64) -> Self {
        self.state().axi_hz = mhz * 1e6;
        self
    }

    #[must_use]
    pub fn with_capabilities(self, capabilities: u32) -> Self {
        self.state().capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_version(self, version: u32) -> Self {
        self.state().version = version;
        self
    }

    #[must_use]
    pub fn with_mailbox_size(self, words: usize) -> Self {
        let mut state = self.state();
        state.mailbox = vec![0; words];
        state.mailbox_count = 0;
        drop(state);
        self
    }

    #[must_use]
    pub fn with_product_info(self, info: &ProductInfo) -> Self {
        let bytes = serde_json::to_vec(info).unwrap_or_default();
        self.with_raw_product_info(bytes)
    }

    /// Stores arbitrary bytes in the design ROM.
    #[must_use]
    pub fn with_raw_product_info(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.state().product_info = bytes.into();
        self
    }

    // ── Test hooks ───────────────────────────────────────────────

    /// Records `amount` units of IP usage on activator `index`.
    pub fn add_usage(&self, index: usize, amount: u64) {
        if let Some(a) = self.state().activators.get_mut(index) {
            a.counter = a.counter.wrapping_add(amount);
        }
    }

    /// Overwrites the raw counter of activator `index`.
    pub fn set_metering(&self, index: usize, value: u64) {
        if let Some(a) = self.state().activators.get_mut(index) {
            a.counter = value;
        }
    }

    /// Makes reads of `offset` fail with `code`.
    pub fn fail_read(&self, offset: u32, code: i32) {
        self.state().read_faults.insert(offset, code);
    }

    /// Makes writes to `offset` fail with `code`.
    pub fn fail_write(&self, offset: u32, code: i32) {
        self.state().write_faults.insert(offset, code);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state();
        state.read_faults.clear();
        state.write_faults.clear();
    }

    /// Makes the scratch registers read back zero so the self-test fails.
    pub fn break_scratch_registers(&self) {
        self.state().scratch_stuck = true;
    }

    /// Expires every loaded metered licence now.
    pub fn expire_license(&self) {
        let mut state = self.state();
        if state.license_deadline.is_some() {
            state.license_deadline = Some(Instant::now());
        }
    }

    #[must_use]
    pub fn license_active(&self) -> bool {
        self.state().license_active(Instant::now())
    }

    /// Number of licences loaded since creation.
    #[must_use]
    pub fn licenses_loaded(&self) -> usize {
        self.state().loaded_keys.len()
    }

    /// Key words of every licence loaded since creation.
    #[must_use]
    pub fn loaded_keys(&self) -> Vec<Vec<u32>> {
        self.state().loaded_keys.clone()
    }

    /// Time left before the loaded licence chain runs out.
    #[must_use]
    pub fn license_time_left(&self) -> Duration {
        self.state()
            .license_deadline
            .map_or(Duration::ZERO, |d| d.saturating_duration_since(Instant::now()))
    }
}

impl RegisterBus for SimulatedController {
    fn resource_id(&self) -> String {
        self.resource.clone()
    }

    fn read(&mut self, offset: u32) -> Result<u32, BusError> {
        let state = self.state();
        if let Some(code) = state.read_faults.get(&offset) {
            return Err(BusError(*code));
        }
        Ok(state.read(offset))
    }

    fn write(&mut self, offset: u32, value: u32) -> Result<(), BusError> {
        let mut state = self.state();
        if let Some(code) = state.write_faults.get(&offset) {
            return Err(BusError(*code));
        }
        state.write(offset, value);
        Ok(())
    }
}
