//! DRM controller register map (byte offsets of 32-bit registers).

// Controller
pub const REG_VERSION: u32 = 0x00;
pub const REG_CAPABILITIES: u32 = 0x04;
pub const REG_SCRATCH_A: u32 = 0x08;
pub const REG_SCRATCH_B: u32 = 0x0C;
pub const REG_COMMAND: u32 = 0x10;
pub const REG_STATUS: u32 = 0x14;
pub const REG_LICENSE_DATA: u32 = 0x18;
pub const REG_LICENSE_TIMER_LO: u32 = 0x1C;
pub const REG_LICENSE_TIMER_HI: u32 = 0x20;
pub const REG_TIMER_COUNTDOWN_LO: u32 = 0x24;
pub const REG_TIMER_COUNTDOWN_HI: u32 = 0x28;
pub const REG_FREQ_COUNTER_DRM: u32 = 0x2C;
pub const REG_FREQ_COUNTER_AXI: u32 = 0x30;
pub const REG_CUSTOM_FIELD: u32 = 0x34;
pub const REG_MAILBOX_SIZE: u32 = 0x38;
pub const REG_MAILBOX_COUNT: u32 = 0x3C;
pub const REG_PRODUCT_INFO_SIZE: u32 = 0x40;

pub const MAILBOX_BASE: u32 = 0x100;
pub const PRODUCT_INFO_BASE: u32 = 0x400;

// Commands
pub const CMD_LOAD_LICENSE: u32 = 1;
pub const CMD_LOAD_NODELOCKED: u32 = 2;
pub const CMD_CLEAR_LICENSE: u32 = 3;
pub const CMD_TIMER_RUN: u32 = 4;

// Status bits
pub const STATUS_LICENSE_ACTIVE: u32 = 1 << 0;
pub const STATUS_NODELOCKED: u32 = 1 << 1;

// Capability bits
pub const CAP_DRM_COUNTER: u32 = 1 << 0;
pub const CAP_AXI_COUNTER: u32 = 1 << 1;

// Activators
pub const ACTIVATOR_BASE: u32 = 0x1000;
pub const ACTIVATOR_STRIDE: u32 = 0x100;
pub const MAX_ACTIVATORS: usize = 64;
pub const ACTIVATOR_SIGNATURE: u32 = 0x4143_5456;

pub const ACT_SIGNATURE: u32 = 0x00;
pub const ACT_VLNV: u32 = 0x04;
pub const ACT_STATUS: u32 = 0x08;
pub const ACT_METERING_LO: u32 = 0x0C;
pub const ACT_METERING_HI: u32 = 0x10;

pub const ACT_STATUS_UNLOCKED: u32 = 1 << 0;

// Self-test patterns: (register, pattern)
pub const SELF_TEST_PATTERNS: [(u32, u32); 4] = [
    (REG_SCRATCH_A, 0xA5A5_A5A5),
    (REG_SCRATCH_A, 0x5A5A_5A5A),
    (REG_SCRATCH_B, 0x0F0F_0F0F),
    (REG_SCRATCH_B, 0xF0F0_F0F0),
];

/// Base address of activator `index`.
#[must_use]
pub const fn activator_base(index: usize) -> u32 {
    ACTIVATOR_BASE + (index as u32) * ACTIVATOR_STRIDE
}
