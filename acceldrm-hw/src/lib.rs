//! Hardware side of the acceldrm licensing engine.
//!
//! This crate handles:
//! - The caller-supplied register bus and its single hardware lock
//! - Process-wide ownership of a hardware resource
//! - DRM controller self-test, licence loading, mailbox and design ROM
//! - Activator enumeration, lock state and usage counters
//! - DRM clock frequency calibration
//!
//! # Design Principles
//!
//! - **One gate**: every register access goes through [`HardwareHandle`]
//! - **One owner**: a resource can only be held by one live handle
//! - **Read-only design**: activators are enumerated once and only observed
//!
//! A [`SimulatedController`] emulates the controller in software.

mod activator;
mod bus;
mod controller;
mod frequency;
pub mod regmap;
pub mod sim;

pub use activator::{Activator, Design, Vlnv};
pub use bus::{BusError, BusGuard, CallbackBus, HardwareHandle, RegisterBus};
pub use controller::{license_key_words, Capabilities, Controller, ControllerVersion};
pub use frequency::{Calibration, DetectionMethod, FrequencyCalibrator, FrequencySettings};
pub use sim::SimulatedController;
