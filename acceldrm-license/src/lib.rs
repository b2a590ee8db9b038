//! Client-side licensing engine for metered FPGA designs.
//!
//! [`DrmManager`] owns one DRM controller through a [`RegisterBus`], opens
//! entitlement sessions with the licensing service, keeps licences loaded
//! ahead of expiry from a background task, reports activator usage and
//! delivers background failures through an [`AsyncErrorSlot`] and an
//! optional callback.
//!
//! ```no_run
//! # async fn demo() -> acceldrm_types::DrmResult<()> {
//! use acceldrm_hw::SimulatedController;
//! use acceldrm_license::DrmManager;
//! use std::path::Path;
//!
//! let bus = Box::new(SimulatedController::new("sim0"));
//! let mut drm = DrmManager::new(Path::new("conf.json"), Path::new("cred.json"), bus, None)?;
//! drm.activate(false).await?;
//! println!("metered: {}", drm.get("metered_data")?);
//! drm.deactivate(false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`RegisterBus`]: acceldrm_hw::RegisterBus

mod config;
mod engine;
mod health;
mod manager;
mod metering;
mod nodelocked;
mod parameter;
mod reporter;
mod session;

pub use config::{DesignSection, DrmConfig, DrmSection, LicensingConfig, LogLevel, Settings};
pub use health::HealthConfig;
pub use manager::DrmManager;
pub use metering::{ActivatorCheck, MeteringAggregator, MeteringDiagnosis};
pub use nodelocked::NodeLockedFiles;
pub use parameter::{Access, Parameter};
pub use reporter::{AsyncCallback, AsyncError, AsyncErrorReporter, AsyncErrorSlot};
pub use session::{Session, SessionState};
