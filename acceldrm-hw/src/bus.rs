//! Register bus access and hardware ownership.
//!
//! All register traffic, foreground and background, goes through one
//! [`HardwareHandle`]. The handle holds the only lock on the bus and a claim
//! on the physical resource in a process-wide registry, so a second engine
//! on the same device fails at construction.

use acceldrm_types::{DrmError, DrmResult};
use std::collections::HashSet;
use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Non-zero error code returned by a register callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError(pub i32);

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errcode {}", self.0)
    }
}

/// Caller-supplied access to the DRM controller registers.
pub trait RegisterBus: Send {
    /// Identity of the physical resource behind this bus (e.g. a PCIe slot).
    fn resource_id(&self) -> String;

    /// Reads the 32-bit register at `offset`.
    fn read(&mut self, offset: u32) -> Result<u32, BusError>;

    /// Writes `value` to the 32-bit register at `offset`.
    fn write(&mut self, offset: u32, value: u32) -> Result<(), BusError>;
}

/// Adapts a `read(offset, &mut value) -> errcode` / `write(offset, value) -> errcode`
/// callback pair into a [`RegisterBus`].
pub struct CallbackBus<R, W> {
    resource: String,
    read_fn: R,
    write_fn: W,
}

impl<R, W> CallbackBus<R, W>
where
    R: FnMut(u32, &mut u32) -> i32 + Send,
    W: FnMut(u32, u32) -> i32 + Send,
{
    /// Wraps the callback pair for the given resource.
    pub fn new(resource: impl Into<String>, read_fn: R, write_fn: W) -> Self {
        Self {
            resource: resource.into(),
            read_fn,
            write_fn,
        }
    }
}

impl<R, W> RegisterBus for CallbackBus<R, W>
where
    R: FnMut(u32, &mut u32) -> i32 + Send,
    W: FnMut(u32, u32) -> i32 + Send,
{
    fn resource_id(&self) -> String {
        self.resource.clone()
    }

    fn read(&mut self, offset: u32) -> Result<u32, BusError> {
        let mut value = 0;
        match (self.read_fn)(offset, &mut value) {
            0 => Ok(value),
            code => Err(BusError(code)),
        }
    }

    fn write(&mut self, offset: u32, value: u32) -> Result<(), BusError> {
        match (self.write_fn)(offset, value) {
            0 => Ok(()),
            code => Err(BusError(code)),
        }
    }
}

static CLAIMED_RESOURCES: LazyLock<Mutex<HashSet<String>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Registry entry for a claimed resource; released on drop.
struct ResourceClaim(String);

impl ResourceClaim {
    fn acquire(resource: &str) -> DrmResult<Self> {
        let mut claimed = CLAIMED_RESOURCES
            .lock()
            .map_err(|_| DrmError::Fatal("hardware registry lock poisoned".to_string()))?;
        if !claimed.insert(resource.to_string()) {
            return Err(DrmError::BadUsage(format!(
                "hardware resource '{resource}' is already owned by another engine instance"
            )));
        }
        debug!("Claimed hardware resource {}", resource);
        Ok(Self(resource.to_string()))
    }
}

impl Drop for ResourceClaim {
    fn drop(&mut self) {
        match CLAIMED_RESOURCES.lock() {
            Ok(mut claimed) => {
                claimed.remove(&self.0);
                debug!("Released hardware resource {}", self.0);
            }
            Err(_) => warn!("Hardware registry poisoned, resource {} not released", self.0),
        }
    }
}

/// Exclusive owner of a register bus.
pub struct HardwareHandle {
    resource: String,
    bus: Mutex<Box<dyn RegisterBus>>,
    _claim: ResourceClaim,
}

impl HardwareHandle {
    /// Claims the bus's resource and wraps the bus behind the hardware lock.
    ///
    /// # Errors
    ///
    /// Returns `BadUsage` if another live handle already owns the resource.
    pub fn acquire(bus: Box<dyn RegisterBus>) -> DrmResult<Self> {
        let resource = bus.resource_id();
        let claim = ResourceClaim::acquire(&resource)?;
        Ok(Self {
            resource,
            bus: Mutex::new(bus),
            _claim: claim,
        })
    }

    /// Returns the resource identity.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Takes the hardware lock for a sequence of register accesses.
    pub fn lock(&self) -> DrmResult<BusGuard<'_>> {
        let guard = self
            .bus
            .lock()
            .map_err(|_| DrmError::CtlrError("hardware lock poisoned".to_string()))?;
        Ok(BusGuard { guard })
    }

    /// Reads one register under the hardware lock.
    pub fn read(&self, offset: u32) -> DrmResult<u32> {
        self.lock()?.read(offset)
    }

    /// Writes one register under the hardware lock.
    pub fn write(&self, offset: u32, value: u32) -> DrmResult<()> {
        self.lock()?.write(offset, value)
    }
}

impl fmt::Debug for HardwareHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareHandle")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// Held hardware lock. Register errors surface as `CtlrError`.
pub struct BusGuard<'a> {
    guard: MutexGuard<'a, Box<dyn RegisterBus>>,
}

impl BusGuard<'_> {
    pub fn read(&mut self, offset: u32) -> DrmResult<u32> {
        self.guard.read(offset).map_err(|e| {
            DrmError::CtlrError(format!("register read at 0x{offset:04X} failed with {e}"))
        })
    }

    pub fn write(&mut self, offset: u32, value: u32) -> DrmResult<()> {
        self.guard.write(offset, value).map_err(|e| {
            DrmError::CtlrError(format!("register write at 0x{offset:04X} failed with {e}"))
        })
    }

    /// Reads a 64-bit value split over `lo`/`hi` registers, re-reading the low
    /// word if the high word changed in between.
    pub fn read_u64(&mut self, lo: u32, hi: u32) -> DrmResult<u64> {
        let hi_first = self.read(hi)?;
        let mut low = self.read(lo)?;
        let hi_second = self.read(hi)?;
        if hi_first != hi_second {
            low = self.read(lo)?;
        }
        Ok((u64::from(hi_second) << 32) | u64::from(low))
    }

    /// Writes a 64-bit value split over `lo`/`hi` registers.
    pub fn write_u64(&mut self, lo: u32, hi: u32, value: u64) -> DrmResult<()> {
        self.write(lo, value as u32)?;
        self.write(hi, (value >> 32) as u32)
    }
}
