//! Shared helpers for hardware tests.

#![allow(dead_code)]

use acceldrm_hw::{Controller, HardwareHandle, SimulatedController};
use acceldrm_types::{ProductId, ProductInfo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static NEXT_RESOURCE: AtomicUsize = AtomicUsize::new(0);

/// Returns a resource id no other test uses.
pub fn unique_resource(prefix: &str) -> String {
    format!("{prefix}-{}", NEXT_RESOURCE.fetch_add(1, Ordering::SeqCst))
}

/// A simulated controller on a fresh resource.
pub fn sim() -> SimulatedController {
    SimulatedController::new(unique_resource("hw-test"))
}

pub fn product_info() -> ProductInfo {
    ProductInfo {
        product_id: ProductId::new("acme", "accel", "matrix_core"),
        pkg_version: Some("1.0.0".into()),
    }
}

/// Claims the simulated device and opens its controller.
pub fn open(sim: &SimulatedController) -> (Arc<HardwareHandle>, Controller) {
    let hw = Arc::new(HardwareHandle::acquire(Box::new(sim.clone())).unwrap());
    let controller = Controller::open(Arc::clone(&hw)).unwrap();
    (hw, controller)
}
