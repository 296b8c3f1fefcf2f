//! [`I2cBus`] – opens the I2C bus once and shares the handle.
//!
//! The bus handle is acquired at `initialise` and handed out as a
//! [`SharedI2c`] clone to every chip wrapper that needs it (PWM controller,
//! power monitor). Probing a bus that is not physically present degrades to
//! [`HardwareState::Absent`] instead of raising – this is the seam that lets
//! the whole kernel run on non-robot hardware during development.

use std::sync::Arc;

use async_trait::async_trait;
use rppal::i2c::I2c;
use tokio::sync::Mutex;

use crate::hardware::HardwareState;
use crate::lifecycle::{Driver, DriverState, Lifecycle};

/// The bus handle shared read-only between chip wrappers. Access to the
/// underlying file descriptor is serialized by the mutex; the bus driver
/// itself never touches the handle again after acquisition.
pub type SharedI2c = Arc<Mutex<I2c>>;

pub struct I2cBus {
    lifecycle: Lifecycle,
    bus: u8,
    handle: HardwareState<SharedI2c>,
}

impl I2cBus {
    pub fn new(bus: u8) -> Self {
        Self {
            lifecycle: Lifecycle::new("i2c-bus"),
            bus,
            handle: HardwareState::Absent,
        }
    }

    /// A clone of the shared bus handle, or `Absent` when the bus could not
    /// be opened (or has been shut down).
    pub fn handle(&self) -> HardwareState<SharedI2c> {
        self.handle.clone()
    }
}

#[async_trait]
impl Driver for I2cBus {
    fn name(&self) -> &'static str {
        self.lifecycle.name()
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    fn hardware_available(&self) -> bool {
        self.handle.is_present()
    }

    async fn initialise(&mut self) {
        if !self.lifecycle.begin_init() {
            return;
        }
        self.handle = HardwareState::from_probe(
            I2c::with_bus(self.bus).map(|i2c| Arc::new(Mutex::new(i2c))),
            "i2c-bus",
        );
        self.lifecycle.finish_init();
    }

    async fn shut_down(&mut self) {
        if !self.lifecycle.begin_shutdown() {
            return;
        }
        // Dropping the handle closes the bus file descriptor. Chip wrappers
        // hold their own clones and release independently.
        drop(self.handle.take());
        self.lifecycle.finish_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialise_never_fails_without_hardware() {
        // Bus 200 does not exist on any supported board; the driver must
        // come up degraded rather than erroring.
        let mut bus = I2cBus::new(200);
        bus.initialise().await;
        assert_eq!(bus.state(), DriverState::Initialised);
        assert!(!bus.hardware_available());
        assert!(!bus.handle().is_present());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let mut bus = I2cBus::new(200);
        bus.initialise().await;
        bus.shut_down().await;
        assert_eq!(bus.state(), DriverState::ShutDown);
        bus.shut_down().await;
        assert_eq!(bus.state(), DriverState::ShutDown);
    }
}
