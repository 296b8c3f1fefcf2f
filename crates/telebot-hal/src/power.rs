//! Power monitor – placeholder telemetry source.
//!
//! The current/voltage sensing chip has not landed yet; the driver holds a
//! clone of the shared I2C bus handle so the future sensor can attach
//! without rewiring the kernel, and reports an empty [`PowerStatus`] in the
//! meantime. It participates in the boot and shutdown sequences like every
//! other driver.

use async_trait::async_trait;

use telebot_types::PowerStatus;

use crate::hardware::HardwareState;
use crate::i2c::SharedI2c;
use crate::lifecycle::{Driver, DriverState, Lifecycle};

pub struct PowerMonitor {
    lifecycle: Lifecycle,
    bus: HardwareState<SharedI2c>,
}

impl PowerMonitor {
    pub fn new(bus: HardwareState<SharedI2c>) -> Self {
        Self {
            lifecycle: Lifecycle::new("power-monitor"),
            bus,
        }
    }

    /// Latest telemetry snapshot. Empty until the sensing hardware exists.
    pub fn status(&self) -> PowerStatus {
        PowerStatus::default()
    }
}

#[async_trait]
impl Driver for PowerMonitor {
    fn name(&self) -> &'static str {
        self.lifecycle.name()
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    fn hardware_available(&self) -> bool {
        // No sensor chip yet, regardless of the bus being present.
        false
    }

    async fn initialise(&mut self) {
        if !self.lifecycle.begin_init() {
            return;
        }
        self.lifecycle.finish_init();
    }

    async fn shut_down(&mut self) {
        if !self.lifecycle.begin_shutdown() {
            return;
        }
        drop(self.bus.take());
        self.lifecycle.finish_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_empty_telemetry() {
        let mut monitor = PowerMonitor::new(HardwareState::Absent);
        monitor.initialise().await;
        let status = monitor.status();
        assert_eq!(status.voltage, None);
        assert_eq!(status.current, None);
    }
}
