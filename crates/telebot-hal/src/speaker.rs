//! Speaker – placeholder audio output.
//!
//! Audio hardware is not wired up yet; the driver exists so the boot and
//! shutdown sequences already have it in the right slot when it lands.

use async_trait::async_trait;

use crate::lifecycle::{Driver, DriverState, Lifecycle};

pub struct Speaker {
    lifecycle: Lifecycle,
}

impl Speaker {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new("speaker"),
        }
    }
}

impl Default for Speaker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for Speaker {
    fn name(&self) -> &'static str {
        self.lifecycle.name()
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    fn hardware_available(&self) -> bool {
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
        self.lifecycle.finish_shutdown();
    }
}
