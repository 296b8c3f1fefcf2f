//! Driver lifecycle contract.
//!
//! Every driver moves through [`DriverState`] in one direction only:
//! `Uninitialised → Initialising → Initialised → ShuttingDown → ShutDown`.
//! Transitions never repeat – a second `initialise` or a `shut_down` after
//! `ShutDown` is a no-op. [`Lifecycle`] is the small guard that drivers embed
//! to enforce this without each of them re-implementing the bookkeeping.

use async_trait::async_trait;
use tracing::{debug, info};

/// Lifecycle states shared by all drivers. One-directional, non-repeatable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialised,
    Initialising,
    Initialised,
    ShuttingDown,
    ShutDown,
}

/// Transition guard embedded in every driver.
#[derive(Debug)]
pub struct Lifecycle {
    name: &'static str,
    state: DriverState,
}

impl Lifecycle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: DriverState::Uninitialised,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Enter `Initialising`. Returns `false` (and does nothing) unless the
    /// driver is still `Uninitialised`.
    pub fn begin_init(&mut self) -> bool {
        if self.state != DriverState::Uninitialised {
            debug!("{}: initialise ignored in state {:?}", self.name, self.state);
            return false;
        }
        self.state = DriverState::Initialising;
        true
    }

    /// Enter `Initialised`. Reached exactly once, regardless of whether the
    /// hardware probe succeeded.
    pub fn finish_init(&mut self) {
        self.state = DriverState::Initialised;
        info!("{} initialised", self.name);
    }

    /// Enter `ShuttingDown`. Returns `false` once shutdown has already begun
    /// or completed, making `shut_down` idempotent.
    pub fn begin_shutdown(&mut self) -> bool {
        match self.state {
            DriverState::ShuttingDown | DriverState::ShutDown => false,
            _ => {
                self.state = DriverState::ShuttingDown;
                true
            }
        }
    }

    pub fn finish_shutdown(&mut self) {
        self.state = DriverState::ShutDown;
        info!("{} shut down", self.name);
    }
}

/// The contract every driver implements.
///
/// `initialise` probes the driver's hardware dependency and *never fails*:
/// an absent peripheral leaves the driver initialised but degraded
/// (`hardware_available() == false`, actuation no-ops). `shut_down` releases
/// resources best-effort, each release wrapped independently so one failure
/// cannot block the rest.
#[async_trait]
pub trait Driver: Send {
    fn name(&self) -> &'static str;

    fn state(&self) -> DriverState;

    /// `false` when the driver is running degraded (peripheral absent).
    fn hardware_available(&self) -> bool;

    async fn initialise(&mut self);

    async fn shut_down(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_one_directional() {
        let mut lc = Lifecycle::new("test-driver");
        assert_eq!(lc.state(), DriverState::Uninitialised);

        assert!(lc.begin_init());
        assert_eq!(lc.state(), DriverState::Initialising);
        lc.finish_init();
        assert_eq!(lc.state(), DriverState::Initialised);

        // A second initialise attempt is rejected.
        assert!(!lc.begin_init());
        assert_eq!(lc.state(), DriverState::Initialised);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut lc = Lifecycle::new("test-driver");
        lc.begin_init();
        lc.finish_init();

        assert!(lc.begin_shutdown());
        lc.finish_shutdown();
        assert_eq!(lc.state(), DriverState::ShutDown);

        // Further shutdown calls are no-ops.
        assert!(!lc.begin_shutdown());
        assert_eq!(lc.state(), DriverState::ShutDown);
    }

    #[test]
    fn shutdown_from_uninitialised_still_completes() {
        let mut lc = Lifecycle::new("test-driver");
        assert!(lc.begin_shutdown());
        lc.finish_shutdown();
        assert_eq!(lc.state(), DriverState::ShutDown);
        assert!(!lc.begin_init());
    }
}
