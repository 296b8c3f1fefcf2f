//! [`HardwareState`] – explicit presence/absence of a physical peripheral.
//!
//! Probing a bus or chip that is not physically attached must never take the
//! process down; it degrades the owning driver instead. Actuation paths match
//! on this type explicitly, so "forgot to null-check" bugs cannot exist –
//! an `Absent` peripheral simply turns the hardware write into a no-op while
//! the surrounding state machine keeps running.

use tracing::warn;

/// A peripheral handle that may or may not be physically attached.
#[derive(Debug)]
pub enum HardwareState<T> {
    Present(T),
    Absent,
}

impl<T> HardwareState<T> {
    /// Convert a probe result into a state, logging the failure. This is the
    /// single place where "hardware not found" is allowed to swallow an
    /// error.
    pub fn from_probe<E: std::fmt::Display>(result: Result<T, E>, component: &str) -> Self {
        match result {
            Ok(handle) => HardwareState::Present(handle),
            Err(e) => {
                warn!("{component}: hardware unavailable, running degraded: {e}");
                HardwareState::Absent
            }
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, HardwareState::Present(_))
    }

    /// Borrow the handle when present.
    pub fn present(&self) -> Option<&T> {
        match self {
            HardwareState::Present(handle) => Some(handle),
            HardwareState::Absent => None,
        }
    }

    /// Mutably borrow the handle when present.
    pub fn present_mut(&mut self) -> Option<&mut T> {
        match self {
            HardwareState::Present(handle) => Some(handle),
            HardwareState::Absent => None,
        }
    }

    /// Take the handle out, leaving `Absent` behind. Used by shutdown paths
    /// to release a resource exactly once.
    pub fn take(&mut self) -> HardwareState<T> {
        std::mem::replace(self, HardwareState::Absent)
    }
}

impl<T: Clone> Clone for HardwareState<T> {
    fn clone(&self) -> Self {
        match self {
            HardwareState::Present(handle) => HardwareState::Present(handle.clone()),
            HardwareState::Absent => HardwareState::Absent,
        }
    }
}
