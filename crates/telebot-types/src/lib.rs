//! `telebot-types` – shared data model for the telepresence bot.
//!
//! Everything the crates agree on lives here: the normalized operator-input
//! vectors, the composite status snapshot broadcast to clients, the wire
//! protocol ([`protocol`]), and the crate-spanning error type [`BotError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod protocol;

/// Lower bound of a normalized operator axis.
pub const AXIS_MIN: f32 = -100.0;
/// Upper bound of a normalized operator axis.
pub const AXIS_MAX: f32 = 100.0;

/// Clamp a single axis value into the normalized `[-100, 100]` range.
pub fn clamp_axis(value: f32) -> f32 {
    value.clamp(AXIS_MIN, AXIS_MAX)
}

/// Clamp a speed multiplier into `[0, 100]`.
pub fn clamp_speed(value: f32) -> f32 {
    value.clamp(0.0, AXIS_MAX)
}

/// Round to two decimal places so that float jitter from the operator UI
/// cannot produce spurious change events.
pub fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Normalized 2D operator input.
///
/// Used for both the drive vector (forward/back + turn) and the pan/tilt
/// vector (camera axes). Always passed by value; drivers receive copies, not
/// references into shared state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Both axes clamped into `[-100, 100]`.
    pub fn clamped(self) -> Self {
        Self {
            x: clamp_axis(self.x),
            y: clamp_axis(self.y),
        }
    }

    /// Both axes rounded to two decimal places.
    pub fn rounded(self) -> Self {
        Self {
            x: round2(self.x),
            y: round2(self.y),
        }
    }
}

/// Current/voltage telemetry. Fields are `None` until the sensing hardware
/// lands; the record is part of the status snapshot either way.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PowerStatus {
    pub voltage: Option<f32>,
    pub current: Option<f32>,
}

/// Read-only composite snapshot of the bot, broadcast to clients on connect
/// and on change. Derived, never stored – always recomputed from current
/// component state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStatus {
    pub drive: Vector2,
    pub pan_tilt: Vector2,
    pub speed: f32,
    pub power: PowerStatus,
}

/// Error taxonomy spanning the bot stack.
///
/// Only [`BotError::Transport`] failures raised during boot terminate the
/// process; everything else is resolved locally and logged.
#[derive(Error, Debug)]
pub enum BotError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("hardware fault on {component}: {details}")]
    Hardware { component: String, details: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
