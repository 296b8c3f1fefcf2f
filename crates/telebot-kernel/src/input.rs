//! [`InputManager`] – single source of truth for operator intent.
//!
//! Holds the drive vector, the pan/tilt vector, and the speed multiplier.
//! Incoming values are clamped and rounded to two decimal places before the
//! change comparison, so float jitter from the operator UI cannot trigger
//! spurious change events. The manager touches no hardware and performs no
//! I/O – [`InputManager::handle`] returns the change (or nothing) and the
//! kernel does the routing.

use telebot_types::{Vector2, clamp_speed, round2};

/// Commands accepted by the input manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputCommand {
    SetSpeed(f32),
    SetDriveInput(Vector2),
    SetPanTiltInput(Vector2),
}

/// A stored value that actually changed, carrying only the changed field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputChange {
    Drive(Vector2),
    PanTilt(Vector2),
    Speed(f32),
}

pub struct InputManager {
    drive: Vector2,
    pan_tilt: Vector2,
    speed: f32,
}

impl Default for InputManager {
    fn default() -> Self {
        Self {
            drive: Vector2::default(),
            pan_tilt: Vector2::default(),
            // Identity multiplier: the drive vector starts at zero, so this
            // causes no motion on its own.
            speed: 100.0,
        }
    }
}

impl InputManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drive(&self) -> Vector2 {
        self.drive
    }

    pub fn pan_tilt(&self) -> Vector2 {
        self.pan_tilt
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Clamp, round, compare, store. Returns `None` when the rounded value
    /// equals the stored one.
    pub fn handle(&mut self, command: InputCommand) -> Option<InputChange> {
        match command {
            InputCommand::SetSpeed(value) => {
                let value = round2(clamp_speed(value));
                if value == self.speed {
                    None
                } else {
                    self.speed = value;
                    Some(InputChange::Speed(value))
                }
            }
            InputCommand::SetDriveInput(vector) => {
                let vector = vector.clamped().rounded();
                if vector == self.drive {
                    None
                } else {
                    self.drive = vector;
                    Some(InputChange::Drive(vector))
                }
            }
            InputCommand::SetPanTiltInput(vector) => {
                let vector = vector.clamped().rounded();
                if vector == self.pan_tilt {
                    None
                } else {
                    self.pan_tilt = vector;
                    Some(InputChange::PanTilt(vector))
                }
            }
        }
    }
}
