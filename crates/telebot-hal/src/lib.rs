//! `telebot-hal` – lifecycle-managed hardware drivers.
//!
//! Every driver follows the same contract: construction is infallible,
//! [`Driver::initialise`][lifecycle::Driver::initialise] probes the physical
//! peripheral and *degrades* instead of failing when it is absent, and
//! [`Driver::shut_down`][lifecycle::Driver::shut_down] is an idempotent
//! best-effort release. The whole stack runs identically on a development
//! machine with no buses attached – actuation simply becomes a no-op.
//!
//! # Modules
//!
//! - [`hardware`] – [`HardwareState`][hardware::HardwareState]: the
//!   `Present`/`Absent` seam every driver threads its peripheral through.
//! - [`lifecycle`] – [`DriverState`][lifecycle::DriverState] machine and the
//!   shared [`Driver`][lifecycle::Driver] trait.
//! - [`i2c`] / [`gpio`] – bus drivers; acquire the `rppal` handles once and
//!   share them read-only with the actuation drivers.
//! - [`pwm`] – [`Pca9685`][pwm::Pca9685]: thin async wrapper around the
//!   16-channel PWM chip on the I2C bus.
//! - [`motor`] – four-wheel drive with tank mixing and constant-rate ramping.
//! - [`servo`] – pan/tilt easing plus the tilt-lock brake sequence.
//! - [`leds`] – segmented LED strip with configurable wiring order.
//! - [`power`] / [`speaker`] – placeholder peripherals, lifecycle-managed so
//!   the boot and shutdown sequences already account for them.

pub mod gpio;
pub mod hardware;
pub mod i2c;
pub mod leds;
pub mod lifecycle;
pub mod motor;
pub mod power;
pub mod pwm;
pub mod servo;
pub mod speaker;

pub use gpio::GpioBus;
pub use hardware::HardwareState;
pub use i2c::{I2cBus, SharedI2c};
pub use leds::{Color, LedConfig, LedStripDriver, Side};
pub use lifecycle::{Driver, DriverState};
pub use motor::{MotorCommand, MotorConfig, MotorDriver, WheelChannelConfig, WheelId};
pub use power::PowerMonitor;
pub use pwm::Pca9685;
pub use servo::{LockChannelConfig, ServoChannelConfig, ServoCommand, ServoConfig, ServoDriver};
pub use speaker::Speaker;
