//! `telebot-kernel` – composition root of the control core.
//!
//! # Modules
//!
//! - [`input`] – [`InputManager`][input::InputManager]: the single source of
//!   truth for operator intent; clamps, deduplicates, and emits typed change
//!   values the kernel routes to the drivers.
//! - [`config`] – [`Config`][config::Config]: environment-sourced
//!   configuration, validated at boot.
//! - [`kernel`] – [`Kernel`][kernel::Kernel]: owns every driver and the
//!   input manager, sequences startup and shutdown, and performs the routing
//!   switch between transport events and actuation.

pub mod config;
pub mod input;
pub mod kernel;

pub use config::{Config, ConfigError};
pub use input::{InputChange, InputCommand, InputManager};
pub use kernel::Kernel;
