//! Motor driver – tank-drive mixing and constant-rate wheel ramping.
//!
//! The driver keeps four independently ramped wheel actuators. Operator
//! input changes recompute **target** speeds synchronously; a periodic tick
//! then advances each wheel's **actual** speed toward its target by a fixed
//! acceleration step and writes the result to the PWM chip and direction
//! pins. The tick timer only exists while at least one wheel still has
//! ramping to do – when the robot is stationary and commanded to stay
//! stationary there is no idle bus traffic at all.

use std::time::Duration;

use async_trait::async_trait;
use rppal::gpio::{Gpio, OutputPin};
use tokio::sync::mpsc;
use tracing::debug;

use telebot_types::{AXIS_MAX, AXIS_MIN, Vector2, clamp_speed};

use crate::gpio::acquire_output_pin;
use crate::hardware::HardwareState;
use crate::lifecycle::{Driver, DriverState, Lifecycle};
use crate::pwm::Pca9685;

/// Identity of one wheel actuator. Also the index into the wheel arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelId {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl WheelId {
    pub const ALL: [WheelId; 4] = [
        WheelId::FrontLeft,
        WheelId::FrontRight,
        WheelId::RearLeft,
        WheelId::RearRight,
    ];

    pub fn index(self) -> usize {
        match self {
            WheelId::FrontLeft => 0,
            WheelId::FrontRight => 1,
            WheelId::RearLeft => 2,
            WheelId::RearRight => 3,
        }
    }

    fn is_left(self) -> bool {
        matches!(self, WheelId::FrontLeft | WheelId::RearLeft)
    }
}

/// Wheel rotation direction, always derived from the sign of the actual
/// speed – never stored independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
    Stationary,
}

impl Direction {
    pub fn from_speed(speed: f32) -> Self {
        if speed > 0.0 {
            Direction::Forward
        } else if speed < 0.0 {
            Direction::Reverse
        } else {
            Direction::Stationary
        }
    }
}

/// PWM channel and direction pin assignment for one wheel.
#[derive(Debug, Clone, Copy)]
pub struct WheelChannelConfig {
    pub pwm_channel: u8,
    pub forward_pin: u8,
    pub reverse_pin: u8,
}

/// Motor driver configuration. Channel/pin assignments are indexed by
/// [`WheelId`]; the acceleration step and tick interval are tuning values,
/// not semantic constants.
#[derive(Debug, Clone)]
pub struct MotorConfig {
    pub wheels: [WheelChannelConfig; 4],
    /// Speed units added toward the target per tick.
    pub acceleration: f32,
    pub tick_interval: Duration,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            wheels: [
                WheelChannelConfig { pwm_channel: 0, forward_pin: 17, reverse_pin: 27 },
                WheelChannelConfig { pwm_channel: 1, forward_pin: 22, reverse_pin: 23 },
                WheelChannelConfig { pwm_channel: 2, forward_pin: 5, reverse_pin: 6 },
                WheelChannelConfig { pwm_channel: 3, forward_pin: 13, reverse_pin: 19 },
            ],
            acceleration: 5.0,
            tick_interval: Duration::from_millis(50),
        }
    }
}

/// Per-side wheel speed targets produced by the drive mix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveTargets {
    pub left: f32,
    pub right: f32,
}

/// Tank-drive mixing: convert a drive vector and speed multiplier into
/// left/right wheel speeds.
///
/// Pure forward/back motion (`x == 0`) yields identical sides; pure
/// rotation (`y == 0`) yields opposite sides.
pub fn mix_drive(input: Vector2, speed: f32) -> DriveTargets {
    let x = -input.x;
    let y = input.y;
    let v = (100.0 - x.abs()) * (y / 100.0) + y;
    let w = (100.0 - y.abs()) * (x / 100.0) + x;
    DriveTargets {
        left: ((v - w) / 2.0) * (speed / 100.0),
        right: ((v + w) / 2.0) * (speed / 100.0),
    }
}

/// Advance `actual` toward `target` by at most `step`, landing exactly on
/// the target instead of oscillating around it.
pub fn step_toward(actual: f32, target: f32, step: f32) -> f32 {
    let next = if actual < target {
        (actual + step).min(target)
    } else if actual > target {
        (actual - step).max(target)
    } else {
        actual
    };
    next.clamp(AXIS_MIN, AXIS_MAX)
}

struct Wheel {
    config: WheelChannelConfig,
    forward: HardwareState<OutputPin>,
    reverse: HardwareState<OutputPin>,
    target_speed: f32,
    actual_speed: f32,
}

impl Wheel {
    fn new(config: WheelChannelConfig) -> Self {
        Self {
            config,
            forward: HardwareState::Absent,
            reverse: HardwareState::Absent,
            target_speed: 0.0,
            actual_speed: 0.0,
        }
    }

    fn direction(&self) -> Direction {
        Direction::from_speed(self.actual_speed)
    }

    fn needs_ramping(&self) -> bool {
        self.actual_speed != self.target_speed
    }

    /// Write the current actual speed to the hardware: duty cycle plus the
    /// two direction pins, of which at most one is ever high. The inactive
    /// pin is lowered before the active one is raised.
    async fn apply(&mut self, pwm: &Pca9685) {
        pwm.set_duty_cycle(self.config.pwm_channel, self.actual_speed.abs() / 100.0)
            .await;
        match self.direction() {
            Direction::Forward => {
                if let Some(pin) = self.reverse.present_mut() {
                    pin.set_low();
                }
                if let Some(pin) = self.forward.present_mut() {
                    pin.set_high();
                }
            }
            Direction::Reverse => {
                if let Some(pin) = self.forward.present_mut() {
                    pin.set_low();
                }
                if let Some(pin) = self.reverse.present_mut() {
                    pin.set_high();
                }
            }
            Direction::Stationary => {
                if let Some(pin) = self.forward.present_mut() {
                    pin.set_low();
                }
                if let Some(pin) = self.reverse.present_mut() {
                    pin.set_low();
                }
            }
        }
    }
}

/// Commands routed to the motor task by the kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum MotorCommand {
    SetDriveInput(Vector2),
    SetSpeed(f32),
    Stop,
    ShutDown,
}

pub struct MotorDriver {
    lifecycle: Lifecycle,
    pwm: Pca9685,
    gpio: HardwareState<Gpio>,
    wheels: [Wheel; 4],
    drive_input: Vector2,
    speed: f32,
    acceleration: f32,
    tick_interval: Duration,
}

impl MotorDriver {
    pub fn new(pwm: Pca9685, gpio: HardwareState<Gpio>, config: MotorConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new("motor-driver"),
            pwm,
            gpio,
            wheels: config.wheels.map(Wheel::new),
            drive_input: Vector2::default(),
            speed: 100.0,
            acceleration: config.acceleration,
            tick_interval: config.tick_interval,
        }
    }

    /// Store a new drive vector and recompute wheel targets. Returns whether
    /// the control loop needs to be running.
    pub fn set_drive_input(&mut self, input: Vector2) -> bool {
        self.drive_input = input.clamped();
        self.retarget()
    }

    /// Store a new speed multiplier and recompute wheel targets.
    pub fn set_speed(&mut self, speed: f32) -> bool {
        self.speed = clamp_speed(speed);
        self.retarget()
    }

    /// Force the drive vector to zero.
    pub fn stop(&mut self) -> bool {
        self.drive_input = Vector2::default();
        self.retarget()
    }

    fn retarget(&mut self) -> bool {
        let targets = mix_drive(self.drive_input, self.speed);
        for id in WheelId::ALL {
            let wheel = &mut self.wheels[id.index()];
            wheel.target_speed = if id.is_left() { targets.left } else { targets.right };
        }
        self.needs_ramping()
    }

    /// `true` while at least one wheel's actual speed differs from its
    /// target.
    pub fn needs_ramping(&self) -> bool {
        self.wheels.iter().any(Wheel::needs_ramping)
    }

    pub fn target_speed(&self, id: WheelId) -> f32 {
        self.wheels[id.index()].target_speed
    }

    pub fn actual_speed(&self, id: WheelId) -> f32 {
        self.wheels[id.index()].actual_speed
    }

    pub fn direction(&self, id: WheelId) -> Direction {
        self.wheels[id.index()].direction()
    }

    /// One ramp step for every wheel. Returns whether any wheel changed;
    /// `false` means the loop may go to sleep.
    pub async fn tick(&mut self) -> bool {
        let mut changed = false;
        for wheel in &mut self.wheels {
            let next = step_toward(wheel.actual_speed, wheel.target_speed, self.acceleration);
            if next != wheel.actual_speed {
                wheel.actual_speed = next;
                wheel.apply(&self.pwm).await;
                changed = true;
            }
        }
        changed
    }

    /// Drive the ramp loop: commands arm the tick timer, an idle tick
    /// disarms it. Consumes the driver; ends on [`MotorCommand::ShutDown`]
    /// or when the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<MotorCommand>) {
        let mut ticker: Option<tokio::time::Interval> = None;
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let wake = match command {
                        Some(MotorCommand::SetDriveInput(input)) => self.set_drive_input(input),
                        Some(MotorCommand::SetSpeed(speed)) => self.set_speed(speed),
                        Some(MotorCommand::Stop) => self.stop(),
                        Some(MotorCommand::ShutDown) | None => break,
                    };
                    if wake && ticker.is_none() {
                        ticker = Some(tokio::time::interval(self.tick_interval));
                    }
                }
                _ = async {
                    match ticker.as_mut() {
                        Some(ticker) => { ticker.tick().await; }
                        None => std::future::pending().await,
                    }
                } => {
                    if !self.tick().await {
                        debug!("motor-driver: ramp idle, timer disarmed");
                        ticker = None;
                    }
                }
            }
        }
        self.shut_down().await;
    }
}

#[async_trait]
impl Driver for MotorDriver {
    fn name(&self) -> &'static str {
        self.lifecycle.name()
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    fn hardware_available(&self) -> bool {
        self.pwm.is_present() || self.wheels.iter().any(|w| w.forward.is_present())
    }

    async fn initialise(&mut self) {
        if !self.lifecycle.begin_init() {
            return;
        }
        for wheel in &mut self.wheels {
            wheel.forward = acquire_output_pin(&self.gpio, wheel.config.forward_pin);
            wheel.reverse = acquire_output_pin(&self.gpio, wheel.config.reverse_pin);
        }
        self.lifecycle.finish_init();
    }

    async fn shut_down(&mut self) {
        if !self.lifecycle.begin_shutdown() {
            return;
        }
        for wheel in &mut self.wheels {
            wheel.target_speed = 0.0;
            wheel.actual_speed = 0.0;
            self.pwm.channel_off(wheel.config.pwm_channel).await;
            if let Some(pin) = wheel.forward.present_mut() {
                pin.set_low();
            }
            if let Some(pin) = wheel.reverse.present_mut() {
                pin.set_low();
            }
            drop(wheel.forward.take());
            drop(wheel.reverse.take());
        }
        self.lifecycle.finish_shutdown();
    }
}
