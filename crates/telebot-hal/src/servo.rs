//! Servo driver – pan/tilt easing and the tilt-lock brake sequence.
//!
//! Pan and tilt positions ease toward their targets with a velocity that
//! accelerates and decays by a fixed step per tick. A position that has
//! never been actuated is a distinguished *unset* state: the first update
//! snaps straight to the target instead of easing from an undefined origin.
//!
//! The tilt axis carries a mechanical brake servo that holds the axis
//! passively once engaged and needs power only to release. After the tilt
//! servo has been idle for a debounce period the lock sequence runs (drive
//! the brake to its locked pulse, wait for servo travel, then cut power to
//! both the tilt and the brake channel). Any tilt movement request while the
//! brake is engaged or engaging releases it first and holds tilt actuation
//! until the release has settled. The control loop may only go to sleep once
//! the brake has fully engaged – sleeping mid-sequence would abandon an
//! in-flight transition.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use telebot_types::{AXIS_MAX, AXIS_MIN, Vector2};

use crate::lifecycle::{Driver, DriverState, Lifecycle};
use crate::pwm::Pca9685;

/// PWM channel and pulse bounds for one positional servo.
#[derive(Debug, Clone, Copy)]
pub struct ServoChannelConfig {
    pub pwm_channel: u8,
    pub min_pulse_us: f32,
    pub max_pulse_us: f32,
}

/// PWM channel and the two pulse lengths of the tilt brake servo.
#[derive(Debug, Clone, Copy)]
pub struct LockChannelConfig {
    pub pwm_channel: u8,
    pub locked_pulse_us: f32,
    pub unlocked_pulse_us: f32,
}

/// Servo driver configuration. Easing constants and lock timings are tuning
/// values surfaced through configuration.
#[derive(Debug, Clone)]
pub struct ServoConfig {
    pub pan: ServoChannelConfig,
    pub tilt: ServoChannelConfig,
    pub lock: LockChannelConfig,
    /// Position units per tick at full speed.
    pub max_velocity: f32,
    /// Velocity change per tick.
    pub acceleration: f32,
    /// Tilt idle time before the lock sequence starts.
    pub lock_debounce: Duration,
    /// Servo travel time allowed for each lock/unlock transition.
    pub lock_settle: Duration,
    pub tick_interval: Duration,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            pan: ServoChannelConfig { pwm_channel: 4, min_pulse_us: 600.0, max_pulse_us: 2400.0 },
            tilt: ServoChannelConfig { pwm_channel: 5, min_pulse_us: 600.0, max_pulse_us: 2400.0 },
            lock: LockChannelConfig {
                pwm_channel: 6,
                locked_pulse_us: 2200.0,
                unlocked_pulse_us: 800.0,
            },
            max_velocity: 6.0,
            acceleration: 0.75,
            lock_debounce: Duration::from_millis(1500),
            lock_settle: Duration::from_millis(400),
            tick_interval: Duration::from_millis(20),
        }
    }
}

/// One easing step: accelerate the velocity toward the target direction (or
/// decay it when it opposes), apply it to the position, and snap exactly
/// onto the target once within one acceleration step of it.
pub fn ease(
    actual: f32,
    velocity: f32,
    target: f32,
    max_velocity: f32,
    acceleration: f32,
) -> (f32, f32) {
    let delta = target - actual;
    let toward = if delta > 0.0 {
        1.0
    } else if delta < 0.0 {
        -1.0
    } else {
        0.0
    };

    let velocity = if velocity == 0.0 || velocity.signum() == toward {
        (velocity + toward * acceleration).clamp(-max_velocity, max_velocity)
    } else if velocity > 0.0 {
        (velocity - acceleration).max(0.0)
    } else {
        (velocity + acceleration).min(0.0)
    };

    let position = (actual + velocity).clamp(AXIS_MIN, AXIS_MAX);
    if (position - target).abs() < acceleration {
        (target, 0.0)
    } else {
        (position, velocity)
    }
}

struct Servo {
    config: ServoChannelConfig,
    target: f32,
    actual: Option<f32>,
    velocity: f32,
}

impl Servo {
    fn new(config: ServoChannelConfig) -> Self {
        Self {
            config,
            target: 0.0,
            actual: None,
            velocity: 0.0,
        }
    }

    fn idle(&self) -> bool {
        self.actual == Some(self.target) && self.velocity == 0.0
    }

    fn needs_easing(&self) -> bool {
        match self.actual {
            None => true,
            Some(actual) => actual != self.target || self.velocity != 0.0,
        }
    }

    fn pulse_for(&self, position: f32) -> f32 {
        let span = self.config.max_pulse_us - self.config.min_pulse_us;
        self.config.min_pulse_us + (position - AXIS_MIN) / (AXIS_MAX - AXIS_MIN) * span
    }

    /// Advance one tick. Returns the new position when it moved.
    fn step(&mut self, max_velocity: f32, acceleration: f32) -> Option<f32> {
        match self.actual {
            None => {
                // Never actuated: snap to the target, no eased transition
                // from an undefined origin.
                self.actual = Some(self.target);
                self.velocity = 0.0;
                Some(self.target)
            }
            Some(actual) if actual == self.target && self.velocity == 0.0 => None,
            Some(actual) => {
                let (position, velocity) =
                    ease(actual, self.velocity, self.target, max_velocity, acceleration);
                self.velocity = velocity;
                if position == actual {
                    None
                } else {
                    self.actual = Some(position);
                    Some(position)
                }
            }
        }
    }
}

/// Tilt brake states. Transitional states carry the deadline that advances
/// them, checked once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Disengaged,
    Disengaging { until: Instant },
    PendingEngage { deadline: Instant },
    Engaging { until: Instant },
    Engaged,
}

/// Commands routed to the servo task by the kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum ServoCommand {
    SetPanTiltInput(Vector2),
    ShutDown,
}

pub struct ServoDriver {
    lifecycle: Lifecycle,
    pwm: Pca9685,
    pan: Servo,
    tilt: Servo,
    lock_config: LockChannelConfig,
    lock: LockState,
    max_velocity: f32,
    acceleration: f32,
    lock_debounce: Duration,
    lock_settle: Duration,
    tick_interval: Duration,
}

impl ServoDriver {
    pub fn new(pwm: Pca9685, config: ServoConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new("servo-driver"),
            pwm,
            pan: Servo::new(config.pan),
            tilt: Servo::new(config.tilt),
            lock_config: config.lock,
            // The brake holds passively when unpowered, so a fresh boot is
            // mechanically locked.
            lock: LockState::Engaged,
            max_velocity: config.max_velocity,
            acceleration: config.acceleration,
            lock_debounce: config.lock_debounce,
            lock_settle: config.lock_settle,
            tick_interval: config.tick_interval,
        }
    }

    /// Store new pan/tilt targets. A tilt movement request releases the
    /// brake (cancelling any pending engage) before tilt actuation resumes.
    /// Returns whether the control loop needs to be running.
    pub async fn set_pan_tilt_input(&mut self, input: Vector2, now: Instant) -> bool {
        let input = input.clamped();
        self.pan.target = input.x;
        self.tilt.target = input.y;
        if self.tilt.actual != Some(self.tilt.target) {
            self.release_lock(now).await;
        }
        self.needs_ticking()
    }

    async fn release_lock(&mut self, now: Instant) {
        match self.lock {
            LockState::Engaged | LockState::Engaging { .. } => {
                self.pwm
                    .set_pulse_length(self.lock_config.pwm_channel, self.lock_config.unlocked_pulse_us)
                    .await;
                self.lock = LockState::Disengaging { until: now + self.lock_settle };
            }
            LockState::PendingEngage { .. } => {
                // Not yet locked; just cancel the pending engage.
                self.lock = LockState::Disengaged;
            }
            LockState::Disengaging { .. } | LockState::Disengaged => {}
        }
    }

    /// `true` while any servo still has easing to do or the brake is in a
    /// transitional state.
    pub fn needs_ticking(&self) -> bool {
        self.pan.needs_easing() || self.tilt.needs_easing() || self.lock != LockState::Engaged
    }

    /// One control tick at time `now`. Returns [`Self::needs_ticking`]:
    /// `false` means the loop may go to sleep.
    pub async fn tick(&mut self, now: Instant) -> bool {
        match self.lock {
            LockState::Disengaging { until } if now >= until => {
                self.lock = LockState::Disengaged;
            }
            LockState::PendingEngage { deadline } if now >= deadline => {
                self.pwm
                    .set_pulse_length(self.lock_config.pwm_channel, self.lock_config.locked_pulse_us)
                    .await;
                self.lock = LockState::Engaging { until: now + self.lock_settle };
            }
            LockState::Engaging { until } if now >= until => {
                // Mechanically locked: stop holding torque on both channels.
                self.pwm.channel_off(self.tilt.config.pwm_channel).await;
                self.pwm.channel_off(self.lock_config.pwm_channel).await;
                self.lock = LockState::Engaged;
                debug!("tilt lock engaged");
            }
            _ => {}
        }

        if let Some(position) = self.pan.step(self.max_velocity, self.acceleration) {
            let pulse = self.pan.pulse_for(position);
            self.pwm.set_pulse_length(self.pan.config.pwm_channel, pulse).await;
        }

        // Tilt only actuates while the brake is released.
        if matches!(self.lock, LockState::Disengaged | LockState::PendingEngage { .. })
            && let Some(position) = self.tilt.step(self.max_velocity, self.acceleration)
        {
            let pulse = self.tilt.pulse_for(position);
            self.pwm.set_pulse_length(self.tilt.config.pwm_channel, pulse).await;
        }

        if self.lock == LockState::Disengaged && self.tilt.idle() {
            self.lock = LockState::PendingEngage { deadline: now + self.lock_debounce };
        }

        self.needs_ticking()
    }

    pub fn pan_position(&self) -> Option<f32> {
        self.pan.actual
    }

    pub fn tilt_position(&self) -> Option<f32> {
        self.tilt.actual
    }

    /// Drive the easing loop: commands arm the tick timer, a settled tick
    /// disarms it. Consumes the driver; ends on [`ServoCommand::ShutDown`]
    /// or when the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ServoCommand>) {
        let mut ticker: Option<tokio::time::Interval> = None;
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(ServoCommand::SetPanTiltInput(input)) => {
                            if self.set_pan_tilt_input(input, Instant::now()).await
                                && ticker.is_none()
                            {
                                ticker = Some(tokio::time::interval(self.tick_interval));
                            }
                        }
                        Some(ServoCommand::ShutDown) | None => break,
                    }
                }
                _ = async {
                    match ticker.as_mut() {
                        Some(ticker) => { ticker.tick().await; }
                        None => std::future::pending().await,
                    }
                } => {
                    if !self.tick(Instant::now()).await {
                        debug!("servo-driver: settled, timer disarmed");
                        ticker = None;
                    }
                }
            }
        }
        self.shut_down().await;
    }
}

#[async_trait]
impl Driver for ServoDriver {
    fn name(&self) -> &'static str {
        self.lifecycle.name()
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    fn hardware_available(&self) -> bool {
        self.pwm.is_present()
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
        self.pwm.channel_off(self.pan.config.pwm_channel).await;
        self.pwm.channel_off(self.tilt.config.pwm_channel).await;
        self.pwm.channel_off(self.lock_config.pwm_channel).await;
        self.lifecycle.finish_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::HardwareState;

    fn test_config() -> ServoConfig {
        ServoConfig {
            lock_debounce: Duration::from_millis(100),
            lock_settle: Duration::from_millis(50),
            ..ServoConfig::default()
        }
    }

    fn offline_driver() -> ServoDriver {
        ServoDriver::new(Pca9685::new(HardwareState::Absent, 0x40, 50.0), test_config())
    }

    #[test]
    fn ease_accelerates_toward_the_target() {
        let (position, velocity) = ease(0.0, 0.0, 100.0, 6.0, 0.75);
        assert_eq!(velocity, 0.75);
        assert_eq!(position, 0.75);
    }

    #[test]
    fn ease_decays_an_opposing_velocity_without_crossing_zero() {
        let (_, velocity) = ease(50.0, 0.5, 0.0, 6.0, 0.75);
        assert_eq!(velocity, 0.0);
    }

    #[test]
    fn ease_snaps_within_one_acceleration_step() {
        let (position, velocity) = ease(99.6, 0.5, 100.0, 6.0, 0.75);
        assert_eq!(position, 100.0);
        assert_eq!(velocity, 0.0);
    }

    #[tokio::test]
    async fn first_actuation_snaps_without_easing() {
        let mut servo = offline_driver();
        servo.initialise().await;
        let t0 = Instant::now();
        servo.set_pan_tilt_input(Vector2::new(40.0, 0.0), t0).await;
        servo.tick(t0).await;
        assert_eq!(servo.pan_position(), Some(40.0));
        assert_eq!(servo.pan.velocity, 0.0);
    }

    #[tokio::test]
    async fn velocity_changes_by_at_most_one_step_per_tick() {
        let mut servo = offline_driver();
        servo.initialise().await;
        let t0 = Instant::now();
        // Establish a known origin, then command a long move.
        servo.set_pan_tilt_input(Vector2::new(0.0, 0.0), t0).await;
        servo.tick(t0).await;
        servo.set_pan_tilt_input(Vector2::new(100.0, 0.0), t0).await;

        let mut previous = servo.pan.velocity;
        for i in 0..200 {
            servo.tick(t0 + Duration::from_millis(20 * i)).await;
            let velocity = servo.pan.velocity;
            let snapped = servo.pan_position() == Some(100.0) && velocity == 0.0;
            if !snapped {
                assert!(
                    (velocity - previous).abs() <= servo.acceleration + f32::EPSILON,
                    "velocity jumped from {previous} to {velocity}"
                );
            }
            previous = velocity;
            if servo.pan.idle() && servo.pan_position() == Some(100.0) {
                return;
            }
        }
        panic!("pan easing did not converge");
    }

    #[tokio::test]
    async fn tilt_request_while_engaged_releases_the_brake() {
        let mut servo = offline_driver();
        servo.initialise().await;
        let t0 = Instant::now();
        assert_eq!(servo.lock, LockState::Engaged);

        servo.set_pan_tilt_input(Vector2::new(0.0, 50.0), t0).await;
        assert!(matches!(servo.lock, LockState::Disengaging { .. }));

        // Tilt must not actuate before the release has settled.
        servo.tick(t0).await;
        assert_eq!(servo.tilt_position(), None);

        // After the settle duration the brake is released and tilt snaps.
        servo.tick(t0 + Duration::from_millis(50)).await;
        assert_eq!(servo.tilt_position(), Some(50.0));
    }

    #[tokio::test]
    async fn lock_engages_only_after_the_full_debounce() {
        let mut servo = offline_driver();
        servo.initialise().await;
        let t0 = Instant::now();
        servo.set_pan_tilt_input(Vector2::new(0.0, 50.0), t0).await;
        servo.tick(t0).await;
        let t1 = t0 + Duration::from_millis(50);
        servo.tick(t1).await;
        // Tilt is idle at its target: the debounce starts at t1.
        assert!(matches!(servo.lock, LockState::PendingEngage { .. }));

        // One millisecond short of the deadline: still pending.
        servo.tick(t1 + Duration::from_millis(99)).await;
        assert!(matches!(servo.lock, LockState::PendingEngage { .. }));

        // Deadline reached: the engage sequence starts.
        let t2 = t1 + Duration::from_millis(100);
        servo.tick(t2).await;
        assert!(matches!(servo.lock, LockState::Engaging { .. }));
        assert!(servo.needs_ticking());

        // After the settle the brake is engaged and the loop may sleep.
        servo.tick(t2 + Duration::from_millis(50)).await;
        assert_eq!(servo.lock, LockState::Engaged);
        assert!(!servo.needs_ticking());
    }

    #[tokio::test]
    async fn tilt_movement_cancels_a_pending_engage() {
        let mut servo = offline_driver();
        servo.initialise().await;
        let t0 = Instant::now();
        servo.set_pan_tilt_input(Vector2::new(0.0, 50.0), t0).await;
        servo.tick(t0).await;
        let t1 = t0 + Duration::from_millis(50);
        servo.tick(t1).await;
        assert!(matches!(servo.lock, LockState::PendingEngage { .. }));

        // A new tilt target before the deadline cancels the pending engage
        // without an unlock sequence (the brake never actually locked).
        servo.set_pan_tilt_input(Vector2::new(0.0, -20.0), t1).await;
        assert!(matches!(
            servo.lock,
            LockState::Disengaged | LockState::PendingEngage { .. }
        ));
        servo.tick(t1 + Duration::from_millis(20)).await;
        // Well past the original deadline, the brake must not have engaged.
        servo.tick(t1 + Duration::from_millis(200)).await;
        assert!(!matches!(servo.lock, LockState::Engaged | LockState::Engaging { .. }));
    }

    #[tokio::test]
    async fn pan_only_motion_leaves_the_brake_engaged() {
        let mut servo = offline_driver();
        servo.initialise().await;
        let t0 = Instant::now();
        // Establish tilt at its origin first.
        servo.set_pan_tilt_input(Vector2::new(0.0, 0.0), t0).await;
        let mut now = t0;
        for _ in 0..40 {
            now += Duration::from_millis(20);
            if !servo.tick(now).await {
                break;
            }
        }
        assert_eq!(servo.lock, LockState::Engaged);

        // Pan moves while tilt stays at its target: the brake never releases.
        servo.set_pan_tilt_input(Vector2::new(80.0, 0.0), now).await;
        for _ in 0..100 {
            now += Duration::from_millis(20);
            if !servo.tick(now).await {
                break;
            }
            assert_eq!(servo.lock, LockState::Engaged);
        }
        assert_eq!(servo.pan_position(), Some(80.0));
    }

    #[tokio::test]
    async fn run_loop_shuts_down_on_command() {
        let servo = offline_driver();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(servo.run(rx));
        tx.send(ServoCommand::SetPanTiltInput(Vector2::new(10.0, 10.0)))
            .await
            .unwrap();
        tx.send(ServoCommand::ShutDown).await.unwrap();
        task.await.unwrap();
    }
}
