//! [`Pca9685`] – thin async wrapper around the 16-channel PWM chip.
//!
//! The chip sits on the shared I2C bus; the wrapper is `Clone` so the motor
//! and servo drivers can share it while owning disjoint channel ranges
//! (channel partitioning is enforced by configuration, not at runtime).
//! Register writes on an absent or failed chip are silent no-ops – the
//! callers' state machines keep running either way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::hardware::HardwareState;
use crate::i2c::SharedI2c;

const MODE1: u8 = 0x00;
const MODE2: u8 = 0x01;
const LED0_ON_L: u8 = 0x06;
const PRESCALE: u8 = 0xFE;

const MODE1_RESTART: u8 = 0x80;
const MODE1_AUTO_INCREMENT: u8 = 0x20;
const MODE1_SLEEP: u8 = 0x10;
const MODE2_TOTEM_POLE: u8 = 0x04;

/// Bit 4 of `LEDn_OFF_H` forces the channel fully off.
const FULL_OFF: u8 = 0x10;
/// Bit 4 of `LEDn_ON_H` forces the channel fully on.
const FULL_ON: u8 = 0x10;

const OSCILLATOR_HZ: f32 = 25_000_000.0;
const TICKS_PER_CYCLE: f32 = 4096.0;

/// Prescale register value for a target PWM frequency.
pub(crate) fn prescale_for(frequency_hz: f32) -> u8 {
    ((OSCILLATOR_HZ / (TICKS_PER_CYCLE * frequency_hz)).round() - 1.0).clamp(3.0, 255.0) as u8
}

struct Chip {
    bus: SharedI2c,
    address: u16,
}

impl Chip {
    async fn write_register(&self, register: u8, value: u8) -> rppal::i2c::Result<()> {
        let mut bus = self.bus.lock().await;
        bus.set_slave_address(self.address)?;
        bus.smbus_write_byte(register, value)
    }

    /// Write the four on/off registers of one channel in a single burst.
    async fn write_channel(&self, channel: u8, frame: [u8; 4]) -> rppal::i2c::Result<()> {
        let mut bus = self.bus.lock().await;
        bus.set_slave_address(self.address)?;
        bus.block_write(LED0_ON_L + 4 * channel, &frame)
    }
}

/// Cloneable handle to the PWM chip.
#[derive(Clone)]
pub struct Pca9685 {
    chip: Arc<Mutex<HardwareState<Chip>>>,
    available: Arc<AtomicBool>,
    frequency_hz: f32,
}

impl Pca9685 {
    pub fn new(bus: HardwareState<SharedI2c>, address: u16, frequency_hz: f32) -> Self {
        let chip = match bus {
            HardwareState::Present(bus) => HardwareState::Present(Chip { bus, address }),
            HardwareState::Absent => HardwareState::Absent,
        };
        let available = chip.is_present();
        Self {
            chip: Arc::new(Mutex::new(chip)),
            available: Arc::new(AtomicBool::new(available)),
            frequency_hz,
        }
    }

    /// `true` while the chip answered its last configuration sequence.
    pub fn is_present(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Configure the prescaler for the target frequency and wake the chip.
    /// A chip that does not acknowledge demotes the wrapper to absent.
    pub async fn initialise(&self) {
        let mut chip = self.chip.lock().await;
        let Some(c) = chip.present() else {
            return;
        };
        let prescale = prescale_for(self.frequency_hz);
        let result = async {
            c.write_register(MODE1, MODE1_AUTO_INCREMENT | MODE1_SLEEP).await?;
            c.write_register(PRESCALE, prescale).await?;
            c.write_register(MODE1, MODE1_AUTO_INCREMENT).await?;
            // Oscillator startup time per datasheet.
            tokio::time::sleep(Duration::from_micros(500)).await;
            c.write_register(MODE1, MODE1_AUTO_INCREMENT | MODE1_RESTART).await?;
            c.write_register(MODE2, MODE2_TOTEM_POLE).await
        }
        .await;
        if let Err(e) = result {
            warn!("pca9685: configuration failed, running degraded: {e}");
            *chip = HardwareState::Absent;
            self.available.store(false, Ordering::Relaxed);
        } else {
            info!("pca9685 configured at {} Hz", self.frequency_hz);
        }
    }

    /// Drive a channel at a duty cycle in `[0, 1]`.
    pub async fn set_duty_cycle(&self, channel: u8, duty: f32) {
        let duty = duty.clamp(0.0, 1.0);
        let frame = if duty <= 0.0 {
            [0, 0, 0, FULL_OFF]
        } else if duty >= 1.0 {
            [0, FULL_ON, 0, 0]
        } else {
            let off = (duty * (TICKS_PER_CYCLE - 1.0)).round() as u16;
            [0, 0, (off & 0xFF) as u8, (off >> 8) as u8]
        };
        self.write(channel, frame).await;
    }

    /// Drive a channel with a fixed pulse length in microseconds (servo
    /// control).
    pub async fn set_pulse_length(&self, channel: u8, pulse_us: f32) {
        let period_us = 1_000_000.0 / self.frequency_hz;
        let ticks = (pulse_us / period_us * TICKS_PER_CYCLE)
            .round()
            .clamp(0.0, TICKS_PER_CYCLE - 1.0) as u16;
        self.write(channel, [0, 0, (ticks & 0xFF) as u8, (ticks >> 8) as u8])
            .await;
    }

    /// Force a channel fully off (no holding torque, no idle duty).
    pub async fn channel_off(&self, channel: u8) {
        self.write(channel, [0, 0, 0, FULL_OFF]).await;
    }

    async fn write(&self, channel: u8, frame: [u8; 4]) {
        let chip = self.chip.lock().await;
        let Some(c) = chip.present() else {
            return;
        };
        if let Err(e) = c.write_channel(channel, frame).await {
            warn!("pca9685: channel {channel} write failed: {e}");
        }
    }
}
