//! Environment-sourced configuration, validated at boot.
//!
//! Every tuning value (channel assignments, pin numbers, pulse bounds,
//! ramp/easing constants, lock timings, LED layout) has a default and a
//! `TELEBOT_*` override. The shared auth secret is the one value with no
//! default – a bot without a secret must not come up. Malformed values are
//! an error, not a silent fallback; the daemon exits on them.
//!
//! Parsing goes through a lookup closure rather than `std::env` directly so
//! tests can exercise it without mutating process state.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

use telebot_hal::{
    LedConfig, LockChannelConfig, MotorConfig, ServoChannelConfig, ServoConfig, Side,
    WheelChannelConfig,
};
use telebot_transport::TransportConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub auth_key: String,
    pub auth_timeout: Duration,
    pub i2c_bus: u8,
    pub pwm_address: u16,
    pub pwm_frequency_hz: f32,
    pub motor: MotorConfig,
    pub servo: ServoConfig,
    pub leds: LedConfig,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let auth_key = lookup("TELEBOT_AUTH_KEY")
            .ok_or_else(|| ConfigError::Missing("TELEBOT_AUTH_KEY".to_string()))?;

        let motor_defaults = MotorConfig::default();
        let servo_defaults = ServoConfig::default();
        let led_defaults = LedConfig::default();

        Ok(Self {
            listen_addr: parse(
                &lookup,
                "TELEBOT_LISTEN_ADDR",
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8765)),
            )?,
            auth_key,
            auth_timeout: millis(&lookup, "TELEBOT_AUTH_TIMEOUT_MS", 3000)?,
            i2c_bus: parse(&lookup, "TELEBOT_I2C_BUS", 1)?,
            pwm_address: address(&lookup, "TELEBOT_PWM_ADDRESS", 0x40)?,
            pwm_frequency_hz: parse(&lookup, "TELEBOT_PWM_FREQUENCY_HZ", 50.0)?,
            motor: MotorConfig {
                wheels: [
                    wheel(&lookup, "FL", motor_defaults.wheels[0])?,
                    wheel(&lookup, "FR", motor_defaults.wheels[1])?,
                    wheel(&lookup, "RL", motor_defaults.wheels[2])?,
                    wheel(&lookup, "RR", motor_defaults.wheels[3])?,
                ],
                acceleration: parse(
                    &lookup,
                    "TELEBOT_MOTOR_ACCELERATION",
                    motor_defaults.acceleration,
                )?,
                tick_interval: millis(&lookup, "TELEBOT_MOTOR_TICK_MS", 50)?,
            },
            servo: ServoConfig {
                pan: servo_channel(&lookup, "PAN", servo_defaults.pan)?,
                tilt: servo_channel(&lookup, "TILT", servo_defaults.tilt)?,
                lock: LockChannelConfig {
                    pwm_channel: parse(
                        &lookup,
                        "TELEBOT_LOCK_CHANNEL",
                        servo_defaults.lock.pwm_channel,
                    )?,
                    locked_pulse_us: parse(
                        &lookup,
                        "TELEBOT_LOCK_LOCKED_US",
                        servo_defaults.lock.locked_pulse_us,
                    )?,
                    unlocked_pulse_us: parse(
                        &lookup,
                        "TELEBOT_LOCK_UNLOCKED_US",
                        servo_defaults.lock.unlocked_pulse_us,
                    )?,
                },
                max_velocity: parse(
                    &lookup,
                    "TELEBOT_SERVO_MAX_VELOCITY",
                    servo_defaults.max_velocity,
                )?,
                acceleration: parse(
                    &lookup,
                    "TELEBOT_SERVO_ACCELERATION",
                    servo_defaults.acceleration,
                )?,
                lock_debounce: millis(&lookup, "TELEBOT_LOCK_DEBOUNCE_MS", 1500)?,
                lock_settle: millis(&lookup, "TELEBOT_LOCK_SETTLE_MS", 400)?,
                tick_interval: millis(&lookup, "TELEBOT_SERVO_TICK_MS", 20)?,
            },
            leds: LedConfig {
                counts: led_counts(&lookup, led_defaults.counts)?,
                wiring_order: led_order(&lookup, led_defaults.wiring_order)?,
                spi_clock_hz: parse(&lookup, "TELEBOT_LED_SPI_HZ", led_defaults.spi_clock_hz)?,
            },
        })
    }

    /// The slice of the configuration the socket server needs.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            listen_addr: self.listen_addr,
            auth_key: self.auth_key.clone(),
            auth_timeout: self.auth_timeout,
        }
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

/// Like [`parse`] but accepts a `0x` prefix for I2C device addresses.
fn address(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u16,
) -> Result<u16, ConfigError> {
    match lookup(key) {
        Some(raw) => {
            let trimmed = raw.trim();
            let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
                Some(hex) => u16::from_str_radix(hex, 16),
                None => trimmed.parse(),
            };
            parsed.map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            })
        }
        None => Ok(default),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse(lookup, key, default)?))
}

fn wheel(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: WheelChannelConfig,
) -> Result<WheelChannelConfig, ConfigError> {
    Ok(WheelChannelConfig {
        pwm_channel: parse(
            lookup,
            &format!("TELEBOT_WHEEL_{name}_CHANNEL"),
            default.pwm_channel,
        )?,
        forward_pin: parse(
            lookup,
            &format!("TELEBOT_WHEEL_{name}_FORWARD_PIN"),
            default.forward_pin,
        )?,
        reverse_pin: parse(
            lookup,
            &format!("TELEBOT_WHEEL_{name}_REVERSE_PIN"),
            default.reverse_pin,
        )?,
    })
}

fn servo_channel(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: ServoChannelConfig,
) -> Result<ServoChannelConfig, ConfigError> {
    Ok(ServoChannelConfig {
        pwm_channel: parse(
            lookup,
            &format!("TELEBOT_SERVO_{name}_CHANNEL"),
            default.pwm_channel,
        )?,
        min_pulse_us: parse(
            lookup,
            &format!("TELEBOT_SERVO_{name}_MIN_US"),
            default.min_pulse_us,
        )?,
        max_pulse_us: parse(
            lookup,
            &format!("TELEBOT_SERVO_{name}_MAX_US"),
            default.max_pulse_us,
        )?,
    })
}

/// `TELEBOT_LED_COUNTS` is four comma-separated counts in front, right,
/// rear, left order.
fn led_counts(
    lookup: &impl Fn(&str) -> Option<String>,
    default: [usize; 4],
) -> Result<[usize; 4], ConfigError> {
    let key = "TELEBOT_LED_COUNTS";
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let invalid = || ConfigError::Invalid {
        key: key.to_string(),
        value: raw.clone(),
    };
    let parts: Vec<usize> = raw
        .split(',')
        .map(|part| part.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    parts.try_into().map_err(|_| invalid())
}

/// `TELEBOT_LED_ORDER` lists the logical sides in their physical wiring
/// order; each side must appear exactly once.
fn led_order(
    lookup: &impl Fn(&str) -> Option<String>,
    default: [Side; 4],
) -> Result<[Side; 4], ConfigError> {
    let key = "TELEBOT_LED_ORDER";
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let invalid = || ConfigError::Invalid {
        key: key.to_string(),
        value: raw.clone(),
    };
    let sides: Vec<Side> = raw
        .split(',')
        .map(|part| part.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    let order: [Side; 4] = sides.try_into().map_err(|_| invalid())?;
    for side in Side::ALL {
        if !order.contains(&side) {
            return Err(invalid());
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn secret_is_required() {
        let result = Config::from_lookup(|_| None);
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = Config::from_lookup(lookup_from(&[("TELEBOT_AUTH_KEY", "s3cret")])).unwrap();
        assert_eq!(config.auth_key, "s3cret");
        assert_eq!(config.listen_addr.port(), 8765);
        assert_eq!(config.auth_timeout, Duration::from_millis(3000));
        assert_eq!(config.i2c_bus, 1);
        assert_eq!(config.pwm_address, 0x40);
        assert_eq!(config.motor.tick_interval, Duration::from_millis(50));
        assert_eq!(config.servo.lock_debounce, Duration::from_millis(1500));
    }

    #[test]
    fn overrides_win_over_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("TELEBOT_AUTH_KEY", "k"),
            ("TELEBOT_LISTEN_ADDR", "127.0.0.1:9000"),
            ("TELEBOT_WHEEL_FL_FORWARD_PIN", "4"),
            ("TELEBOT_MOTOR_ACCELERATION", "2.5"),
            ("TELEBOT_PWM_ADDRESS", "0x41"),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.motor.wheels[0].forward_pin, 4);
        assert_eq!(config.motor.acceleration, 2.5);
        assert_eq!(config.pwm_address, 0x41);
    }

    #[test]
    fn malformed_numbers_are_an_error_not_a_fallback() {
        let result = Config::from_lookup(lookup_from(&[
            ("TELEBOT_AUTH_KEY", "k"),
            ("TELEBOT_MOTOR_TICK_MS", "fast"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn led_order_accepts_a_rewired_harness() {
        let config = Config::from_lookup(lookup_from(&[
            ("TELEBOT_AUTH_KEY", "k"),
            ("TELEBOT_LED_ORDER", "rear, front, left, right"),
            ("TELEBOT_LED_COUNTS", "4, 4, 8, 8"),
        ]))
        .unwrap();
        assert_eq!(
            config.leds.wiring_order,
            [Side::Rear, Side::Front, Side::Left, Side::Right]
        );
        assert_eq!(config.leds.counts, [4, 4, 8, 8]);
    }

    #[test]
    fn led_order_rejects_duplicates() {
        let result = Config::from_lookup(lookup_from(&[
            ("TELEBOT_AUTH_KEY", "k"),
            ("TELEBOT_LED_ORDER", "front,front,rear,left"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn led_counts_reject_the_wrong_arity() {
        let result = Config::from_lookup(lookup_from(&[
            ("TELEBOT_AUTH_KEY", "k"),
            ("TELEBOT_LED_COUNTS", "4,4,4"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
