//! LED strip driver – four logical segments over one physical strip.
//!
//! The strip is a single serial chain, but logically it is four segments
//! (front/right/rear/left). The harness may be soldered in any order, so a
//! wiring-order map translates logical side → offset in the physical chain;
//! a misordered harness is corrected in configuration without rewiring.
//! Rendering is a flat fill per segment followed by one SPI push of the
//! whole buffer.

use async_trait::async_trait;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::warn;

use crate::hardware::HardwareState;
use crate::lifecycle::{Driver, DriverState, Lifecycle};

/// One RGB color, flat-filled across a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Logical strip segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Right,
    Rear,
    Left,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Front, Side::Right, Side::Rear, Side::Left];

    pub fn index(self) -> usize {
        match self {
            Side::Front => 0,
            Side::Right => 1,
            Side::Rear => 2,
            Side::Left => 3,
        }
    }
}

impl std::str::FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front" => Ok(Side::Front),
            "right" => Ok(Side::Right),
            "rear" => Ok(Side::Rear),
            "left" => Ok(Side::Left),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedConfig {
    /// LED count per logical side.
    pub counts: [usize; 4],
    /// Logical sides in their physical wiring order.
    pub wiring_order: [Side; 4],
    pub spi_clock_hz: u32,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            counts: [12, 12, 12, 12],
            wiring_order: Side::ALL,
            spi_clock_hz: 4_000_000,
        }
    }
}

pub struct LedStripDriver {
    lifecycle: Lifecycle,
    config: LedConfig,
    spi: HardwareState<Spi>,
    colors: [Color; 4],
}

impl LedStripDriver {
    pub fn new(config: LedConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new("led-strip"),
            config,
            spi: HardwareState::Absent,
            colors: [Color::BLACK; 4],
        }
    }

    /// Merge the provided side colors into the current state and re-render
    /// the whole strip in one device push.
    pub async fn set_leds(&mut self, changes: &[(Side, Color)]) {
        for &(side, color) in changes {
            self.colors[side.index()] = color;
        }
        self.render().await;
    }

    /// All sides white or all sides dark.
    pub async fn set_power(&mut self, on: bool) {
        let color = if on { Color::WHITE } else { Color::BLACK };
        self.set_leds(&Side::ALL.map(|side| (side, color))).await;
    }

    pub fn color(&self, side: Side) -> Color {
        self.colors[side.index()]
    }

    /// Starting offset of a logical side in the physical chain.
    pub fn offset_of(&self, side: Side) -> usize {
        let mut offset = 0;
        for &wired in &self.config.wiring_order {
            if wired == side {
                return offset;
            }
            offset += self.config.counts[wired.index()];
        }
        offset
    }

    fn total_leds(&self) -> usize {
        self.config.counts.iter().sum()
    }

    /// Build the full APA102 frame: start frame, one 4-byte slot per LED in
    /// physical order, end frame long enough to clock out the whole chain.
    fn frame(&self) -> Vec<u8> {
        let total = self.total_leds();
        let mut frame = Vec::with_capacity(4 + total * 4 + 4 + total / 16);
        frame.extend_from_slice(&[0x00; 4]);
        for &side in &self.config.wiring_order {
            let color = self.colors[side.index()];
            for _ in 0..self.config.counts[side.index()] {
                frame.extend_from_slice(&[0xFF, color.b, color.g, color.r]);
            }
        }
        frame.extend(std::iter::repeat_n(0xFF, 4 + total / 16));
        frame
    }

    async fn render(&mut self) {
        let frame = self.frame();
        if let Some(spi) = self.spi.present_mut()
            && let Err(e) = spi.write(&frame)
        {
            warn!("led-strip: frame write failed: {e}");
        }
    }
}

#[async_trait]
impl Driver for LedStripDriver {
    fn name(&self) -> &'static str {
        self.lifecycle.name()
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    fn hardware_available(&self) -> bool {
        self.spi.is_present()
    }

    async fn initialise(&mut self) {
        if !self.lifecycle.begin_init() {
            return;
        }
        self.spi = HardwareState::from_probe(
            Spi::new(
                Bus::Spi0,
                SlaveSelect::Ss0,
                self.config.spi_clock_hz,
                Mode::Mode0,
            ),
            "led-strip",
        );
        // Clear whatever the strip was showing before we took over.
        self.render().await;
        self.lifecycle.finish_init();
    }

    async fn shut_down(&mut self) {
        if !self.lifecycle.begin_shutdown() {
            return;
        }
        self.colors = [Color::BLACK; 4];
        self.render().await;
        drop(self.spi.take());
        self.lifecycle.finish_shutdown();
    }
}
