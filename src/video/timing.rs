//! VGA refresh timing: an 800x449 virtual raster clocked at 70 Hz drives
//! hblank/vblank status and a per-frame "should flip" flag, all derived
//! from the CPU's cycle budget rather than a real pixel clock.

use crate::error::Result;
use crate::snapshot::{Reader, Writer};

pub const RASTER_WIDTH: u32 = 800;
pub const RASTER_HEIGHT: u32 = 449;
pub const VISIBLE_WIDTH: u32 = 640;
pub const VISIBLE_HEIGHT: u32 = 400;
pub const PIXEL_HZ: u64 = 25_175_000;

/// Empirical scale factor, slightly below 1.0, so guest vsync-wait loops
/// polling port 3DA terminate instead of racing the emulated pixel clock.
/// A calibration knob, not a modeled gate — excluded from the snapshot.
pub const DEFAULT_SPEED_SCALE: f64 = 0.9;

pub struct RasterTiming {
    pixel_accumulator: u64,
    speed_scale: f64,
    should_flip: bool,
}

impl Default for RasterTiming {
    fn default() -> Self {
        Self { pixel_accumulator: 0, speed_scale: DEFAULT_SPEED_SCALE, should_flip: false }
    }
}

impl RasterTiming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speed_scale(speed_scale: f64) -> Self {
        Self { speed_scale, ..Self::default() }
    }

    /// Advances the raster by the pixels corresponding to `cpu_cycles`
    /// clocks, wrapping at one full frame and latching `should_flip`.
    pub fn advance(&mut self, cpu_cycles: u64, cpu_hz: u64) {
        let pixels = ((cpu_cycles as f64) * self.speed_scale * PIXEL_HZ as f64 / cpu_hz as f64) as u64;
        self.pixel_accumulator += pixels;
        let frame_pixels = RASTER_WIDTH as u64 * RASTER_HEIGHT as u64;
        if self.pixel_accumulator >= frame_pixels {
            self.pixel_accumulator %= frame_pixels;
            self.should_flip = true;
        }
    }

    pub fn take_should_flip(&mut self) -> bool {
        std::mem::take(&mut self.should_flip)
    }

    fn current_pixel_and_line(&self) -> (u32, u32) {
        let pixel = (self.pixel_accumulator % RASTER_WIDTH as u64) as u32;
        let line = (self.pixel_accumulator / RASTER_WIDTH as u64) as u32;
        (pixel, line)
    }

    /// Synthesized input-status-1 register (port 3BA/3DA): bit 0 hblank,
    /// bit 3 vblank.
    pub fn status_byte(&self) -> u8 {
        let (pixel, line) = self.current_pixel_and_line();
        let mut status = 0u8;
        if pixel >= VISIBLE_WIDTH {
            status |= 0x01;
        }
        if line >= VISIBLE_HEIGHT {
            status |= 0x08;
        }
        status
    }

    /// The speed-scale knob is a construction-time calibration, not machine
    /// state, so it is left at its current value across a load rather than
    /// serialized.
    pub(crate) fn save_state(&self, w: &mut Writer) {
        w.u64(self.pixel_accumulator);
        w.bool(self.should_flip);
    }

    pub(crate) fn load_state(&mut self, r: &mut Reader) -> Result<()> {
        self.pixel_accumulator = r.u64()?;
        self.should_flip = r.bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_once_per_full_frame() {
        let mut timing = RasterTiming::with_speed_scale(1.0);
        let cpu_hz = 4_772_727u64;
        let frame_pixels = (RASTER_WIDTH * RASTER_HEIGHT) as u64;
        let cpu_cycles_per_frame = frame_pixels * cpu_hz / PIXEL_HZ;
        timing.advance(cpu_cycles_per_frame, cpu_hz);
        assert!(timing.take_should_flip());
        assert!(!timing.take_should_flip());
    }

    #[test]
    fn vblank_set_past_visible_height() {
        let mut timing = RasterTiming::with_speed_scale(1.0);
        timing.pixel_accumulator = (VISIBLE_HEIGHT as u64 + 1) * RASTER_WIDTH as u64;
        assert_eq!(timing.status_byte() & 0x08, 0x08);
    }
}
