//! CGA/EGA/VGA video subsystem: six register files addressed through
//! index/data port pairs, a 256 KiB four-plane RAM
//! reached through the 0xA0000 window, and a raster timing model driving
//! port 3DA and the "should flip" frame signal.
//!
//! Grounded on `examples/original_source/src/fake86/video.c`'s `logicVGA`
//! write path and the CRTC/sequencer/graphics-controller/attribute/DAC
//! register layout it implements.

pub mod attribute;
pub mod cga;
pub mod crtc;
pub mod dac;
pub mod graphics;
pub mod sequencer;
pub mod timing;

use attribute::AttributeController;
use cga::CgaRegs;
use crtc::Crtc;
use dac::Dac;
use graphics::GraphicsController;
use sequencer::Sequencer;
use timing::RasterTiming;

use crate::error::Result;
use crate::snapshot::{Reader, Writer};

const PLANE_SIZE: usize = 65536;

pub struct Vga {
    planes: Box<[[u8; PLANE_SIZE]; 4]>,
    latch: [u8; 4],
    crtc: Crtc,
    sequencer: Sequencer,
    graphics: GraphicsController,
    attribute: AttributeController,
    dac: Dac,
    cga: CgaRegs,
    timing: RasterTiming,
    mode: u8,
    no_blanking: bool,
}

impl Default for Vga {
    fn default() -> Self {
        Self {
            planes: Box::new([[0u8; PLANE_SIZE]; 4]),
            latch: [0u8; 4],
            crtc: Crtc::new(),
            sequencer: Sequencer::new(),
            graphics: GraphicsController::new(),
            attribute: AttributeController::new(),
            dac: Dac::new(),
            cga: CgaRegs::new(),
            timing: RasterTiming::new(),
            mode: 0x03,
            no_blanking: false,
        }
    }
}

impl Vga {
    pub fn new() -> Self {
        Self::default()
    }

    /// INT 10h AH=00h mode set: records the mode number and whether its
    /// high bit (no-blanking) suppresses the framebuffer clear that the
    /// interrupt hook performs afterwards.
    pub fn set_mode(&mut self, mode_number: u8) {
        self.mode = mode_number & 0x7f;
        self.no_blanking = mode_number & 0x80 != 0;
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn no_blanking(&self) -> bool {
        self.no_blanking
    }

    pub fn advance_raster(&mut self, cpu_cycles: u64, cpu_hz: u64) {
        self.timing.advance(cpu_cycles, cpu_hz);
    }

    pub fn take_should_flip(&mut self) -> bool {
        self.timing.take_should_flip()
    }

    pub fn dac_entry(&self, index: u8) -> dac::RgbEntry {
        self.dac.entry(index)
    }

    pub fn attribute_palette(&self, i: usize) -> u8 {
        self.attribute.palette_entry(i)
    }

    pub fn cga_regs(&self) -> &CgaRegs {
        &self.cga
    }

    pub fn cursor_position(&self) -> u16 {
        self.crtc.cursor_position()
    }

    pub fn cursor_scanlines(&self) -> (u8, u8) {
        self.crtc.cursor_scanlines()
    }

    /// Serializes every piece of state that affects future video output:
    /// the six register files, the four 64 KiB planes, the read latch, the
    /// mode byte, and the raster timing's position. Resolution/rows/cols/
    /// pages/base/active-page are all derived from `mode` at render time and
    /// so need no separate storage.
    pub(crate) fn save_state(&self, w: &mut Writer) {
        w.u8(self.mode);
        w.bool(self.no_blanking);
        self.crtc.save_state(w);
        self.sequencer.save_state(w);
        self.graphics.save_state(w);
        self.attribute.save_state(w);
        self.dac.save_state(w);
        self.cga.save_state(w);
        self.timing.save_state(w);
        w.bytes(&self.latch);
        for plane in self.planes.iter() {
            w.bytes(plane);
        }
    }

    pub(crate) fn load_state(&mut self, r: &mut Reader) -> Result<()> {
        self.mode = r.u8()?;
        self.no_blanking = r.bool()?;
        self.crtc.load_state(r)?;
        self.sequencer.load_state(r)?;
        self.graphics.load_state(r)?;
        self.attribute.load_state(r)?;
        self.dac.load_state(r)?;
        self.cga.load_state(r)?;
        self.timing.load_state(r)?;
        self.latch.copy_from_slice(r.bytes(4)?);
        for plane in self.planes.iter_mut() {
            plane.copy_from_slice(r.bytes(PLANE_SIZE)?);
        }
        Ok(())
    }

    // -- Port bus ---------------------------------------------------------

    pub fn port_read(&mut self, port: u16) -> u8 {
        match port {
            0x3B5 | 0x3D5 => self.crtc.read_data(),
            0x3BA | 0x3DA => {
                let status = self.timing.status_byte();
                self.attribute.reset_flipflop();
                status
            }
            0x3C0 => self.attribute.read_port(),
            0x3C1 => self.attribute.read_port(),
            0x3C5 => 0, // sequencer data is write-only in practice
            0x3C7 => 0, // DAC state register, not modeled beyond always-ready
            0x3C9 => self.dac.read_data(),
            0x3CF => self.graphics.read_data(),
            0x3D9 => self.cga.read_palette(),
            0x3D8 => self.cga.read_mode(),
            _ => 0xFF,
        }
    }

    pub fn port_write(&mut self, port: u16, value: u8) {
        match port {
            0x3B4 | 0x3D4 => self.crtc.write_index(value),
            0x3B5 | 0x3D5 => self.crtc.write_data(value),
            0x3C0 => self.attribute.write_port(value),
            0x3C4 => self.sequencer.write_index(value),
            0x3C5 => self.sequencer.write_data(value),
            0x3C7 => self.dac.set_read_index(value),
            0x3C8 => self.dac.set_write_index(value),
            0x3C9 => self.dac.write_data(value),
            0x3CE => self.graphics.write_index(value),
            0x3CF => self.graphics.write_data(value),
            0x3D8 => self.cga.write_mode(value),
            0x3D9 => self.cga.write_palette(value),
            _ => {}
        }
    }

    // -- Plane RAM window (0xA0000-0xAFFFF) --------------------------------

    pub fn plane_read(&mut self, offset: usize) -> u8 {
        let addr = offset & (PLANE_SIZE - 1);
        for p in 0..4 {
            self.latch[p] = self.planes[p][addr];
        }
        match self.graphics.read_mode() {
            1 => self.read_mode1(),
            _ => self.latch[self.graphics.read_map_select() as usize],
        }
    }

    fn read_mode1(&self) -> u8 {
        let cc = self.graphics.color_compare();
        let dc = self.graphics.color_dont_care();
        let mut result = 0u8;
        for bit in 0..8u8 {
            let mut matched = true;
            for p in 0..4 {
                if dc & (1 << p) != 0 {
                    let plane_bit = (self.latch[p] >> bit) & 1;
                    let cc_bit = (cc >> p) & 1;
                    if plane_bit != cc_bit {
                        matched = false;
                        break;
                    }
                }
            }
            if matched {
                result |= 1 << bit;
            }
        }
        result
    }

    pub fn plane_write(&mut self, offset: usize, value: u8) {
        let addr = offset & (PLANE_SIZE - 1);
        let map_mask = self.sequencer.map_mask();
        let bit_mask = self.graphics.bit_mask();
        let set_reset = self.graphics.set_reset();
        let enable_set_reset = self.graphics.enable_set_reset();
        let alu_op = self.graphics.alu_op();
        let rotate = self.graphics.rotate_count();

        match self.graphics.write_mode() {
            0 => {
                let rotated = graphics::GraphicsController::rotate_right(value, rotate);
                for p in 0..4 {
                    if map_mask & (1 << p) == 0 {
                        continue;
                    }
                    let src = if enable_set_reset & (1 << p) != 0 {
                        if set_reset & (1 << p) != 0 { 0xFF } else { 0x00 }
                    } else {
                        rotated
                    };
                    let alu = alu_op.apply(src, self.latch[p]);
                    self.planes[p][addr] = (alu & bit_mask) | (self.latch[p] & !bit_mask);
                }
            }
            1 => {
                for p in 0..4 {
                    if map_mask & (1 << p) != 0 {
                        self.planes[p][addr] = self.latch[p];
                    }
                }
            }
            2 => {
                for p in 0..4 {
                    if map_mask & (1 << p) == 0 {
                        continue;
                    }
                    let src = if value & (1 << p) != 0 { 0xFF } else { 0x00 };
                    let alu = alu_op.apply(src, self.latch[p]);
                    self.planes[p][addr] = (alu & bit_mask) | (self.latch[p] & !bit_mask);
                }
            }
            _ => {
                let rotated = graphics::GraphicsController::rotate_right(value, rotate);
                let mask = rotated & bit_mask;
                for p in 0..4 {
                    if map_mask & (1 << p) == 0 {
                        continue;
                    }
                    let sr_val = if set_reset & (1 << p) != 0 { 0xFF } else { 0x00 };
                    self.planes[p][addr] = (sr_val & mask) | (self.latch[p] & !mask);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_write_mode0_all_planes(vga: &mut Vga) {
        vga.port_write(0x3C4, 0x02); // sequencer: Map-Mask index
        vga.port_write(0x3C5, 0x0f); // enable all four planes
        vga.port_write(0x3CE, 0x05); // graphics controller mode index
        vga.port_write(0x3CF, 0x00); // write mode 0, read mode 0
        vga.port_write(0x3CE, 0x08);
        vga.port_write(0x3CF, 0xFF); // bit mask: all bits pass through ALU
    }

    #[test]
    fn write_mode0_fill_agrees_across_planes() {
        let mut vga = Vga::new();
        set_write_mode0_all_planes(&mut vga);
        for offset in 0..256usize {
            vga.plane_write(offset, 0xAA);
        }
        for offset in 0..256usize {
            for p in 0..4 {
                assert_eq!(vga.planes[p][offset], 0xAA);
            }
        }
    }

    #[test]
    fn write_then_read_then_write_uses_latched_snapshot() {
        let mut vga = Vga::new();
        set_write_mode0_all_planes(&mut vga);
        vga.plane_write(10, 0x0F);
        vga.plane_write(20, 0xF0); // unrelated offset

        // Switch to write mode 1: destination takes the latch verbatim.
        vga.port_write(0x3CE, 0x05);
        vga.port_write(0x3CF, 0x01);
        let _ = vga.plane_read(10); // refreshes the latch from offset 10
        vga.plane_write(999, 0xFF); // write mode 1 ignores the input byte
        for p in 0..4 {
            assert_eq!(vga.planes[p][999], 0x0F);
        }
    }

    #[test]
    fn map_mask_zero_leaves_planes_untouched() {
        let mut vga = Vga::new();
        set_write_mode0_all_planes(&mut vga);
        vga.port_write(0x3C4, 0x02);
        vga.port_write(0x3C5, 0x00); // disable all planes
        vga.plane_write(5, 0xFF);
        for p in 0..4 {
            assert_eq!(vga.planes[p][5], 0);
        }
    }

    #[test]
    fn read_mode1_color_compare_matches() {
        let mut vga = Vga::new();
        set_write_mode0_all_planes(&mut vga);
        vga.plane_write(0, 0xFF); // all four planes set at offset 0
        vga.port_write(0x3CE, 0x04);
        vga.port_write(0x3CF, 0x00); // read-map select irrelevant for mode 1
        vga.port_write(0x3CE, 0x05);
        vga.port_write(0x3CF, 0x08); // read mode 1
        vga.port_write(0x3CE, 0x02);
        vga.port_write(0x3CF, 0x0f); // color compare: all planes set
        vga.port_write(0x3CE, 0x07);
        vga.port_write(0x3CF, 0x0f); // don't-care: care about all planes
        assert_eq!(vga.plane_read(0), 0xFF);
    }

    #[test]
    fn dac_and_attribute_round_trip() {
        let mut vga = Vga::new();
        vga.port_write(0x3C8, 3);
        vga.port_write(0x3C9, 0x3f);
        vga.port_write(0x3C9, 0x10);
        vga.port_write(0x3C9, 0x00);
        vga.port_write(0x3C7, 3);
        assert_eq!(vga.port_read(0x3C9), 0x3f);

        vga.port_write(0x3C0, 0x02); // select palette index 2
        vga.port_write(0x3C0, 0x15); // write its value
        assert_eq!(vga.attribute_palette(2), 0x15);
    }
}
