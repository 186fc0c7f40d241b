//! CRTC register file, shared by the 0x3B4/0x3B5 (MDA) and 0x3D4/0x3D5
//! (CGA/EGA/VGA) index/data port pairs: cursor position, cursor scanline
//! range, and horizontal/vertical timing.

use crate::error::Result;
use crate::snapshot::{Reader, Writer};

const NUM_REGS: usize = 25;

pub struct Crtc {
    index: u8,
    regs: [u8; NUM_REGS],
}

impl Default for Crtc {
    fn default() -> Self {
        Self { index: 0, regs: [0u8; NUM_REGS] }
    }
}

impl Crtc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_index(&mut self, value: u8) {
        self.index = value;
    }

    pub fn write_data(&mut self, value: u8) {
        let idx = self.index as usize;
        if idx < NUM_REGS {
            self.regs[idx] = value;
        }
    }

    pub fn read_data(&self) -> u8 {
        let idx = self.index as usize;
        if idx < NUM_REGS {
            self.regs[idx]
        } else {
            0
        }
    }

    /// Linear character index of the text cursor, registers 0x0E:0x0F.
    pub fn cursor_position(&self) -> u16 {
        ((self.regs[0x0E] as u16) << 8) | self.regs[0x0F] as u16
    }

    /// Start/end scanline of the cursor block, registers 0x0A:0x0B.
    pub fn cursor_scanlines(&self) -> (u8, u8) {
        (self.regs[0x0A] & 0x1f, self.regs[0x0B] & 0x1f)
    }

    pub(crate) fn save_state(&self, w: &mut Writer) {
        w.u8(self.index);
        w.bytes(&self.regs);
    }

    pub(crate) fn load_state(&mut self, r: &mut Reader) -> Result<()> {
        self.index = r.u8()?;
        self.regs.copy_from_slice(r.bytes(NUM_REGS)?);
        Ok(())
    }
}
