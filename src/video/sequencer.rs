//! VGA sequencer register file at 0x3C4/0x3C5.

use crate::error::Result;
use crate::snapshot::{Reader, Writer};

const NUM_REGS: usize = 5;

pub struct Sequencer {
    index: u8,
    regs: [u8; NUM_REGS],
}

impl Default for Sequencer {
    fn default() -> Self {
        // Map-Mask defaults to all four planes enabled.
        let mut regs = [0u8; NUM_REGS];
        regs[2] = 0x0f;
        Self { index: 0, regs }
    }
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_index(&mut self, value: u8) {
        self.index = value & 0x1f;
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

    /// Four-bit Map-Mask: which planes a write actually modifies.
    pub fn map_mask(&self) -> u8 {
        self.regs[2] & 0x0f
    }

    pub fn memory_mode(&self) -> u8 {
        self.regs[4]
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
