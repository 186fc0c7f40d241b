//! Attribute controller at 0x3C0: 16 palette entries plus misc attribute
//! bits, addressed through a single port with an internal
//! index/data flip-flop. Reading the input-status-1 port (0x3BA/0x3DA)
//! resets the flip-flop to index mode.

use crate::error::Result;
use crate::snapshot::{Reader, Writer};

const NUM_PALETTE: usize = 16;

pub struct AttributeController {
    index: u8,
    palette: [u8; NUM_PALETTE],
    mode_control: u8,
    index_mode: bool,
}

impl Default for AttributeController {
    fn default() -> Self {
        Self { index: 0, palette: [0u8; NUM_PALETTE], mode_control: 0, index_mode: true }
    }
}

impl AttributeController {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single write toggles between latching the index and writing the
    /// addressed register, per the controller's index/data flip-flop.
    pub fn write_port(&mut self, value: u8) {
        if self.index_mode {
            self.index = value & 0x1f;
        } else {
            match self.index {
                0x00..=0x0f => self.palette[self.index as usize] = value & 0x3f,
                0x10 => self.mode_control = value,
                _ => {}
            }
        }
        self.index_mode = !self.index_mode;
    }

    pub fn read_port(&self) -> u8 {
        match self.index {
            0x00..=0x0f => self.palette[self.index as usize],
            0x10 => self.mode_control,
            _ => 0,
        }
    }

    /// Resets the index/data flip-flop to index mode, as reading the
    /// input-status-1 port does.
    pub fn reset_flipflop(&mut self) {
        self.index_mode = true;
    }

    pub fn palette_entry(&self, i: usize) -> u8 {
        self.palette[i & 0x0f]
    }

    pub(crate) fn save_state(&self, w: &mut Writer) {
        w.u8(self.index);
        w.bytes(&self.palette);
        w.u8(self.mode_control);
        w.bool(self.index_mode);
    }

    pub(crate) fn load_state(&mut self, r: &mut Reader) -> Result<()> {
        self.index = r.u8()?;
        self.palette.copy_from_slice(r.bytes(NUM_PALETTE)?);
        self.mode_control = r.u8()?;
        self.index_mode = r.bool()?;
        Ok(())
    }
}
