//! CGA mode/palette registers at 0x3D8/0x3D9: 40/80 column, graphics/text,
//! and B&W/colour selection for CGA-compatible modes.

use crate::error::Result;
use crate::snapshot::{Reader, Writer};

pub struct CgaRegs {
    mode: u8,
    palette: u8,
}

impl Default for CgaRegs {
    fn default() -> Self {
        Self { mode: 0, palette: 0 }
    }
}

impl CgaRegs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_mode(&mut self, value: u8) {
        self.mode = value;
    }

    pub fn read_mode(&self) -> u8 {
        self.mode
    }

    pub fn write_palette(&mut self, value: u8) {
        self.palette = value;
    }

    pub fn read_palette(&self) -> u8 {
        self.palette
    }

    pub fn is_graphics(&self) -> bool {
        self.mode & 0x02 != 0
    }

    pub fn is_80_column(&self) -> bool {
        self.mode & 0x01 != 0
    }

    pub fn is_color(&self) -> bool {
        self.mode & 0x04 == 0
    }

    pub(crate) fn save_state(&self, w: &mut Writer) {
        w.u8(self.mode);
        w.u8(self.palette);
    }

    pub(crate) fn load_state(&mut self, r: &mut Reader) -> Result<()> {
        self.mode = r.u8()?;
        self.palette = r.u8()?;
        Ok(())
    }
}
