//! The 64 Ki 8-bit port space and the per-range dispatcher that fans a
//! port access out to the chip that owns it. 16-bit accesses decompose
//! into two 8-bit ones.

use crate::cmos::Cmos;
use crate::dma::Dma;
use crate::mouse::SerialMouse;
use crate::pic::Pic;
use crate::pit::Pit;
use crate::ppi::Ppi;
use crate::video::Vga;

pub const PORT_DMA1: std::ops::RangeInclusive<u16> = 0x00..=0x0F;
pub const PORT_DMA_PAGE: std::ops::RangeInclusive<u16> = 0x80..=0x8F;
pub const PORT_PIC: std::ops::RangeInclusive<u16> = 0x20..=0x21;
pub const PORT_PIT: std::ops::RangeInclusive<u16> = 0x40..=0x43;
pub const PORT_PPI: std::ops::RangeInclusive<u16> = 0x60..=0x63;
pub const PORT_CMOS: std::ops::RangeInclusive<u16> = 0x70..=0x71;
pub const PORT_ADLIB: std::ops::RangeInclusive<u16> = 0x388..=0x389;
pub const PORT_COM1: std::ops::RangeInclusive<u16> = 0x3F8..=0x3FF;
pub const PORT_CGA: std::ops::RangeInclusive<u16> = 0x3D0..=0x3DF;
pub const PORT_VGA: std::ops::RangeInclusive<u16> = 0x3C0..=0x3CF;
pub const PORT_MDA: std::ops::RangeInclusive<u16> = 0x3B0..=0x3BF;

/// Write-only stub for the Adlib/OPL2 FM synth register pair: enough state
/// to not desync software that probes it, but no tone generation (audio
/// mixdown is left to an external collaborator).
#[derive(Default)]
pub struct AdlibStub {
    address: u8,
}

impl AdlibStub {
    pub fn read(&self, port: u16) -> u8 {
        match port & 1 {
            0 => 0, // status: busy/irq clear
            _ => 0,
        }
    }
    pub fn write(&mut self, port: u16, value: u8) {
        if port & 1 == 0 {
            self.address = value;
        }
        // data writes are accepted and discarded; no tone generation here.
    }
}

/// A borrowed view over every chip reachable from the port space, built
/// fresh for each CPU slice from disjoint field borrows of `Machine`. See
/// `machine.rs::run_slice` for how this is assembled without aliasing.
///
/// VGA's register file is reached through ports too, but `Vga` is also the
/// memory bus's window owner for A0000-AFFFF; rather than storing a second
/// `&mut Vga` here (which would alias the one `SystemBus` holds for the
/// whole CPU slice), the few port ranges that land on it take `vga` as a
/// per-call argument instead of a field.
pub struct IoProxy<'a> {
    pub pic: &'a mut Pic,
    pub pit: &'a mut Pit,
    pub ppi: &'a mut Ppi,
    pub dma: &'a mut Dma,
    pub cmos: &'a mut Cmos,
    pub mouse: &'a mut SerialMouse,
    pub adlib: &'a mut AdlibStub,
    /// Last byte written to each port, kept only for the snapshot format's
    /// 64 KiB port mirror; never read back by any chip.
    pub mirror: &'a mut [u8; 65536],
}

impl<'a> IoProxy<'a> {
    pub fn read8(&mut self, port: u16, vga: &mut Vga) -> u8 {
        if PORT_DMA1.contains(&port) {
            self.dma.read(port)
        } else if PORT_DMA_PAGE.contains(&port) {
            self.dma.read_page(port)
        } else if PORT_PIC.contains(&port) {
            self.pic.read(port)
        } else if PORT_PIT.contains(&port) {
            self.pit.read(port)
        } else if PORT_PPI.contains(&port) {
            self.ppi.read(port)
        } else if PORT_CMOS.contains(&port) {
            self.cmos.read(port)
        } else if PORT_ADLIB.contains(&port) {
            self.adlib.read(port)
        } else if PORT_COM1.contains(&port) {
            self.mouse.read(port)
        } else if PORT_CGA.contains(&port) || PORT_VGA.contains(&port) || PORT_MDA.contains(&port) {
            vga.port_read(port)
        } else {
            0xFF
        }
    }

    pub fn write8(&mut self, port: u16, value: u8, vga: &mut Vga) {
        self.mirror[port as usize] = value;
        if PORT_DMA1.contains(&port) {
            self.dma.write(port, value);
        } else if PORT_DMA_PAGE.contains(&port) {
            self.dma.write_page(port, value);
        } else if PORT_PIC.contains(&port) {
            self.pic.write(port, value);
        } else if PORT_PIT.contains(&port) {
            self.pit.write(port, value);
        } else if PORT_PPI.contains(&port) {
            self.ppi.write(port, value);
        } else if PORT_CMOS.contains(&port) {
            self.cmos.write(port, value);
        } else if PORT_ADLIB.contains(&port) {
            self.adlib.write(port, value);
        } else if PORT_COM1.contains(&port) {
            self.mouse.write(port, value);
        } else if PORT_CGA.contains(&port) || PORT_VGA.contains(&port) || PORT_MDA.contains(&port) {
            vga.port_write(port, value);
        }
    }

    pub fn read16(&mut self, port: u16, vga: &mut Vga) -> u16 {
        let lo = self.read8(port, vga) as u16;
        let hi = self.read8(port.wrapping_add(1), vga) as u16;
        lo | (hi << 8)
    }

    pub fn write16(&mut self, port: u16, value: u16, vga: &mut Vga) {
        self.write8(port, (value & 0xff) as u8, vga);
        self.write8(port.wrapping_add(1), (value >> 8) as u8, vga);
    }
}
