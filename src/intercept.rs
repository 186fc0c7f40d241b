//! The pluggable interrupt-dispatch strategy: before the CPU takes a
//! software INT or a hardware IRQ vector, control passes here
//! first. `BiosIntercept` is the concrete hook that emulates the disk BIOS,
//! the bootstrap loader, and the video mode-set, tracing DOS calls without
//! emulating them — grounded on
//! `examples/original_source/src/fake86/interrupt.c` and `disk.c`.

use std::path::Path;

use tracing::{debug, trace};

use crate::cpu::regs::{Reg16, Reg8, SegReg};
use crate::cpu::Cpu;
use crate::disk::{chs_to_lba, Drive};
use crate::error::Result;
use crate::io::IoProxy;
use crate::mem::{linear_address, SystemBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Handled,
    FallThrough,
}

/// Strategy object for INT dispatch: can fully handle a vector or decline,
/// letting the caller fall back to the real-mode IVT.
pub trait InterruptHook {
    fn handle(
        &mut self,
        vector: u8,
        from_software: bool,
        cpu: &mut Cpu,
        bus: &mut SystemBus,
        io: &mut IoProxy,
    ) -> HookOutcome;
}

/// A hook that does nothing: every vector falls straight through to the
/// guest's own IVT handler. Useful for tests that don't need BIOS services.
#[derive(Default)]
pub struct PassthroughHook;

impl InterruptHook for PassthroughHook {
    fn handle(&mut self, _: u8, _: bool, _: &mut Cpu, _: &mut SystemBus, _: &mut IoProxy) -> HookOutcome {
        HookOutcome::FallThrough
    }
}

pub struct BiosIntercept {
    drives: Vec<Option<Drive>>,
    last_status: Vec<(u8, bool)>,
    boot_drive: Option<u8>,
    hd_count: u8,
}

impl Default for BiosIntercept {
    fn default() -> Self {
        Self::new()
    }
}

impl BiosIntercept {
    pub fn new() -> Self {
        Self {
            drives: (0..256).map(|_| None).collect(),
            last_status: vec![(0, false); 256],
            boot_drive: None,
            hd_count: 0,
        }
    }

    pub fn insert_floppy(&mut self, slot: u8, path: &Path) -> Result<()> {
        self.drives[slot as usize] = Some(Drive::open_floppy(path)?);
        Ok(())
    }

    pub fn insert_scratch_floppy(&mut self, slot: u8) {
        self.drives[slot as usize] = Some(Drive::scratch_floppy());
    }

    pub fn insert_hard_disk(&mut self, slot: u8, path: &Path) -> Result<()> {
        self.drives[0x80 + slot as usize] = Some(Drive::open_hard_disk(path)?);
        self.hd_count += 1;
        Ok(())
    }

    pub fn set_boot_drive(&mut self, drive: u8) {
        self.boot_drive = Some(drive);
    }

    pub fn hard_disk_count(&self) -> u8 {
        self.hd_count
    }

    fn video_mode_set(&self, cpu: &mut Cpu, bus: &mut SystemBus, io: &mut IoProxy) {
        if cpu.regs.get8(Reg8::Ah) != 0 {
            return;
        }
        let al = cpu.regs.get8(Reg8::Al);
        io.vga.set_mode(al);
        if al & 0x80 != 0 {
            return; // no-blanking flag: leave the framebuffer as-is
        }
        let mode = al & 0x7f;
        if mode <= 7 {
            let base = if mode == 7 { 0xB0000usize } else { 0xB8000usize };
            for addr in base..base + 0x8000 {
                bus.write_u8(addr, 0);
            }
        } else {
            for addr in 0xA0000usize..0xB0000usize {
                bus.write_u8(addr, 0);
            }
        }
    }

    fn disk_service(&mut self, cpu: &mut Cpu, bus: &mut SystemBus) {
        let dl = cpu.regs.get8(Reg8::Dl);
        let ah = cpu.regs.get8(Reg8::Ah);
        match ah {
            0 => {
                cpu.regs.set8(Reg8::Ah, 0);
                cpu.flags.cf = false;
            }
            1 => {
                let (ah, cf) = self.last_status[dl as usize];
                cpu.regs.set8(Reg8::Ah, ah);
                cpu.flags.cf = cf;
                return;
            }
            2 => self.read_sectors(cpu, bus, dl),
            3 => self.write_sectors(cpu, bus, dl),
            4 | 5 => {
                cpu.regs.set8(Reg8::Ah, 0);
                cpu.flags.cf = false;
            }
            8 => self.get_params(cpu, dl),
            _ => cpu.flags.cf = true,
        }
        let ah_after = cpu.regs.get8(Reg8::Ah);
        self.last_status[dl as usize] = (ah_after, cpu.flags.cf);
        if dl >= 0x80 {
            bus.write_u8(0x474, ah_after);
        }
    }

    fn read_sectors(&mut self, cpu: &mut Cpu, bus: &mut SystemBus, dl: u8) {
        let Some(drive) = self.drives[dl as usize].as_mut() else {
            cpu.regs.set8(Reg8::Ah, 1);
            cpu.flags.cf = true;
            return;
        };
        let (cyl, head, sect, count) = chs_from_regs(cpu);
        let es = cpu.regs.seg(SegReg::Es);
        let bx = cpu.regs.get16(Reg16::Bx);
        let mut dest = linear_address(es, bx);
        let mut buf = [0u8; 512];
        let mut transferred = 0u8;
        for i in 0..count {
            let Some(lba) = chs_to_lba(cyl, head, sect.wrapping_add(i), drive.geometry) else { break };
            match drive.read_sector(lba, &mut buf) {
                Ok(true) => {
                    for b in buf {
                        bus.write_u8(dest, b);
                        dest = dest.wrapping_add(1);
                    }
                    transferred += 1;
                }
                _ => break,
            }
        }
        cpu.regs.set8(Reg8::Al, transferred);
        cpu.regs.set8(Reg8::Ah, 0);
        cpu.flags.cf = false;
    }

    fn write_sectors(&mut self, cpu: &mut Cpu, bus: &mut SystemBus, dl: u8) {
        let Some(drive) = self.drives[dl as usize].as_mut() else {
            cpu.regs.set8(Reg8::Ah, 1);
            cpu.flags.cf = true;
            return;
        };
        let (cyl, head, sect, count) = chs_from_regs(cpu);
        let es = cpu.regs.seg(SegReg::Es);
        let bx = cpu.regs.get16(Reg16::Bx);
        let mut src = linear_address(es, bx);
        let mut transferred = 0u8;
        for i in 0..count {
            let Some(lba) = chs_to_lba(cyl, head, sect.wrapping_add(i), drive.geometry) else { break };
            let mut buf = [0u8; 512];
            for b in buf.iter_mut() {
                *b = bus.read_u8(src);
                src = src.wrapping_add(1);
            }
            match drive.write_sector(lba, &buf) {
                Ok(true) => transferred += 1,
                _ => break,
            }
        }
        cpu.regs.set8(Reg8::Al, transferred);
        cpu.regs.set8(Reg8::Ah, 0);
        cpu.flags.cf = false;
    }

    fn get_params(&mut self, cpu: &mut Cpu, dl: u8) {
        if let Some(drive) = self.drives[dl as usize].as_ref() {
            let g = drive.geometry;
            let max_cyl = g.cyls.saturating_sub(1);
            cpu.flags.cf = false;
            cpu.regs.set8(Reg8::Ah, 0);
            cpu.regs.set8(Reg8::Ch, (max_cyl & 0xff) as u8);
            let cl = (g.sects & 0x3f) | (((max_cyl >> 8) as u8 & 0x03) << 6);
            cpu.regs.set8(Reg8::Cl, cl);
            cpu.regs.set8(Reg8::Dh, g.heads.saturating_sub(1));
            if dl < 0x80 {
                cpu.regs.set8(Reg8::Bl, 4);
                cpu.regs.set8(Reg8::Dl, 2);
            } else {
                cpu.regs.set8(Reg8::Dl, self.hd_count);
            }
        } else {
            cpu.flags.cf = true;
            cpu.regs.set8(Reg8::Ah, 0xAA);
        }
    }

    fn bootstrap(&mut self, cpu: &mut Cpu, bus: &mut SystemBus) {
        let boot = self.boot_drive.filter(|n| self.drives[*n as usize].is_some()).or_else(|| {
            if self.drives[0].is_some() {
                Some(0)
            } else if self.drives[0x80].is_some() {
                Some(0x80)
            } else {
                None
            }
        });
        match boot {
            Some(num) => {
                debug!(target: "pcxt86::intercept", drive = num, "booting from disk");
                cpu.regs.set8(Reg8::Dl, num);
                let mut buf = [0u8; 512];
                if let Some(drive) = self.drives[num as usize].as_mut() {
                    if let Ok(true) = drive.read_sector(0, &mut buf) {
                        let mut dest = linear_address(0x07C0, 0x0000);
                        for b in buf {
                            bus.write_u8(dest, b);
                            dest = dest.wrapping_add(1);
                        }
                    }
                }
                cpu.regs.set_seg(SegReg::Cs, 0x07C0);
                cpu.regs.ip = 0x0000;
            }
            None => {
                debug!(target: "pcxt86::intercept", "no bootable disk, starting ROM BASIC");
                cpu.regs.set_seg(SegReg::Cs, 0xF600);
                cpu.regs.ip = 0x0000;
            }
        }
    }

    fn dos_trace(&self, cpu: &Cpu, bus: &mut SystemBus) {
        let ah = cpu.regs.get8(Reg8::Ah);
        let mnemonic = dos_function_name(ah);
        match ah {
            // Open existing file (0x3D) / EXEC (0x4B): DS:DX points at an
            // ASCIZ path, which is what makes opens of COMMAND.COM
            // recognizable in the trace log.
            0x3D | 0x4B => {
                let addr = linear_address(cpu.regs.seg(SegReg::Ds), cpu.regs.get16(Reg16::Dx));
                let path = read_asciz(bus, addr);
                trace!(target: "pcxt86::dos", ah = format_args!("{ah:#04x}"), %path, "int 21h {mnemonic} {path}");
            }
            0x09 => {
                let addr = linear_address(cpu.regs.seg(SegReg::Ds), cpu.regs.get16(Reg16::Dx));
                let text = read_dollar_terminated(bus, addr);
                trace!(target: "pcxt86::dos", ah = format_args!("{ah:#04x}"), %text, "int 21h {mnemonic}: {text}");
            }
            _ => {
                trace!(target: "pcxt86::dos", ah = format_args!("{ah:#04x}"), al = cpu.regs.get8(Reg8::Al), "int 21h {mnemonic}");
            }
        }
    }
}

/// AH-to-mnemonic table for the INT 21h trace log, grounded on
/// `examples/original_source/src/fake86/dos.c`'s function dispatch comments.
/// Observability only — no function here is semantically emulated.
fn dos_function_name(ah: u8) -> &'static str {
    match ah {
        0x01 => "read keyboard with echo",
        0x02 => "print character",
        0x06 => "direct console I/O",
        0x09 => "print string",
        0x0B => "check keyboard status",
        0x0C => "flush buffer and read keyboard",
        0x19 => "get default drive",
        0x1A => "set DTA",
        0x25 => "set interrupt vector",
        0x2A => "get date",
        0x2C => "get time",
        0x30 => "get DOS version",
        0x35 => "get interrupt vector",
        0x3C => "create file",
        0x3D => "open file",
        0x3E => "close file",
        0x3F => "read file",
        0x40 => "write file",
        0x41 => "delete file",
        0x42 => "seek file",
        0x47 => "get current directory",
        0x48 => "allocate memory",
        0x49 => "free memory",
        0x4A => "resize memory block",
        0x4B => "exec",
        0x4C => "terminate with exit code",
        0x4E => "find first file",
        0x4F => "find next file",
        _ => "unhandled",
    }
}

/// Reads a NUL-terminated path string out of guest memory, capped so a
/// malformed pointer can't turn tracing into an unbounded scan.
fn read_asciz(bus: &mut SystemBus, mut addr: usize) -> String {
    let mut out = String::new();
    for _ in 0..64 {
        let b = bus.read_u8(addr);
        if b == 0 {
            break;
        }
        out.push(b as char);
        addr = addr.wrapping_add(1);
    }
    out
}

/// Reads a `$`-terminated string for AH=09h, DOS's "print string" convention.
fn read_dollar_terminated(bus: &mut SystemBus, mut addr: usize) -> String {
    let mut out = String::new();
    for _ in 0..255 {
        let b = bus.read_u8(addr);
        if b == b'$' {
            break;
        }
        out.push(b as char);
        addr = addr.wrapping_add(1);
    }
    out
}

fn chs_from_regs(cpu: &Cpu) -> (u16, u8, u8, u8) {
    let ch = cpu.regs.get8(Reg8::Ch);
    let cl = cpu.regs.get8(Reg8::Cl);
    let dh = cpu.regs.get8(Reg8::Dh);
    let al = cpu.regs.get8(Reg8::Al);
    let cyl = ch as u16 | (((cl >> 6) as u16) << 8);
    let sect = cl & 0x3f;
    (cyl, dh, sect, al)
}

impl InterruptHook for BiosIntercept {
    fn handle(
        &mut self,
        vector: u8,
        _from_software: bool,
        cpu: &mut Cpu,
        bus: &mut SystemBus,
        io: &mut IoProxy,
    ) -> HookOutcome {
        match vector {
            0x10 => {
                self.video_mode_set(cpu, bus, io);
                HookOutcome::FallThrough
            }
            0x13 | 0xFD => {
                self.disk_service(cpu, bus);
                HookOutcome::Handled
            }
            0x19 => {
                self.bootstrap(cpu, bus);
                HookOutcome::Handled
            }
            0x21 => {
                self.dos_trace(cpu, bus);
                HookOutcome::FallThrough
            }
            _ => HookOutcome::FallThrough,
        }
    }
}
