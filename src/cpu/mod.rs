//! 16-bit fetch-decode-execute engine: the CPU core proper.
//! Owns the register file and flags for its entire lifetime; everything it
//! touches in memory or port space goes through the borrowed `SystemBus`/
//! `IoProxy` passed into `execute_for_slice`.

pub mod alu;
pub mod decode;
pub mod regs;
pub mod strings;
pub mod variant;

use tracing::{trace, warn};

use crate::error::Result;
use crate::intercept::{HookOutcome, InterruptHook};
use crate::io::IoProxy;
use crate::mem::SystemBus;
use crate::snapshot::{Reader, Writer};
use regs::{Flags, Registers, Reg16, SegReg};
use strings::RepKind;
use variant::CpuVariant;

pub struct Cpu {
    pub regs: Registers,
    pub flags: Flags,
    pub variant: CpuVariant,
    halted: bool,
    pub(crate) seg_override: Option<SegReg>,
    pub(crate) rep: Option<RepKind>,
    instr_start_ip: u16,
}

impl Cpu {
    pub fn new(variant: CpuVariant) -> Self {
        let mut cpu = Self {
            regs: Registers::default(),
            flags: Flags::default(),
            variant,
            halted: false,
            seg_override: None,
            rep: None,
            instr_start_ip: 0,
        };
        cpu.reset();
        cpu
    }

    /// CS=0xFFFF, IP=0, flags cleared, HLT cleared.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
        self.regs.set_seg(SegReg::Cs, 0xFFFF);
        self.regs.ip = 0;
        self.flags = Flags::default();
        self.halted = false;
        self.seg_override = None;
        self.rep = None;
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    pub(crate) fn save_state(&self, w: &mut Writer) {
        for word in self.regs.gpr_raw() {
            w.u16(*word);
        }
        for word in self.regs.seg_raw() {
            w.u16(*word);
        }
        w.u16(self.regs.ip);
        w.bool(self.flags.cf);
        w.bool(self.flags.pf);
        w.bool(self.flags.af);
        w.bool(self.flags.zf);
        w.bool(self.flags.sf);
        w.bool(self.flags.tf);
        w.bool(self.flags.ifl);
        w.bool(self.flags.df);
        w.bool(self.flags.of);
        w.u8(self.variant.tag());
    }

    pub(crate) fn load_state(&mut self, r: &mut Reader) -> Result<()> {
        let mut gpr = [0u16; 8];
        for word in gpr.iter_mut() {
            *word = r.u16()?;
        }
        self.regs.set_gpr_raw(gpr);
        let mut seg = [0u16; 4];
        for word in seg.iter_mut() {
            *word = r.u16()?;
        }
        self.regs.set_seg_raw(seg);
        self.regs.ip = r.u16()?;
        self.flags.cf = r.bool()?;
        self.flags.pf = r.bool()?;
        self.flags.af = r.bool()?;
        self.flags.zf = r.bool()?;
        self.flags.sf = r.bool()?;
        self.flags.tf = r.bool()?;
        self.flags.ifl = r.bool()?;
        self.flags.df = r.bool()?;
        self.flags.of = r.bool()?;
        self.variant = CpuVariant::from_tag(r.u8()?)?;
        Ok(())
    }

    fn linear(&self, seg: SegReg, offset: u16) -> usize {
        crate::mem::linear_address(self.regs.seg(seg), offset)
    }

    fn data_segment(&self, uses_bp: bool) -> SegReg {
        self.seg_override.unwrap_or(if uses_bp { SegReg::Ss } else { SegReg::Ds })
    }

    fn fetch_u8(&mut self, bus: &mut SystemBus) -> u8 {
        let addr = self.linear(SegReg::Cs, self.regs.ip);
        self.regs.ip = self.regs.ip.wrapping_add(1);
        bus.read_u8(addr)
    }

    fn fetch_u16(&mut self, bus: &mut SystemBus) -> u16 {
        let lo = self.fetch_u8(bus) as u16;
        let hi = self.fetch_u8(bus) as u16;
        lo | (hi << 8)
    }

    fn push(&mut self, value: u16, bus: &mut SystemBus) {
        let sp = self.regs.get16(Reg16::Sp).wrapping_sub(2);
        self.regs.set16(Reg16::Sp, sp);
        let addr = self.linear(SegReg::Ss, sp);
        bus.write_u16(addr, value);
    }

    fn pop(&mut self, bus: &mut SystemBus) -> u16 {
        let sp = self.regs.get16(Reg16::Sp);
        let addr = self.linear(SegReg::Ss, sp);
        let value = bus.read_u16(addr);
        self.regs.set16(Reg16::Sp, sp.wrapping_add(2));
        value
    }

    /// Pushes FLAGS/CS/IP, clears IF and TF, and loads CS:IP from the
    /// interrupt vector at physical `vector as usize * 4`. Used both for
    /// the fallback real-mode IVT path and, after a hook declines, for
    /// hardware IRQs.
    fn take_vector(&mut self, vector: u8, bus: &mut SystemBus) {
        let flags_word = self.flags.to_word(self.variant);
        self.push(flags_word, bus);
        let cs = self.regs.seg(SegReg::Cs);
        self.push(cs, bus);
        self.push(self.regs.ip, bus);
        self.flags.ifl = false;
        self.flags.tf = false;
        let entry = vector as usize * 4;
        let new_ip = (bus.read_u8(entry) as u16) | ((bus.read_u8(entry + 1) as u16) << 8);
        let new_cs = (bus.read_u8(entry + 2) as u16) | ((bus.read_u8(entry + 3) as u16) << 8);
        self.regs.ip = new_ip;
        self.regs.set_seg(SegReg::Cs, new_cs);
    }

    /// Routes vector delivery (software INT or hardware IRQ) through the
    /// installed hook before falling back to the IVT.
    fn deliver_interrupt(
        &mut self,
        vector: u8,
        from_software: bool,
        bus: &mut SystemBus,
        io: &mut IoProxy,
        hook: &mut dyn InterruptHook,
    ) {
        match hook.handle(vector, from_software, self, bus, io) {
            HookOutcome::Handled => {}
            HookOutcome::FallThrough => self.take_vector(vector, bus),
        }
    }

    pub fn inject_interrupt(&mut self, vector: u8, bus: &mut SystemBus) {
        self.take_vector(vector, bus);
    }

    /// Delivers a vector through the installed hook, exactly as the decode
    /// loop does for `INT n` and hardware IRQs. Used by the outer machine
    /// to dispatch BIOS bootstrap (INT 19h) before the CPU has fetched its
    /// first instruction.
    pub fn deliver_vector(
        &mut self,
        vector: u8,
        from_software: bool,
        bus: &mut SystemBus,
        io: &mut IoProxy,
        hook: &mut dyn InterruptHook,
    ) {
        self.deliver_interrupt(vector, from_software, bus, io, hook);
    }

    /// Runs instructions until `target_cycles` is reached, a hardware IRQ
    /// is serviced then the budget is re-checked, or `preempt` is raised by
    /// a peripheral. Returns the actual cycle count retired.
    pub fn execute_for_slice(
        &mut self,
        target_cycles: u64,
        bus: &mut SystemBus,
        io: &mut IoProxy,
        hook: &mut dyn InterruptHook,
        preempt: &mut bool,
    ) -> u64 {
        let mut spent = 0u64;
        while spent < target_cycles && !*preempt {
            if self.flags.ifl {
                if let Some(vector) = io.pic.next_interrupt() {
                    if vector == crate::pic::KEYBOARD_VECTOR {
                        io.ppi.pop_scancode();
                    }
                    self.halted = false;
                    self.deliver_interrupt(vector, false, bus, io, hook);
                    spent += 2;
                    continue;
                }
            }
            if self.halted {
                // The outer scheduler still ticks peripherals for the rest
                // of the slice; the CPU itself contributes no more work.
                spent = target_cycles;
                break;
            }
            spent += self.step_one(bus, io, hook) as u64;
        }
        spent
    }

    fn step_one(&mut self, bus: &mut SystemBus, io: &mut IoProxy, hook: &mut dyn InterruptHook) -> u32 {
        self.instr_start_ip = self.regs.ip;
        self.seg_override = None;
        self.rep = None;
        let mut opcode = self.fetch_u8(bus);
        loop {
            match opcode {
                0x26 => self.seg_override = Some(SegReg::Es),
                0x2E => self.seg_override = Some(SegReg::Cs),
                0x36 => self.seg_override = Some(SegReg::Ss),
                0x3E => self.seg_override = Some(SegReg::Ds),
                0xF0 => {} // LOCK: no bus arbitration modeled, accepted and ignored
                0xF2 => self.rep = Some(RepKind::Repnz),
                0xF3 => self.rep = Some(RepKind::Repz),
                _ => break,
            }
            opcode = self.fetch_u8(bus);
        }
        decode::execute(self, opcode, bus, io, hook)
    }

    fn restart_instruction(&mut self) {
        self.regs.ip = self.instr_start_ip;
    }

    fn log_undefined(&self, opcode: u8) {
        warn!(target: "pcxt86::cpu", opcode = format_args!("{opcode:#04x}"), "undefined opcode");
    }

    fn trace_insn(&self, opcode: u8) {
        trace!(target: "pcxt86::cpu", opcode = format_args!("{opcode:#04x}"), cs = self.regs.seg(SegReg::Cs), ip = self.instr_start_ip, "fetch");
    }
}
