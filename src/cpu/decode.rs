//! Decode and dispatch: the ModR/M/EA matrix and the opcode table. Cycle
//! costs are coarse per-instruction estimates; sub-instruction bus-cycle
//! accuracy is out of scope.

use tracing::debug;

use super::alu::{self, ShiftOp};
use super::regs::{Flags, Reg16, Reg8, SegReg};
use super::strings::{self, RepKind};
use super::Cpu;
use crate::intercept::InterruptHook;
use crate::io::IoProxy;
use crate::mem::SystemBus;

const REG8: [Reg8; 8] = [Reg8::Al, Reg8::Cl, Reg8::Dl, Reg8::Bl, Reg8::Ah, Reg8::Ch, Reg8::Dh, Reg8::Bh];
const REG16: [Reg16; 8] =
    [Reg16::Ax, Reg16::Cx, Reg16::Dx, Reg16::Bx, Reg16::Sp, Reg16::Bp, Reg16::Si, Reg16::Di];
const SEG: [SegReg; 4] = [SegReg::Es, SegReg::Cs, SegReg::Ss, SegReg::Ds];

struct ModRm {
    reg: u8,
    rm: u8,
    ea: Option<(SegReg, u16)>,
}

fn decode_modrm(cpu: &mut Cpu, bus: &mut SystemBus) -> ModRm {
    let byte = cpu.fetch_u8(bus);
    let mode = byte >> 6;
    let reg = (byte >> 3) & 0x07;
    let rm = byte & 0x07;
    if mode == 3 {
        return ModRm { reg, rm, ea: None };
    }
    let (uses_bp, mut offset) = match rm {
        0 => (false, cpu.regs.get16(Reg16::Bx).wrapping_add(cpu.regs.get16(Reg16::Si))),
        1 => (false, cpu.regs.get16(Reg16::Bx).wrapping_add(cpu.regs.get16(Reg16::Di))),
        2 => (true, cpu.regs.get16(Reg16::Bp).wrapping_add(cpu.regs.get16(Reg16::Si))),
        3 => (true, cpu.regs.get16(Reg16::Bp).wrapping_add(cpu.regs.get16(Reg16::Di))),
        4 => (false, cpu.regs.get16(Reg16::Si)),
        5 => (false, cpu.regs.get16(Reg16::Di)),
        6 => {
            if mode == 0 {
                (false, 0)
            } else {
                (true, cpu.regs.get16(Reg16::Bp))
            }
        }
        _ => (false, cpu.regs.get16(Reg16::Bx)),
    };
    if mode == 0 && rm == 6 {
        offset = cpu.fetch_u16(bus);
    } else if mode == 1 {
        let disp = cpu.fetch_u8(bus) as i8 as i16 as u16;
        offset = offset.wrapping_add(disp);
    } else if mode == 2 {
        let disp = cpu.fetch_u16(bus);
        offset = offset.wrapping_add(disp);
    }
    let seg = cpu.data_segment(uses_bp);
    ModRm { reg, rm, ea: Some((seg, offset)) }
}

fn get_rm8(cpu: &Cpu, bus: &mut SystemBus, m: &ModRm) -> u8 {
    match m.ea {
        Some((seg, off)) => {
            let addr = cpu.linear(seg, off);
            bus.read_u8(addr)
        }
        None => cpu.regs.get8(REG8[m.rm as usize]),
    }
}

fn set_rm8(cpu: &mut Cpu, bus: &mut SystemBus, m: &ModRm, value: u8) {
    match m.ea {
        Some((seg, off)) => {
            let addr = cpu.linear(seg, off);
            bus.write_u8(addr, value);
        }
        None => cpu.regs.set8(REG8[m.rm as usize], value),
    }
}

fn get_rm16(cpu: &Cpu, bus: &mut SystemBus, m: &ModRm) -> u16 {
    match m.ea {
        Some((seg, off)) => {
            let addr = cpu.linear(seg, off);
            bus.read_u16(addr)
        }
        None => cpu.regs.get16(REG16[m.rm as usize]),
    }
}

fn set_rm16(cpu: &mut Cpu, bus: &mut SystemBus, m: &ModRm, value: u16) {
    match m.ea {
        Some((seg, off)) => {
            let addr = cpu.linear(seg, off);
            bus.write_u16(addr, value);
        }
        None => cpu.regs.set16(REG16[m.rm as usize], value),
    }
}

#[derive(Clone, Copy)]
enum AluKind {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

fn alu_kind(group: u8) -> AluKind {
    match group {
        0 => AluKind::Add,
        1 => AluKind::Or,
        2 => AluKind::Adc,
        3 => AluKind::Sbb,
        4 => AluKind::And,
        5 => AluKind::Sub,
        6 => AluKind::Xor,
        _ => AluKind::Cmp,
    }
}

fn alu_apply(kind: AluKind, a: u32, b: u32, width: u8, flags: &mut Flags) -> u32 {
    match kind {
        AluKind::Add => alu::add(a, b, width, flags),
        AluKind::Or => alu::or(a, b, width, flags),
        AluKind::Adc => alu::adc(a, b, flags.cf, width, flags),
        AluKind::Sbb => alu::sbb(a, b, flags.cf, width, flags),
        AluKind::And => alu::and(a, b, width, flags),
        AluKind::Sub | AluKind::Cmp => alu::sub(a, b, width, flags),
        AluKind::Xor => alu::xor(a, b, width, flags),
    }
}

fn jcc_taken(flags: &Flags, cond: u8) -> bool {
    match cond {
        0x0 => flags.of,
        0x1 => !flags.of,
        0x2 => flags.cf,
        0x3 => !flags.cf,
        0x4 => flags.zf,
        0x5 => !flags.zf,
        0x6 => flags.cf || flags.zf,
        0x7 => !flags.cf && !flags.zf,
        0x8 => flags.sf,
        0x9 => !flags.sf,
        0xA => flags.pf,
        0xB => !flags.pf,
        0xC => flags.sf != flags.of,
        0xD => flags.sf == flags.of,
        0xE => flags.zf || (flags.sf != flags.of),
        _ => !flags.zf && (flags.sf == flags.of),
    }
}

fn shift_count(cpu: &Cpu, raw: u8) -> u8 {
    if cpu.variant.masks_shift_count() {
        raw & 0x1f
    } else {
        raw
    }
}

pub fn execute(
    cpu: &mut Cpu,
    opcode: u8,
    bus: &mut SystemBus,
    io: &mut IoProxy,
    hook: &mut dyn InterruptHook,
) -> u32 {
    cpu.trace_insn(opcode);

    // The 48 ALU-group opcodes (add/or/adc/sbb/and/sub/xor/cmp) share a
    // uniform six-form layout; the interleaved segment push/pop and
    // DAA/DAS/AAA/AAS opcodes are handled alongside them since they live in
    // the same 0x00-0x3F block.
    if opcode <= 0x3F {
        let group = opcode >> 3;
        let form = opcode & 0x07;
        if form <= 5 && group <= 7 {
            let kind = alu_kind(group);
            return exec_alu_form(cpu, kind, form, bus);
        }
        return exec_block0_special(cpu, opcode, bus);
    }

    match opcode {
        0x40..=0x47 => {
            let r = REG16[(opcode - 0x40) as usize];
            let v = cpu.regs.get16(r);
            let result = alu::inc(v as u32, 16, &mut cpu.flags) as u16;
            cpu.regs.set16(r, result);
            2
        }
        0x48..=0x4F => {
            let r = REG16[(opcode - 0x48) as usize];
            let v = cpu.regs.get16(r);
            let result = alu::dec(v as u32, 16, &mut cpu.flags) as u16;
            cpu.regs.set16(r, result);
            2
        }
        0x50..=0x57 => {
            let r = REG16[(opcode - 0x50) as usize];
            let value = if r == Reg16::Sp && cpu.variant.push_sp_is_post_decrement() {
                cpu.regs.get16(Reg16::Sp).wrapping_sub(2)
            } else {
                cpu.regs.get16(r)
            };
            cpu.push(value, bus);
            3
        }
        0x58..=0x5F => {
            let r = REG16[(opcode - 0x58) as usize];
            let value = cpu.pop(bus);
            cpu.regs.set16(r, value);
            3
        }
        0x60 if cpu.variant.has_186_extensions() => {
            let sp = cpu.regs.get16(Reg16::Sp);
            for r in [Reg16::Ax, Reg16::Cx, Reg16::Dx, Reg16::Bx, Reg16::Sp, Reg16::Bp, Reg16::Si, Reg16::Di] {
                let v = if r == Reg16::Sp { sp } else { cpu.regs.get16(r) };
                cpu.push(v, bus);
            }
            8
        }
        0x61 if cpu.variant.has_186_extensions() => {
            for r in [Reg16::Di, Reg16::Si, Reg16::Bp] {
                let v = cpu.pop(bus);
                cpu.regs.set16(r, v);
            }
            let _ = cpu.pop(bus); // the pushed SP value itself is discarded
            for r in [Reg16::Bx, Reg16::Dx, Reg16::Cx, Reg16::Ax] {
                let v = cpu.pop(bus);
                cpu.regs.set16(r, v);
            }
            8
        }
        0x62 if cpu.variant.has_186_extensions() => {
            let m = decode_modrm(cpu, bus);
            let index = cpu.regs.get16(REG16[m.reg as usize]) as i16;
            if let Some((seg, off)) = m.ea {
                let lo_addr = cpu.linear(seg, off);
                let hi_addr = cpu.linear(seg, off.wrapping_add(2));
                let lo = bus.read_u16(lo_addr) as i16;
                let hi = bus.read_u16(hi_addr) as i16;
                if index < lo || index > hi {
                    cpu.deliver_interrupt(5, true, bus, io, hook);
                }
            }
            8
        }
        0x68 if cpu.variant.has_186_extensions() => {
            let imm = cpu.fetch_u16(bus);
            cpu.push(imm, bus);
            3
        }
        0x6A if cpu.variant.has_186_extensions() => {
            let imm = cpu.fetch_u8(bus) as i8 as i16 as u16;
            cpu.push(imm, bus);
            3
        }
        0x69 if cpu.variant.has_186_extensions() => {
            let m = decode_modrm(cpu, bus);
            let src = get_rm16(cpu, bus, &m) as i16;
            let imm = cpu.fetch_u16(bus) as i16;
            let product = alu::imul16(src, imm, &mut cpu.flags);
            cpu.regs.set16(REG16[m.reg as usize], product as u16);
            4
        }
        0x6B if cpu.variant.has_186_extensions() => {
            let m = decode_modrm(cpu, bus);
            let src = get_rm16(cpu, bus, &m) as i16;
            let imm = cpu.fetch_u8(bus) as i8 as i16;
            let product = alu::imul16(src, imm, &mut cpu.flags);
            cpu.regs.set16(REG16[m.reg as usize], product as u16);
            4
        }
        0x6C if cpu.variant.has_186_extensions() => exec_string(cpu, bus, StrOp::Insb, Some(io)),
        0x6D if cpu.variant.has_186_extensions() => exec_string(cpu, bus, StrOp::Insw, Some(io)),
        0x6E if cpu.variant.has_186_extensions() => exec_string(cpu, bus, StrOp::Outsb, Some(io)),
        0x6F if cpu.variant.has_186_extensions() => exec_string(cpu, bus, StrOp::Outsw, Some(io)),
        0x70..=0x7F => {
            let disp = cpu.fetch_u8(bus) as i8 as i16;
            if jcc_taken(&cpu.flags, opcode & 0x0F) {
                cpu.regs.ip = cpu.regs.ip.wrapping_add(disp as u16);
            }
            4
        }
        0x80 | 0x81 | 0x83 => exec_group1(cpu, opcode, bus),
        0x84 => {
            let m = decode_modrm(cpu, bus);
            let a = get_rm8(cpu, bus, &m);
            let b = cpu.regs.get8(REG8[m.reg as usize]);
            alu::and(a as u32, b as u32, 8, &mut cpu.flags);
            3
        }
        0x85 => {
            let m = decode_modrm(cpu, bus);
            let a = get_rm16(cpu, bus, &m);
            let b = cpu.regs.get16(REG16[m.reg as usize]);
            alu::and(a as u32, b as u32, 16, &mut cpu.flags);
            3
        }
        0x86 => {
            let m = decode_modrm(cpu, bus);
            let a = get_rm8(cpu, bus, &m);
            let b = cpu.regs.get8(REG8[m.reg as usize]);
            set_rm8(cpu, bus, &m, b);
            cpu.regs.set8(REG8[m.reg as usize], a);
            4
        }
        0x87 => {
            let m = decode_modrm(cpu, bus);
            let a = get_rm16(cpu, bus, &m);
            let b = cpu.regs.get16(REG16[m.reg as usize]);
            set_rm16(cpu, bus, &m, b);
            cpu.regs.set16(REG16[m.reg as usize], a);
            4
        }
        0x88 => {
            let m = decode_modrm(cpu, bus);
            let v = cpu.regs.get8(REG8[m.reg as usize]);
            set_rm8(cpu, bus, &m, v);
            2
        }
        0x89 => {
            let m = decode_modrm(cpu, bus);
            let v = cpu.regs.get16(REG16[m.reg as usize]);
            set_rm16(cpu, bus, &m, v);
            2
        }
        0x8A => {
            let m = decode_modrm(cpu, bus);
            let v = get_rm8(cpu, bus, &m);
            cpu.regs.set8(REG8[m.reg as usize], v);
            2
        }
        0x8B => {
            let m = decode_modrm(cpu, bus);
            let v = get_rm16(cpu, bus, &m);
            cpu.regs.set16(REG16[m.reg as usize], v);
            2
        }
        0x8C => {
            let m = decode_modrm(cpu, bus);
            let v = cpu.regs.seg(SEG[(m.reg & 0x03) as usize]);
            set_rm16(cpu, bus, &m, v);
            2
        }
        0x8D => {
            let m = decode_modrm(cpu, bus);
            let offset = m.ea.map(|(_, off)| off).unwrap_or(0);
            cpu.regs.set16(REG16[m.reg as usize], offset);
            2
        }
        0x8E => {
            let m = decode_modrm(cpu, bus);
            let v = get_rm16(cpu, bus, &m);
            cpu.regs.set_seg(SEG[(m.reg & 0x03) as usize], v);
            2
        }
        0x8F => {
            let m = decode_modrm(cpu, bus);
            let v = cpu.pop(bus);
            set_rm16(cpu, bus, &m, v);
            3
        }
        0x90 => 1, // NOP (XCHG AX,AX)
        0x91..=0x97 => {
            let r = REG16[(opcode - 0x90) as usize];
            let a = cpu.regs.get16(Reg16::Ax);
            let b = cpu.regs.get16(r);
            cpu.regs.set16(Reg16::Ax, b);
            cpu.regs.set16(r, a);
            2
        }
        0x98 => {
            let al = cpu.regs.get8(Reg8::Al) as i8;
            cpu.regs.set16(Reg16::Ax, al as i16 as u16);
            2
        }
        0x99 => {
            let ax = cpu.regs.get16(Reg16::Ax) as i16;
            cpu.regs.set16(Reg16::Dx, if ax < 0 { 0xFFFF } else { 0 });
            2
        }
        0x9A => {
            let ip = cpu.fetch_u16(bus);
            let cs = cpu.fetch_u16(bus);
            let ret_cs = cpu.regs.seg(SegReg::Cs);
            cpu.push(ret_cs, bus);
            cpu.push(cpu.regs.ip, bus);
            cpu.regs.set_seg(SegReg::Cs, cs);
            cpu.regs.ip = ip;
            5
        }
        0x9C => {
            let word = cpu.flags.to_word(cpu.variant);
            cpu.push(word, bus);
            3
        }
        0x9D => {
            let word = cpu.pop(bus);
            cpu.flags = Flags::from_word(word);
            3
        }
        0x9E => {
            let ah = cpu.regs.get8(Reg8::Ah);
            cpu.flags.cf = ah & 0x01 != 0;
            cpu.flags.pf = ah & 0x04 != 0;
            cpu.flags.af = ah & 0x10 != 0;
            cpu.flags.zf = ah & 0x40 != 0;
            cpu.flags.sf = ah & 0x80 != 0;
            2
        }
        0x9F => {
            let word = cpu.flags.to_word(cpu.variant);
            cpu.regs.set8(Reg8::Ah, (word & 0xff) as u8);
            2
        }
        0xA0 => {
            let off = cpu.fetch_u16(bus);
            let seg = cpu.data_segment(false);
            let addr = cpu.linear(seg, off);
            let v = bus.read_u8(addr);
            cpu.regs.set8(Reg8::Al, v);
            3
        }
        0xA1 => {
            let off = cpu.fetch_u16(bus);
            let seg = cpu.data_segment(false);
            let addr = cpu.linear(seg, off);
            let v = bus.read_u16(addr);
            cpu.regs.set16(Reg16::Ax, v);
            3
        }
        0xA2 => {
            let off = cpu.fetch_u16(bus);
            let seg = cpu.data_segment(false);
            let addr = cpu.linear(seg, off);
            bus.write_u8(addr, cpu.regs.get8(Reg8::Al));
            3
        }
        0xA3 => {
            let off = cpu.fetch_u16(bus);
            let seg = cpu.data_segment(false);
            let addr = cpu.linear(seg, off);
            bus.write_u16(addr, cpu.regs.get16(Reg16::Ax));
            3
        }
        0xA4 => exec_string(cpu, bus, StrOp::Movsb, None),
        0xA5 => exec_string(cpu, bus, StrOp::Movsw, None),
        0xA6 => exec_string(cpu, bus, StrOp::Cmpsb, None),
        0xA7 => exec_string(cpu, bus, StrOp::Cmpsw, None),
        0xA8 => {
            let al = cpu.regs.get8(Reg8::Al);
            let imm = cpu.fetch_u8(bus);
            alu::and(al as u32, imm as u32, 8, &mut cpu.flags);
            2
        }
        0xA9 => {
            let ax = cpu.regs.get16(Reg16::Ax);
            let imm = cpu.fetch_u16(bus);
            alu::and(ax as u32, imm as u32, 16, &mut cpu.flags);
            2
        }
        0xAA => exec_string(cpu, bus, StrOp::Stosb, None),
        0xAB => exec_string(cpu, bus, StrOp::Stosw, None),
        0xAC => exec_string(cpu, bus, StrOp::Lodsb, None),
        0xAD => exec_string(cpu, bus, StrOp::Lodsw, None),
        0xAE => exec_string(cpu, bus, StrOp::Scasb, None),
        0xAF => exec_string(cpu, bus, StrOp::Scasw, None),
        0xB0..=0xB7 => {
            let imm = cpu.fetch_u8(bus);
            cpu.regs.set8(REG8[(opcode - 0xB0) as usize], imm);
            2
        }
        0xB8..=0xBF => {
            let imm = cpu.fetch_u16(bus);
            cpu.regs.set16(REG16[(opcode - 0xB8) as usize], imm);
            2
        }
        0xC0 | 0xC1 if cpu.variant.has_186_extensions() => exec_group2(cpu, bus, opcode, ShiftSrc::Imm8),
        0xC2 => {
            let extra = cpu.fetch_u16(bus);
            let ip = cpu.pop(bus);
            cpu.regs.ip = ip;
            cpu.regs.set16(Reg16::Sp, cpu.regs.get16(Reg16::Sp).wrapping_add(extra));
            5
        }
        0xC3 => {
            let ip = cpu.pop(bus);
            cpu.regs.ip = ip;
            4
        }
        0xC4 | 0xC5 => {
            let m = decode_modrm(cpu, bus);
            let (seg, off) = m.ea.unwrap_or((SegReg::Ds, 0));
            let off_addr = cpu.linear(seg, off);
            let offset_val = bus.read_u16(off_addr);
            let seg_addr = cpu.linear(seg, off.wrapping_add(2));
            let seg_val = bus.read_u16(seg_addr);
            cpu.regs.set16(REG16[m.reg as usize], offset_val);
            cpu.regs.set_seg(if opcode == 0xC4 { SegReg::Es } else { SegReg::Ds }, seg_val);
            4
        }
        0xC6 => {
            let m = decode_modrm(cpu, bus);
            let imm = cpu.fetch_u8(bus);
            set_rm8(cpu, bus, &m, imm);
            3
        }
        0xC7 => {
            let m = decode_modrm(cpu, bus);
            let imm = cpu.fetch_u16(bus);
            set_rm16(cpu, bus, &m, imm);
            3
        }
        0xC8 if cpu.variant.has_186_extensions() => {
            let size = cpu.fetch_u16(bus);
            let nesting = cpu.fetch_u8(bus) & 0x1f;
            let bp = cpu.regs.get16(Reg16::Bp);
            cpu.push(bp, bus);
            let frame_temp = cpu.regs.get16(Reg16::Sp);
            for level in 1..nesting {
                let new_bp = bp.wrapping_sub(2 * level as u16);
                let addr = cpu.linear(SegReg::Ss, new_bp);
                let v = bus.read_u16(addr);
                cpu.push(v, bus);
            }
            if nesting > 0 {
                cpu.push(frame_temp, bus);
            }
            cpu.regs.set16(Reg16::Bp, frame_temp);
            cpu.regs.set16(Reg16::Sp, frame_temp.wrapping_sub(size));
            8
        }
        0xC9 if cpu.variant.has_186_extensions() => {
            let bp = cpu.regs.get16(Reg16::Bp);
            cpu.regs.set16(Reg16::Sp, bp);
            let restored = cpu.pop(bus);
            cpu.regs.set16(Reg16::Bp, restored);
            4
        }
        0xCA => {
            let extra = cpu.fetch_u16(bus);
            let ip = cpu.pop(bus);
            let cs = cpu.pop(bus);
            cpu.regs.ip = ip;
            cpu.regs.set_seg(SegReg::Cs, cs);
            cpu.regs.set16(Reg16::Sp, cpu.regs.get16(Reg16::Sp).wrapping_add(extra));
            6
        }
        0xCB => {
            let ip = cpu.pop(bus);
            let cs = cpu.pop(bus);
            cpu.regs.ip = ip;
            cpu.regs.set_seg(SegReg::Cs, cs);
            6
        }
        0xCC => {
            cpu.deliver_interrupt(3, true, bus, io, hook);
            5
        }
        0xCD => {
            let n = cpu.fetch_u8(bus);
            cpu.deliver_interrupt(n, true, bus, io, hook);
            5
        }
        0xCE => {
            if cpu.flags.of {
                cpu.deliver_interrupt(4, true, bus, io, hook);
            }
            4
        }
        0xCF => {
            let ip = cpu.pop(bus);
            let cs = cpu.pop(bus);
            let flags_word = cpu.pop(bus);
            cpu.regs.ip = ip;
            cpu.regs.set_seg(SegReg::Cs, cs);
            cpu.flags = Flags::from_word(flags_word);
            5
        }
        0xD0 => exec_group2(cpu, bus, opcode, ShiftSrc::One),
        0xD1 => exec_group2(cpu, bus, opcode, ShiftSrc::One),
        0xD2 => exec_group2(cpu, bus, opcode, ShiftSrc::Cl),
        0xD3 => exec_group2(cpu, bus, opcode, ShiftSrc::Cl),
        0xD4 => {
            let base = cpu.fetch_u8(bus);
            if base == 0 {
                cpu.deliver_interrupt(0, true, bus, io, hook);
                return 8;
            }
            let al = cpu.regs.get8(Reg8::Al);
            let ah = al / base;
            let al2 = al % base;
            cpu.regs.set8(Reg8::Ah, ah);
            cpu.regs.set8(Reg8::Al, al2);
            cpu.flags.zf = al2 == 0;
            cpu.flags.sf = al2 & 0x80 != 0;
            cpu.flags.pf = al2.count_ones() % 2 == 0;
            7
        }
        0xD5 => {
            let base = cpu.fetch_u8(bus);
            let al = cpu.regs.get8(Reg8::Al);
            let ah = cpu.regs.get8(Reg8::Ah);
            let result = (ah.wrapping_mul(base)).wrapping_add(al);
            cpu.regs.set8(Reg8::Al, result);
            cpu.regs.set8(Reg8::Ah, 0);
            cpu.flags.zf = result == 0;
            cpu.flags.sf = result & 0x80 != 0;
            cpu.flags.pf = result.count_ones() % 2 == 0;
            4
        }
        0xD6 if cpu.variant.salc_exists() => {
            cpu.regs.set8(Reg8::Al, if cpu.flags.cf { 0xFF } else { 0x00 });
            2
        }
        0xD7 => {
            let bx = cpu.regs.get16(Reg16::Bx);
            let al = cpu.regs.get8(Reg8::Al) as u16;
            let seg = cpu.data_segment(false);
            let addr = cpu.linear(seg, bx.wrapping_add(al));
            let v = bus.read_u8(addr);
            cpu.regs.set8(Reg8::Al, v);
            4
        }
        0xD8..=0xDF => {
            // FPU escape: no coprocessor is emulated, so just consume the ModR/M byte.
            let _ = decode_modrm(cpu, bus);
            2
        }
        0xE0 => exec_loop(cpu, bus, LoopKind::Ne),
        0xE1 => exec_loop(cpu, bus, LoopKind::E),
        0xE2 => exec_loop(cpu, bus, LoopKind::Plain),
        0xE3 => {
            let disp = cpu.fetch_u8(bus) as i8 as i16;
            if cpu.regs.get16(Reg16::Cx) == 0 {
                cpu.regs.ip = cpu.regs.ip.wrapping_add(disp as u16);
            }
            5
        }
        0xE4 => {
            let port = cpu.fetch_u8(bus) as u16;
            let v = io.read8(port, bus.vga);
            cpu.regs.set8(Reg8::Al, v);
            4
        }
        0xE5 => {
            let port = cpu.fetch_u8(bus) as u16;
            let v = io.read16(port, bus.vga);
            cpu.regs.set16(Reg16::Ax, v);
            4
        }
        0xE6 => {
            let port = cpu.fetch_u8(bus) as u16;
            io.write8(port, cpu.regs.get8(Reg8::Al), bus.vga);
            4
        }
        0xE7 => {
            let port = cpu.fetch_u8(bus) as u16;
            io.write16(port, cpu.regs.get16(Reg16::Ax), bus.vga);
            4
        }
        0xE8 => {
            let disp = cpu.fetch_u16(bus) as i16;
            cpu.push(cpu.regs.ip, bus);
            cpu.regs.ip = cpu.regs.ip.wrapping_add(disp as u16);
            5
        }
        0xE9 => {
            let disp = cpu.fetch_u16(bus) as i16;
            cpu.regs.ip = cpu.regs.ip.wrapping_add(disp as u16);
            3
        }
        0xEA => {
            let ip = cpu.fetch_u16(bus);
            let cs = cpu.fetch_u16(bus);
            cpu.regs.ip = ip;
            cpu.regs.set_seg(SegReg::Cs, cs);
            4
        }
        0xEB => {
            let disp = cpu.fetch_u8(bus) as i8 as i16;
            cpu.regs.ip = cpu.regs.ip.wrapping_add(disp as u16);
            3
        }
        0xEC => {
            let port = cpu.regs.get16(Reg16::Dx);
            let v = io.read8(port, bus.vga);
            cpu.regs.set8(Reg8::Al, v);
            4
        }
        0xED => {
            let port = cpu.regs.get16(Reg16::Dx);
            let v = io.read16(port, bus.vga);
            cpu.regs.set16(Reg16::Ax, v);
            4
        }
        0xEE => {
            let port = cpu.regs.get16(Reg16::Dx);
            io.write8(port, cpu.regs.get8(Reg8::Al), bus.vga);
            4
        }
        0xEF => {
            let port = cpu.regs.get16(Reg16::Dx);
            io.write16(port, cpu.regs.get16(Reg16::Ax), bus.vga);
            4
        }
        0xF4 => {
            cpu.halted = true;
            2
        }
        0xF5 => {
            cpu.flags.cf = !cpu.flags.cf;
            2
        }
        0xF6 | 0xF7 => exec_group3(cpu, bus, io, hook, opcode),
        0xF8 => {
            cpu.flags.cf = false;
            2
        }
        0xF9 => {
            cpu.flags.cf = true;
            2
        }
        0xFA => {
            cpu.flags.ifl = false;
            2
        }
        0xFB => {
            cpu.flags.ifl = true;
            2
        }
        0xFC => {
            cpu.flags.df = false;
            2
        }
        0xFD => {
            cpu.flags.df = true;
            2
        }
        0xFE => {
            let m = decode_modrm(cpu, bus);
            let v = get_rm8(cpu, bus, &m);
            let result = if m.reg == 0 {
                alu::inc(v as u32, 8, &mut cpu.flags) as u8
            } else {
                alu::dec(v as u32, 8, &mut cpu.flags) as u8
            };
            set_rm8(cpu, bus, &m, result);
            3
        }
        0xFF => exec_group5(cpu, bus, io, hook),
        0x0F if cpu.variant.pop_cs_valid() => {
            let v = cpu.pop(bus);
            cpu.regs.set_seg(SegReg::Cs, v);
            3
        }
        _ => {
            if cpu.variant.undefined_opcode_traps() {
                cpu.deliver_interrupt(6, true, bus, io, hook);
            } else {
                cpu.log_undefined(opcode);
            }
            2
        }
    }
}

fn exec_alu_form(cpu: &mut Cpu, kind: AluKind, form: u8, bus: &mut SystemBus) -> u32 {
    match form {
        0 => {
            let m = decode_modrm(cpu, bus);
            let a = get_rm8(cpu, bus, &m);
            let b = cpu.regs.get8(REG8[m.reg as usize]);
            let r = alu_apply(kind, a as u32, b as u32, 8, &mut cpu.flags) as u8;
            if !matches!(kind, AluKind::Cmp) {
                set_rm8(cpu, bus, &m, r);
            }
            3
        }
        1 => {
            let m = decode_modrm(cpu, bus);
            let a = get_rm16(cpu, bus, &m);
            let b = cpu.regs.get16(REG16[m.reg as usize]);
            let r = alu_apply(kind, a as u32, b as u32, 16, &mut cpu.flags) as u16;
            if !matches!(kind, AluKind::Cmp) {
                set_rm16(cpu, bus, &m, r);
            }
            3
        }
        2 => {
            let m = decode_modrm(cpu, bus);
            let a = cpu.regs.get8(REG8[m.reg as usize]);
            let b = get_rm8(cpu, bus, &m);
            let r = alu_apply(kind, a as u32, b as u32, 8, &mut cpu.flags) as u8;
            if !matches!(kind, AluKind::Cmp) {
                cpu.regs.set8(REG8[m.reg as usize], r);
            }
            3
        }
        3 => {
            let m = decode_modrm(cpu, bus);
            let a = cpu.regs.get16(REG16[m.reg as usize]);
            let b = get_rm16(cpu, bus, &m);
            let r = alu_apply(kind, a as u32, b as u32, 16, &mut cpu.flags) as u16;
            if !matches!(kind, AluKind::Cmp) {
                cpu.regs.set16(REG16[m.reg as usize], r);
            }
            3
        }
        4 => {
            let imm = cpu.fetch_u8(bus);
            let a = cpu.regs.get8(Reg8::Al);
            let r = alu_apply(kind, a as u32, imm as u32, 8, &mut cpu.flags) as u8;
            if !matches!(kind, AluKind::Cmp) {
                cpu.regs.set8(Reg8::Al, r);
            }
            2
        }
        _ => {
            let imm = cpu.fetch_u16(bus);
            let a = cpu.regs.get16(Reg16::Ax);
            let r = alu_apply(kind, a as u32, imm as u32, 16, &mut cpu.flags) as u16;
            if !matches!(kind, AluKind::Cmp) {
                cpu.regs.set16(Reg16::Ax, r);
            }
            2
        }
    }
}

fn exec_block0_special(cpu: &mut Cpu, opcode: u8, bus: &mut SystemBus) -> u32 {
    match opcode {
        0x06 => {
            let v = cpu.regs.seg(SegReg::Es);
            cpu.push(v, bus);
            3
        }
        0x07 => {
            let v = cpu.pop(bus);
            cpu.regs.set_seg(SegReg::Es, v);
            3
        }
        0x0E => {
            let v = cpu.regs.seg(SegReg::Cs);
            cpu.push(v, bus);
            3
        }
        0x0F => {
            // Handled by the caller only when POP CS is valid; otherwise
            // falls through as undefined via the top-level match.
            debug!(target: "pcxt86::cpu", "0x0F reached exec_block0_special");
            2
        }
        0x16 => {
            let v = cpu.regs.seg(SegReg::Ss);
            cpu.push(v, bus);
            3
        }
        0x17 => {
            let v = cpu.pop(bus);
            cpu.regs.set_seg(SegReg::Ss, v);
            3
        }
        0x1E => {
            let v = cpu.regs.seg(SegReg::Ds);
            cpu.push(v, bus);
            3
        }
        0x1F => {
            let v = cpu.pop(bus);
            cpu.regs.set_seg(SegReg::Ds, v);
            3
        }
        0x27 => {
            decimal_adjust_add(cpu);
            4
        }
        0x2F => {
            decimal_adjust_sub(cpu);
            4
        }
        0x37 => {
            ascii_adjust_add(cpu);
            4
        }
        0x3F => {
            ascii_adjust_sub(cpu);
            4
        }
        _ => 2,
    }
}

fn decimal_adjust_add(cpu: &mut Cpu) {
    let mut al = cpu.regs.get8(Reg8::Al);
    let old_af = cpu.flags.af;
    let old_cf = cpu.flags.cf;
    cpu.flags.cf = false;
    if (al & 0x0f) > 9 || old_af {
        let (r, carry) = al.overflowing_add(6);
        al = r;
        cpu.flags.cf = old_cf || carry;
        cpu.flags.af = true;
    } else {
        cpu.flags.af = false;
    }
    if al > 0x9f || old_cf {
        al = al.wrapping_add(0x60);
        cpu.flags.cf = true;
    }
    cpu.regs.set8(Reg8::Al, al);
    cpu.flags.zf = al == 0;
    cpu.flags.sf = al & 0x80 != 0;
    cpu.flags.pf = al.count_ones() % 2 == 0;
}

fn decimal_adjust_sub(cpu: &mut Cpu) {
    let mut al = cpu.regs.get8(Reg8::Al);
    let old_af = cpu.flags.af;
    let old_cf = cpu.flags.cf;
    cpu.flags.cf = false;
    if (al & 0x0f) > 9 || old_af {
        al = al.wrapping_sub(6);
        cpu.flags.cf = old_cf || al > 0xf9;
        cpu.flags.af = true;
    } else {
        cpu.flags.af = false;
    }
    if al > 0x99 || old_cf {
        al = al.wrapping_sub(0x60);
        cpu.flags.cf = true;
    }
    cpu.regs.set8(Reg8::Al, al);
    cpu.flags.zf = al == 0;
    cpu.flags.sf = al & 0x80 != 0;
    cpu.flags.pf = al.count_ones() % 2 == 0;
}

fn ascii_adjust_add(cpu: &mut Cpu) {
    let al = cpu.regs.get8(Reg8::Al);
    let ah = cpu.regs.get8(Reg8::Ah);
    if (al & 0x0f) > 9 || cpu.flags.af {
        cpu.regs.set8(Reg8::Al, al.wrapping_add(6) & 0x0f);
        cpu.regs.set8(Reg8::Ah, ah.wrapping_add(1));
        cpu.flags.af = true;
        cpu.flags.cf = true;
    } else {
        cpu.regs.set8(Reg8::Al, al & 0x0f);
        cpu.flags.af = false;
        cpu.flags.cf = false;
    }
}

fn ascii_adjust_sub(cpu: &mut Cpu) {
    let al = cpu.regs.get8(Reg8::Al);
    let ah = cpu.regs.get8(Reg8::Ah);
    if (al & 0x0f) > 9 || cpu.flags.af {
        cpu.regs.set8(Reg8::Al, al.wrapping_sub(6) & 0x0f);
        cpu.regs.set8(Reg8::Ah, ah.wrapping_sub(1));
        cpu.flags.af = true;
        cpu.flags.cf = true;
    } else {
        cpu.regs.set8(Reg8::Al, al & 0x0f);
        cpu.flags.af = false;
        cpu.flags.cf = false;
    }
}

fn exec_group1(cpu: &mut Cpu, opcode: u8, bus: &mut SystemBus) -> u32 {
    let m = decode_modrm(cpu, bus);
    let kind = alu_kind(m.reg);
    if opcode == 0x81 {
        let a = get_rm16(cpu, bus, &m);
        let imm = cpu.fetch_u16(bus);
        let r = alu_apply(kind, a as u32, imm as u32, 16, &mut cpu.flags) as u16;
        if !matches!(kind, AluKind::Cmp) {
            set_rm16(cpu, bus, &m, r);
        }
    } else if opcode == 0x83 {
        let a = get_rm16(cpu, bus, &m);
        let imm = cpu.fetch_u8(bus) as i8 as i16 as u16;
        let r = alu_apply(kind, a as u32, imm as u32, 16, &mut cpu.flags) as u16;
        if !matches!(kind, AluKind::Cmp) {
            set_rm16(cpu, bus, &m, r);
        }
    } else {
        let a = get_rm8(cpu, bus, &m);
        let imm = cpu.fetch_u8(bus);
        let r = alu_apply(kind, a as u32, imm as u32, 8, &mut cpu.flags) as u8;
        if !matches!(kind, AluKind::Cmp) {
            set_rm8(cpu, bus, &m, r);
        }
    }
    4
}

enum ShiftSrc {
    One,
    Cl,
    Imm8,
}

fn shift_op_for(reg: u8) -> ShiftOp {
    match reg {
        0 => ShiftOp::Rol,
        1 => ShiftOp::Ror,
        2 => ShiftOp::Rcl,
        3 => ShiftOp::Rcr,
        4 | 6 => ShiftOp::Shl,
        5 => ShiftOp::Shr,
        _ => ShiftOp::Sar,
    }
}

fn exec_group2(cpu: &mut Cpu, bus: &mut SystemBus, opcode: u8, src: ShiftSrc) -> u32 {
    let m = decode_modrm(cpu, bus);
    let op = shift_op_for(m.reg);
    let is_byte = opcode == 0xC0 || opcode == 0xD0 || opcode == 0xD2;
    let count_raw = match src {
        ShiftSrc::One => 1,
        ShiftSrc::Cl => cpu.regs.get8(Reg8::Cl),
        ShiftSrc::Imm8 => cpu.fetch_u8(bus),
    };
    let count = shift_count(cpu, count_raw);
    if is_byte {
        let v = get_rm8(cpu, bus, &m);
        let r = alu::shift(op, v as u32, count, 8, &mut cpu.flags) as u8;
        set_rm8(cpu, bus, &m, r);
    } else {
        let v = get_rm16(cpu, bus, &m);
        let r = alu::shift(op, v as u32, count, 16, &mut cpu.flags) as u16;
        set_rm16(cpu, bus, &m, r);
    }
    3
}

fn exec_group3(
    cpu: &mut Cpu,
    bus: &mut SystemBus,
    io: &mut IoProxy,
    hook: &mut dyn InterruptHook,
    opcode: u8,
) -> u32 {
    let m = decode_modrm(cpu, bus);
    let is_byte = opcode == 0xF6;
    match m.reg {
        0 | 1 => {
            if is_byte {
                let a = get_rm8(cpu, bus, &m);
                let imm = cpu.fetch_u8(bus);
                alu::and(a as u32, imm as u32, 8, &mut cpu.flags);
            } else {
                let a = get_rm16(cpu, bus, &m);
                let imm = cpu.fetch_u16(bus);
                alu::and(a as u32, imm as u32, 16, &mut cpu.flags);
            }
            4
        }
        2 => {
            if is_byte {
                let v = get_rm8(cpu, bus, &m);
                let r = alu::not(v as u32, 8) as u8;
                set_rm8(cpu, bus, &m, r);
            } else {
                let v = get_rm16(cpu, bus, &m);
                let r = alu::not(v as u32, 16) as u16;
                set_rm16(cpu, bus, &m, r);
            }
            3
        }
        3 => {
            if is_byte {
                let v = get_rm8(cpu, bus, &m);
                let r = alu::neg(v as u32, 8, &mut cpu.flags) as u8;
                set_rm8(cpu, bus, &m, r);
            } else {
                let v = get_rm16(cpu, bus, &m);
                let r = alu::neg(v as u32, 16, &mut cpu.flags) as u16;
                set_rm16(cpu, bus, &m, r);
            }
            3
        }
        4 => {
            let zf_clear = cpu.variant.mul_clears_zf();
            if is_byte {
                let v = get_rm8(cpu, bus, &m);
                let al = cpu.regs.get8(Reg8::Al);
                let product = alu::mul8(al, v, &mut cpu.flags, zf_clear);
                cpu.regs.set16(Reg16::Ax, product);
            } else {
                let v = get_rm16(cpu, bus, &m);
                let ax = cpu.regs.get16(Reg16::Ax);
                let product = alu::mul16(ax, v, &mut cpu.flags, zf_clear);
                cpu.regs.set16(Reg16::Ax, (product & 0xffff) as u16);
                cpu.regs.set16(Reg16::Dx, (product >> 16) as u16);
            }
            if is_byte {
                70
            } else {
                118
            }
        }
        5 => {
            if is_byte {
                let v = get_rm8(cpu, bus, &m) as i8;
                let al = cpu.regs.get8(Reg8::Al) as i8;
                let product = alu::imul8(al, v, &mut cpu.flags);
                cpu.regs.set16(Reg16::Ax, product);
            } else {
                let v = get_rm16(cpu, bus, &m) as i16;
                let ax = cpu.regs.get16(Reg16::Ax) as i16;
                let product = alu::imul16(ax, v, &mut cpu.flags);
                cpu.regs.set16(Reg16::Ax, (product & 0xffff) as u16);
                cpu.regs.set16(Reg16::Dx, (product >> 16) as u16);
            }
            if is_byte {
                80
            } else {
                128
            }
        }
        6 => {
            if is_byte {
                let divisor = get_rm8(cpu, bus, &m);
                let ax = cpu.regs.get16(Reg16::Ax);
                match alu::div8(ax, divisor) {
                    Some((q, r)) => {
                        cpu.regs.set8(Reg8::Al, q);
                        cpu.regs.set8(Reg8::Ah, r);
                    }
                    None => cpu.deliver_interrupt(0, true, bus, io, hook),
                }
            } else {
                let divisor = get_rm16(cpu, bus, &m);
                let dx = cpu.regs.get16(Reg16::Dx) as u32;
                let ax = cpu.regs.get16(Reg16::Ax) as u32;
                let dividend = (dx << 16) | ax;
                match alu::div16(dividend, divisor) {
                    Some((q, r)) => {
                        cpu.regs.set16(Reg16::Ax, q);
                        cpu.regs.set16(Reg16::Dx, r);
                    }
                    None => cpu.deliver_interrupt(0, true, bus, io, hook),
                }
            }
            if is_byte {
                80
            } else {
                144
            }
        }
        _ => {
            if is_byte {
                let divisor = get_rm8(cpu, bus, &m) as i8;
                let ax = cpu.regs.get16(Reg16::Ax) as i16;
                match alu::idiv8(ax, divisor) {
                    Some((q, r)) => {
                        cpu.regs.set8(Reg8::Al, q as u8);
                        cpu.regs.set8(Reg8::Ah, r as u8);
                    }
                    None => cpu.deliver_interrupt(0, true, bus, io, hook),
                }
            } else {
                let divisor = get_rm16(cpu, bus, &m) as i16;
                let dx = cpu.regs.get16(Reg16::Dx) as u32;
                let ax = cpu.regs.get16(Reg16::Ax) as u32;
                let dividend = ((dx << 16) | ax) as i32;
                match alu::idiv16(dividend, divisor) {
                    Some((q, r)) => {
                        cpu.regs.set16(Reg16::Ax, q as u16);
                        cpu.regs.set16(Reg16::Dx, r as u16);
                    }
                    None => cpu.deliver_interrupt(0, true, bus, io, hook),
                }
            }
            if is_byte {
                101
            } else {
                165
            }
        }
    }
}

fn exec_group5(cpu: &mut Cpu, bus: &mut SystemBus, io: &mut IoProxy, hook: &mut dyn InterruptHook) -> u32 {
    let m = decode_modrm(cpu, bus);
    match m.reg {
        0 => {
            let v = get_rm16(cpu, bus, &m);
            let r = alu::inc(v as u32, 16, &mut cpu.flags) as u16;
            set_rm16(cpu, bus, &m, r);
            3
        }
        1 => {
            let v = get_rm16(cpu, bus, &m);
            let r = alu::dec(v as u32, 16, &mut cpu.flags) as u16;
            set_rm16(cpu, bus, &m, r);
            3
        }
        2 => {
            let target = get_rm16(cpu, bus, &m);
            cpu.push(cpu.regs.ip, bus);
            cpu.regs.ip = target;
            5
        }
        3 => {
            let (seg, off) = m.ea.unwrap_or((SegReg::Ds, 0));
            let off_addr = cpu.linear(seg, off);
            let new_ip = bus.read_u16(off_addr);
            let seg_addr = cpu.linear(seg, off.wrapping_add(2));
            let new_cs = bus.read_u16(seg_addr);
            cpu.push(cpu.regs.seg(SegReg::Cs), bus);
            cpu.push(cpu.regs.ip, bus);
            cpu.regs.ip = new_ip;
            cpu.regs.set_seg(SegReg::Cs, new_cs);
            let _ = io;
            let _ = hook;
            7
        }
        4 => {
            let target = get_rm16(cpu, bus, &m);
            cpu.regs.ip = target;
            3
        }
        5 => {
            let (seg, off) = m.ea.unwrap_or((SegReg::Ds, 0));
            let off_addr = cpu.linear(seg, off);
            let new_ip = bus.read_u16(off_addr);
            let seg_addr = cpu.linear(seg, off.wrapping_add(2));
            let new_cs = bus.read_u16(seg_addr);
            cpu.regs.ip = new_ip;
            cpu.regs.set_seg(SegReg::Cs, new_cs);
            4
        }
        _ => {
            let v = get_rm16(cpu, bus, &m);
            cpu.push(v, bus);
            3
        }
    }
}

enum LoopKind {
    Plain,
    E,
    Ne,
}

fn exec_loop(cpu: &mut Cpu, bus: &mut SystemBus, kind: LoopKind) -> u32 {
    let disp = cpu.fetch_u8(bus) as i8 as i16;
    let cx = cpu.regs.get16(Reg16::Cx).wrapping_sub(1);
    cpu.regs.set16(Reg16::Cx, cx);
    let take = cx != 0
        && match kind {
            LoopKind::Plain => true,
            LoopKind::E => cpu.flags.zf,
            LoopKind::Ne => !cpu.flags.zf,
        };
    if take {
        cpu.regs.ip = cpu.regs.ip.wrapping_add(disp as u16);
    }
    5
}

enum StrOp {
    Movsb,
    Movsw,
    Cmpsb,
    Cmpsw,
    Stosb,
    Stosw,
    Lodsb,
    Lodsw,
    Scasb,
    Scasw,
    Insb,
    Insw,
    Outsb,
    Outsw,
}

fn exec_string(cpu: &mut Cpu, bus: &mut SystemBus, op: StrOp, io: Option<&mut IoProxy>) -> u32 {
    let rep = cpu.rep;
    if let Some(_) = rep {
        if cpu.regs.get16(Reg16::Cx) == 0 {
            return 2;
        }
    }

    let width: u16 = match op {
        StrOp::Movsb | StrOp::Cmpsb | StrOp::Stosb | StrOp::Lodsb | StrOp::Scasb
        | StrOp::Insb | StrOp::Outsb => 1,
        _ => 2,
    };
    let delta = strings::step(cpu.flags.df, width) as i32;
    let si = cpu.regs.get16(Reg16::Si);
    let di = cpu.regs.get16(Reg16::Di);
    let src_seg = cpu.data_segment(false);

    let mut zf_for_rep = cpu.flags.zf;
    match op {
        StrOp::Movsb | StrOp::Movsw => {
            let src_addr = cpu.linear(src_seg, si);
            let dst_addr = cpu.linear(SegReg::Es, di);
            if width == 1 {
                let v = bus.read_u8(src_addr);
                bus.write_u8(dst_addr, v);
            } else {
                let v = bus.read_u16(src_addr);
                bus.write_u16(dst_addr, v);
            }
            cpu.regs.set16(Reg16::Si, (si as i32).wrapping_add(delta) as u16);
            cpu.regs.set16(Reg16::Di, (di as i32).wrapping_add(delta) as u16);
        }
        StrOp::Cmpsb | StrOp::Cmpsw => {
            let src_addr = cpu.linear(src_seg, si);
            let dst_addr = cpu.linear(SegReg::Es, di);
            let w = if width == 1 { 8 } else { 16 };
            let (a, b) = if width == 1 {
                (bus.read_u8(src_addr) as u32, bus.read_u8(dst_addr) as u32)
            } else {
                (bus.read_u16(src_addr) as u32, bus.read_u16(dst_addr) as u32)
            };
            alu::sub(a, b, w, &mut cpu.flags);
            zf_for_rep = cpu.flags.zf;
            cpu.regs.set16(Reg16::Si, (si as i32).wrapping_add(delta) as u16);
            cpu.regs.set16(Reg16::Di, (di as i32).wrapping_add(delta) as u16);
        }
        StrOp::Stosb | StrOp::Stosw => {
            let dst_addr = cpu.linear(SegReg::Es, di);
            if width == 1 {
                bus.write_u8(dst_addr, cpu.regs.get8(Reg8::Al));
            } else {
                bus.write_u16(dst_addr, cpu.regs.get16(Reg16::Ax));
            }
            cpu.regs.set16(Reg16::Di, (di as i32).wrapping_add(delta) as u16);
        }
        StrOp::Lodsb | StrOp::Lodsw => {
            let src_addr = cpu.linear(src_seg, si);
            if width == 1 {
                let v = bus.read_u8(src_addr);
                cpu.regs.set8(Reg8::Al, v);
            } else {
                let v = bus.read_u16(src_addr);
                cpu.regs.set16(Reg16::Ax, v);
            }
            cpu.regs.set16(Reg16::Si, (si as i32).wrapping_add(delta) as u16);
        }
        StrOp::Scasb | StrOp::Scasw => {
            let dst_addr = cpu.linear(SegReg::Es, di);
            let w = if width == 1 { 8 } else { 16 };
            let (a, b) = if width == 1 {
                (cpu.regs.get8(Reg8::Al) as u32, bus.read_u8(dst_addr) as u32)
            } else {
                (cpu.regs.get16(Reg16::Ax) as u32, bus.read_u16(dst_addr) as u32)
            };
            alu::sub(a, b, w, &mut cpu.flags);
            zf_for_rep = cpu.flags.zf;
            cpu.regs.set16(Reg16::Di, (di as i32).wrapping_add(delta) as u16);
        }
        StrOp::Insb | StrOp::Insw => {
            let io = io.expect("INS requires an IoProxy");
            let port = cpu.regs.get16(Reg16::Dx);
            let dst_addr = cpu.linear(SegReg::Es, di);
            if width == 1 {
                let v = io.read8(port, bus.vga);
                bus.write_u8(dst_addr, v);
            } else {
                let v = io.read16(port, bus.vga);
                bus.write_u16(dst_addr, v);
            }
            cpu.regs.set16(Reg16::Di, (di as i32).wrapping_add(delta) as u16);
        }
        StrOp::Outsb | StrOp::Outsw => {
            let io = io.expect("OUTS requires an IoProxy");
            let port = cpu.regs.get16(Reg16::Dx);
            let src_addr = cpu.linear(src_seg, si);
            if width == 1 {
                let v = bus.read_u8(src_addr);
                io.write8(port, v, bus.vga);
            } else {
                let v = bus.read_u16(src_addr);
                io.write16(port, v, bus.vga);
            }
            cpu.regs.set16(Reg16::Si, (si as i32).wrapping_add(delta) as u16);
        }
    }

    // Only CMPS/SCAS compare the way REPE/REPNE are specified: MOVS/STOS/
    // LODS/INS/OUTS set no flags to test, so REP on them just means "while
    // CX != 0" regardless of which of 0xF2/0xF3 introduced it, matching
    // `examples/original_source/src/cpu/cpu.c`'s generic `if (reptype)`
    // loop versus its CMPS/SCAS-only `zf` check.
    let compares = matches!(op, StrOp::Cmpsb | StrOp::Cmpsw | StrOp::Scasb | StrOp::Scasw);
    if let Some(rep_kind) = rep {
        let cx = cpu.regs.get16(Reg16::Cx).wrapping_sub(1);
        cpu.regs.set16(Reg16::Cx, cx);
        let continue_loop = cx != 0
            && (!compares || strings::string_loop_continues(rep_kind, zf_for_rep));
        if continue_loop {
            cpu.restart_instruction();
        }
    }
    let _ = RepKind::None;
    3
}
