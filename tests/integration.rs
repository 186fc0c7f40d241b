//! End-to-end tests exercising the fetch-decode-execute loop through real
//! encoded instruction streams, rather than calling ALU/shift helpers
//! directly (those have their own inline unit tests next to the code they
//! cover).

use pcxt86::cmos::Cmos;
use pcxt86::cpu::regs::{Reg16, Reg8, SegReg};
use pcxt86::cpu::variant::CpuVariant;
use pcxt86::cpu::Cpu;
use pcxt86::dma::Dma;
use pcxt86::intercept::PassthroughHook;
use pcxt86::io::{AdlibStub, IoProxy};
use pcxt86::mem::{linear_address, MemoryBus, SystemBus};
use pcxt86::mouse::SerialMouse;
use pcxt86::pic::Pic;
use pcxt86::pit::{Pit, PIT_HZ};
use pcxt86::ppi::Ppi;
use pcxt86::video::Vga;

/// Everything `execute_for_slice` needs, minus the `Cpu` itself, bundled so
/// each test can build one with `env()` and borrow pieces out of it.
struct Env {
    mem: MemoryBus,
    vga: Vga,
    pic: Pic,
    pit: Pit,
    ppi: Ppi,
    dma: Dma,
    cmos: Cmos,
    mouse: SerialMouse,
    adlib: AdlibStub,
    mirror: [u8; 65536],
}

impl Env {
    fn new() -> Self {
        Self {
            mem: MemoryBus::new(),
            vga: Vga::new(),
            pic: Pic::new(),
            pit: Pit::new(),
            ppi: Ppi::new(0, 0),
            dma: Dma::new(),
            cmos: Cmos::new(),
            mouse: SerialMouse::new(),
            adlib: AdlibStub::default(),
            mirror: [0u8; 65536],
        }
    }

    fn run(&mut self, cpu: &mut Cpu, target_cycles: u64) -> u64 {
        let mut bus = SystemBus { mem: &mut self.mem, vga: &mut self.vga };
        let mut io = IoProxy {
            pic: &mut self.pic,
            pit: &mut self.pit,
            ppi: &mut self.ppi,
            dma: &mut self.dma,
            cmos: &mut self.cmos,
            mouse: &mut self.mouse,
            adlib: &mut self.adlib,
            mirror: &mut self.mirror,
        };
        let mut preempt = false;
        cpu.execute_for_slice(target_cycles, &mut bus, &mut io, &mut PassthroughHook, &mut preempt)
    }
}

fn load_code(env: &mut Env, cpu: &Cpu, code: &[u8]) {
    let base = linear_address(cpu.regs.seg(SegReg::Cs), cpu.regs.ip);
    env.mem.load_image(base, code);
}

#[test]
fn pushf_popf_round_trips_flags() {
    let mut env = Env::new();
    let mut cpu = Cpu::new(CpuVariant::I8086);
    cpu.regs.set_seg(SegReg::Ss, 0x2000);
    cpu.regs.set16(Reg16::Sp, 0x0100);
    cpu.flags.cf = true;
    cpu.flags.zf = true;
    cpu.flags.sf = false;
    cpu.flags.of = true;
    let before = cpu.flags.to_word(cpu.variant);

    // PUSHF; POPF
    load_code(&mut env, &cpu, &[0x9C, 0x9D]);
    env.run(&mut cpu, 3 + 3);

    assert_eq!(cpu.flags.to_word(cpu.variant), before);
    assert_eq!(cpu.regs.get16(Reg16::Sp), 0x0100, "SP must return to its starting value");
}

#[test]
fn push_pop_register_round_trips_value_and_sp() {
    let mut env = Env::new();
    let mut cpu = Cpu::new(CpuVariant::I8086);
    cpu.regs.set_seg(SegReg::Ss, 0x2000);
    cpu.regs.set16(Reg16::Sp, 0x0100);
    cpu.regs.set16(Reg16::Bx, 0xBEEF);

    // PUSH BX; POP CX
    load_code(&mut env, &cpu, &[0x53, 0x59]);
    env.run(&mut cpu, 3 + 3);

    assert_eq!(cpu.regs.get16(Reg16::Cx), 0xBEEF);
    assert_eq!(cpu.regs.get16(Reg16::Sp), 0x0100);
}

#[test]
fn rep_movsb_copies_exactly_cx_bytes_and_honors_df() {
    let mut env = Env::new();
    let mut cpu = Cpu::new(CpuVariant::I8086);
    cpu.regs.set_seg(SegReg::Ds, 0x0000);
    cpu.regs.set_seg(SegReg::Es, 0x0000);
    cpu.regs.set16(Reg16::Si, 0x0FFE);
    cpu.regs.set16(Reg16::Di, 0x8000);
    cpu.regs.set16(Reg16::Cx, 4);
    cpu.flags.df = false;

    for (i, b) in [0xAAu8, 0xBB, 0xCC, 0xDD].iter().enumerate() {
        env.mem.load_image(0x0FFE + i, &[*b]);
    }

    // REP MOVSB
    load_code(&mut env, &cpu, &[0xF3, 0xA4]);
    env.run(&mut cpu, 4 * 3);

    assert_eq!(cpu.regs.get16(Reg16::Cx), 0, "CX must be 0 once REP completes");
    assert_eq!(cpu.regs.get16(Reg16::Si), 0x0FFE + 4);
    assert_eq!(cpu.regs.get16(Reg16::Di), 0x8000 + 4);
    let dst = env.mem.raw();
    assert_eq!(&dst[0x8000..0x8004], &[0xAA, 0xBB, 0xCC, 0xDD]);
}

#[test]
fn rep_outsb_insb_round_trip_through_a_port() {
    let mut env = Env::new();
    let mut cpu = Cpu::new(CpuVariant::I80186);
    cpu.regs.set_seg(SegReg::Ds, 0x0000);
    cpu.regs.set_seg(SegReg::Es, 0x0000);
    cpu.regs.set16(Reg16::Si, 0x2000);
    cpu.regs.set16(Reg16::Di, 0x3000);
    cpu.regs.set16(Reg16::Dx, 0x3FF); // serial mouse scratch register: plain read/write loopback
    cpu.regs.set16(Reg16::Cx, 3);
    cpu.flags.df = false;
    cpu.flags.zf = false; // must not matter: OUTS/INS repeat unconditionally on CX

    env.mem.load_image(0x2000, &[0x11, 0x22, 0x33]);

    // REP OUTSB
    load_code(&mut env, &cpu, &[0xF3, 0x6E]);
    env.run(&mut cpu, 3 * 3);
    assert_eq!(cpu.regs.get16(Reg16::Cx), 0);
    assert_eq!(cpu.regs.get16(Reg16::Si), 0x2000 + 3);
    assert_eq!(env.mouse.read(0x3FF), 0x33, "scratch register holds the last byte written");

    cpu.regs.ip = 0;
    cpu.regs.set16(Reg16::Cx, 1);
    // INSB
    load_code(&mut env, &cpu, &[0x6C]);
    env.run(&mut cpu, 3);
    let dst = env.mem.raw();
    assert_eq!(dst[0x3000], 0x33);
}

#[test]
fn ins_outs_fall_through_to_undefined_opcode_on_8086() {
    let mut env = Env::new();
    let mut cpu = Cpu::new(CpuVariant::I8086);
    cpu.regs.set_seg(SegReg::Es, 0x0000);
    cpu.regs.set16(Reg16::Di, 0x3000);
    cpu.regs.set16(Reg16::Dx, 0x3FF);
    env.mem.raw_mut()[0x3000] = 0x99;

    // OUTSB: undefined on the original 8086, so it must be a logged no-op.
    load_code(&mut env, &cpu, &[0x6E]);
    env.run(&mut cpu, 2);
    assert_eq!(env.mem.raw()[0x3000], 0x99, "undefined opcode must not touch memory");
}

#[test]
fn div_by_zero_raises_int0_and_leaves_ax_unchanged() {
    let mut env = Env::new();
    let mut cpu = Cpu::new(CpuVariant::I8086);
    cpu.regs.set_seg(SegReg::Ss, 0x2000);
    cpu.regs.set16(Reg16::Sp, 0x0100);
    cpu.regs.set16(Reg16::Ax, 0x1234);
    cpu.regs.set8(Reg8::Bl, 0);

    // DIV BL (0xF6 /6, mod=11 reg=110 rm=011 -> 0xF3)
    load_code(&mut env, &cpu, &[0xF6, 0xF3]);
    env.run(&mut cpu, 80);

    assert_eq!(cpu.regs.get16(Reg16::Ax), 0x1234, "AX must be untouched on DIV-by-zero");
    // FLAGS/CS/IP were pushed by the INT 0 vector dispatch.
    assert_eq!(cpu.regs.get16(Reg16::Sp), 0x0100 - 6);
}

#[test]
fn physical_address_wraps_at_1mib_on_8086() {
    assert_eq!(linear_address(0xFFFF, 0x0010), 0x00000);
}

#[test]
fn pit_mode3_channel0_raises_one_irq0_per_reload_period() {
    let mut pic = Pic::new();
    let mut pit = Pit::new();

    const RELOAD: u16 = 10;
    // Channel 0, access lo/hi, mode 3 (square wave), binary.
    pit.write(0x43, 0b00_11_011_0);
    pit.write(0x40, (RELOAD & 0xff) as u8);
    pit.write(0x40, (RELOAD >> 8) as u8);

    let periods = 5u64;
    let mut assertions = 0u32;
    for _ in 0..(periods * RELOAD as u64) {
        pit.tick(1, PIT_HZ, &mut pic);
        if pic.next_interrupt() == Some(0) {
            assertions += 1;
        }
    }
    assert_eq!(assertions, periods as u32);
}
