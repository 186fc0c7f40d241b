//! i8253 programmable interval timer.
//!
//! Grounded on `examples/original_source/src/fake86/i8253.c`: three
//! channels sharing a 1.193182 MHz clock, reload/latch toggling per
//! read/load-access mode, and modes 0/2/3 implemented as cycle-accumulating
//! countdown state machines. Modes 1/4/5 are stubs.

use tracing::trace;

use crate::error::Result;
use crate::pic::Pic;
use crate::snapshot::{Reader, Writer};

pub const PIT_HZ: u64 = 1_193_182;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessMode {
    Latch,
    LoByte,
    HiByte,
    /// Lo-then-hi: `toggle` tracks which half is next.
    Toggle,
}

impl AccessMode {
    fn tag(self) -> u8 {
        match self {
            AccessMode::Latch => 0,
            AccessMode::LoByte => 1,
            AccessMode::HiByte => 2,
            AccessMode::Toggle => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(AccessMode::Latch),
            1 => Ok(AccessMode::LoByte),
            2 => Ok(AccessMode::HiByte),
            3 => Ok(AccessMode::Toggle),
            _ => Err(crate::error::EmulatorError::BadSnapshot),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    InterruptOnTerminalCount,
    OneShot,
    RateGenerator,
    SquareWave,
    SoftwareStrobe,
    HardwareStrobe,
}

impl OpMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => OpMode::InterruptOnTerminalCount,
            1 => OpMode::OneShot,
            2 | 6 => OpMode::RateGenerator,
            3 | 7 => OpMode::SquareWave,
            4 => OpMode::SoftwareStrobe,
            _ => OpMode::HardwareStrobe,
        }
    }

    fn tag(self) -> u8 {
        match self {
            OpMode::InterruptOnTerminalCount => 0,
            OpMode::OneShot => 1,
            OpMode::RateGenerator => 2,
            OpMode::SquareWave => 3,
            OpMode::SoftwareStrobe => 4,
            OpMode::HardwareStrobe => 5,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(OpMode::InterruptOnTerminalCount),
            1 => Ok(OpMode::OneShot),
            2 => Ok(OpMode::RateGenerator),
            3 => Ok(OpMode::SquareWave),
            4 => Ok(OpMode::SoftwareStrobe),
            5 => Ok(OpMode::HardwareStrobe),
            _ => Err(crate::error::EmulatorError::BadSnapshot),
        }
    }
}

#[derive(Debug)]
struct Channel {
    reload: u16,
    counter: u16,
    mode: OpMode,
    access: AccessMode,
    toggle_access: bool,
    bcd: bool,
    latched: Option<u16>,
    output: bool,
    /// Number of programming writes still needed before the channel starts
    /// counting again (mirrors `inhibit_count` in the original).
    inhibit: u8,
    frequency: u32,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            reload: 0,
            counter: 0,
            mode: OpMode::InterruptOnTerminalCount,
            access: AccessMode::LoByte,
            toggle_access: false,
            bcd: false,
            latched: None,
            output: false,
            inhibit: 1,
            frequency: 0,
        }
    }
}

impl Channel {
    fn reload_counter(&mut self) {
        self.counter = if self.reload == 0 { 0xFFFF } else { self.reload };
    }

    fn save_state(&self, w: &mut Writer) {
        w.u16(self.reload);
        w.u16(self.counter);
        w.u8(self.mode.tag());
        w.u8(self.access.tag());
        w.bool(self.toggle_access);
        w.bool(self.bcd);
        w.bool(self.latched.is_some());
        w.u16(self.latched.unwrap_or(0));
        w.bool(self.output);
        w.u8(self.inhibit);
        w.u32(self.frequency);
    }

    fn load_state(&mut self, r: &mut Reader) -> Result<()> {
        self.reload = r.u16()?;
        self.counter = r.u16()?;
        self.mode = OpMode::from_tag(r.u8()?)?;
        self.access = AccessMode::from_tag(r.u8()?)?;
        self.toggle_access = r.bool()?;
        self.bcd = r.bool()?;
        let has_latch = r.bool()?;
        let latched = r.u16()?;
        self.latched = has_latch.then_some(latched);
        self.output = r.bool()?;
        self.inhibit = r.u8()?;
        self.frequency = r.u32()?;
        Ok(())
    }
}

#[derive(Default)]
pub struct Pit {
    channels: [Channel; 3],
    /// Fractional CPU-cycle residual carried across slices so the
    /// cpu-clock-to-1.193182 MHz conversion has no drift bias.
    residual_cpu_cycles: u64,
}

impl Pit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, port: u16) -> u8 {
        let channel = (port & 0x03) as usize;
        if channel == 3 {
            return 0;
        }
        let c = &mut self.channels[channel];
        let out = match c.access {
            AccessMode::Latch => {
                let latched = c.latched.unwrap_or(c.counter);
                let lo = (latched & 0xff) as u8;
                c.latched = Some(latched >> 8);
                lo
            }
            AccessMode::LoByte => (c.counter & 0xff) as u8,
            AccessMode::HiByte => (c.counter >> 8) as u8,
            AccessMode::Toggle => unreachable!("toggle resolves to Lo/Hi before reaching read"),
        };
        if c.toggle_access {
            c.access = if c.access == AccessMode::LoByte { AccessMode::HiByte } else { AccessMode::LoByte };
        }
        out
    }

    pub fn write(&mut self, port: u16, value: u8) {
        let port = port & 0x03;
        if port == 3 {
            self.write_mode(value);
            return;
        }
        let channel = port as usize;
        let c = &mut self.channels[channel];
        if c.inhibit > 0 {
            c.inhibit -= 1;
        }
        match c.access {
            AccessMode::LoByte => c.reload = (c.reload & 0xff00) | value as u16,
            AccessMode::HiByte => c.reload = (c.reload & 0x00ff) | ((value as u16) << 8),
            AccessMode::Latch => { /* a data write while latched is not meaningful */ }
            AccessMode::Toggle => unreachable!(),
        }
        if c.toggle_access {
            c.access = if c.access == AccessMode::LoByte { AccessMode::HiByte } else { AccessMode::LoByte };
        }
        c.reload_counter();
        let divisor = if c.reload == 0 { 0xFFFF } else { c.reload };
        c.frequency = (PIT_HZ / divisor as u64) as u32;
        trace!(target: "pcxt86::pit", channel, reload = c.reload, freq = c.frequency, "reload written");
        if matches!(c.mode, OpMode::InterruptOnTerminalCount | OpMode::RateGenerator | OpMode::SquareWave) {
            c.output = c.inhibit == 0 && c.output;
        }
    }

    fn write_mode(&mut self, value: u8) {
        let select = (value >> 6) & 0x03;
        if select == 3 {
            return; // read-back command, not modeled (illegal select for mode write)
        }
        let rl = (value >> 4) & 0x03;
        let mode = OpMode::from_bits(value >> 1);
        let bcd = value & 1 != 0;
        let c = &mut self.channels[select as usize];

        if rl == 0 {
            // Counter-latch command: snapshot the current count, access mode
            // untouched.
            c.latched = Some(c.counter);
            c.access = AccessMode::Latch;
            return;
        }

        c.output = false;
        c.toggle_access = rl == 3;
        c.bcd = bcd;
        c.access = if c.toggle_access { AccessMode::LoByte } else if rl == 1 { AccessMode::LoByte } else { AccessMode::HiByte };
        c.mode = mode;
        c.inhibit = if c.toggle_access { 2 } else { 1 };
    }

    /// Effective output frequency in Hz for the given channel (0-2). Used to
    /// drive the speaker/FM audio event stream (channel 2).
    pub fn channel_frequency(&self, channel: usize) -> u32 {
        self.channels[channel].frequency
    }

    pub fn channel2_output(&self) -> bool {
        self.channels[2].output
    }

    /// Converts a CPU cycle budget into PIT ticks and advances all three
    /// channels, raising IRQ0 on channel 0 as its mode dictates.
    pub fn tick(&mut self, cpu_cycles: u64, cpu_hz: u64, pic: &mut Pic) {
        let total = cpu_cycles * PIT_HZ + self.residual_cpu_cycles;
        let pit_cycles = (total / cpu_hz) as u32;
        self.residual_cpu_cycles = total % cpu_hz;
        if pit_cycles == 0 {
            return;
        }
        for idx in 0..3 {
            self.tick_channel(idx, pit_cycles, pic);
        }
    }

    fn tick_channel(&mut self, idx: usize, cycles: u32, pic: &mut Pic) {
        let is_chan0 = idx == 0;
        let c = &mut self.channels[idx];
        if c.inhibit > 0 {
            return;
        }
        match c.mode {
            OpMode::InterruptOnTerminalCount => {
                if cycles as u32 >= c.counter as u32 {
                    if is_chan0 && !c.output {
                        c.output = true;
                        if is_chan0 {
                            pic.raise(0);
                        }
                    }
                    c.counter = 0;
                } else {
                    c.counter -= cycles as u16;
                }
            }
            OpMode::RateGenerator => {
                let mut remaining = cycles;
                while remaining > 0 {
                    if remaining as u32 >= c.counter as u32 {
                        remaining -= c.counter as u32;
                        if is_chan0 {
                            pic.raise(0);
                        }
                        c.reload_counter();
                    } else {
                        c.counter -= remaining as u16;
                        remaining = 0;
                    }
                }
                c.output = c.counter <= 2;
            }
            OpMode::SquareWave => {
                let mut remaining = cycles.saturating_mul(2);
                while remaining > 0 {
                    if remaining as u32 >= c.counter as u32 {
                        remaining -= c.counter as u32;
                        c.reload_counter();
                        if is_chan0 && !c.output {
                            pic.raise(0);
                        }
                        c.output = !c.output;
                    } else {
                        c.counter -= remaining as u16;
                        remaining = 0;
                    }
                }
            }
            OpMode::OneShot | OpMode::SoftwareStrobe | OpMode::HardwareStrobe => {
                // Not modeled: no PC/XT peripheral drives these modes.
            }
        }
    }

    /// Cycles (in CPU clocks) until channel 0 would next raise IRQ0, used by
    /// the outer loop to cap the CPU slice.
    pub fn cycles_until_next_irq0(&self, cpu_hz: u64) -> u64 {
        let c = &self.channels[0];
        if c.inhibit > 0 {
            return u64::MAX;
        }
        let pit_cycles_remaining: u64 = match c.mode {
            OpMode::InterruptOnTerminalCount => c.counter as u64,
            OpMode::RateGenerator => c.counter as u64,
            OpMode::SquareWave => (c.counter as u64).div_ceil(2),
            _ => return u64::MAX,
        };
        // Inverse of the cpu->pit conversion in `tick`, biased to never
        // under-shoot (the outer loop must not run past the due cycle).
        (pit_cycles_remaining * cpu_hz).div_ceil(PIT_HZ).max(1)
    }

    pub(crate) fn save_state(&self, w: &mut Writer) {
        for c in &self.channels {
            c.save_state(w);
        }
        w.u64(self.residual_cpu_cycles);
    }

    pub(crate) fn load_state(&mut self, r: &mut Reader) -> Result<()> {
        for c in self.channels.iter_mut() {
            c.load_state(r)?;
        }
        self.residual_cpu_cycles = r.u64()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU_HZ: u64 = 4_772_727;

    fn program_mode3(pit: &mut Pit, reload: u16) {
        pit.write(0x43, 0b0011_0110); // channel 0, lo/hi, mode 3, binary
        pit.write(0x40, (reload & 0xff) as u8);
        pit.write(0x40, (reload >> 8) as u8);
    }

    #[test]
    fn mode3_raises_irq0_once_per_period() {
        let mut pit = Pit::new();
        let mut pic = Pic::new();
        let reload = 0x04A9u16; // ~440 Hz
        program_mode3(&mut pit, reload);
        let mut irqs = 0u32;
        // Run for roughly one period worth of CPU cycles and count raises.
        let period_cpu_cycles = (reload as u64 * CPU_HZ) / PIT_HZ;
        for _ in 0..1000 {
            pic_raise_count(&mut pit, &mut pic, period_cpu_cycles / 1000, CPU_HZ, &mut irqs);
        }
        assert!((irqs as i64 - 1).abs() <= 1, "expected ~1 IRQ0 per period, got {irqs}");
    }

    fn pic_raise_count(pit: &mut Pit, pic: &mut Pic, cycles: u64, cpu_hz: u64, count: &mut u32) {
        let before = pic.irr_bits();
        pit.tick(cycles, cpu_hz, pic);
        let after = pic.irr_bits();
        if after != before && (after & 1) != 0 {
            *count += 1;
            pic.next_interrupt();
        }
    }

    #[test]
    fn mode0_raises_irq0_exactly_once() {
        let mut pit = Pit::new();
        let mut pic = Pic::new();
        pit.write(0x43, 0b0011_0000); // channel 0, lo/hi, mode 0
        pit.write(0x40, 0x10);
        pit.write(0x40, 0x00);
        pit.tick(1000, CPU_HZ, &mut pic);
        assert!(pic.is_pending());
        pic.next_interrupt();
        pit.tick(1000, CPU_HZ, &mut pic);
        assert!(!pic.is_pending());
    }
}
