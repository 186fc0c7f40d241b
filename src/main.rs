//! Headless entry point: parses the CLI, assembles a `Machine`, and drives
//! the scheduler loop. A graphical front end is outside this crate's scope;
//! this binary exists to exercise the emulation core end to end and for
//! scripted/headless use.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pcxt86::cli::Cli;
use pcxt86::cpu::variant::CpuVariant;
use pcxt86::machine::Machine;

/// Compile-time CPU variant selection: a different build target would pick
/// a different constant here.
const CPU_VARIANT: CpuVariant = CpuVariant::I8086;

const CYCLES_PER_FRAME: u64 = 79_545; // ~1/60th of CPU_HZ

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: "pcxt86::main", error = %err, "startup failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(quiet: bool) {
    if quiet {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: Cli) -> pcxt86::error::Result<()> {
    let mut machine = Machine::new(CPU_VARIANT, 0x00, 0x00);
    machine.set_audio_enabled(!cli.nosound);

    machine.load_bios(&cli.bios, cli.basic.as_deref())?;
    if let Some(video_bios) = cli.video_bios.as_deref() {
        machine.load_video_bios(video_bios)?;
    }

    let mut floppy_count = 0u8;
    for (slot, path) in cli.floppies() {
        if path == "*" {
            machine.insert_scratch_floppy(slot);
        } else {
            machine.insert_floppy(slot, path.as_ref())?;
        }
        floppy_count += 1;
    }
    for (slot, path) in cli.hard_disks() {
        machine.insert_hard_disk(slot, path.as_ref())?;
    }
    if let Some(drive) = cli.boot_drive() {
        machine.set_boot_drive(drive);
    }

    machine.finish_rom_setup(floppy_count);
    machine.reset();
    match cli.com.as_deref() {
        Some(com_path) => machine.load_com(com_path)?,
        None => machine.bootstrap(),
    }

    info!(target: "pcxt86::main", headless = cli.headless, "starting scheduler loop");

    if cli.run_cycles > 0 {
        let mut remaining = cli.run_cycles;
        while remaining > 0 && machine.is_running() {
            let spent = machine.run_slice(remaining.min(CYCLES_PER_FRAME));
            if spent == 0 {
                break;
            }
            remaining = remaining.saturating_sub(spent);
        }
    } else {
        while machine.is_running() {
            machine.run_frame(CYCLES_PER_FRAME);
        }
    }

    info!(target: "pcxt86::main", total_cycles = machine.total_cycles(), "scheduler loop exited");
    Ok(())
}
