//! Command-line grammar.
//!
//! The original took single-dash flags (`-fd0`, `-boot`, ...) via a
//! hand-rolled table; `clap`'s derive macro gives the same surface the
//! idiomatic way, as double-dash long options, which is what every other
//! Rust CLI in this corpus does.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "pcxt86", version, about = "Cycle-budgeted IBM PC/XT-class emulation core")]
pub struct Cli {
    /// BIOS ROM image, placed so its last byte lands at 0xFFFFF.
    #[arg(long)]
    pub bios: PathBuf,

    /// ROM BASIC image, loaded at F6000 if the BIOS is small enough to
    /// leave that window free.
    #[arg(long)]
    pub basic: Option<PathBuf>,

    /// Video BIOS image, loaded at C0000.
    #[arg(long = "video-bios")]
    pub video_bios: Option<PathBuf>,

    /// Floppy disk image for slot 0. Pass `*` for a blank memory-backed
    /// scratch disk instead of a file path.
    #[arg(long)]
    pub fd0: Option<String>,
    #[arg(long)]
    pub fd1: Option<String>,
    #[arg(long)]
    pub fd2: Option<String>,
    #[arg(long)]
    pub fd3: Option<String>,

    /// Hard disk image for slot 0.
    #[arg(long)]
    pub hd0: Option<String>,
    #[arg(long)]
    pub hd1: Option<String>,
    #[arg(long)]
    pub hd2: Option<String>,
    #[arg(long)]
    pub hd3: Option<String>,

    /// BIOS drive ID to boot from, or `rom` to force ROM BASIC.
    #[arg(long)]
    pub boot: Option<String>,

    /// Run with no window, driving the scheduler loop without a display.
    #[arg(long)]
    pub headless: bool,

    /// Disable the audio event ring.
    #[arg(long)]
    pub nosound: bool,

    /// Start in fullscreen (ignored under `--headless`).
    #[arg(long)]
    pub fullscreen: bool,

    /// Number of rendered frames to skip between presented ones.
    #[arg(long, default_value_t = 0)]
    pub frameskip: u32,

    /// Boot a raw `.com` program at 0x01100 instead of a disk image.
    #[arg(long)]
    pub com: Option<PathBuf>,

    /// Suppress log output entirely (overrides `RUST_LOG`).
    #[arg(long)]
    pub quiet: bool,

    /// Number of CPU cycles to run before exiting, for headless/scripted
    /// use (0 means run until shutdown is requested).
    #[arg(long, default_value_t = 0)]
    pub run_cycles: u64,
}

impl Cli {
    /// The `(slot, path-or-"*")` pairs for every floppy flag that was set,
    /// in slot order.
    pub fn floppies(&self) -> Vec<(u8, &str)> {
        [(0u8, &self.fd0), (1, &self.fd1), (2, &self.fd2), (3, &self.fd3)]
            .into_iter()
            .filter_map(|(slot, path)| path.as_deref().map(|p| (slot, p)))
            .collect()
    }

    pub fn hard_disks(&self) -> Vec<(u8, &str)> {
        [(0u8, &self.hd0), (1, &self.hd1), (2, &self.hd2), (3, &self.hd3)]
            .into_iter()
            .filter_map(|(slot, path)| path.as_deref().map(|p| (slot, p)))
            .collect()
    }

    /// Parses `--boot`: `rom` forces ROM BASIC (drive ID 255, matching the
    /// original's sentinel), a bare number is the BIOS drive ID.
    pub fn boot_drive(&self) -> Option<u8> {
        match self.boot.as_deref() {
            None => None,
            Some("rom") => Some(0xFF),
            Some(n) => n.parse().ok(),
        }
    }
}
