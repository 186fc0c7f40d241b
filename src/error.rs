use std::path::PathBuf;

use thiserror::Error;

/// Host-visible errors: configuration problems and host I/O failures.
///
/// Guest-visible architectural faults (divide error, invalid opcode, BOUND)
/// are never represented here — they are injected as CPU vectors instead.
/// Invariant violations are `panic!`, not `Result`.
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("BIOS ROM not found at {0}")]
    MissingBios(PathBuf),

    #[error("BIOS ROM at {path} is {size} bytes, which does not fit below 0x100000")]
    BiosTooLarge { path: PathBuf, size: usize },

    #[error("could not read ROM image {path}: {source}")]
    RomRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("disk image {path} could not be opened: {source}")]
    DiskOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("disk image {0} has a size that does not correspond to a known floppy geometry and is too small for a hard disk")]
    UnknownGeometry(PathBuf),

    #[error("I/O error on drive {drive}: {source}")]
    DiskIo {
        drive: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot file is truncated or has an incompatible layout")]
    BadSnapshot,

    #[error("invalid CLI configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
