//! Machine error taxonomy.
//!
//! Everything here is fatal from the CLI's point of view: reported to
//! stderr and mapped to exit code 1. Soft decode failures (unknown DD/FD/ED
//! sequences, ROM writes, unmapped ports) never surface as errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpectrumError {
    #[error("can't open file {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ROM image must be 16384 bytes, got {0}")]
    BadRomSize(usize),

    #[error("unsupported SNA snapshot size {0}")]
    BadSnaSize(usize),

    #[error("128K+ SNA snapshots (147487 bytes) are not supported")]
    SnaPlusUnsupported,

    #[error("Z80 snapshot is truncated at offset {0}")]
    Z80Truncated(usize),

    #[error("Z80 snapshot hardware mode {0} is not a 48K/128K machine")]
    Z80BadHardwareMode(u8),

    #[error("Z80 snapshot references bank {bank} under hardware mode {mode}")]
    Z80BadBank { bank: u8, mode: u8 },

    #[error("TAP file does not start with a BASIC program header")]
    TapNoBasicHeader,

    #[error("write failed: {0}")]
    Write(#[from] io::Error),

    #[error("WAV capture: {0}")]
    Wav(#[from] hound::Error),
}
