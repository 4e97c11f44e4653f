//! ZX Spectrum 128K emulator.
//!
//! The core advances one 50 Hz PAL frame at a time: the Z80 runs
//! instruction by instruction while the ULA beam, the AY-3-8910, and the
//! 44.1 kHz audio resampler track it at T-state granularity. Snapshots
//! load from .sna, .z80, and TAP (BASIC fast path).

pub mod audio;
mod bus;
pub mod capture;
mod config;
mod error;
mod keyboard;
mod memory;
mod palette;
pub mod snapshot;
pub mod tap;
mod video;

mod spectrum;

pub use bus::SpectrumBus;
pub use config::{RomSet, SpectrumConfig};
pub use error::SpectrumError;
pub use keyboard::KeyboardState;
pub use memory::Memory;
pub use palette::PALETTE;
pub use snapshot::{load_bin, load_sna, load_z80, save_sna, save_z80};
pub use spectrum::{FrameOutcome, Spectrum, T_PER_FRAME};
pub use tap::load_tap;
pub use video::{Video, FB_HEIGHT, FB_WIDTH};
