//! Machine configuration.

/// ROM images the machine boots with.
///
/// Bank 0 is the 128K editor ROM, bank 1 the 48K BASIC ROM; banks 2 and 3
/// are spare slots kept for ROM experiments. The TR-DOS ROM sits outside
/// the numbered banks and is paged in by the 0x3Dxx trap.
pub struct RomSet {
    pub banks: [Vec<u8>; 4],
    pub trdos: Vec<u8>,
}

impl RomSet {
    /// An all-zero ROM set, useful for tests that run code from RAM.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            banks: std::array::from_fn(|_| vec![0; 0x4000]),
            trdos: vec![0; 0x4000],
        }
    }
}

/// Runtime options that shape a machine instance.
pub struct SpectrumConfig {
    pub roms: RomSet,
    /// Fold the AY stereo pair to mono.
    pub mono: bool,
    /// Run the RUN + ENTER key macro over the first frames.
    pub autostart: bool,
    /// Press SPACE at frame 25 and release it at 26.
    pub auto_space: bool,
    /// Dump CPU state and stop when the opcode at PC is HALT.
    pub halt_dump: bool,
}

impl SpectrumConfig {
    #[must_use]
    pub fn with_roms(roms: RomSet) -> Self {
        Self {
            roms,
            mono: false,
            autostart: false,
            auto_space: false,
            halt_dump: false,
        }
    }
}
