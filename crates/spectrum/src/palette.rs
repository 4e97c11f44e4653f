//! The Spectrum's 16-colour palette.
//!
//! Eight base colours at 0xC0 intensity plus their BRIGHT variants at full
//! intensity; black appears twice. Index layout: `bright << 3 | colour`.

/// ARGB32 palette for the host surface.
pub const PALETTE: [u32; 16] = [
    0xFF00_0000, // 0: black
    0xFF00_00C0, // 1: blue
    0xFFC0_0000, // 2: red
    0xFFC0_00C0, // 3: magenta
    0xFF00_C000, // 4: green
    0xFF00_C0C0, // 5: cyan
    0xFFC0_C000, // 6: yellow
    0xFFC0_C0C0, // 7: white
    0xFF00_0000, // 8: black (bright)
    0xFF00_00FF, // 9: bright blue
    0xFFFF_0000, // 10: bright red
    0xFFFF_00FF, // 11: bright magenta
    0xFF00_FF00, // 12: bright green
    0xFF00_FFFF, // 13: bright cyan
    0xFFFF_FF00, // 14: bright yellow
    0xFFFF_FFFF, // 15: bright white
];

/// The same palette as BMP colour-table entries (BGRX byte order).
pub const BMP_PALETTE: [[u8; 4]; 16] = [
    [0x00, 0x00, 0x00, 0x00],
    [0xC0, 0x00, 0x00, 0x00],
    [0x00, 0x00, 0xC0, 0x00],
    [0xC0, 0x00, 0xC0, 0x00],
    [0x00, 0xC0, 0x00, 0x00],
    [0xC0, 0xC0, 0x00, 0x00],
    [0x00, 0xC0, 0xC0, 0x00],
    [0xC0, 0xC0, 0xC0, 0x00],
    [0x00, 0x00, 0x00, 0x00],
    [0xFF, 0x00, 0x00, 0x00],
    [0x00, 0x00, 0xFF, 0x00],
    [0xFF, 0x00, 0xFF, 0x00],
    [0x00, 0xFF, 0x00, 0x00],
    [0xFF, 0xFF, 0x00, 0x00],
    [0x00, 0xFF, 0xFF, 0x00],
    [0xFF, 0xFF, 0xFF, 0x00],
];
