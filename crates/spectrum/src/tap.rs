//! TAP fast loading: the BASIC-header shortcut.
//!
//! Instead of replaying tape edges, the loader copies the first BASIC
//! program block straight into the program area at 0x5CCB and patches the
//! system variables so the interpreter sees a freshly LOADed one-liner
//! ready for RUN.

#![allow(clippy::cast_possible_truncation)]

use log::info;

use crate::error::SpectrumError;
use crate::Spectrum;

/// Start of the BASIC program area.
const PROG: u16 = 0x5CCB;

// System variables patched after the copy.
const VARS: u16 = 0x5C4B;
const NXTLIN: u16 = 0x5C55;
const E_LINE: u16 = 0x5C59;
const K_CUR: u16 = 0x5C5B;
const CH_ADD: u16 = 0x5C5D;
const WORKSP: u16 = 0x5C61;
const STKBOT: u16 = 0x5C63;
const STKEND: u16 = 0x5C65;

/// Inject the first BASIC program of a TAP file.
pub fn load_tap(spectrum: &mut Spectrum, data: &[u8]) -> Result<(), SpectrumError> {
    // Offset 0x17 is the flag byte of the first data block; 0xFF marks a
    // program body following a BASIC header.
    if data.len() < 0x18 || data[0x17] != 0xFF {
        return Err(SpectrumError::TapNoBasicHeader);
    }

    let bsize = (usize::from(data[0x15]) | (usize::from(data[0x16]) << 8))
        .saturating_sub(2);
    if data.len() < 0x18 + bsize {
        return Err(SpectrumError::TapNoBasicHeader);
    }

    for (i, &byte) in data[0x18..0x18 + bsize].iter().enumerate() {
        spectrum.bus.memory.write_48k(PROG + i as u16, byte);
    }

    // Terminate the program and line up the editor state behind it.
    let endp = PROG + bsize as u16;
    put_word(spectrum, endp, 0x0D80);
    put_word(spectrum, endp + 2, 0x2280);
    put_word(spectrum, endp + 4, 0x800D);

    let mut next = endp;
    put_word(spectrum, VARS, next);
    next += 1;
    put_word(spectrum, E_LINE, next);
    put_word(spectrum, K_CUR, next);
    next += 2;
    put_word(spectrum, WORKSP, next);
    put_word(spectrum, STKBOT, next);
    put_word(spectrum, STKEND, next);
    next += 1;
    put_word(spectrum, CH_ADD, next);
    next += 1;
    put_word(spectrum, NXTLIN, next);

    info!("injected {bsize}-byte BASIC program from TAP");
    Ok(())
}

fn put_word(spectrum: &mut Spectrum, addr: u16, value: u16) {
    spectrum.bus.memory.write_48k(addr, value as u8);
    spectrum.bus.memory.write_48k(addr + 1, (value >> 8) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RomSet, SpectrumConfig};

    fn make_spectrum() -> Spectrum {
        Spectrum::new(&SpectrumConfig::with_roms(RomSet::blank()))
    }

    fn make_tap(program: &[u8]) -> Vec<u8> {
        // 19-byte BASIC header block, then the data block: 2-byte length
        // at 0x15, 0xFF flag at 0x17, program bytes, checksum.
        let block_len = (program.len() + 2) as u16;
        let mut data = vec![0u8; 0x18];
        data[0x15] = block_len as u8;
        data[0x16] = (block_len >> 8) as u8;
        data[0x17] = 0xFF;
        data.extend_from_slice(program);
        data.push(0x00); // checksum, unchecked
        data
    }

    #[test]
    fn rejects_non_basic_first_block() {
        let mut spec = make_spectrum();
        let mut tap = make_tap(&[1, 2, 3]);
        tap[0x17] = 0x00;
        assert!(matches!(
            load_tap(&mut spec, &tap),
            Err(SpectrumError::TapNoBasicHeader)
        ));
    }

    #[test]
    fn copies_program_to_0x5ccb() {
        let mut spec = make_spectrum();
        let program = [0x00, 0x0A, 0x02, 0x00, 0xF5, 0x0D]; // 10 PRINT
        load_tap(&mut spec, &make_tap(&program)).unwrap();

        for (i, &byte) in program.iter().enumerate() {
            assert_eq!(
                spec.bus.memory.read_48k(PROG + i as u16),
                byte,
                "byte {i}"
            );
        }
    }

    #[test]
    fn patches_system_variables() {
        let mut spec = make_spectrum();
        let program = [0u8; 16];
        load_tap(&mut spec, &make_tap(&program)).unwrap();

        let endp = PROG + 16;
        let read_word = |spec: &Spectrum, addr: u16| {
            u16::from(spec.bus.memory.read_48k(addr))
                | (u16::from(spec.bus.memory.read_48k(addr + 1)) << 8)
        };
        assert_eq!(read_word(&spec, VARS), endp);
        assert_eq!(read_word(&spec, E_LINE), endp + 1);
        assert_eq!(read_word(&spec, K_CUR), endp + 1);
        assert_eq!(read_word(&spec, WORKSP), endp + 3);
        assert_eq!(read_word(&spec, STKBOT), endp + 3);
        assert_eq!(read_word(&spec, STKEND), endp + 3);
        assert_eq!(read_word(&spec, CH_ADD), endp + 4);
        assert_eq!(read_word(&spec, NXTLIN), endp + 5);
    }
}
