//! Machine-level integration tests: CPU, paging, ports, video, and
//! snapshots working together.

use spectrum::{
    load_bin, load_sna, load_z80, save_sna, save_z80, FrameOutcome, RomSet, Spectrum,
    SpectrumConfig, T_PER_FRAME,
};

fn make_spectrum() -> Spectrum {
    Spectrum::new(&SpectrumConfig::with_roms(RomSet::blank()))
}

/// Machine with a program in the 48K ROM slot (mapped at boot).
fn make_spectrum_with_rom(code: &[u8]) -> Spectrum {
    let mut roms = RomSet::blank();
    roms.banks[1][..code.len()].copy_from_slice(code);
    Spectrum::new(&SpectrumConfig::with_roms(roms))
}

#[test]
fn program_in_ram_runs_across_a_frame() {
    let mut spec = make_spectrum();
    // LD A, 0x2A; LD (0xC000), A; DI; HALT
    load_bin(&mut spec, 0x8000, &[0x3E, 0x2A, 0x32, 0x00, 0xC0, 0xF3, 0x76]);
    spec.cpu.regs.pc = 0x8000;

    assert_eq!(spec.step_frame(), FrameOutcome::Continue);
    // Bank 0 is paged at 0xC000 at boot (7FFD = 0x10).
    assert_eq!(spec.bus.memory.bank(0)[0], 0x2A);
    assert_eq!(spec.t_states_total(), u64::from(T_PER_FRAME));
}

#[test]
fn paging_program_writes_to_two_banks() {
    let mut spec = make_spectrum();
    // Select bank 1, write a marker, select bank 3, write another.
    load_bin(
        &mut spec,
        0x8000,
        &[
            0x01, 0xFD, 0x7F, // LD BC, 0x7FFD
            0x3E, 0x11, // LD A, 0x11 (bank 1, 48K ROM kept via bit 4)
            0xED, 0x79, // OUT (C), A
            0x3E, 0xAB, // LD A, 0xAB
            0x32, 0x00, 0xC0, // LD (0xC000), A
            0x3E, 0x13, // LD A, 0x13 (bank 3)
            0xED, 0x79, // OUT (C), A
            0x3E, 0xCD, // LD A, 0xCD
            0x32, 0x00, 0xC0, // LD (0xC000), A
            0xF3, 0x76, // DI; HALT
        ],
    );
    spec.cpu.regs.pc = 0x8000;
    spec.step_frame();

    assert_eq!(spec.bus.memory.bank(1)[0], 0xAB);
    assert_eq!(spec.bus.memory.bank(3)[0], 0xCD);
}

#[test]
fn keyboard_visible_to_in_instruction() {
    let mut spec = make_spectrum();
    // LD BC, 0x7FFE (scan row 7); IN A, (C); LD (0x8000), A; DI; HALT
    load_bin(
        &mut spec,
        0x9000,
        &[0x01, 0xFE, 0x7F, 0xED, 0x78, 0x32, 0x00, 0x80, 0xF3, 0x76],
    );
    spec.cpu.regs.pc = 0x9000;
    spec.key(7, 0x01, true); // hold SPACE

    spec.step_frame();
    assert_eq!(spec.bus.memory.bank(2)[0] & 0x01, 0x00, "SPACE reads low");
}

#[test]
fn trdos_trap_engages_when_executing_page_3d() {
    // TR-DOS ROM: page 0x3Dxx holds a JP 0x8000.
    let mut roms = RomSet::blank();
    roms.trdos[0x3D00] = 0xC3; // JP 0x8000
    roms.trdos[0x3D01] = 0x00;
    roms.trdos[0x3D02] = 0x80;
    let mut spec = Spectrum::new(&SpectrumConfig::with_roms(roms));
    load_bin(&mut spec, 0x8000, &[0xF3, 0x76]); // DI; HALT

    spec.cpu.regs.pc = 0x3D00;
    spec.step_frame();

    // The trap paged TR-DOS in for the fetch at 0x3D00, then cleared when
    // PC left the ROM window.
    assert!(!spec.bus.memory.trdos_latch());
    assert!(spec.cpu.halted, "reached the RAM stub via the TR-DOS ROM");
}

#[test]
fn sna_128k_pop_af_reads_the_first_image_bytes() {
    // Build a 128K SNA with bank 7 paged and known bytes at the start of
    // the 48K image (file offsets 27 and 28 = address 0x4000).
    let mut source = make_spectrum();
    source.cpu.regs.sp = 0xFF50;
    source.cpu.regs.pc = 0x9000;
    source.bus.memory.set_7ffd(0x07);
    source.bus.memory.bank_mut(5)[0] = 0x34; // F
    source.bus.memory.bank_mut(5)[1] = 0x12; // A
    let image = save_sna(&source);

    let mut spec = make_spectrum();
    load_sna(&mut spec, &image).unwrap();
    assert_eq!(spec.bus.memory.port_7ffd(), 0x07);
    assert_eq!(spec.cpu.regs.pc, 0x9000);

    // POP AF with SP pointed at 0x4000.
    load_bin(&mut spec, 0x9000, &[0x31, 0x00, 0x40, 0xF1, 0xF3, 0x76]);
    spec.step_frame();
    assert_eq!(spec.cpu.regs.af(), 0x1234);
}

#[test]
fn snapshot_survives_emulation_round_trip() {
    // Run a program, snapshot, run garbage, restore, verify state returns.
    let mut spec = make_spectrum();
    load_bin(&mut spec, 0x8000, &[0x3E, 0x5A, 0x06, 0x17, 0xF3, 0x76]);
    spec.cpu.regs.pc = 0x8000;
    spec.step_frame();
    assert_eq!(spec.cpu.regs.a, 0x5A);
    assert_eq!(spec.cpu.regs.b, 0x17);

    let image = save_sna(&spec);

    let mut restored = make_spectrum();
    load_sna(&mut restored, &image).unwrap();
    assert_eq!(restored.cpu.regs.a, 0x5A);
    assert_eq!(restored.cpu.regs.b, 0x17);
    // The program is still there.
    assert_eq!(restored.bus.memory.bank(2)[0], 0x3E);
}

#[test]
fn z80_v1_snapshot_of_a_live_machine_round_trips() {
    let mut spec = make_spectrum();
    load_bin(&mut spec, 0x8000, &[0x3E, 0x77, 0xF3, 0x76]);
    spec.cpu.regs.pc = 0x8000;
    spec.step_frame();

    let image = save_z80(&spec);
    let mut restored = make_spectrum();
    load_z80(&mut restored, &image).unwrap();

    assert_eq!(restored.cpu.regs.a, 0x77);
    assert_eq!(restored.cpu.regs.pc, spec.cpu.regs.pc);
    assert_eq!(restored.bus.memory.bank(2)[0], 0x3E);
    assert_eq!(restored.bus.memory.bank(0), spec.bus.memory.bank(0));
}

#[test]
fn border_program_paints_full_border() {
    // Set a green border from ROM and spin.
    let mut spec = make_spectrum_with_rom(&[0x3E, 0x04, 0xD3, 0xFE, 0xF3, 0x76]);
    spec.step_frame();

    // Corners of the framebuffer are border; paper area is not.
    assert_eq!(spec.video.pixel(0, 0), 4);
    assert_eq!(spec.video.pixel(319, 0), 4);
    assert_eq!(spec.video.pixel(0, 239), 4);
    assert_eq!(spec.video.pixel(319, 239), 4);
    assert_eq!(spec.video.pixel(160, 120), 0, "paper stays paper");
}

#[test]
fn screen_write_shows_up_in_framebuffer() {
    let mut spec = make_spectrum();
    // Solid ink line at the top-left cell: bitmap 0xFF, attr ink 6.
    load_bin(
        &mut spec,
        0x8000,
        &[
            0x3E, 0xFF, // LD A, 0xFF
            0x32, 0x00, 0x40, // LD (0x4000), A
            0x3E, 0x06, // LD A, 6
            0x32, 0x00, 0x58, // LD (0x5800), A
            0xF3, 0x76, // DI; HALT
        ],
    );
    spec.cpu.regs.pc = 0x8000;
    spec.step_frame();

    for x in 0..8 {
        assert_eq!(spec.video.pixel(32 + x, 24), 6, "ink pixel {x}");
    }
}

#[test]
fn im2_program_takes_the_frame_interrupt() {
    let mut spec = make_spectrum();
    // Vector table at 0x8Fxx: I = 0x8F, bus byte 0xFF -> pointer at 0x8FFF.
    load_bin(&mut spec, 0x8FFF, &[0x00, 0x91]); // handler at 0x9100
    // Handler: increments (0xC000), EI, HALT again.
    load_bin(&mut spec, 0x9100, &[0x21, 0x00, 0xC0, 0x34, 0xFB, 0x76]);
    // Main: set I, IM 2, EI, HALT.
    load_bin(
        &mut spec,
        0x8000,
        &[
            0x3E, 0x8F, // LD A, 0x8F
            0xED, 0x47, // LD I, A
            0xED, 0x5E, // IM 2
            0x31, 0x00, 0x7F, // LD SP, 0x7F00
            0xFB, 0x76, // EI; HALT
        ],
    );
    spec.cpu.regs.pc = 0x8000;

    spec.step_frame();
    assert_eq!(spec.bus.memory.bank(0)[0], 1, "handler ran once");
}

#[test]
fn halted_machine_emits_full_audio_frames() {
    let mut spec = make_spectrum_with_rom(&[0xF3, 0x76]);
    for _ in 0..3 {
        spec.step_frame();
        assert!(spec.frame_samples().len() >= 2 * 881);
    }
}
