//! Top-level Spectrum 128K machine and the frame scheduler.
//!
//! One call to [`Spectrum::step_frame`] advances a whole PAL frame:
//! the CPU runs instruction by instruction while the PPU beam, the AY
//! tick (every 32 T-states), the 44.1 kHz resampler, and the one
//! maskable interrupt per frame are interleaved at T-state granularity.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

use z80::{Bus, Z80};

use crate::audio::AudioRing;
use crate::bus::SpectrumBus;
use crate::config::SpectrumConfig;
use crate::memory::Memory;
use crate::video::Video;

/// T-states per frame (Pentagon timing).
pub const T_PER_FRAME: u32 = 71_680;
/// The frame interrupt fires once execution passes this T-state.
const IRQ_T_OFFSET: u32 = 304 * 224 + 8;
/// PPU beam geometry, in PPU columns (one per T-state) and rows.
const PPU_COLS: u32 = 224;
const PAPER_ROW_START: u32 = 64;
const PAPER_ROW_END: u32 = 256;
const PAPER_COL_START: u32 = 72;
const PAPER_COL_END: u32 = 200;
/// The beam becomes visible past this row/column.
const VISIBLE_ROW: u32 = 16;
const VISIBLE_COL: u32 = 48;

/// Resampler denominator: 44100 Hz against 50 frames of T-states.
const AUDIO_CYCLE: i64 = T_PER_FRAME as i64 * 50;

/// What `step_frame` asks of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    /// The HALT diagnostic tripped: state was dumped, stop the machine.
    Stop,
}

pub struct Spectrum {
    pub cpu: Z80,
    pub bus: SpectrumBus,
    pub video: Video,
    pub audio: AudioRing,

    /// This frame's samples, for the WAV capture path.
    frame_samples: Vec<u8>,

    /// T-states consumed within the current frame.
    t_states_cycle: u32,
    /// Lifetime T-state counter.
    t_states_total: u64,
    /// 44.1 kHz resampler accumulator.
    t_states_wav: i64,

    frame_counter: u32,
    /// Autostart macro step; 0 = inactive.
    autostart: u32,
    auto_space: bool,
    halt_dump: bool,
    mono: bool,
}

impl Spectrum {
    #[must_use]
    pub fn new(config: &SpectrumConfig) -> Self {
        Self {
            cpu: Z80::new(),
            bus: SpectrumBus::new(Memory::new(&config.roms)),
            video: Video::new(),
            audio: AudioRing::new(),
            frame_samples: Vec::with_capacity(crate::audio::FRAME_BYTES),
            t_states_cycle: 0,
            t_states_total: 0,
            t_states_wav: 0,
            frame_counter: 0,
            autostart: u32::from(config.autostart),
            auto_space: config.auto_space,
            halt_dump: config.halt_dump,
            mono: config.mono,
        }
    }

    #[must_use]
    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    #[must_use]
    pub fn t_states_total(&self) -> u64 {
        self.t_states_total
    }

    /// True while the RUN/ENTER startup macro is still typing.
    #[must_use]
    pub fn autostart_active(&self) -> bool {
        self.autostart > 1
    }

    /// The current frame's interleaved stereo samples (882 pairs).
    #[must_use]
    pub fn frame_samples(&self) -> &[u8] {
        &self.frame_samples
    }

    /// Press or release keys: `mask` selects bits 0-4 of `row`.
    pub fn key(&mut self, row: usize, mask: u8, pressed: bool) {
        self.bus.keyboard.set_key(row, mask, pressed);
    }

    /// Run one PAL frame.
    pub fn step_frame(&mut self) -> FrameOutcome {
        self.autostart_macro();

        let mut req_int = true;
        let mut ppu_x: u32 = 0;
        let mut ppu_y: u32 = 0;
        let mut ay_state: u32 = 0;

        self.frame_samples.clear();
        // Reset at the start of every frame so demos that overrun a frame
        // boundary stay locked to the interrupt.
        self.t_states_cycle = 0;

        while self.t_states_cycle < T_PER_FRAME {
            // The frame interrupt fires before the first instruction past
            // the offset.
            if req_int && self.t_states_cycle > IRQ_T_OFFSET {
                self.cpu.interrupt(&mut self.bus, false, 0xFF);
                req_int = false;
            }

            if self.halt_dump && self.bus.mem_read(self.cpu.regs.pc) == 0x76 {
                self.dump_state();
                return FrameOutcome::Stop;
            }

            self.bus.memory.trdos_trap(self.cpu.regs.pc);

            let t = self.cpu.run_instruction(&mut self.bus);
            self.t_states_cycle += t;
            self.t_states_total += u64::from(t);

            for _ in 0..t {
                // The AY ticks every 32 T-states from frame start.
                if ay_state & 0x1F == 0 {
                    self.bus.ay.tick();
                }
                ay_state += 1;

                // Two screen pixels per T-state.
                if ppu_y >= VISIBLE_ROW && ppu_x >= VISIBLE_COL {
                    let in_paper = (PAPER_ROW_START..PAPER_ROW_END).contains(&ppu_y)
                        && (PAPER_COL_START..PAPER_COL_END).contains(&ppu_x);
                    if in_paper {
                        let ppu_vx = ppu_x - PAPER_COL_START;
                        if ppu_vx & 3 == 0 {
                            let addr = self.video.row_addr((ppu_y - PAPER_ROW_START) as usize)
                                + (ppu_vx >> 2) as u16;
                            self.video.update_cell(&self.bus.memory, addr);
                        }
                    } else {
                        let lx = (ppu_x - VISIBLE_COL) as i32;
                        let y = (ppu_y - VISIBLE_ROW) as i32;
                        self.video.pset(2 * lx, y, self.bus.border);
                        self.video.pset(2 * lx + 1, y, self.bus.border);
                    }
                }

                ppu_x += 1;
                if ppu_x >= PPU_COLS {
                    ppu_x = 0;
                    ppu_y += 1;
                }
            }

            self.sample_audio(t);
        }

        self.t_states_cycle %= T_PER_FRAME;

        self.video.end_frame(&self.bus.memory);
        self.frame_counter += 1;

        FrameOutcome::Continue
    }

    /// Advance the 44.1 kHz resampler by `t` T-states, emitting one stereo
    /// sample per boundary crossing.
    fn sample_audio(&mut self, t: u32) {
        self.t_states_wav += 44_100 * i64::from(t);
        if self.t_states_wav > AUDIO_CYCLE {
            self.t_states_wav %= AUDIO_CYCLE;

            // Beeper baseline: EAR xor MIC around the midpoint.
            let beep = ((self.bus.port_fe >> 4) ^ (self.bus.port_fe >> 3)) & 1 != 0;
            let base = if beep { 0x80 } else { 0x80 + 32 };
            let mut left = base;
            let mut right = base;
            self.bus.ay.mix_into(&mut left, &mut right, self.mono);

            let (left, right) = (left as u8, right as u8);
            self.audio.push(left, right);
            self.frame_samples.push(left);
            self.frame_samples.push(right);
        }
    }

    /// Scripted startup input: the RUN + ENTER macro, and the optional
    /// SPACE press at frame 25.
    fn autostart_macro(&mut self) {
        if self.autostart > 0 {
            self.autostart += 1;
            match self.autostart {
                2 => self.key(2, 0x08, true),  // R
                3 => self.key(2, 0x08, false),
                4 => self.key(6, 0x01, true),  // ENTER
                5 => self.key(6, 0x01, false),
                _ => self.autostart = 0,
            }
        }

        if self.auto_space {
            match self.frame_counter {
                25 => self.key(7, 0x01, true),
                26 => self.key(7, 0x01, false),
                _ => {}
            }
        }
    }

    /// CPU state dump for the HALT diagnostic.
    fn dump_state(&self) {
        let r = &self.cpu.regs;
        eprintln!(
            "HALT at PC={:04X}  AF={:04X} BC={:04X} DE={:04X} HL={:04X}",
            r.pc,
            r.af(),
            r.bc(),
            r.de(),
            r.hl()
        );
        eprintln!(
            "  IX={:04X} IY={:04X} SP={:04X} I={:02X} R={:02X} IM{} IFF1={} IFF2={}",
            r.ix,
            r.iy,
            r.sp,
            r.i,
            r.r,
            r.im,
            u8::from(r.iff1),
            u8::from(r.iff2)
        );
        eprintln!(
            "  7FFD={:02X} TRDOS={} frame={} T={}",
            self.bus.memory.port_7ffd(),
            u8::from(self.bus.memory.trdos_latch()),
            self.frame_counter,
            self.t_states_total
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RomSet;

    fn make_spectrum_with_rom(code: &[u8]) -> Spectrum {
        let mut roms = RomSet::blank();
        roms.banks[1][..code.len()].copy_from_slice(code);
        Spectrum::new(&SpectrumConfig::with_roms(roms))
    }

    #[test]
    fn frame_emits_one_sample_per_resampler_crossing() {
        // DI; HALT: the frame is pure HALT single-steps. The 44.1 kHz
        // resampler lands within one sample of 882 pairs per frame, exact
        // over longer runs.
        let mut spec = make_spectrum_with_rom(&[0xF3, 0x76]);
        let mut total_pairs = 0;
        for _ in 0..10 {
            spec.step_frame();
            let pairs = spec.frame_samples().len() / 2;
            assert!((881..=883).contains(&pairs), "got {pairs} pairs");
            total_pairs += pairs;
        }
        assert!((8819..=8820).contains(&total_pairs), "got {total_pairs}");
    }

    #[test]
    fn ei_halt_frame_takes_exactly_one_frame_and_lands_at_0x38() {
        // EI; HALT with IM 1 and another HALT in the handler slot: the
        // frame interrupt wakes the CPU at 0x0038 and the frame comes out
        // at exactly T_PER_FRAME T-states.
        let mut code = [0u8; 0x40];
        code[0] = 0xFB; // EI
        code[1] = 0x76; // HALT
        code[0x38] = 0x76; // HALT
        let mut spec = make_spectrum_with_rom(&code);
        spec.cpu.regs.im = 1;
        spec.step_frame();

        assert_eq!(spec.t_states_total(), u64::from(T_PER_FRAME));
        // One instruction past the handler entry.
        assert_eq!(spec.cpu.regs.pc, 0x0039);
    }

    #[test]
    fn one_interrupt_per_frame() {
        // The handler at 0x38 increments (HL) then EI; RET. HL points at a
        // counter in RAM.
        let mut code = [0u8; 0x100];
        code[0] = 0xFB; // EI
        code[1] = 0x76; // HALT
        code[2] = 0x18; // JR -4 (back to EI)
        code[3] = 0xFC;
        code[0x38] = 0x34; // INC (HL)
        code[0x39] = 0xFB; // EI
        code[0x3A] = 0xC9; // RET
        let mut spec = make_spectrum_with_rom(&code);
        spec.cpu.regs.im = 1;
        spec.cpu.regs.set_hl(0x8000);
        spec.cpu.regs.sp = 0x7FF0;

        for _ in 0..5 {
            spec.step_frame();
        }
        assert_eq!(spec.bus.memory.bank(2)[0], 5, "one IRQ per frame");
    }

    #[test]
    fn border_paints_framebuffer() {
        // DI; OUT (0xFE), A with A=2 (red border); HALT.
        let mut spec = make_spectrum_with_rom(&[0xF3, 0x3E, 0x02, 0xD3, 0xFE, 0x76]);
        spec.step_frame();
        // Top-left corner is border.
        assert_eq!(spec.video.pixel(0, 0), 2);
    }

    #[test]
    fn autostart_macro_types_run_enter() {
        let mut roms = RomSet::blank();
        roms.banks[1][0] = 0xF3; // DI
        roms.banks[1][1] = 0x76; // HALT
        let mut config = SpectrumConfig::with_roms(roms);
        config.autostart = true;
        let mut spec = Spectrum::new(&config);

        spec.step_frame(); // step 2: R pressed
        assert_eq!(spec.bus.keyboard.read(0xFB) & 0x08, 0, "R held");
        spec.step_frame(); // step 3: R released
        assert_eq!(spec.bus.keyboard.read(0xFB) & 0x08, 0x08);
        spec.step_frame(); // step 4: ENTER pressed
        assert_eq!(spec.bus.keyboard.read(0xBF) & 0x01, 0);
        spec.step_frame(); // step 5: ENTER released
        assert_eq!(spec.bus.keyboard.read(0xBF) & 0x01, 0x01);
        spec.step_frame(); // macro winds down
        assert!(!spec.autostart_active());
    }

    #[test]
    fn halt_dump_stops_the_machine() {
        let mut roms = RomSet::blank();
        roms.banks[1][0] = 0x76;
        let mut config = SpectrumConfig::with_roms(roms);
        config.halt_dump = true;
        let mut spec = Spectrum::new(&config);
        assert_eq!(spec.step_frame(), FrameOutcome::Stop);
    }

    #[test]
    fn audio_ring_tracks_the_writer() {
        let mut spec = make_spectrum_with_rom(&[0xF3, 0x76]);
        for _ in 0..4 {
            spec.step_frame();
        }
        assert!((3..=4).contains(&spec.audio.frames_pending()));
    }
}
