//! ZX Spectrum 128K emulator binary.
//!
//! Runs the machine in a winit window with a pixels framebuffer and cpal
//! audio, or headless for BMP/WAV capture.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]

use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use pixels::{Pixels, SurfaceTexture};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use spectrum::audio::{FRAME_BYTES, SAMPLE_RATE, SAMPLES_PER_FRAME};
use spectrum::capture::{BmpStream, WavCapture};
use spectrum::{
    load_bin, load_sna, load_tap, load_z80, FrameOutcome, RomSet, Spectrum, SpectrumConfig,
    SpectrumError, FB_HEIGHT, FB_WIDTH, PALETTE,
};

/// Window scale factor (320x240 -> 960x720).
const SCALE: u32 = 3;

/// Frame duration for 50 Hz PAL.
const FRAME_DURATION: Duration = Duration::from_micros(20_000);

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

/// Ordered load operations, applied exactly as they appeared on the
/// command line.
enum LoadAction {
    Rom(usize, PathBuf),
    Bin(PathBuf, u16),
    Snapshot(PathBuf),
}

struct CliArgs {
    actions: Vec<LoadAction>,
    reset_paging: bool,
    autostart: bool,
    auto_space: bool,
    headless: bool,
    debugger: bool,
    halt_dump: bool,
    skip_frames: u32,
    run_frames: u32,
    video_path: Option<String>,
    force_pc: Option<u16>,
    skip_duplicates: bool,
    wav_path: Option<PathBuf>,
    mute: bool,
    mono: bool,
}

fn usage() -> ! {
    eprintln!("Usage: spectrum [OPTIONS] FILE.z80|FILE.sna|FILE.tap");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -2           reset 128K paging (port 7FFD = 0)");
    eprintln!("  -a           auto-type RUN + ENTER on startup");
    eprintln!("  -b FILE HEX  load a binary at the given address");
    eprintln!("  -c           headless (no window)");
    eprintln!("  -d           start with the disassembler visible");
    eprintln!("  -h           dump state and stop on HALT");
    eprintln!("  -k           auto-press SPACE at frame 25");
    eprintln!("  -m N         skip the first N frames of capture");
    eprintln!("  -M SEC       record SEC seconds (headless frame count)");
    eprintln!("  -o FILE|-    write a BMP video stream");
    eprintln!("  -p HEX       force PC after loading");
    eprintln!("  -r0 FILE     load ROM bank 0 (128K editor)");
    eprintln!("  -r1 FILE     load ROM bank 1 (48K BASIC)");
    eprintln!("  -s           skip duplicate frames in the video stream");
    eprintln!("  -w FILE      write WAV audio");
    eprintln!("  -x           mute");
    eprintln!("  -z           mono mix");
    process::exit(1);
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        actions: Vec::new(),
        reset_paging: false,
        autostart: false,
        auto_space: false,
        headless: false,
        debugger: false,
        halt_dump: false,
        skip_frames: 0,
        run_frames: 150,
        video_path: None,
        force_pc: None,
        skip_duplicates: false,
        wav_path: None,
        mute: false,
        mono: false,
    };

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "-2" => cli.reset_paging = true,
            "-a" => cli.autostart = true,
            "-b" => {
                let (Some(file), Some(hex)) = (args.get(i + 1), args.get(i + 2)) else {
                    usage();
                };
                let Ok(addr) = u16::from_str_radix(hex, 16) else {
                    usage();
                };
                cli.actions.push(LoadAction::Bin(PathBuf::from(file), addr));
                i += 2;
            }
            "-c" => cli.headless = true,
            "-d" => cli.debugger = true,
            "-h" => cli.halt_dump = true,
            "-k" => cli.auto_space = true,
            "-m" => {
                i += 1;
                cli.skip_frames = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(0);
            }
            "-M" => {
                i += 1;
                let seconds: u32 = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(3);
                cli.run_frames = seconds * 50;
            }
            "-o" => {
                i += 1;
                cli.video_path = args.get(i).cloned();
            }
            "-p" => {
                i += 1;
                cli.force_pc = args.get(i).and_then(|s| u16::from_str_radix(s, 16).ok());
            }
            "-r0" | "-r1" => {
                let bank = usize::from(arg == "-r1");
                i += 1;
                let Some(file) = args.get(i) else { usage() };
                cli.actions.push(LoadAction::Rom(bank, PathBuf::from(file)));
            }
            "-s" => cli.skip_duplicates = true,
            "-w" => {
                i += 1;
                cli.wav_path = args.get(i).map(PathBuf::from);
            }
            "-x" => cli.mute = true,
            "-z" => cli.mono = true,
            "--help" => usage(),
            _ if arg.ends_with(".z80") || arg.ends_with(".sna") || arg.ends_with(".tap") => {
                cli.actions.push(LoadAction::Snapshot(PathBuf::from(arg)));
            }
            other => {
                eprintln!("Unknown argument: {other}");
                usage();
            }
        }
        i += 1;
    }

    cli
}

// ---------------------------------------------------------------------------
// Machine construction
// ---------------------------------------------------------------------------

fn read_file(path: &PathBuf) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!(
                "{}",
                SpectrumError::FileOpen {
                    path: path.clone(),
                    source: e
                }
            );
            process::exit(1);
        }
    }
}

fn load_default_roms() -> RomSet {
    let mut roms = RomSet::blank();
    for (slot, name) in [(0usize, "128k.rom"), (1, "48k.rom")] {
        roms.banks[slot] = read_file(&PathBuf::from(name));
        if roms.banks[slot].len() != 0x4000 {
            eprintln!("{name}: {}", SpectrumError::BadRomSize(roms.banks[slot].len()));
            process::exit(1);
        }
    }
    roms.trdos = read_file(&PathBuf::from("trdos.rom"));
    roms
}

fn make_spectrum(cli: &CliArgs) -> Spectrum {
    let mut config = SpectrumConfig::with_roms(load_default_roms());
    config.mono = cli.mono;
    config.autostart = cli.autostart;
    config.auto_space = cli.auto_space;
    config.halt_dump = cli.halt_dump;

    let mut spec = Spectrum::new(&config);

    if cli.reset_paging {
        spec.bus.memory.set_7ffd(0);
    }

    for action in &cli.actions {
        match action {
            LoadAction::Rom(bank, path) => {
                let image = read_file(path);
                if image.len() != 0x4000 {
                    eprintln!("{}: {}", path.display(), SpectrumError::BadRomSize(image.len()));
                    process::exit(1);
                }
                spec.bus.memory.load_rom(*bank, &image);
            }
            LoadAction::Bin(path, addr) => {
                load_bin(&mut spec, *addr, &read_file(path));
                log::info!("loaded binary {} at {addr:04X}", path.display());
            }
            LoadAction::Snapshot(path) => {
                let data = read_file(path);
                let name = path.to_string_lossy();
                let result = if name.ends_with(".sna") {
                    load_sna(&mut spec, &data)
                } else if name.ends_with(".tap") {
                    load_tap(&mut spec, &data)
                } else {
                    load_z80(&mut spec, &data)
                };
                if let Err(e) = result {
                    eprintln!("{}: {e}", path.display());
                    process::exit(1);
                }
            }
        }
    }

    if let Some(pc) = cli.force_pc {
        spec.cpu.regs.pc = pc;
    }

    spec
}

// ---------------------------------------------------------------------------
// Capture plumbing shared by both modes
// ---------------------------------------------------------------------------

struct Capture {
    bmp: Option<BmpStream>,
    wav: Option<WavCapture>,
}

impl Capture {
    fn open(cli: &CliArgs) -> Self {
        let bmp = cli.video_path.as_ref().map(|path| {
            match BmpStream::create(path, cli.skip_frames, cli.skip_duplicates) {
                Ok(stream) => stream,
                Err(e) => {
                    eprintln!("Can't open video stream {path}: {e}");
                    process::exit(1);
                }
            }
        });
        let wav = cli.wav_path.as_ref().map(|path| match WavCapture::create(path) {
            Ok(wav) => wav,
            Err(e) => {
                eprintln!("Can't open WAV {}: {e}", path.display());
                process::exit(1);
            }
        });
        Self { bmp, wav }
    }

    /// Record the frame that just finished, unless the autostart macro is
    /// still typing.
    fn push(&mut self, spec: &mut Spectrum) {
        if spec.autostart_active() {
            return;
        }
        if let Some(bmp) = &mut self.bmp {
            if let Err(e) = bmp.push_frame(spec) {
                eprintln!("Video capture failed: {e}");
                process::exit(1);
            }
        }
        if let Some(wav) = &mut self.wav {
            let samples = spec.frame_samples().to_vec();
            if let Err(e) = wav.push_samples(&samples) {
                eprintln!("WAV capture failed: {e}");
                process::exit(1);
            }
        }
    }

    fn finish(self) {
        if let Some(bmp) = self.bmp {
            if let Err(e) = bmp.finish() {
                eprintln!("Video capture failed: {e}");
                process::exit(1);
            }
        }
        if let Some(wav) = self.wav {
            if let Err(e) = wav.finish() {
                eprintln!("WAV capture failed: {e}");
                process::exit(1);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Headless mode
// ---------------------------------------------------------------------------

fn run_headless(cli: &CliArgs) {
    let mut spec = make_spectrum(cli);
    let mut capture = Capture::open(cli);

    for _ in 0..cli.run_frames {
        if spec.step_frame() == FrameOutcome::Stop {
            break;
        }
        capture.push(&mut spec);
    }

    capture.finish();
}

// ---------------------------------------------------------------------------
// Audio output (cpal fed from the core's frame ring)
// ---------------------------------------------------------------------------

struct AudioOutput {
    _stream: cpal::Stream,
    producer: ringbuf::HeapProd<f32>,
}

impl AudioOutput {
    fn new() -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;

        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        // Room for ~8 frames of stereo samples against timing jitter.
        let ring = HeapRb::<f32>::new(SAMPLES_PER_FRAME * 2 * 8);
        let (mut producer, mut consumer) = ring.split();

        // Pre-fill with silence to ride out the start-up underrun.
        for _ in 0..SAMPLES_PER_FRAME * 2 * 4 {
            let _ = producer.try_push(0.0);
        }

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        *sample = consumer.try_pop().unwrap_or(0.0);
                    }
                },
                |err| eprintln!("Audio stream error: {err}"),
                None,
            )
            .ok()?;

        stream.play().ok()?;

        Some(Self {
            _stream: stream,
            producer,
        })
    }

    /// Move one frame block from the machine's ring to the device ring.
    fn push_frame(&mut self, spec: &mut Spectrum) {
        let mut block = [0u8; FRAME_BYTES];
        spec.audio.read_frame(&mut block);
        for &byte in &block {
            let sample = (f32::from(byte) - 128.0) / 128.0;
            let _ = self.producer.try_push(sample);
        }
    }
}

// ---------------------------------------------------------------------------
// Keyboard mapping (host key -> matrix row/mask)
// ---------------------------------------------------------------------------

/// Map a physical key to one or two matrix positions. Compound keys
/// (cursors, backspace) combine a shift row with a digit row.
fn map_keycode(code: KeyCode) -> &'static [(usize, u8)] {
    match code {
        KeyCode::ShiftLeft => &[(0, 0x01)],
        KeyCode::KeyZ => &[(0, 0x02)],
        KeyCode::KeyX => &[(0, 0x04)],
        KeyCode::KeyC => &[(0, 0x08)],
        KeyCode::KeyV => &[(0, 0x10)],

        KeyCode::KeyA => &[(1, 0x01)],
        KeyCode::KeyS => &[(1, 0x02)],
        KeyCode::KeyD => &[(1, 0x04)],
        KeyCode::KeyF => &[(1, 0x08)],
        KeyCode::KeyG => &[(1, 0x10)],

        KeyCode::KeyQ => &[(2, 0x01)],
        KeyCode::KeyW => &[(2, 0x02)],
        KeyCode::KeyE => &[(2, 0x04)],
        KeyCode::KeyR => &[(2, 0x08)],
        KeyCode::KeyT => &[(2, 0x10)],

        KeyCode::Digit1 => &[(3, 0x01)],
        KeyCode::Digit2 => &[(3, 0x02)],
        KeyCode::Digit3 => &[(3, 0x04)],
        KeyCode::Digit4 => &[(3, 0x08)],
        KeyCode::Digit5 => &[(3, 0x10)],

        KeyCode::Digit0 => &[(4, 0x01)],
        KeyCode::Digit9 => &[(4, 0x02)],
        KeyCode::Digit8 => &[(4, 0x04)],
        KeyCode::Digit7 => &[(4, 0x08)],
        KeyCode::Digit6 => &[(4, 0x10)],

        KeyCode::KeyP => &[(5, 0x01)],
        KeyCode::KeyO => &[(5, 0x02)],
        KeyCode::KeyI => &[(5, 0x04)],
        KeyCode::KeyU => &[(5, 0x08)],
        KeyCode::KeyY => &[(5, 0x10)],

        KeyCode::Enter => &[(6, 0x01)],
        KeyCode::KeyL => &[(6, 0x02)],
        KeyCode::KeyK => &[(6, 0x04)],
        KeyCode::KeyJ => &[(6, 0x08)],
        KeyCode::KeyH => &[(6, 0x10)],

        KeyCode::Space => &[(7, 0x01)],
        KeyCode::ShiftRight => &[(7, 0x02)], // symbol shift
        KeyCode::KeyM => &[(7, 0x04)],
        KeyCode::KeyN => &[(7, 0x08)],
        KeyCode::KeyB => &[(7, 0x10)],

        // CAPS SHIFT combinations.
        KeyCode::ArrowLeft => &[(0, 0x01), (3, 0x10)],
        KeyCode::ArrowDown => &[(0, 0x01), (4, 0x10)],
        KeyCode::ArrowUp => &[(0, 0x01), (4, 0x08)],
        KeyCode::ArrowRight => &[(0, 0x01), (4, 0x04)],
        KeyCode::Backspace => &[(0, 0x01), (4, 0x01)],

        _ => &[],
    }
}

// ---------------------------------------------------------------------------
// Windowed mode (winit + pixels)
// ---------------------------------------------------------------------------

struct App {
    spec: Spectrum,
    capture: Capture,
    audio: Option<AudioOutput>,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    last_frame_time: Instant,
}

impl App {
    fn new(spec: Spectrum, capture: Capture, audio: Option<AudioOutput>) -> Self {
        Self {
            spec,
            capture,
            audio,
            window: None,
            pixels: None,
            last_frame_time: Instant::now(),
        }
    }

    fn update_pixels(&mut self) {
        let Some(pixels) = self.pixels.as_mut() else {
            return;
        };

        let frame = pixels.frame_mut();
        for y in 0..FB_HEIGHT {
            for x in 0..FB_WIDTH {
                let colour = PALETTE[self.spec.video.pixel(x, y) as usize];
                let offset = (y * FB_WIDTH + x) * 4;
                frame[offset] = ((colour >> 16) & 0xFF) as u8;
                frame[offset + 1] = ((colour >> 8) & 0xFF) as u8;
                frame[offset + 2] = (colour & 0xFF) as u8;
                frame[offset + 3] = 0xFF;
            }
        }
    }

    fn handle_key(&mut self, code: KeyCode, pressed: bool) {
        for &(row, mask) in map_keycode(code) {
            self.spec.key(row, mask, pressed);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let size = winit::dpi::LogicalSize::new(
            FB_WIDTH as u32 * SCALE,
            FB_HEIGHT as u32 * SCALE,
        );
        let attrs = WindowAttributes::default()
            .with_title("ZX Spectrum 128K")
            .with_inner_size(size)
            .with_resizable(false);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                // Leaked on purpose: the window lives until process exit.
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(FB_WIDTH as u32, FB_HEIGHT as u32, surface) {
                    Ok(pixels) => self.pixels = Some(pixels),
                    Err(e) => {
                        eprintln!("Failed to create pixels surface: {e}");
                        event_loop.exit();
                        return;
                    }
                }
                self.window = Some(window);
            }
            Err(e) => {
                eprintln!("Failed to create window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    if code == KeyCode::Escape && event.state == ElementState::Pressed {
                        event_loop.exit();
                        return;
                    }
                    self.handle_key(code, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if now.duration_since(self.last_frame_time) >= FRAME_DURATION {
                    if self.spec.step_frame() == FrameOutcome::Stop {
                        event_loop.exit();
                        return;
                    }
                    self.capture.push(&mut self.spec);
                    if let Some(audio) = &mut self.audio {
                        audio.push_frame(&mut self.spec);
                    }
                    self.update_pixels();
                    self.last_frame_time = now;
                }

                if let Some(pixels) = self.pixels.as_ref() {
                    if let Err(e) = pixels.render() {
                        eprintln!("Render error: {e}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    let cli = parse_args();

    if cli.debugger {
        log::warn!("the disassembler view is not part of this build");
    }

    if cli.headless {
        run_headless(&cli);
        return;
    }

    let spec = make_spectrum(&cli);
    let capture = Capture::open(&cli);
    let audio = if cli.mute { None } else { AudioOutput::new() };

    let event_loop = match EventLoop::new() {
        Ok(el) => el,
        Err(e) => {
            eprintln!("Failed to create event loop: {e}");
            process::exit(1);
        }
    };

    let mut app = App::new(spec, capture, audio);
    if let Err(e) = event_loop.run_app(&mut app) {
        eprintln!("Event loop error: {e}");
        process::exit(1);
    }

    // Finalize capture headers on the way out.
    let App { capture, .. } = app;
    capture.finish();
}
