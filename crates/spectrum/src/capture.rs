//! Frame and audio capture: BMP video stream and WAV dump.
//!
//! The video stream is a concatenation of uncompressed 4-bpp BMPs, one per
//! emitted frame, each with its own 118-byte header and 16-colour table.
//! The packed bottom-up framebuffer is written verbatim. Audio goes to an
//! 8-bit stereo 44.1 kHz WAV whose length is finalized when the writer is
//! dropped.

#![allow(clippy::cast_possible_truncation)]

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::info;

use crate::error::SpectrumError;
use crate::palette::BMP_PALETTE;
use crate::video::{FB_BYTES, FB_HEIGHT, FB_WIDTH};
use crate::Spectrum;

/// BMP file size: headers (14 + 40) + palette (64) + pixel data.
const BMP_FILE_SIZE: u32 = 118 + FB_BYTES as u32;

/// Streams one BMP per frame, with frame skipping and duplicate
/// suppression.
pub struct BmpStream {
    sink: BufWriter<Box<dyn Write>>,
    /// Frames still to drop from the start of the capture.
    skip_frames: u32,
    /// Drop frames identical to the previously written one.
    skip_duplicates: bool,
    frames_written: u32,
}

impl BmpStream {
    /// Open a capture stream; `-` means stdout.
    pub fn create(path: &str, skip_frames: u32, skip_duplicates: bool) -> io::Result<Self> {
        let sink: Box<dyn Write> = if path == "-" {
            Box::new(io::stdout())
        } else {
            Box::new(File::create(path)?)
        };
        Ok(Self {
            sink: BufWriter::new(sink),
            skip_frames,
            skip_duplicates,
            frames_written: 0,
        })
    }

    /// Append the machine's current frame, honouring the skip rules.
    pub fn push_frame(&mut self, spectrum: &mut Spectrum) -> Result<(), SpectrumError> {
        if self.skip_frames > 0 {
            self.skip_frames -= 1;
            return Ok(());
        }
        if self.skip_duplicates && !spectrum.video.frame_changed() {
            return Ok(());
        }

        self.write_bmp(spectrum.video.framebuffer())?;
        self.frames_written += 1;

        if self.skip_duplicates {
            spectrum.video.commit_frame();
        }
        Ok(())
    }

    fn write_bmp(&mut self, fb: &[u8; FB_BYTES]) -> io::Result<()> {
        // BITMAPFILEHEADER
        self.sink.write_all(b"BM")?;
        self.sink.write_all(&BMP_FILE_SIZE.to_le_bytes())?;
        self.sink.write_all(&[0; 4])?; // reserved
        self.sink.write_all(&118u32.to_le_bytes())?; // pixel data offset

        // BITMAPINFOHEADER
        self.sink.write_all(&40u32.to_le_bytes())?;
        self.sink.write_all(&(FB_WIDTH as u32).to_le_bytes())?;
        self.sink.write_all(&(FB_HEIGHT as u32).to_le_bytes())?;
        self.sink.write_all(&1u16.to_le_bytes())?; // planes
        self.sink.write_all(&4u16.to_le_bytes())?; // bits per pixel
        self.sink.write_all(&0u32.to_le_bytes())?; // no compression
        self.sink.write_all(&(FB_BYTES as u32).to_le_bytes())?;
        self.sink.write_all(&0x0B13u32.to_le_bytes())?; // x pixels/metre
        self.sink.write_all(&0x0B13u32.to_le_bytes())?; // y pixels/metre
        self.sink.write_all(&16u32.to_le_bytes())?; // colours used
        self.sink.write_all(&0u32.to_le_bytes())?; // all important

        for entry in &BMP_PALETTE {
            self.sink.write_all(entry)?;
        }

        // Rows are already packed bottom-up.
        self.sink.write_all(fb)
    }

    /// Flush and report.
    pub fn finish(mut self) -> Result<(), SpectrumError> {
        self.sink.flush()?;
        info!("captured {} frames", self.frames_written);
        Ok(())
    }
}

/// WAV capture: PCM, 2 channels, 44100 Hz, 8-bit.
pub struct WavCapture {
    writer: hound::WavWriter<BufWriter<File>>,
}

impl WavCapture {
    pub fn create(path: &Path) -> Result<Self, SpectrumError> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: crate::audio::SAMPLE_RATE,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        Ok(Self {
            writer: hound::WavWriter::create(path, spec)?,
        })
    }

    /// Append interleaved unsigned 8-bit samples.
    pub fn push_samples(&mut self, samples: &[u8]) -> Result<(), SpectrumError> {
        for &sample in samples {
            // hound takes signed 8-bit and stores the WAV unsigned form.
            self.writer.write_sample((i16::from(sample) - 128) as i8)?;
        }
        Ok(())
    }

    /// Finalize the header with the real data length.
    pub fn finish(self) -> Result<(), SpectrumError> {
        self.writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RomSet, SpectrumConfig};

    fn make_spectrum() -> Spectrum {
        Spectrum::new(&SpectrumConfig::with_roms(RomSet::blank()))
    }

    #[test]
    fn bmp_stream_writes_one_record_per_frame() {
        let dir = std::env::temp_dir();
        let path = dir.join("spectrum-test-capture.bmp");
        let path_str = path.to_str().unwrap().to_string();

        let mut spec = make_spectrum();
        let mut stream = BmpStream::create(&path_str, 0, false).unwrap();
        stream.push_frame(&mut spec).unwrap();
        stream.push_frame(&mut spec).unwrap();
        stream.finish().unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 2 * BMP_FILE_SIZE as usize);
        assert_eq!(&written[0..2], b"BM");
        // Second record starts right after the first.
        let second = BMP_FILE_SIZE as usize;
        assert_eq!(&written[second..second + 2], b"BM");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn skip_frames_drops_the_start() {
        let dir = std::env::temp_dir();
        let path = dir.join("spectrum-test-skip.bmp");
        let path_str = path.to_str().unwrap().to_string();

        let mut spec = make_spectrum();
        let mut stream = BmpStream::create(&path_str, 2, false).unwrap();
        for _ in 0..3 {
            stream.push_frame(&mut spec).unwrap();
        }
        stream.finish().unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), BMP_FILE_SIZE as usize, "two frames skipped");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn duplicate_frames_suppressed() {
        let dir = std::env::temp_dir();
        let path = dir.join("spectrum-test-dup.bmp");
        let path_str = path.to_str().unwrap().to_string();

        let mut spec = make_spectrum();
        let mut stream = BmpStream::create(&path_str, 0, true).unwrap();
        // First frame always differs (fresh comparison baseline).
        stream.push_frame(&mut spec).unwrap();
        // Unchanged framebuffer: dropped.
        stream.push_frame(&mut spec).unwrap();
        // Change a pixel: written.
        spec.video.pset(16, 24, 5);
        stream.push_frame(&mut spec).unwrap();
        stream.finish().unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 2 * BMP_FILE_SIZE as usize);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn wav_capture_round_trips_sample_count() {
        let dir = std::env::temp_dir();
        let path = dir.join("spectrum-test-audio.wav");

        let mut wav = WavCapture::create(&path).unwrap();
        wav.push_samples(&[0x80, 0x80, 0xA0, 0x60]).unwrap();
        wav.finish().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44_100);
        assert_eq!(reader.spec().bits_per_sample, 8);
        assert_eq!(reader.len(), 4);
        std::fs::remove_file(&path).ok();
    }
}
