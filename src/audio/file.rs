//! WAV file decoding

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec};
use thiserror::Error;

use super::SampleSource;

/// File decoding errors
#[derive(Error, Debug)]
pub enum FileError {
    /// Unreadable, corrupt or unsupported audio file.
    #[error("failed to open audio file: {0}")]
    Open(#[from] hound::Error),

    #[error("failed to seek in audio file: {0}")]
    Seek(#[from] std::io::Error),
}

/// Seekable decoded audio file.
///
/// Sample payloads are converted to interleaved f32 in ±1.0 on read;
/// 16/24/32-bit integer and 32-bit float WAV data are supported.
pub struct WavTrack {
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
    total_frames: u32,
    frames_read: u32,
    exhausted: bool,
}

impl WavTrack {
    /// Open and validate a WAV file, positioned at frame 0.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FileError> {
        let reader = WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        let total_frames = reader.duration();
        log::info!(
            "opened {}: {} Hz, {} channel(s), {} frames",
            path.as_ref().display(),
            spec.sample_rate,
            spec.channels,
            total_frames
        );
        Ok(Self {
            reader,
            spec,
            total_frames,
            frames_read: 0,
            exhausted: false,
        })
    }

    /// Seek back to frame 0 and clear the end-of-stream latch.
    pub fn rewind(&mut self) -> Result<(), FileError> {
        self.reader.seek(0)?;
        self.frames_read = 0;
        self.exhausted = false;
        Ok(())
    }

    /// Current read position in frames.
    pub fn position_frames(&self) -> u32 {
        self.frames_read
    }

    /// Total length in frames.
    pub fn duration_frames(&self) -> u32 {
        self.total_frames
    }
}

impl SampleSource for WavTrack {
    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn channels(&self) -> u16 {
        self.spec.channels
    }

    fn read_block(&mut self, out: &mut [f32]) -> usize {
        if self.exhausted || out.is_empty() {
            return 0;
        }

        let mut written = 0;
        match self.spec.sample_format {
            SampleFormat::Float => {
                for sample in self.reader.samples::<f32>() {
                    match sample {
                        Ok(value) => {
                            out[written] = value;
                            written += 1;
                        }
                        Err(e) => {
                            log::warn!("decode error mid-stream, truncating: {e}");
                            break;
                        }
                    }
                    if written == out.len() {
                        break;
                    }
                }
            }
            SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (self.spec.bits_per_sample - 1)) as f32;
                for sample in self.reader.samples::<i32>() {
                    match sample {
                        Ok(value) => {
                            out[written] = value as f32 * scale;
                            written += 1;
                        }
                        Err(e) => {
                            log::warn!("decode error mid-stream, truncating: {e}");
                            break;
                        }
                    }
                    if written == out.len() {
                        break;
                    }
                }
            }
        }

        self.frames_read += (written / self.spec.channels as usize) as u32;
        if written < out.len() {
            self.exhausted = true;
        }
        written
    }
}

/// Test-signal generation shared by this module's tests and the playback
/// state-machine tests.
#[cfg(test)]
pub(crate) mod test_signal {
    use std::f32::consts::PI;
    use std::path::PathBuf;

    /// Write a sine WAV and return its path (unique per test name).
    pub(crate) fn write_sine_wav(
        tag: &str,
        sample_rate: u32,
        channels: u16,
        frames: u32,
        frequency: f32,
    ) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "spectraviz-{}-{}.wav",
            tag,
            std::process::id()
        ));
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("create test wav");
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let value = (0.5 * (2.0 * PI * frequency * t).sin() * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(value).expect("write test sample");
            }
        }
        writer.finalize().expect("finalize test wav");
        path
    }
}
