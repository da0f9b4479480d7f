//! Audio streaming and analysis module

mod analyzer;
mod buffer;
mod capture;
mod devices;
pub(crate) mod file;
mod playback;

pub use analyzer::{SpectrumAnalyzer, SpectrumFrame};
pub use buffer::VisualizationBuffer;
pub use capture::{CaptureEngine, CaptureError};
pub use devices::{
    find_input_device, find_output_device, list_input_devices, list_output_devices, DeviceError,
    DeviceInfo, DeviceSelection,
};
pub use file::{FileError, WavTrack};
pub use playback::{PlaybackEngine, PlaybackError, PlaybackState};

/// Audio engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of mono samples kept for visualization
    pub vis_buffer_len: usize,

    /// Device stream block size in frames
    pub block_size: u32,

    /// Capture sample rates to attempt, in order of preference
    pub capture_rate_preference: Vec<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vis_buffer_len: 4096,
            block_size: 2048,
            capture_rate_preference: vec![192_000, 48_000],
        }
    }
}

/// Contract shared by everything that produces sample blocks on demand.
///
/// A source declares its own sample rate and channel count. End of stream is
/// signalled by a single short read; every read after that returns 0.
pub trait SampleSource {
    /// Native sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Number of interleaved channels per frame.
    fn channels(&self) -> u16;

    /// Fill `out` with interleaved samples, returning how many were written.
    fn read_block(&mut self, out: &mut [f32]) -> usize;
}

/// Average interleaved frames down to a single channel.
pub(crate) fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
