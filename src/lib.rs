//! Spectraviz audio core
//!
//! Streams audio from a WAV file or a live input device into a shared
//! visualization buffer and turns buffer snapshots into renderable
//! frequency-domain curves. GUI concerns (device pickers, plotting, window
//! chrome) belong to the embedding application; this crate owns the audio
//! threads, the buffer contract and the analysis pipeline.

pub mod audio;
pub mod engine;

pub use audio::{
    list_input_devices, list_output_devices, CaptureEngine, CaptureError, DeviceError,
    DeviceInfo, DeviceSelection, EngineConfig, FileError, PlaybackEngine, PlaybackError,
    PlaybackState, SampleSource, SpectrumAnalyzer, SpectrumFrame, VisualizationBuffer, WavTrack,
};
pub use engine::{AudioEngine, StreamState};
