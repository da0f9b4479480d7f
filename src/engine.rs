//! Top-level audio engine owning playback, capture and the shared buffer

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::{
    CaptureEngine, CaptureError, DeviceSelection, EngineConfig, PlaybackEngine, PlaybackError,
    PlaybackState, VisualizationBuffer,
};

/// Snapshot sample rate to assume when nothing is loaded or listening.
const FALLBACK_SAMPLE_RATE: u32 = 44_100;

/// Combined stream state reported to the orchestrating layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing loaded, nothing listening.
    Idle,
    Playing,
    Paused,
    Listening,
    /// A file is loaded, its stream is closed and the position is 0.
    Stopped,
}

/// The one owned object tying the audio subsystem together.
///
/// Constructed once at startup and handed to both the control layer and the
/// analysis/polling layer. Owns the visualization buffer for the process
/// lifetime and guarantees at most one producer: playback and capture are
/// mutually exclusive, and switching modes goes through a full stop.
pub struct AudioEngine {
    vis: Arc<Mutex<VisualizationBuffer>>,
    playback: PlaybackEngine,
    capture: CaptureEngine,
    selection: DeviceSelection,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Self {
        let vis = Arc::new(Mutex::new(VisualizationBuffer::new(config.vis_buffer_len)));
        Self {
            playback: PlaybackEngine::new(config.clone(), vis.clone()),
            capture: CaptureEngine::new(config, vis.clone()),
            vis,
            selection: DeviceSelection::default(),
        }
    }

    /// Select the output endpoint used by the next `play()`.
    pub fn set_output_device(&mut self, id: Option<String>) {
        log::info!("output device set to {}", id.as_deref().unwrap_or("default"));
        self.selection.output = id;
    }

    /// Select the input endpoint used by the next `start_listening()`.
    pub fn set_input_device(&mut self, id: Option<String>) {
        log::info!("input device set to {}", id.as_deref().unwrap_or("default"));
        self.selection.input = id;
    }

    pub fn device_selection(&self) -> &DeviceSelection {
        &self.selection
    }

    /// Open and validate an audio file for playback.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), PlaybackError> {
        self.playback.load(path)
    }

    /// Start or resume file playback. Rejected while capture is listening.
    pub fn play(&mut self) -> Result<(), PlaybackError> {
        if self.capture.is_listening() {
            return Err(PlaybackError::CaptureActive);
        }
        self.playback.play(self.selection.output.as_deref())
    }

    /// Suspend playback, keeping the position.
    pub fn pause(&mut self) {
        self.playback.pause();
    }

    /// Halt playback and rewind to the start.
    pub fn stop(&mut self) {
        self.playback.stop();
    }

    /// Begin monitoring the input device.
    ///
    /// A no-op while a file is playing or paused (`Ok(None)`); otherwise
    /// returns the sample rate actually negotiated with the device.
    pub fn start_listening(&mut self) -> Result<Option<u32>, CaptureError> {
        if matches!(
            self.playback.state(),
            PlaybackState::Playing | PlaybackState::Paused
        ) {
            log::debug!("ignoring start_listening while playback is active");
            return Ok(None);
        }
        self.capture.start(self.selection.input.as_deref()).map(Some)
    }

    /// Stop monitoring the input device.
    pub fn stop_listening(&mut self) {
        self.capture.stop();
    }

    /// Copy of the current visualization buffer contents, oldest first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.vis.lock().snapshot()
    }

    pub fn state(&self) -> StreamState {
        if self.capture.is_listening() {
            return StreamState::Listening;
        }
        match self.playback.state() {
            PlaybackState::Idle => StreamState::Idle,
            PlaybackState::Loaded => StreamState::Stopped,
            PlaybackState::Playing => StreamState::Playing,
            PlaybackState::Paused => StreamState::Paused,
        }
    }

    /// Sample rate the current snapshot should be interpreted at: the
    /// negotiated capture rate while listening, the track's native rate when
    /// a file is loaded, 44.1 kHz otherwise.
    pub fn active_sample_rate(&self) -> u32 {
        if let Some(rate) = self.capture.sample_rate() {
            return rate;
        }
        if let Some(rate) = self.playback.sample_rate() {
            return rate;
        }
        FALLBACK_SAMPLE_RATE
    }

    /// Sample rate negotiated for the active capture session, if any.
    pub fn capture_sample_rate(&self) -> Option<u32> {
        self.capture.sample_rate()
    }
}
