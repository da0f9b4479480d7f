//! File playback onto an output device and the visualization buffer

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, StreamConfig};
use parking_lot::Mutex;
use thiserror::Error;

use super::{
    devices, mix_to_mono, DeviceError, EngineConfig, FileError, SampleSource,
    VisualizationBuffer, WavTrack,
};

/// Playback errors, surfaced synchronously by the control calls.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("no file loaded")]
    NothingLoaded,

    #[error("capture is active; stop listening before starting playback")]
    CaptureActive,

    #[error("failed to query output config: {0}")]
    Config(String),

    #[error("failed to build output stream: {0}")]
    BuildStream(String),

    #[error("failed to start output stream: {0}")]
    StartStream(String),

    #[error("playback thread error: {0}")]
    Thread(String),
}

/// Playback stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No file loaded.
    Idle,
    /// File open, stream closed, position 0.
    Loaded,
    Playing,
    /// Stream suspended, position kept.
    Paused,
}

enum PlaybackCommand {
    Pause,
    Resume,
    Stop,
}

/// File playback engine: Idle → Loaded → Playing ⇄ Paused.
///
/// Mirrors the capture side: the `cpal::Stream` lives on a dedicated
/// `audio-playback` thread that the control calls talk to over a command
/// channel. End of stream and stop both rewind the track to frame 0 and
/// land back in `Loaded`.
pub struct PlaybackEngine {
    config: EngineConfig,
    vis: Arc<Mutex<VisualizationBuffer>>,
    track: Arc<Mutex<Option<WavTrack>>>,
    state: Arc<Mutex<PlaybackState>>,
    session: Option<PlaybackSession>,
}

struct PlaybackSession {
    command_tx: mpsc::Sender<PlaybackCommand>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    pub fn new(config: EngineConfig, vis: Arc<Mutex<VisualizationBuffer>>) -> Self {
        Self {
            config,
            vis,
            track: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(PlaybackState::Idle)),
            session: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// Native sample rate of the loaded track, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.track.lock().as_ref().map(|t| t.sample_rate())
    }

    /// Current track position in frames, if a track is loaded.
    pub fn position_frames(&self) -> Option<u32> {
        self.track.lock().as_ref().map(|t| t.position_frames())
    }

    /// Open and validate an audio file, discarding any previous track.
    ///
    /// The active stream (if any) is closed first. On failure the engine is
    /// left idle with nothing loaded.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), PlaybackError> {
        self.stop();
        *self.track.lock() = None;
        *self.state.lock() = PlaybackState::Idle;

        let track = WavTrack::open(path)?;
        *self.track.lock() = Some(track);
        *self.state.lock() = PlaybackState::Loaded;
        Ok(())
    }

    /// Start or resume playback.
    ///
    /// No-op when already playing. From `Paused` the suspended stream is
    /// resumed in place. From `Loaded` an output stream is opened at the
    /// track's native rate and channel count on the given device (`None` =
    /// system default); setup failures are returned synchronously and leave
    /// the state unchanged.
    pub fn play(&mut self, device_id: Option<&str>) -> Result<(), PlaybackError> {
        self.reap_finished();

        match self.state() {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => {
                if let Some(session) = &self.session {
                    session
                        .command_tx
                        .send(PlaybackCommand::Resume)
                        .map_err(|_| {
                            PlaybackError::Thread("playback thread is gone".to_string())
                        })?;
                    *self.state.lock() = PlaybackState::Playing;
                }
                return Ok(());
            }
            PlaybackState::Idle => return Err(PlaybackError::NothingLoaded),
            PlaybackState::Loaded => {}
        }

        let (sample_rate, channels) = {
            let guard = self.track.lock();
            let track = guard.as_ref().ok_or(PlaybackError::NothingLoaded)?;
            (track.sample_rate(), track.channels())
        };

        let device = devices::find_output_device(device_id)?;
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let track = self.track.clone();
        let vis = self.vis.clone();
        let state = self.state.clone();
        let block_size = self.config.block_size;

        let thread = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                run_playback_thread(
                    device, sample_rate, channels, block_size, track, vis, state, command_rx,
                    ready_tx,
                )
            })
            .map_err(|e| PlaybackError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(PlaybackError::Thread(
                    "playback thread exited before reporting".to_string(),
                ));
            }
        }

        *self.state.lock() = PlaybackState::Playing;
        self.session = Some(PlaybackSession {
            command_tx,
            thread: Some(thread),
        });
        log::info!("playing at {sample_rate} Hz, {channels} channel(s)");
        Ok(())
    }

    /// Suspend the device stream, keeping the read position.
    pub fn pause(&mut self) {
        self.reap_finished();
        if self.state() != PlaybackState::Playing {
            return;
        }
        if let Some(session) = &self.session {
            if session.command_tx.send(PlaybackCommand::Pause).is_ok() {
                *self.state.lock() = PlaybackState::Paused;
                log::info!("playback paused");
            }
        }
    }

    /// Halt and close the stream; the track rewinds to frame 0.
    ///
    /// Synchronous: the stream thread is joined, so no visualization-buffer
    /// writes happen after this returns.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.command_tx.send(PlaybackCommand::Stop);
            if let Some(handle) = session.thread.take() {
                let _ = handle.join();
            }
            log::info!("playback stopped");
        }

        let has_track = {
            let mut guard = self.track.lock();
            match guard.as_mut() {
                Some(track) => {
                    if let Err(e) = track.rewind() {
                        log::warn!("failed to rewind track: {e}");
                    }
                    true
                }
                None => false,
            }
        };
        *self.state.lock() = if has_track {
            PlaybackState::Loaded
        } else {
            PlaybackState::Idle
        };
    }

    /// Join the stream thread once it has wound down on its own
    /// (end of stream or a driver-terminated stream).
    fn reap_finished(&mut self) {
        let finished = self
            .session
            .as_ref()
            .and_then(|s| s.thread.as_ref())
            .is_some_and(|t| t.is_finished());
        if finished {
            if let Some(mut session) = self.session.take() {
                if let Some(handle) = session.thread.take() {
                    let _ = handle.join();
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: PlaybackState) {
        *self.state.lock() = state;
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fill one output block from the source, zero-padding past the end.
///
/// Returns the number of samples the source actually delivered. The
/// exhausted flag is raised on the callback that delivers the final short
/// block; the delivered samples (not the padding) are mixed to mono and
/// written to the visualization buffer.
fn render_block<S: SampleSource>(
    source: &mut S,
    out: &mut [f32],
    vis: &Mutex<VisualizationBuffer>,
    exhausted: &AtomicBool,
) -> usize {
    let written = source.read_block(out);
    out[written..].fill(0.0);
    if written < out.len() {
        exhausted.store(true, Ordering::Release);
    }
    if written > 0 {
        let mono = mix_to_mono(&out[..written], source.channels() as usize);
        vis.lock().write(&mono);
    }
    written
}

/// Run the output stream on its dedicated thread until stop, end of stream
/// or driver termination, then rewind the track and return to `Loaded`.
#[allow(clippy::too_many_arguments)]
fn run_playback_thread(
    device: Device,
    sample_rate: u32,
    channels: u16,
    block_size: u32,
    track: Arc<Mutex<Option<WavTrack>>>,
    vis: Arc<Mutex<VisualizationBuffer>>,
    state: Arc<Mutex<PlaybackState>>,
    command_rx: mpsc::Receiver<PlaybackCommand>,
    ready_tx: mpsc::Sender<Result<(), PlaybackError>>,
) {
    let stream_config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Fixed(block_size),
    };

    let sample_format = match device.default_output_config() {
        Ok(config) => config.sample_format(),
        Err(e) => {
            let _ = ready_tx.send(Err(PlaybackError::Config(e.to_string())));
            return;
        }
    };

    let exhausted = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));

    let stream = match sample_format {
        SampleFormat::F32 => build_playback_stream::<f32>(
            &device,
            &stream_config,
            track.clone(),
            vis,
            exhausted.clone(),
            failed.clone(),
        ),
        SampleFormat::I16 => build_playback_stream::<i16>(
            &device,
            &stream_config,
            track.clone(),
            vis,
            exhausted.clone(),
            failed.clone(),
        ),
        SampleFormat::U16 => build_playback_stream::<u16>(
            &device,
            &stream_config,
            track.clone(),
            vis,
            exhausted.clone(),
            failed.clone(),
        ),
        other => {
            let _ = ready_tx.send(Err(PlaybackError::Config(format!(
                "unsupported sample format {other}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(PlaybackError::BuildStream(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(PlaybackError::StartStream(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    loop {
        match command_rx.try_recv() {
            Ok(PlaybackCommand::Pause) => {
                if let Err(e) = stream.pause() {
                    log::warn!("pause failed: {e}");
                }
            }
            Ok(PlaybackCommand::Resume) => {
                if let Err(e) = stream.play() {
                    log::warn!("resume failed: {e}");
                }
            }
            Ok(PlaybackCommand::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }
        if exhausted.load(Ordering::Acquire) {
            log::info!("playback reached end of stream");
            break;
        }
        if failed.load(Ordering::Relaxed) {
            log::error!("output stream terminated by the driver");
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    // Close the device before touching the track; the callback has
    // quiesced once the stream is dropped.
    drop(stream);

    {
        let mut guard = track.lock();
        if let Some(track) = guard.as_mut() {
            if let Err(e) = track.rewind() {
                log::warn!("failed to rewind track: {e}");
            }
        }
    }
    *state.lock() = PlaybackState::Loaded;
}

/// Build the output stream for a given device sample type.
fn build_playback_stream<T>(
    device: &Device,
    config: &StreamConfig,
    track: Arc<Mutex<Option<WavTrack>>>,
    vis: Arc<Mutex<VisualizationBuffer>>,
    exhausted: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
            // Fixed block size, so this only allocates on the first call.
            scratch.resize(out.len(), 0.0);

            {
                let mut guard = track.lock();
                match guard.as_mut() {
                    Some(source) if !exhausted.load(Ordering::Acquire) => {
                        render_block(source, &mut scratch, &vis, &exhausted);
                    }
                    _ => scratch.fill(0.0),
                }
            }

            for (slot, &sample) in out.iter_mut().zip(scratch.iter()) {
                *slot = T::from_sample(sample);
            }
        },
        move |err| match err {
            cpal::StreamError::DeviceNotAvailable => {
                failed.store(true, Ordering::Relaxed);
                log::error!("output device disappeared: {err}");
            }
            other => log::warn!("output stream reported: {other}"),
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::super::file::test_signal::write_sine_wav;
    use super::*;

    fn engine() -> PlaybackEngine {
        let vis = Arc::new(Mutex::new(VisualizationBuffer::new(64)));
        PlaybackEngine::new(EngineConfig::default(), vis)
    }

    /// Stereo ramp source delivering a fixed number of frames in total.
    struct RampSource {
        remaining: usize,
        next: f32,
    }

    impl RampSource {
        fn new(frames: usize) -> Self {
            Self {
                remaining: frames,
                next: 1.0,
            }
        }
    }

    impl SampleSource for RampSource {
        fn sample_rate(&self) -> u32 {
            48_000
        }

        fn channels(&self) -> u16 {
            2
        }

        fn read_block(&mut self, out: &mut [f32]) -> usize {
            let frames = (out.len() / 2).min(self.remaining);
            for frame in 0..frames {
                // Identical channels, so the mono mix reproduces the ramp.
                out[frame * 2] = self.next;
                out[frame * 2 + 1] = self.next;
                self.next += 1.0;
            }
            self.remaining -= frames;
            frames * 2
        }
    }

    #[test]
    fn render_fills_full_blocks_and_feeds_the_mono_mix() {
        let vis = Mutex::new(VisualizationBuffer::new(4));
        let exhausted = AtomicBool::new(false);
        let mut source = RampSource::new(100);
        let mut out = vec![0.0f32; 8];

        let written = render_block(&mut source, &mut out, &vis, &exhausted);

        assert_eq!(written, 8);
        assert!(!exhausted.load(Ordering::Acquire));
        assert_eq!(vis.lock().snapshot(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn render_zero_pads_the_final_short_block_and_flags_exhaustion() {
        let vis = Mutex::new(VisualizationBuffer::new(4));
        let exhausted = AtomicBool::new(false);
        let mut source = RampSource::new(3);
        let mut out = vec![9.9f32; 10];

        let written = render_block(&mut source, &mut out, &vis, &exhausted);

        assert_eq!(written, 6);
        assert!(exhausted.load(Ordering::Acquire));
        assert_eq!(&out[6..], &[0.0, 0.0, 0.0, 0.0]);
        // Only delivered samples reach the buffer, not the padding.
        assert_eq!(vis.lock().snapshot(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn render_on_an_exhausted_source_delivers_silence_only() {
        let vis = Mutex::new(VisualizationBuffer::new(4));
        let exhausted = AtomicBool::new(false);
        let mut source = RampSource::new(0);
        let mut out = vec![5.0f32; 4];

        let written = render_block(&mut source, &mut out, &vis, &exhausted);

        assert_eq!(written, 0);
        assert!(exhausted.load(Ordering::Acquire));
        assert_eq!(out, vec![0.0; 4]);
        assert_eq!(vis.lock().snapshot(), vec![0.0; 4]);
    }

    #[test]
    fn starts_idle_and_rejects_play_without_a_file() {
        let mut playback = engine();
        assert_eq!(playback.state(), PlaybackState::Idle);
        assert!(matches!(
            playback.play(None),
            Err(PlaybackError::NothingLoaded)
        ));
        assert_eq!(playback.state(), PlaybackState::Idle);
    }

    #[test]
    fn load_reaches_loaded_at_position_zero() {
        let path = write_sine_wav("load-ok", 8_000, 1, 64, 100.0);
        let mut playback = engine();

        playback.load(&path).unwrap();
        assert_eq!(playback.state(), PlaybackState::Loaded);
        assert_eq!(playback.position_frames(), Some(0));
        assert_eq!(playback.sample_rate(), Some(8_000));
    }

    #[test]
    fn failed_load_discards_the_previous_track() {
        let path = write_sine_wav("load-discard", 8_000, 1, 64, 100.0);
        let mut playback = engine();
        playback.load(&path).unwrap();

        assert!(playback.load("/nonexistent/next.wav").is_err());
        assert_eq!(playback.state(), PlaybackState::Idle);
        assert!(playback.sample_rate().is_none());
    }

    #[test]
    fn stop_rewinds_a_partially_read_track() {
        let _ = env_logger::builder().is_test(true).try_init();
        let path = write_sine_wav("stop-rewind", 8_000, 1, 64, 100.0);
        let mut playback = engine();
        playback.load(&path).unwrap();

        {
            let mut guard = playback.track.lock();
            let mut block = vec![0.0f32; 16];
            guard.as_mut().unwrap().read_block(&mut block);
        }
        assert_eq!(playback.position_frames(), Some(16));

        playback.stop();
        assert_eq!(playback.state(), PlaybackState::Loaded);
        assert_eq!(playback.position_frames(), Some(0));
    }

    #[test]
    fn exhausted_track_stops_back_to_loaded_at_position_zero() {
        let path = write_sine_wav("eos-loop", 8_000, 1, 100, 100.0);
        let mut playback = engine();
        playback.load(&path).unwrap();

        // Drive the callback kernel the way the device would until the
        // track runs dry.
        let exhausted = AtomicBool::new(false);
        let vis = Mutex::new(VisualizationBuffer::new(64));
        let mut block = vec![0.0f32; 32];
        let mut callbacks = 0;
        while !exhausted.load(Ordering::Acquire) {
            let mut guard = playback.track.lock();
            render_block(guard.as_mut().unwrap(), &mut block, &vis, &exhausted);
            drop(guard);
            callbacks += 1;
            assert!(callbacks <= 8, "source never signalled end of stream");
        }
        assert_eq!(playback.position_frames(), Some(100));

        playback.stop();
        assert_eq!(playback.state(), PlaybackState::Loaded);
        assert_eq!(playback.position_frames(), Some(0));

        // The rewound track is immediately playable again from the start.
        let mut first = vec![0.0f32; 16];
        playback.track.lock().as_mut().unwrap().read_block(&mut first);
        assert_eq!(playback.position_frames(), Some(16));
    }

    #[test]
    fn pause_outside_playing_is_a_no_op() {
        let path = write_sine_wav("pause-noop", 8_000, 1, 64, 100.0);
        let mut playback = engine();
        playback.load(&path).unwrap();

        playback.pause();
        assert_eq!(playback.state(), PlaybackState::Loaded);
    }
}
