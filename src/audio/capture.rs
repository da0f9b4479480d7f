//! Live input capture onto the visualization buffer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, StreamConfig};
use parking_lot::Mutex;
use thiserror::Error;

use super::{devices, mix_to_mono, DeviceError, EngineConfig, VisualizationBuffer};

/// Capture errors, surfaced synchronously by [`CaptureEngine::start`].
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to query input config: {0}")]
    Config(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(String),

    #[error("failed to start input stream: {0}")]
    StartStream(String),

    #[error("capture thread error: {0}")]
    Thread(String),
}

enum CaptureCommand {
    Stop,
}

/// Live input engine: Idle ⇄ Listening.
///
/// The non-`Send` `cpal::Stream` lives on a dedicated `audio-capture` thread;
/// this handle talks to it over a command channel and joins it on stop, so
/// no buffer writes happen after `stop()` returns.
pub struct CaptureEngine {
    config: EngineConfig,
    vis: Arc<Mutex<VisualizationBuffer>>,
    session: Option<CaptureSession>,
}

struct CaptureSession {
    command_tx: mpsc::Sender<CaptureCommand>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl CaptureEngine {
    pub fn new(config: EngineConfig, vis: Arc<Mutex<VisualizationBuffer>>) -> Self {
        Self {
            config,
            vis,
            session: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.session.is_some()
    }

    /// Sample rate negotiated for the active session, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.sample_rate)
    }

    /// Open the input stream and start filling the visualization buffer.
    ///
    /// Mono is requested; multi-channel input is mixed down in the callback.
    /// Returns the sample rate actually negotiated with the device — the
    /// preference list is attempted in order and the device default config is
    /// the final fallback, so callers must not assume the rate they asked
    /// for. Setup failures are returned here and leave the engine idle.
    pub fn start(&mut self, device_id: Option<&str>) -> Result<u32, CaptureError> {
        if let Some(session) = &self.session {
            return Ok(session.sample_rate);
        }

        let device = devices::find_input_device(device_id)?;
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let vis = self.vis.clone();
        let config = self.config.clone();

        let thread = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_capture_thread(device, config, vis, command_rx, ready_tx))
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        // Stream setup happens on the capture thread (the stream is not
        // Send); wait for its verdict so failures surface to this caller.
        let sample_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(CaptureError::Thread(
                    "capture thread exited before reporting".to_string(),
                ));
            }
        };

        log::info!("listening at {sample_rate} Hz");
        self.session = Some(CaptureSession {
            command_tx,
            thread: Some(thread),
            sample_rate,
        });
        Ok(sample_rate)
    }

    /// Halt and close the input stream.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.command_tx.send(CaptureCommand::Stop);
            if let Some(handle) = session.thread.take() {
                let _ = handle.join();
            }
            log::info!("capture stopped");
        }
    }

    /// Session backed by a parked thread, for mode-exclusivity tests.
    #[cfg(test)]
    pub(crate) fn attach_idle_session(&mut self, sample_rate: u32) {
        let (command_tx, command_rx) = mpsc::channel();
        let thread = thread::spawn(move || {
            let _ = command_rx.recv();
        });
        self.session = Some(CaptureSession {
            command_tx,
            thread: Some(thread),
            sample_rate,
        });
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the input stream on its dedicated thread until told to stop.
fn run_capture_thread(
    device: Device,
    config: EngineConfig,
    vis: Arc<Mutex<VisualizationBuffer>>,
    command_rx: mpsc::Receiver<CaptureCommand>,
    ready_tx: mpsc::Sender<Result<u32, CaptureError>>,
) {
    let (stream_config, sample_format) = match negotiate_input_config(&device, &config) {
        Ok(negotiated) => negotiated,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels as usize;
    let failed = Arc::new(AtomicBool::new(false));

    let stream = match sample_format {
        SampleFormat::F32 => {
            build_capture_stream::<f32>(&device, &stream_config, vis, channels, failed.clone())
        }
        SampleFormat::I16 => {
            build_capture_stream::<i16>(&device, &stream_config, vis, channels, failed.clone())
        }
        SampleFormat::U16 => {
            build_capture_stream::<u16>(&device, &stream_config, vis, channels, failed.clone())
        }
        other => {
            let _ = ready_tx.send(Err(CaptureError::Config(format!(
                "unsupported sample format {other}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::BuildStream(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::StartStream(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(sample_rate));
    log::info!("input stream open: {sample_rate} Hz, {channels} channel(s)");

    loop {
        match command_rx.try_recv() {
            Ok(CaptureCommand::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }
        if failed.load(Ordering::Relaxed) {
            log::error!("input stream terminated by the driver");
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    // Dropping the stream closes the device; no callback runs afterwards.
}

/// Pick an input config: walk the preferred rates (mono ranges first), then
/// fall back to whatever the device reports as its default.
fn negotiate_input_config(
    device: &Device,
    config: &EngineConfig,
) -> Result<(StreamConfig, SampleFormat), CaptureError> {
    let ranges: Vec<_> = match device.supported_input_configs() {
        Ok(iter) => iter.collect(),
        Err(e) => {
            log::warn!("input config query failed, using device default: {e}");
            Vec::new()
        }
    };

    for &rate in &config.capture_rate_preference {
        let mut candidates: Vec<_> = ranges
            .iter()
            .filter(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
            .cloned()
            .collect();
        candidates.sort_by_key(|r| r.channels());

        if let Some(range) = candidates.into_iter().next() {
            let supported = range.with_sample_rate(SampleRate(rate));
            let sample_format = supported.sample_format();
            let mut stream_config: StreamConfig = supported.into();
            stream_config.buffer_size = BufferSize::Fixed(config.block_size);
            return Ok((stream_config, sample_format));
        }
        log::debug!("device rejects {rate} Hz, trying next preference");
    }

    let default = device
        .default_input_config()
        .map_err(|e| CaptureError::Config(e.to_string()))?;
    log::info!(
        "no preferred rate supported, using device default at {} Hz",
        default.sample_rate().0
    );
    let sample_format = default.sample_format();
    let mut stream_config: StreamConfig = default.into();
    stream_config.buffer_size = BufferSize::Fixed(config.block_size);
    Ok((stream_config, sample_format))
}

/// Build the input stream for a given sample type.
fn build_capture_stream<T>(
    device: &Device,
    config: &StreamConfig,
    vis: Arc<Mutex<VisualizationBuffer>>,
    channels: usize,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::Sample + cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let interleaved: Vec<f32> = data
                .iter()
                .map(|s| cpal::Sample::from_sample(*s))
                .collect();
            let mono = mix_to_mono(&interleaved, channels);
            vis.lock().write(&mono);
        },
        move |err| match err {
            cpal::StreamError::DeviceNotAvailable => {
                failed.store(true, Ordering::Relaxed);
                log::error!("input device disappeared: {err}");
            }
            other => log::warn!("input stream reported: {other}"),
        },
        None,
    )
}
