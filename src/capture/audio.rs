//! Audio capture
//!
//! `AudioSource` runs the blocking-read loop of the session: pull fixed-size
//! PCM blocks from an [`AudioInput`], stamp them, and keep them in an
//! append-only sequence that is drained once at finalize. `CpalAudioInput`
//! is the production input: the cpal stream lives on its own thread (cpal
//! streams are not `Send`) and samples cross to the reader over a channel,
//! re-blocked to the configured size and converted to interleaved i16.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use tokio::sync::broadcast;

use crate::capture::traits::{AudioInput, AudioInputFactory, CaptureError};
use crate::clock::FrameClock;
use crate::error::{RecorderError, RecorderResult};
use crate::event::{SessionEvent, SourceKind};
use crate::frame::AudioBlock;

/// A running audio capture loop.
///
/// Blocks accumulate for the whole session and are handed over in order when
/// the source is stopped.
pub struct AudioSource {
    running: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
    handle: Option<JoinHandle<Vec<AudioBlock>>>,
    sample_rate: u32,
    channels: u16,
}

impl AudioSource {
    /// Spawn the audio thread. The input factory runs on that thread; open
    /// errors are returned here, before any session state exists.
    pub fn spawn(
        factory: AudioInputFactory,
        clock: FrameClock,
        lost_threshold: u32,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> RecorderResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let lost = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_running = running.clone();
        let thread_lost = lost.clone();

        let handle = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let mut input = match factory() {
                    Ok(input) => {
                        let _ = ready_tx.send(Ok((input.sample_rate(), input.channels())));
                        input
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return Vec::new();
                    }
                };

                let channels = input.channels();
                let sample_rate = input.sample_rate();
                let block_samples = input.frames_per_block() * channels as usize;
                let threshold = lost_threshold.max(1);

                let mut blocks: Vec<AudioBlock> = Vec::new();
                let mut consecutive_failures = 0u32;

                while thread_running.load(Ordering::SeqCst) {
                    match input.read_block() {
                        Ok(samples) if samples.is_empty() => {
                            // Nothing arrived this iteration; poll again.
                        }
                        Ok(mut samples) => {
                            consecutive_failures = 0;
                            if samples.len() < block_samples {
                                // Partial (final) block: zero-pad to the
                                // device block alignment instead of dropping.
                                samples.resize(block_samples, 0);
                            }
                            blocks.push(AudioBlock::new(
                                samples,
                                channels,
                                sample_rate,
                                clock.now(),
                            ));
                        }
                        Err(CaptureError::Transient(reason)) => {
                            consecutive_failures += 1;
                            tracing::warn!(
                                "audio read failure ({}/{}): {}",
                                consecutive_failures,
                                threshold,
                                reason
                            );
                            if consecutive_failures >= threshold {
                                tracing::error!(
                                    "audio source lost after {} consecutive failures",
                                    consecutive_failures
                                );
                                thread_lost.store(true, Ordering::SeqCst);
                                let _ = event_tx.send(SessionEvent::SourceLost {
                                    source: SourceKind::Audio,
                                    at: clock.now(),
                                });
                                break;
                            }
                        }
                        Err(CaptureError::Device(reason)) => {
                            tracing::error!("audio device lost: {reason}");
                            thread_lost.store(true, Ordering::SeqCst);
                            let _ = event_tx.send(SessionEvent::SourceLost {
                                source: SourceKind::Audio,
                                at: clock.now(),
                            });
                            break;
                        }
                    }
                }

                drop(input);
                tracing::debug!("audio capture thread exiting with {} blocks", blocks.len());
                blocks
            })?;

        let (sample_rate, channels) = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(RecorderError::DeviceUnavailable(format!("audio: {e}")));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(RecorderError::DeviceUnavailable(
                    "audio: capture thread exited before opening the device".to_string(),
                ));
            }
        };

        tracing::info!("audio capture started ({sample_rate}Hz, {channels}ch)");

        Ok(AudioSource {
            running,
            lost,
            handle: Some(handle),
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Stop the loop, release the device, and hand over the accumulated
    /// blocks in capture order.
    pub fn stop(&mut self) -> Vec<AudioBlock> {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => {
                let blocks = handle.join().unwrap_or_default();
                tracing::info!("audio capture stopped ({} blocks)", blocks.len());
                blocks
            }
            None => Vec::new(),
        }
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Find an input device by name, or the default one.
fn find_input_device(name: Option<&str>) -> Result<Device, CaptureError> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => {
            let devices = host
                .input_devices()
                .map_err(|e| CaptureError::Device(format!("failed to list audio inputs: {e}")))?;
            for device in devices {
                if device.name().map(|n| n == wanted).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(CaptureError::Device(format!(
                "audio input '{wanted}' not found"
            )))
        }
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::Device("no default audio input device".to_string())),
    }
}

/// Production [`AudioInput`] backed by cpal.
pub struct CpalAudioInput {
    rx: mpsc::Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    stop: Arc<AtomicBool>,
    stream_thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    channels: u16,
    frames_per_block: usize,
    disconnected: bool,
}

impl CpalAudioInput {
    /// Open the named (or default) input device and start streaming.
    pub fn open(
        device_name: Option<String>,
        frames_per_block: usize,
    ) -> Result<Self, CaptureError> {
        // Validate the device up front so open errors surface synchronously.
        let device = find_input_device(device_name.as_deref())?;
        let config = device.default_input_config().map_err(|e| {
            CaptureError::Device(format!("failed to get audio input config: {e}"))
        })?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<Vec<i16>>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_stop = stop.clone();
        let stream_thread = std::thread::Builder::new()
            .name("cpal-stream".to_string())
            .spawn(move || {
                // The stream must be built and kept on this thread: cpal
                // streams are not Send.
                let device = match find_input_device(device_name.as_deref()) {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let config = match device.default_input_config() {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(CaptureError::Device(format!(
                            "failed to get audio input config: {e}"
                        ))));
                        return;
                    }
                };

                let sample_format = config.sample_format();
                let stream_config: StreamConfig = config.into();
                let err_fn = |e| tracing::error!("audio stream error: {e}");

                let stream = match sample_format {
                    SampleFormat::I16 => device.build_input_stream(
                        &stream_config,
                        {
                            let tx = tx.clone();
                            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                                let _ = tx.send(data.to_vec());
                            }
                        },
                        err_fn,
                        None,
                    ),
                    SampleFormat::F32 => device.build_input_stream(
                        &stream_config,
                        {
                            let tx = tx.clone();
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                let samples: Vec<i16> = data
                                    .iter()
                                    .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                                    .collect();
                                let _ = tx.send(samples);
                            }
                        },
                        err_fn,
                        None,
                    ),
                    SampleFormat::U16 => device.build_input_stream(
                        &stream_config,
                        {
                            let tx = tx.clone();
                            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                                let samples: Vec<i16> = data
                                    .iter()
                                    .map(|&s| (s as i32 - 32768) as i16)
                                    .collect();
                                let _ = tx.send(samples);
                            }
                        },
                        err_fn,
                        None,
                    ),
                    other => {
                        let _ = ready_tx.send(Err(CaptureError::Device(format!(
                            "unsupported audio sample format: {other:?}"
                        ))));
                        return;
                    }
                };

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(CaptureError::Device(format!(
                            "failed to build audio stream: {e}"
                        ))));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::Device(format!(
                        "failed to start audio stream: {e}"
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                while !thread_stop.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                // Stream dropped here, releasing the device.
            })
            .map_err(|e| CaptureError::Device(format!("failed to spawn audio thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = stream_thread.join();
                return Err(CaptureError::Device(
                    "audio stream thread exited before starting".to_string(),
                ));
            }
        }

        Ok(CpalAudioInput {
            rx,
            pending: VecDeque::new(),
            stop,
            stream_thread: Some(stream_thread),
            sample_rate,
            channels,
            frames_per_block,
            disconnected: false,
        })
    }
}

impl AudioInput for CpalAudioInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn frames_per_block(&self) -> usize {
        self.frames_per_block
    }

    fn read_block(&mut self) -> Result<Vec<i16>, CaptureError> {
        let block_samples = self.frames_per_block * self.channels as usize;

        while self.pending.len() < block_samples && !self.disconnected {
            match self.rx.recv_timeout(Duration::from_millis(50)) {
                Ok(samples) => self.pending.extend(samples),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    // Let the capture loop re-check its run flag.
                    return Ok(Vec::new());
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    self.disconnected = true;
                }
            }
        }

        if self.pending.is_empty() {
            return Err(CaptureError::Transient("audio stream ended".to_string()));
        }

        let take = block_samples.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }
}

impl Drop for CpalAudioInput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}
