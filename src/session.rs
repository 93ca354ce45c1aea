//! Recording session orchestration
//!
//! A `Session` is one recording run: it opens the devices, spawns the three
//! capture sources and the compositor/encoder loop, and tears everything
//! down in order on `stop`. Sessions are never reused; a second `stop` is a
//! no-op.
//!
//! Orchestrators observe the session through the event broadcast
//! ([`Session::subscribe`]) and the read-only preview tap
//! ([`Session::preview`]); neither participates in the encode path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::capture::audio::{AudioSource, CpalAudioInput};
use crate::capture::camera::NokhwaCameraSurface;
use crate::capture::register::FrameRegister;
use crate::capture::screen::FfmpegScreenSurface;
use crate::capture::traits::{AudioInputFactory, FrameSurface, SurfaceFactory};
use crate::capture::video::VideoSource;
use crate::clock::{FrameClock, Timestamp};
use crate::compositor::{FrameCompositor, OverlayPlacement, SharedPlacement};
use crate::config::SessionConfig;
use crate::encoder::ffmpeg::check_ffmpeg_available;
use crate::encoder::{ContainerSink, FfmpegContainerSink, Muxer};
use crate::error::{RecorderError, RecorderResult};
use crate::event::{SessionEvent, SourceKind};
use crate::frame::{AudioBlock, Frame};

/// Read-only subscription to the latest composite frame.
pub type PreviewReceiver = watch::Receiver<Option<Arc<Frame>>>;

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub output_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub video_frames: u64,
    pub audio_blocks: u64,
}

/// One recording run.
pub struct Session {
    id: Uuid,
    clock: FrameClock,
    started_at: DateTime<Utc>,
    placement: SharedPlacement,
    event_tx: broadcast::Sender<SessionEvent>,
    preview_rx: PreviewReceiver,
    screen: VideoSource,
    camera: Option<VideoSource>,
    audio: Option<AudioSource>,
    encode_running: Arc<AtomicBool>,
    encode_handle: Option<JoinHandle<Muxer>>,
    stopped: bool,
}

impl Session {
    /// Start a session with production device backends (ffmpeg screen grab,
    /// nokhwa camera, cpal audio, ffmpeg container sink).
    pub fn start(config: SessionConfig) -> RecorderResult<Session> {
        Session::builder(config).start()
    }

    /// Start building a session with custom capture backends or sink.
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            screen_factory: None,
            camera_factory: None,
            audio_factory: None,
            sink: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Latest-composite tap for a live preview. Purely observational: the
    /// encode path neither waits for nor notices readers.
    pub fn preview(&self) -> PreviewReceiver {
        self.preview_rx.clone()
    }

    /// Move the camera overlay. Takes effect on the next compositor tick.
    pub fn set_overlay_placement(&self, placement: OverlayPlacement) {
        tracing::debug!(
            "overlay placement -> ({}, {}) {}x{}",
            placement.x,
            placement.y,
            placement.width,
            placement.height
        );
        *self.placement.write() = placement;
    }

    /// Whether the screen source has been lost (the session can no longer
    /// produce video and should be stopped).
    pub fn screen_lost(&self) -> bool {
        self.screen.is_lost()
    }

    /// Stop all sources, drain audio, and finalize the container.
    ///
    /// Idempotent: the second and later calls return `Ok(None)` without
    /// touching the (already closed) muxer.
    pub fn stop(&mut self) -> RecorderResult<Option<SessionSummary>> {
        if self.stopped {
            return Ok(None);
        }
        self.stopped = true;

        tracing::info!("stopping session {}", self.id);

        // Sources first: after these return every device is released and no
        // further frames or blocks can arrive during finalize.
        self.screen.stop();
        if let Some(camera) = self.camera.as_mut() {
            camera.stop();
        }
        let audio_blocks = match self.audio.as_mut() {
            Some(audio) => audio.stop(),
            None => Vec::new(),
        };

        // Then the encoder loop; it hands the muxer back.
        self.encode_running.store(false, Ordering::SeqCst);
        let mut muxer = match self.encode_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| RecorderError::Encoding("encode thread panicked".to_string()))?,
            None => return Ok(None),
        };

        // The container aligns both raw tracks at t=0, but the video track's
        // origin is its first composed frame, not session start: the screen
        // source may take a while to deliver its first frame while audio is
        // already accumulating. PCM captured before the video origin would
        // lead the video at mux time, so it is trimmed off.
        let audio_blocks = match muxer.first_video_timestamp() {
            Some(video_start) => trim_audio_before(audio_blocks, video_start),
            None => audio_blocks,
        };

        // Drain the session's audio sequence in capture order.
        for block in &audio_blocks {
            muxer.push_audio(block)?;
        }

        let duration = self.clock.now();
        let result = muxer.finalize();

        let output_path = match result {
            Ok(path) => path,
            Err(e) => {
                if let Some(partial) = e.partial_path() {
                    let _ = self.event_tx.send(SessionEvent::FinalizeFailed {
                        partial_path: partial.clone(),
                    });
                }
                return Err(e);
            }
        };

        let summary = SessionSummary {
            id: self.id,
            output_path,
            started_at: self.started_at,
            duration_ms: duration.as_millis(),
            video_frames: muxer.video_frames(),
            audio_blocks: muxer.audio_blocks(),
        };

        let _ = self.event_tx.send(SessionEvent::Stopped);
        tracing::info!(
            "session {} stopped: {} frames, {} audio blocks in {}ms",
            self.id,
            summary.video_frames,
            summary.audio_blocks,
            summary.duration_ms
        );

        Ok(Some(summary))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.stopped {
            if let Err(e) = self.stop() {
                tracing::error!("session teardown failed on drop: {e}");
            }
        }
    }
}

/// Drop PCM captured before the given point on the session timeline.
///
/// Blocks are stamped at capture completion, so each covers the interval
/// ending at its timestamp. Blocks entirely before the cutoff are dropped;
/// a straddling block loses its leading sample frames (whole frames, so
/// channel interleaving stays aligned).
fn trim_audio_before(blocks: Vec<AudioBlock>, cutoff: Timestamp) -> Vec<AudioBlock> {
    let cutoff_ms = cutoff.as_millis();
    let mut kept = Vec::with_capacity(blocks.len());
    for mut block in blocks {
        if block.sample_rate == 0 {
            kept.push(block);
            continue;
        }
        let span_ms = block.frame_count() as u64 * 1000 / block.sample_rate as u64;
        let end_ms = block.timestamp.as_millis();
        if end_ms <= cutoff_ms {
            continue;
        }
        let start_ms = end_ms.saturating_sub(span_ms);
        if start_ms < cutoff_ms {
            let trim_frames =
                ((cutoff_ms - start_ms) * block.sample_rate as u64 / 1000) as usize;
            let trim = (trim_frames * block.channels as usize).min(block.samples.len());
            block.samples.drain(..trim);
            if block.samples.is_empty() {
                continue;
            }
        }
        kept.push(block);
    }
    kept
}

/// Configures capture backends and the container sink before starting.
pub struct SessionBuilder {
    config: SessionConfig,
    screen_factory: Option<SurfaceFactory>,
    camera_factory: Option<SurfaceFactory>,
    audio_factory: Option<AudioInputFactory>,
    sink: Option<Box<dyn ContainerSink>>,
}

impl SessionBuilder {
    /// Replace the screen capture backend.
    pub fn screen_surface(mut self, factory: SurfaceFactory) -> Self {
        self.screen_factory = Some(factory);
        self
    }

    /// Replace the camera capture backend. Ignored when the config disables
    /// the camera.
    pub fn camera_surface(mut self, factory: SurfaceFactory) -> Self {
        self.camera_factory = Some(factory);
        self
    }

    /// Replace the audio input backend. Ignored when the config disables
    /// audio.
    pub fn audio_input(mut self, factory: AudioInputFactory) -> Self {
        self.audio_factory = Some(factory);
        self
    }

    /// Replace the container sink.
    pub fn sink(mut self, sink: Box<dyn ContainerSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Open devices, spawn the pipeline, and begin recording.
    ///
    /// Device-open failures are returned here, before any session exists;
    /// nothing is written to the output path in that case.
    pub fn start(self) -> RecorderResult<Session> {
        let SessionBuilder {
            config,
            screen_factory,
            camera_factory,
            audio_factory,
            sink,
        } = self;

        config
            .validate()
            .map_err(RecorderError::Configuration)?;

        // The default backends all ride on ffmpeg; fail fast before any
        // device is opened.
        let needs_ffmpeg = sink.is_none() || screen_factory.is_none();
        if needs_ffmpeg {
            check_ffmpeg_available()?;
        }

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = FrameClock::start();
        let (event_tx, _) = broadcast::channel(100);
        let placement: SharedPlacement = Arc::new(RwLock::new(config.overlay));

        tracing::info!(
            "starting session {} -> {} ({} @ {}fps)",
            id,
            config.output_path.display(),
            config.output_resolution,
            config.frame_rate
        );

        // Audio first: the container sink needs the input's actual sample
        // rate and channel count.
        let audio = if config.enable_audio {
            let factory = audio_factory.unwrap_or_else(|| {
                let device = config.audio_device.clone();
                let frames = config.audio_frames_per_block;
                Box::new(move || {
                    CpalAudioInput::open(device, frames)
                        .map(|input| Box::new(input) as Box<dyn crate::capture::AudioInput>)
                })
            });
            Some(AudioSource::spawn(
                factory,
                clock,
                config.source_lost_threshold,
                event_tx.clone(),
            )?)
        } else {
            None
        };

        let (sample_rate, channels) = audio
            .as_ref()
            .map(|a| (a.sample_rate(), a.channels()))
            .unwrap_or((44_100, 2));

        let mut muxer = match sink {
            Some(sink) => Muxer::new(sink),
            None => Muxer::new(Box::new(FfmpegContainerSink::create(
                &config.output_path,
                config.output_resolution,
                config.frame_rate,
                sample_rate,
                channels,
            )?)),
        };
        muxer.begin()?;

        let interval = config.frame_interval();

        let screen_register = Arc::new(FrameRegister::new());
        let screen_factory = screen_factory.unwrap_or_else(|| {
            let region = config.capture_region;
            let rate = config.frame_rate;
            Box::new(move || {
                FfmpegScreenSurface::open(region, rate)
                    .map(|surface| Box::new(surface) as Box<dyn FrameSurface>)
            })
        });
        let screen = VideoSource::spawn(
            SourceKind::Screen,
            screen_factory,
            clock,
            interval,
            config.source_lost_threshold,
            screen_register.clone(),
            event_tx.clone(),
        )?;

        let camera_register = Arc::new(FrameRegister::new());
        let camera = match config.camera_device_index {
            Some(index) => {
                let factory = camera_factory.unwrap_or_else(|| {
                    Box::new(move || {
                        NokhwaCameraSurface::open(index)
                            .map(|surface| Box::new(surface) as Box<dyn FrameSurface>)
                    })
                });
                Some(VideoSource::spawn(
                    SourceKind::Camera,
                    factory,
                    clock,
                    interval,
                    config.source_lost_threshold,
                    camera_register.clone(),
                    event_tx.clone(),
                )?)
            }
            None => None,
        };

        // Compositor + encoder loop, paced by the output frame rate. The
        // synchronous push into the muxer is the pipeline's only
        // backpressure point: a slow encode stretches the tick.
        let compositor = FrameCompositor::new(
            screen_register,
            camera_register,
            placement.clone(),
            config.output_resolution,
        );
        let encode_running = Arc::new(AtomicBool::new(true));
        let (preview_tx, preview_rx) = watch::channel(None::<Arc<Frame>>);

        let loop_running = encode_running.clone();
        let screen_lost = screen.lost_handle();
        let encode_handle = std::thread::Builder::new()
            .name("encode".to_string())
            .spawn(move || {
                let mut next_tick = Instant::now() + interval;
                while loop_running.load(Ordering::SeqCst) {
                    if screen_lost.load(Ordering::SeqCst) {
                        tracing::error!("screen source lost; halting encode loop");
                        break;
                    }

                    if let Some(frame) = compositor.tick() {
                        let frame = Arc::new(frame);
                        preview_tx.send_replace(Some(frame.clone()));
                        if let Err(e) = muxer.push_video(&frame) {
                            tracing::error!("video track rejected frame: {e}");
                            break;
                        }
                    }

                    let now = Instant::now();
                    if next_tick > now {
                        std::thread::sleep(next_tick - now);
                        next_tick += interval;
                    } else {
                        // Encode overran the interval; resynchronize rather
                        // than burst.
                        next_tick = now + interval;
                    }
                }
                muxer
            })?;

        let _ = event_tx.send(SessionEvent::Started);

        Ok(Session {
            id,
            clock,
            started_at,
            placement,
            event_tx,
            preview_rx,
            screen,
            camera,
            audio,
            encode_running,
            encode_handle: Some(encode_handle),
            stopped: false,
        })
    }
}
