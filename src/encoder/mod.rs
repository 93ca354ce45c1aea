//! Encoding and muxing
//!
//! The muxer is the sole writer of the output artifact. It keeps two
//! append-only tracks (composite video frames, PCM audio blocks) behind a
//! [`ContainerSink`], enforces per-track timestamp order, and walks the
//! forward-only state machine `Idle -> Recording -> Finalizing -> Closed`.

pub mod ffmpeg;

use std::path::PathBuf;

use crate::clock::Timestamp;
use crate::error::{RecorderError, RecorderResult};
use crate::frame::{AudioBlock, Frame};

pub use ffmpeg::FfmpegContainerSink;

/// Destination for encoded media.
///
/// The production sink drives ffmpeg; tests use in-memory sinks. `finalize`
/// must write the container trailer as its single last step, so a failure
/// anywhere earlier leaves a diagnosably incomplete file rather than a
/// corrupt one. A sink with zero audio blocks must still finalize to a
/// valid container.
pub trait ContainerSink: Send {
    fn write_video_frame(&mut self, frame: &Frame) -> RecorderResult<()>;
    fn write_audio_block(&mut self, block: &AudioBlock) -> RecorderResult<()>;
    /// Flush both tracks and close the container. Returns the final path.
    fn finalize(self: Box<Self>) -> RecorderResult<PathBuf>;
    /// Path retained for diagnosis if finalize never completes.
    fn partial_path(&self) -> PathBuf;
}

/// Muxer lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    Idle,
    Recording,
    Finalizing,
    Closed,
}

/// Two-track encoder front end with timestamp-order enforcement.
pub struct Muxer {
    state: MuxerState,
    sink: Option<Box<dyn ContainerSink>>,
    first_video_ts: Option<Timestamp>,
    last_video_ts: Option<Timestamp>,
    last_audio_ts: Option<Timestamp>,
    video_frames: u64,
    audio_blocks: u64,
}

impl Muxer {
    pub fn new(sink: Box<dyn ContainerSink>) -> Self {
        Muxer {
            state: MuxerState::Idle,
            sink: Some(sink),
            first_video_ts: None,
            last_video_ts: None,
            last_audio_ts: None,
            video_frames: 0,
            audio_blocks: 0,
        }
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames
    }

    pub fn audio_blocks(&self) -> u64 {
        self.audio_blocks
    }

    /// Timestamp of the first frame written to the video track, i.e. the
    /// video track's origin on the session timeline.
    pub fn first_video_timestamp(&self) -> Option<Timestamp> {
        self.first_video_ts
    }

    /// Begin accepting media.
    pub fn begin(&mut self) -> RecorderResult<()> {
        match self.state {
            MuxerState::Idle => {
                self.state = MuxerState::Recording;
                Ok(())
            }
            MuxerState::Recording => Err(RecorderError::AlreadyRecording),
            _ => Err(RecorderError::SessionClosed),
        }
    }

    /// Append one composite frame to the video track.
    ///
    /// Timestamps must be non-decreasing; a violation is a programming
    /// error and aborts the muxer.
    pub fn push_video(&mut self, frame: &Frame) -> RecorderResult<()> {
        self.ensure_recording()?;
        Self::check_order("video", &mut self.last_video_ts, frame.timestamp)?;
        self.sink_mut()?.write_video_frame(frame)?;
        if self.first_video_ts.is_none() {
            self.first_video_ts = Some(frame.timestamp);
        }
        self.video_frames += 1;
        Ok(())
    }

    /// Append one PCM block to the audio track.
    pub fn push_audio(&mut self, block: &AudioBlock) -> RecorderResult<()> {
        self.ensure_recording()?;
        Self::check_order("audio", &mut self.last_audio_ts, block.timestamp)?;
        self.sink_mut()?.write_audio_block(block)?;
        self.audio_blocks += 1;
        Ok(())
    }

    /// Flush both tracks and close the container.
    ///
    /// From `Idle` this is a no-op (nothing was ever recorded, nothing to
    /// write). After `Closed` it fails with `SessionClosed`.
    pub fn finalize(&mut self) -> RecorderResult<Option<PathBuf>> {
        match self.state {
            MuxerState::Idle => {
                self.state = MuxerState::Closed;
                self.sink = None;
                Ok(None)
            }
            MuxerState::Recording => {
                self.state = MuxerState::Finalizing;
                let sink = self.sink.take().ok_or(RecorderError::SessionClosed)?;
                tracing::info!(
                    "finalizing container: {} video frames, {} audio blocks",
                    self.video_frames,
                    self.audio_blocks
                );
                let result = sink.finalize();
                self.state = MuxerState::Closed;
                match result {
                    Ok(path) => Ok(Some(path)),
                    Err(e) => {
                        tracing::error!("finalize failed: {e}");
                        Err(e)
                    }
                }
            }
            MuxerState::Finalizing | MuxerState::Closed => Err(RecorderError::SessionClosed),
        }
    }

    /// Partial file path for failure reporting.
    pub fn partial_path(&self) -> Option<PathBuf> {
        self.sink.as_ref().map(|s| s.partial_path())
    }

    fn ensure_recording(&self) -> RecorderResult<()> {
        match self.state {
            MuxerState::Recording => Ok(()),
            MuxerState::Idle => Err(RecorderError::Configuration(
                "muxer not started".to_string(),
            )),
            _ => Err(RecorderError::SessionClosed),
        }
    }

    fn sink_mut(&mut self) -> RecorderResult<&mut Box<dyn ContainerSink>> {
        self.sink.as_mut().ok_or(RecorderError::SessionClosed)
    }

    fn check_order(
        track: &'static str,
        last: &mut Option<Timestamp>,
        next: Timestamp,
    ) -> RecorderResult<()> {
        if let Some(prev) = *last {
            if next < prev {
                return Err(RecorderError::TimestampOrder {
                    track,
                    prev_ms: prev.as_millis(),
                    next_ms: next.as_millis(),
                });
            }
        }
        *last = Some(next);
        Ok(())
    }
}
