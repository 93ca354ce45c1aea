//! Session configuration
//!
//! Defaults follow the recorder's stock setup: 1280x720 output at 30fps,
//! 44.1kHz stereo audio in 1024-frame blocks, overlay at (50, 50) sized
//! 320x240.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compositor::OverlayPlacement;
use crate::frame::{CaptureRegion, Resolution};

/// Configuration for starting a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Display region to capture
    pub capture_region: CaptureRegion,

    /// Camera device index; `None` disables the camera overlay entirely
    pub camera_device_index: Option<u32>,

    /// Whether to capture audio
    pub enable_audio: bool,

    /// Audio input device name; `None` uses the default input device
    pub audio_device: Option<String>,

    /// Path of the output container file
    pub output_path: PathBuf,

    /// Output (and encoder tick) frame rate
    pub frame_rate: u32,

    /// Output frame resolution
    pub output_resolution: Resolution,

    /// Initial camera overlay placement
    pub overlay: OverlayPlacement,

    /// Consecutive capture failures before a source is declared lost
    pub source_lost_threshold: u32,

    /// Audio sample frames per block
    pub audio_frames_per_block: usize,
}

impl SessionConfig {
    /// A session capturing the given region to the given file, with
    /// everything else at defaults.
    pub fn new(capture_region: CaptureRegion, output_path: impl Into<PathBuf>) -> Self {
        SessionConfig {
            capture_region,
            output_path: output_path.into(),
            ..Default::default()
        }
    }

    /// Interval between encoder ticks (and the capture target interval).
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.frame_rate == 0 {
            return Err("frame rate must be at least 1".into());
        }
        if self.output_resolution.width == 0 || self.output_resolution.height == 0 {
            return Err("output resolution must be non-zero".into());
        }
        if self.capture_region.width == 0 || self.capture_region.height == 0 {
            return Err("capture region must be non-zero".into());
        }
        if self.audio_frames_per_block == 0 {
            return Err("audio block size must be non-zero".into());
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            capture_region: CaptureRegion {
                x: 0,
                y: 0,
                width: 1280,
                height: 720,
            },
            camera_device_index: Some(0),
            enable_audio: true,
            audio_device: None,
            output_path: PathBuf::from("recording.mp4"),
            frame_rate: 30,
            output_resolution: Resolution::new(1280, 720),
            overlay: OverlayPlacement {
                x: 50,
                y: 50,
                width: 320,
                height: 240,
            },
            source_lost_threshold: 30,
            audio_frames_per_block: 1024,
        }
    }
}
