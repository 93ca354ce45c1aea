//! Core media types
//!
//! Frames and audio blocks as they flow between capture sources, the
//! compositor, and the muxer. All of these are immutable after creation;
//! ownership transfers on handoff (behind `Arc` for the frame registers).

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }

    /// Byte length of one RGB24 frame at this resolution.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Region of the display to capture, in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// One captured or composited video frame.
///
/// Pixels are tightly packed RGB24 (3 interleaved 8-bit channels, row-major,
/// no padding). The timestamp is on the session presentation timeline.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Timestamp,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp: Timestamp) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 3);
        Frame {
            data,
            width,
            height,
            timestamp,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// RGB triple at (x, y). Panics out of bounds; callers clamp first.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// One block of captured PCM audio.
///
/// Samples are interleaved signed 16-bit; `samples.len()` is always a
/// multiple of `channels` (the capture source zero-pads short final blocks
/// to the device's frame alignment).
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
    pub timestamp: Timestamp,
}

impl AudioBlock {
    pub fn new(samples: Vec<i16>, channels: u16, sample_rate: u32, timestamp: Timestamp) -> Self {
        debug_assert!(channels > 0);
        debug_assert_eq!(samples.len() % channels as usize, 0);
        AudioBlock {
            samples,
            channels,
            sample_rate,
            timestamp,
        }
    }

    /// Number of sample frames (one sample per channel) in this block.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Samples as little-endian bytes, for raw PCM sinks.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }
}
