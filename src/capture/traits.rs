//! Capture trait definitions
//!
//! Device-agnostic seams between the capture loops and the underlying
//! surfaces. Production backends live in `screen`, `camera`, and `audio`;
//! tests drive the same loops with synthetic implementations.

use thiserror::Error;

/// Errors from a capture surface or audio input.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// A single acquisition missed (device busy, stream hiccup). The capture
    /// loop absorbs these; only a run of them escalates to source loss.
    #[error("transient read failure: {0}")]
    Transient(String),

    /// The device could not be opened or went away entirely.
    #[error("device unavailable: {0}")]
    Device(String),
}

/// Raw pixel data from a capture surface, before timestamping.
///
/// Pixels are tightly packed RGB24.
#[derive(Debug)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// One frame-producing capture surface (display region or camera).
///
/// `grab` blocks until the next frame is available or fails. Dropping the
/// surface releases the underlying device.
pub trait FrameSurface: Send {
    fn grab(&mut self) -> Result<CapturedFrame, CaptureError>;
}

/// One block-producing audio input.
///
/// `read_block` blocks until up to `frames_per_block` sample frames are
/// available and returns them interleaved; it may return fewer at the tail
/// of the stream (the capture loop zero-pads). Dropping releases the device.
pub trait AudioInput: Send {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn frames_per_block(&self) -> usize;
    fn read_block(&mut self) -> Result<Vec<i16>, CaptureError>;
}

/// Constructs a [`FrameSurface`] on the capture thread.
///
/// Device handles (a nokhwa camera, an ffmpeg pipe) are created where they
/// will be used, so they never need to cross threads; open errors are
/// reported back to the caller before the session exists.
pub type SurfaceFactory =
    Box<dyn FnOnce() -> Result<Box<dyn FrameSurface>, CaptureError> + Send + 'static>;

/// Constructs an [`AudioInput`] on the audio capture thread.
pub type AudioInputFactory =
    Box<dyn FnOnce() -> Result<Box<dyn AudioInput>, CaptureError> + Send + 'static>;
