//! Capture sources
//!
//! Screen, camera, and audio producers, each on its own thread, plus the
//! latest-value registers they hand frames off through.

pub mod audio;
pub mod camera;
pub mod register;
pub mod screen;
pub mod traits;
pub mod video;

pub use audio::{AudioSource, CpalAudioInput};
pub use register::FrameRegister;
pub use traits::{AudioInput, CaptureError, CapturedFrame, FrameSurface};
pub use video::VideoSource;
