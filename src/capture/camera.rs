//! Camera capture using nokhwa
//!
//! The camera is opened by the surface factory on the capture thread itself
//! (nokhwa handles are not required to cross threads) and frames are decoded
//! to tightly packed RGB24 for the compositor.

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

use crate::capture::traits::{CaptureError, CapturedFrame, FrameSurface};

/// Camera capture surface backed by nokhwa.
pub struct NokhwaCameraSurface {
    camera: Camera,
}

impl NokhwaCameraSurface {
    /// Open the camera at the given index and start its stream.
    pub fn open(device_index: u32) -> Result<Self, CaptureError> {
        let format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

        let mut camera = Camera::new(CameraIndex::Index(device_index), format)
            .map_err(|e| CaptureError::Device(format!("failed to open camera {device_index}: {e}")))?;

        camera
            .open_stream()
            .map_err(|e| CaptureError::Device(format!("failed to open camera stream: {e}")))?;

        let camera_format = camera.camera_format();
        tracing::info!(
            "Camera {} opened: {}x{} @ {}fps",
            device_index,
            camera_format.resolution().width(),
            camera_format.resolution().height(),
            camera_format.frame_rate()
        );

        Ok(NokhwaCameraSurface { camera })
    }
}

impl FrameSurface for NokhwaCameraSurface {
    fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CaptureError::Transient(format!("camera frame failed: {e}")))?;

        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::Transient(format!("camera frame decode failed: {e}")))?;

        let width = decoded.width();
        let height = decoded.height();
        Ok(CapturedFrame {
            data: decoded.into_raw(),
            width,
            height,
        })
    }
}

impl Drop for NokhwaCameraSurface {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {e}");
        }
    }
}
