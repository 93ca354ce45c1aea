//! Frame composition
//!
//! Blends the latest camera frame over the latest screen frame once per
//! encoder tick. The screen frame is required (no screen, no composite);
//! the camera frame is optional. The overlay is an opaque rectangle: camera
//! pixels inside the placement, screen pixels outside. Camera pixels are
//! resampled to the placement size with nearest-neighbor sampling so the
//! result is deterministic. Alpha feathering is an extension point.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::capture::register::FrameRegister;
use crate::frame::{Frame, Resolution};

/// Where the camera frame is blended onto the output frame.
///
/// Owned by the UI collaborator, read by the compositor once per tick as a
/// whole-value snapshot. May extend past the output bounds; the blended
/// region is clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayPlacement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Shared, tear-free placement cell: UI writes, compositor snapshots.
pub type SharedPlacement = Arc<RwLock<OverlayPlacement>>;

/// Produces one composite frame per encoder tick from the two frame
/// registers and the current overlay placement.
pub struct FrameCompositor {
    screen: Arc<FrameRegister>,
    camera: Arc<FrameRegister>,
    placement: SharedPlacement,
    output: Resolution,
}

impl FrameCompositor {
    pub fn new(
        screen: Arc<FrameRegister>,
        camera: Arc<FrameRegister>,
        placement: SharedPlacement,
        output: Resolution,
    ) -> Self {
        FrameCompositor {
            screen,
            camera,
            placement,
            output,
        }
    }

    /// Compose the current tick's frame.
    ///
    /// Returns `None` until the screen source has published at least once;
    /// the tick is skipped and nothing is emitted. A missing camera frame
    /// yields the screen frame unmodified.
    pub fn tick(&self) -> Option<Frame> {
        let screen = self.screen.latest()?;
        let camera = self.camera.latest();
        let placement = *self.placement.read();
        Some(composite(
            &screen,
            camera.as_deref(),
            placement,
            self.output,
        ))
    }
}

/// Blend `camera` over `screen` at `placement`, producing a frame at the
/// output resolution stamped with the screen frame's timestamp.
pub fn composite(
    screen: &Frame,
    camera: Option<&Frame>,
    placement: OverlayPlacement,
    output: Resolution,
) -> Frame {
    let mut data = if screen.resolution() == output {
        screen.data.clone()
    } else {
        scale_nearest(screen, output)
    };

    if let Some(camera) = camera {
        blend_overlay(&mut data, camera, placement, output);
    }

    Frame::new(data, output.width, output.height, screen.timestamp)
}

/// Copy camera pixels into `data` inside the placement rectangle clamped to
/// the output bounds.
fn blend_overlay(data: &mut [u8], camera: &Frame, placement: OverlayPlacement, output: Resolution) {
    if placement.width == 0
        || placement.height == 0
        || camera.width == 0
        || camera.height == 0
    {
        return;
    }

    // Visible portion of the placement rectangle.
    let x0 = placement.x.max(0) as u32;
    let y0 = placement.y.max(0) as u32;
    let x1 = (placement.x as i64 + placement.width as i64).clamp(0, output.width as i64) as u32;
    let y1 = (placement.y as i64 + placement.height as i64).clamp(0, output.height as i64) as u32;
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    for y in y0..y1 {
        // Position within the (unclamped) placement rect maps to the camera
        // frame; nearest-neighbor keeps this deterministic.
        let src_y = (y as i64 - placement.y as i64) as u64 * camera.height as u64
            / placement.height as u64;
        let src_y = (src_y as u32).min(camera.height - 1);
        for x in x0..x1 {
            let src_x = (x as i64 - placement.x as i64) as u64 * camera.width as u64
                / placement.width as u64;
            let src_x = (src_x as u32).min(camera.width - 1);
            let dst = (y as usize * output.width as usize + x as usize) * 3;
            let src = (src_y as usize * camera.width as usize + src_x as usize) * 3;
            data[dst..dst + 3].copy_from_slice(&camera.data[src..src + 3]);
        }
    }
}

/// Nearest-neighbor rescale of a frame to the given resolution.
fn scale_nearest(src: &Frame, output: Resolution) -> Vec<u8> {
    let mut out = vec![0u8; output.frame_len()];
    for y in 0..output.height {
        let sy = (y as u64 * src.height as u64 / output.height as u64) as u32;
        let sy = sy.min(src.height - 1);
        for x in 0..output.width {
            let sx = (x as u64 * src.width as u64 / output.width as u64) as u32;
            let sx = sx.min(src.width - 1);
            let dst = (y as usize * output.width as usize + x as usize) * 3;
            let srci = (sy as usize * src.width as usize + sx as usize) * 3;
            out[dst..dst + 3].copy_from_slice(&src.data[srci..srci + 3]);
        }
    }
    out
}
