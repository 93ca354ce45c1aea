//! Screen capture via an ffmpeg grab device
//!
//! Spawns ffmpeg against the platform grab input (x11grab on Linux, gdigrab
//! on Windows, avfoundation on macOS) and reads tightly packed rawvideo
//! rgb24 frames off its stdout, one `read_exact` per grab.

use std::io::{BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::capture::traits::{CaptureError, CapturedFrame, FrameSurface};
use crate::frame::CaptureRegion;

/// Display-region capture surface backed by an ffmpeg subprocess.
pub struct FfmpegScreenSurface {
    process: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    frame_len: usize,
}

impl FfmpegScreenSurface {
    /// Start grabbing the given region at the given rate.
    pub fn open(region: CaptureRegion, frame_rate: u32) -> Result<Self, CaptureError> {
        let mut process = Command::new("ffmpeg")
            .args(Self::grab_args(&region, frame_rate))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CaptureError::Device(format!("failed to start ffmpeg grab: {e}")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Device("ffmpeg grab has no stdout".to_string()))?;

        let frame_len = region.width as usize * region.height as usize * 3;

        tracing::info!(
            "Screen grab started: {}x{}+{}+{} @ {}fps",
            region.width,
            region.height,
            region.x,
            region.y,
            frame_rate
        );

        Ok(FfmpegScreenSurface {
            process,
            stdout: BufReader::with_capacity(frame_len * 2, stdout),
            width: region.width,
            height: region.height,
            frame_len,
        })
    }

    fn grab_args(region: &CaptureRegion, frame_rate: u32) -> Vec<String> {
        let size = format!("{}x{}", region.width, region.height);
        let rate = frame_rate.to_string();

        let mut args: Vec<String> = Vec::new();

        #[cfg(target_os = "linux")]
        {
            let display =
                std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
            args.extend([
                "-f".into(),
                "x11grab".into(),
                "-framerate".into(),
                rate.clone(),
                "-video_size".into(),
                size.clone(),
                "-i".into(),
                format!("{display}+{},{}", region.x, region.y),
            ]);
        }

        #[cfg(target_os = "macos")]
        {
            args.extend([
                "-f".into(),
                "avfoundation".into(),
                "-framerate".into(),
                rate.clone(),
                "-capture_cursor".into(),
                "1".into(),
                "-i".into(),
                "1:none".into(),
                "-vf".into(),
                format!(
                    "crop={}:{}:{}:{}",
                    region.width, region.height, region.x, region.y
                ),
            ]);
        }

        #[cfg(target_os = "windows")]
        {
            args.extend([
                "-f".into(),
                "gdigrab".into(),
                "-framerate".into(),
                rate.clone(),
                "-offset_x".into(),
                region.x.to_string(),
                "-offset_y".into(),
                region.y.to_string(),
                "-video_size".into(),
                size.clone(),
                "-i".into(),
                "desktop".into(),
            ]);
        }

        let _ = (&size, &rate);

        args.extend([
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-".into(),
        ]);
        args
    }
}

impl FrameSurface for FfmpegScreenSurface {
    fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
        let mut buffer = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => Ok(CapturedFrame {
                data: buffer,
                width: self.width,
                height: self.height,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                CaptureError::Transient("screen grab stream ended".to_string()),
            ),
            Err(e) => Err(CaptureError::Transient(format!(
                "failed to read screen frame: {e}"
            ))),
        }
    }
}

impl Drop for FfmpegScreenSurface {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}
