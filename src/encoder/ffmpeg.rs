//! FFmpeg-backed container sink
//!
//! Video frames are piped to an ffmpeg child as rawvideo rgb24 and encoded
//! to an H.264 side file while the session runs; drained PCM goes to a raw
//! s16le side file. Finalize closes the video pipe, then muxes the two into
//! the output container as its single last step (`-c:v copy`, AAC audio).
//! If no audio was captured the video file is promoted to the output path
//! directly. On any failure the side files are retained for diagnosis.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::encoder::ContainerSink;
use crate::error::{RecorderError, RecorderResult};
use crate::frame::{AudioBlock, Frame, Resolution};

/// Check that ffmpeg can be spawned at all. Called at session start so a
/// missing binary fails before any device is opened.
pub fn check_ffmpeg_available() -> RecorderResult<()> {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| {
            RecorderError::Configuration(format!("ffmpeg not found on PATH: {e}"))
        })?;
    Ok(())
}

pub struct FfmpegContainerSink {
    output_path: PathBuf,
    video_path: PathBuf,
    audio_path: PathBuf,
    process: Option<Child>,
    audio_file: Option<File>,
    resolution: Resolution,
    sample_rate: u32,
    channels: u16,
    audio_bytes: u64,
    frames_written: u64,
}

impl FfmpegContainerSink {
    /// Spawn the video encoder child writing the H.264 side file.
    pub fn create(
        output_path: &Path,
        resolution: Resolution,
        frame_rate: u32,
        sample_rate: u32,
        channels: u16,
    ) -> RecorderResult<Self> {
        let video_path = side_path(output_path, "video.mp4");
        let audio_path = side_path(output_path, "audio.pcm");

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let size = format!("{}x{}", resolution.width, resolution.height);
        let process = Command::new("ffmpeg")
            .args(encoder_args(&size, frame_rate))
            .arg(&video_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RecorderError::Encoding(format!("failed to start ffmpeg encoder: {e}"))
            })?;

        tracing::info!(
            "video encoder started: {} @ {}fps -> {}",
            size,
            frame_rate,
            video_path.display()
        );

        Ok(FfmpegContainerSink {
            output_path: output_path.to_path_buf(),
            video_path,
            audio_path,
            process: Some(process),
            audio_file: None,
            resolution,
            sample_rate,
            channels,
            audio_bytes: 0,
            frames_written: 0,
        })
    }
}

impl ContainerSink for FfmpegContainerSink {
    fn write_video_frame(&mut self, frame: &Frame) -> RecorderResult<()> {
        if frame.resolution() != self.resolution {
            return Err(RecorderError::Encoding(format!(
                "frame size {} does not match encoder size {}",
                frame.resolution(),
                self.resolution
            )));
        }
        let process = self
            .process
            .as_mut()
            .ok_or(RecorderError::SessionClosed)?;
        let stdin = process
            .stdin
            .as_mut()
            .ok_or_else(|| RecorderError::Encoding("encoder stdin closed".to_string()))?;
        stdin
            .write_all(&frame.data)
            .map_err(|e| RecorderError::Encoding(format!("failed to write frame: {e}")))?;
        self.frames_written += 1;
        Ok(())
    }

    fn write_audio_block(&mut self, block: &AudioBlock) -> RecorderResult<()> {
        if self.audio_file.is_none() {
            self.audio_file = Some(File::create(&self.audio_path)?);
        }
        let bytes = block.to_le_bytes();
        if let Some(file) = self.audio_file.as_mut() {
            file.write_all(&bytes)?;
            self.audio_bytes += bytes.len() as u64;
        }
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> RecorderResult<PathBuf> {
        let fail = |reason: String, partial: &Path| RecorderError::FinalizeFailed {
            reason,
            partial_path: partial.to_path_buf(),
        };

        // Flush the video track: close the pipe, let the encoder write its
        // own trailer.
        if let Some(mut process) = self.process.take() {
            drop(process.stdin.take());
            let output = process
                .wait_with_output()
                .map_err(|e| fail(format!("ffmpeg encoder wait failed: {e}"), &self.video_path))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(fail(
                    format!("ffmpeg encoder exited with {}: {}", output.status, stderr),
                    &self.video_path,
                ));
            }
        }

        // Flush the audio track.
        if let Some(file) = self.audio_file.take() {
            file.sync_all()
                .map_err(|e| fail(format!("failed to flush audio: {e}"), &self.video_path))?;
        }

        // Container write is the single last step.
        if self.audio_bytes > 0 {
            let status = Command::new("ffmpeg")
                .arg("-y")
                .args(["-i"])
                .arg(&self.video_path)
                .args([
                    "-f",
                    "s16le",
                    "-ar",
                    &self.sample_rate.to_string(),
                    "-ac",
                    &self.channels.to_string(),
                    "-i",
                ])
                .arg(&self.audio_path)
                .args([
                    "-c:v",
                    "copy",
                    "-c:a",
                    "aac",
                    "-b:a",
                    "192k",
                    "-movflags",
                    "+faststart",
                ])
                .arg(&self.output_path)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(|e| fail(format!("ffmpeg mux failed to start: {e}"), &self.video_path))?;
            if !status.success() {
                return Err(fail(
                    format!("ffmpeg mux exited with {status}"),
                    &self.video_path,
                ));
            }
            let _ = std::fs::remove_file(&self.audio_path);
            let _ = std::fs::remove_file(&self.video_path);
        } else {
            // Valid container with an empty audio track: promote the video
            // file directly.
            std::fs::rename(&self.video_path, &self.output_path)
                .map_err(|e| fail(format!("failed to move container: {e}"), &self.video_path))?;
        }

        tracing::info!("container finalized: {}", self.output_path.display());
        Ok(self.output_path.clone())
    }

    fn partial_path(&self) -> PathBuf {
        self.video_path.clone()
    }
}

impl Drop for FfmpegContainerSink {
    fn drop(&mut self) {
        // Finalize not reached; kill the encoder. Side files stay on disk
        // for diagnosis if any media was written, otherwise a failed start
        // must leave no file behind.
        if let Some(mut process) = self.process.take() {
            drop(process.stdin.take());
            let _ = process.kill();
            let _ = process.wait();
            if self.frames_written == 0 {
                let _ = std::fs::remove_file(&self.video_path);
                let _ = std::fs::remove_file(&self.audio_path);
            }
        }
    }
}

/// Arguments for the session-long rawvideo encoder child.
///
/// Nothing drains the encoder's stderr pipe until finalize, so it must stay
/// quiet while recording: `-loglevel error -nostats` suppresses the periodic
/// progress lines that would otherwise fill the pipe and stall the encoder
/// mid-session. Errors are still captured and surfaced at exit.
fn encoder_args(size: &str, frame_rate: u32) -> Vec<String> {
    vec![
        "-loglevel".into(),
        "error".into(),
        "-nostats".into(),
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        size.into(),
        "-r".into(),
        frame_rate.to_string(),
        "-i".into(),
        "-".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-crf".into(),
        "18".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-g".into(),
        (frame_rate * 2).to_string(),
        "-movflags".into(),
        "+faststart".into(),
    ]
}

/// `out.mp4` -> `out.video.mp4` style sibling path.
fn side_path(output: &Path, suffix: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    output.with_file_name(format!("{stem}.{suffix}"))
}
