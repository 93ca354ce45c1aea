//! Paced video capture loop
//!
//! One `VideoSource` drives one frame-producing surface (screen or camera)
//! on its own thread: grab, stamp with the session clock, publish to the
//! latest-value register. Rates are independent per source; nothing here
//! waits on the compositor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::capture::register::FrameRegister;
use crate::capture::traits::SurfaceFactory;
use crate::clock::FrameClock;
use crate::error::{RecorderError, RecorderResult};
use crate::event::{SessionEvent, SourceKind};
use crate::frame::Frame;

/// A running screen or camera capture loop.
pub struct VideoSource {
    kind: SourceKind,
    running: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
    register: Arc<FrameRegister>,
    handle: Option<JoinHandle<()>>,
}

impl VideoSource {
    /// Spawn the capture thread. The surface factory runs on that thread;
    /// this call blocks until the device is open and returns its error
    /// directly if it cannot be.
    pub fn spawn(
        kind: SourceKind,
        factory: SurfaceFactory,
        clock: FrameClock,
        interval: Duration,
        lost_threshold: u32,
        register: Arc<FrameRegister>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> RecorderResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let lost = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_running = running.clone();
        let thread_lost = lost.clone();
        let thread_register = register.clone();

        let handle = std::thread::Builder::new()
            .name(format!("{kind}-capture"))
            .spawn(move || {
                let mut surface = match factory() {
                    Ok(surface) => {
                        let _ = ready_tx.send(Ok(()));
                        surface
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let threshold = lost_threshold.max(1);
                let mut consecutive_failures = 0u32;

                while thread_running.load(Ordering::SeqCst) {
                    let iteration_start = Instant::now();

                    match surface.grab() {
                        Ok(raw) => {
                            consecutive_failures = 0;
                            thread_register.publish(Frame::new(
                                raw.data,
                                raw.width,
                                raw.height,
                                clock.now(),
                            ));
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            tracing::warn!(
                                "{} capture miss ({}/{}): {}",
                                kind,
                                consecutive_failures,
                                threshold,
                                e
                            );
                            if consecutive_failures >= threshold {
                                tracing::error!(
                                    "{} source lost after {} consecutive failures",
                                    kind,
                                    consecutive_failures
                                );
                                thread_lost.store(true, Ordering::SeqCst);
                                thread_register.clear();
                                let _ = event_tx.send(SessionEvent::SourceLost {
                                    source: kind,
                                    at: clock.now(),
                                });
                                break;
                            }
                        }
                    }

                    if let Some(remaining) = interval.checked_sub(iteration_start.elapsed()) {
                        std::thread::sleep(remaining);
                    }
                }

                // Surface dropped here: the device is released before the
                // thread exits, and therefore before stop() returns.
                tracing::debug!("{} capture thread exiting", kind);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(RecorderError::DeviceUnavailable(format!("{kind}: {e}")));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(RecorderError::DeviceUnavailable(format!(
                    "{kind}: capture thread exited before opening the device"
                )));
            }
        }

        tracing::info!("{} capture started (interval {:?})", kind, interval);

        Ok(VideoSource {
            kind,
            running,
            lost,
            register,
            handle: Some(handle),
        })
    }

    /// Whether this source terminated itself after exceeding its failure
    /// threshold.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Shared view of the lost flag, for the encode loop to poll.
    pub(crate) fn lost_handle(&self) -> Arc<AtomicBool> {
        self.lost.clone()
    }

    pub fn register(&self) -> &Arc<FrameRegister> {
        &self.register
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Signal the loop to exit and wait for the device to be released.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::info!("{} capture stopped", self.kind);
        }
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::{CaptureError, CapturedFrame, FrameSurface};

    struct SolidSurface {
        value: u8,
    }

    impl FrameSurface for SolidSurface {
        fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
            Ok(CapturedFrame {
                data: vec![self.value; 2 * 2 * 3],
                width: 2,
                height: 2,
            })
        }
    }

    struct AlwaysFailing;

    impl FrameSurface for AlwaysFailing {
        fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
            Err(CaptureError::Transient("device busy".into()))
        }
    }

    fn spawn_source(
        factory: SurfaceFactory,
        threshold: u32,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> RecorderResult<VideoSource> {
        VideoSource::spawn(
            SourceKind::Camera,
            factory,
            FrameClock::start(),
            Duration::from_millis(1),
            threshold,
            Arc::new(FrameRegister::new()),
            event_tx,
        )
    }

    #[test]
    fn publishes_stamped_frames() {
        let (event_tx, _event_rx) = broadcast::channel(16);
        let mut source =
            spawn_source(Box::new(|| Ok(Box::new(SolidSurface { value: 9 }))), 3, event_tx)
                .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while source.register().latest().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        let frame = source.register().latest().expect("no frame published");
        assert_eq!(frame.data[0], 9);
        source.stop();
        assert!(!source.is_lost());
    }

    #[test]
    fn open_failure_surfaces_before_source_exists() {
        let (event_tx, _event_rx) = broadcast::channel(16);
        let result = spawn_source(
            Box::new(|| Err(CaptureError::Device("no such camera".into()))),
            3,
            event_tx,
        );
        assert!(matches!(result, Err(RecorderError::DeviceUnavailable(_))));
    }

    #[test]
    fn repeated_failures_escalate_to_source_lost() {
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let mut source =
            spawn_source(Box::new(|| Ok(Box::new(AlwaysFailing))), 3, event_tx).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !source.is_lost() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(source.is_lost());
        assert!(source.register().latest().is_none());
        match event_rx.try_recv() {
            Ok(SessionEvent::SourceLost { source, .. }) => {
                assert_eq!(source, SourceKind::Camera)
            }
            other => panic!("expected SourceLost, got {other:?}"),
        }
        source.stop();
    }
}
