//! End-to-end pipeline tests over synthetic capture backends and an
//! in-memory container sink. No devices and no ffmpeg binary are required.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use screencorder::capture::{AudioInput, CaptureError, CapturedFrame, FrameSurface};
use screencorder::{
    AudioBlock, CaptureRegion, ContainerSink, Frame, OverlayPlacement, RecorderResult, Resolution,
    Session, SessionConfig, SessionEvent, SourceKind,
};

const WIDTH: u32 = 16;
const HEIGHT: u32 = 12;
const FRAME_RATE: u32 = 125;

fn test_config() -> SessionConfig {
    let mut config = SessionConfig::new(
        CaptureRegion {
            x: 0,
            y: 0,
            width: WIDTH,
            height: HEIGHT,
        },
        "out.mp4",
    );
    config.camera_device_index = None;
    config.enable_audio = false;
    config.frame_rate = FRAME_RATE;
    config.output_resolution = Resolution::new(WIDTH, HEIGHT);
    config.overlay = OverlayPlacement {
        x: 0,
        y: 0,
        width: 6,
        height: 6,
    };
    config
}

/// Yields a solid-color frame on every grab.
struct SolidSurface {
    color: [u8; 3],
}

impl SolidSurface {
    fn factory(color: [u8; 3]) -> screencorder::capture::traits::SurfaceFactory {
        Box::new(move || Ok(Box::new(SolidSurface { color }) as Box<dyn FrameSurface>))
    }
}

impl FrameSurface for SolidSurface {
    fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
        let mut data = Vec::with_capacity((WIDTH * HEIGHT * 3) as usize);
        for _ in 0..WIDTH * HEIGHT {
            data.extend_from_slice(&self.color);
        }
        Ok(CapturedFrame {
            data,
            width: WIDTH,
            height: HEIGHT,
        })
    }
}

/// Succeeds for the first `ok_grabs` grabs, then fails every grab.
struct DyingSurface {
    inner: SolidSurface,
    ok_grabs: u32,
    grabs: u32,
}

impl DyingSurface {
    fn factory(color: [u8; 3], ok_grabs: u32) -> screencorder::capture::traits::SurfaceFactory {
        Box::new(move || {
            Ok(Box::new(DyingSurface {
                inner: SolidSurface { color },
                ok_grabs,
                grabs: 0,
            }) as Box<dyn FrameSurface>)
        })
    }
}

impl FrameSurface for DyingSurface {
    fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
        self.grabs += 1;
        if self.grabs <= self.ok_grabs {
            self.inner.grab()
        } else {
            Err(CaptureError::Transient("synthetic miss".to_string()))
        }
    }
}

/// Solid-color surface whose first grab takes a while, like a real grab
/// child warming up.
struct SlowStartSurface {
    inner: SolidSurface,
    delay: Option<Duration>,
}

impl SlowStartSurface {
    fn factory(
        color: [u8; 3],
        delay: Duration,
    ) -> screencorder::capture::traits::SurfaceFactory {
        Box::new(move || {
            Ok(Box::new(SlowStartSurface {
                inner: SolidSurface { color },
                delay: Some(delay),
            }) as Box<dyn FrameSurface>)
        })
    }
}

impl FrameSurface for SlowStartSurface {
    fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
        if let Some(delay) = self.delay.take() {
            std::thread::sleep(delay);
        }
        self.inner.grab()
    }
}

/// Yields a fixed script of audio blocks, then reports silence.
struct ScriptedAudio {
    script: Vec<Vec<i16>>,
    next: usize,
    pace: Duration,
}

impl ScriptedAudio {
    fn factory(script: Vec<Vec<i16>>) -> screencorder::capture::traits::AudioInputFactory {
        Self::factory_paced(script, Duration::from_millis(2))
    }

    fn factory_paced(
        script: Vec<Vec<i16>>,
        pace: Duration,
    ) -> screencorder::capture::traits::AudioInputFactory {
        Box::new(move || {
            Ok(Box::new(ScriptedAudio {
                script,
                next: 0,
                pace,
            }) as Box<dyn AudioInput>)
        })
    }
}

impl AudioInput for ScriptedAudio {
    fn sample_rate(&self) -> u32 {
        44_100
    }

    fn channels(&self) -> u16 {
        2
    }

    fn frames_per_block(&self) -> usize {
        4
    }

    fn read_block(&mut self) -> Result<Vec<i16>, CaptureError> {
        std::thread::sleep(self.pace);
        if self.next < self.script.len() {
            let block = self.script[self.next].clone();
            self.next += 1;
            Ok(block)
        } else {
            Ok(Vec::new())
        }
    }
}

#[derive(Default)]
struct SinkState {
    frames: Vec<Frame>,
    blocks: Vec<AudioBlock>,
    finalized: bool,
}

/// Container sink that records everything it is handed.
struct MemorySink {
    state: Arc<Mutex<SinkState>>,
    path: PathBuf,
}

impl MemorySink {
    fn new() -> (Box<dyn ContainerSink>, Arc<Mutex<SinkState>>) {
        let state = Arc::new(Mutex::new(SinkState::default()));
        let sink = MemorySink {
            state: state.clone(),
            path: PathBuf::from("out.mp4"),
        };
        (Box::new(sink), state)
    }
}

impl ContainerSink for MemorySink {
    fn write_video_frame(&mut self, frame: &Frame) -> RecorderResult<()> {
        self.state.lock().unwrap().frames.push(frame.clone());
        Ok(())
    }

    fn write_audio_block(&mut self, block: &AudioBlock) -> RecorderResult<()> {
        self.state.lock().unwrap().blocks.push(block.clone());
        Ok(())
    }

    fn finalize(self: Box<Self>) -> RecorderResult<PathBuf> {
        self.state.lock().unwrap().finalized = true;
        Ok(self.path)
    }

    fn partial_path(&self) -> PathBuf {
        self.path.clone()
    }
}

/// Accepts media but fails at finalize, retaining a partial file path.
struct BrokenSink {
    partial: PathBuf,
}

impl ContainerSink for BrokenSink {
    fn write_video_frame(&mut self, _frame: &Frame) -> RecorderResult<()> {
        Ok(())
    }

    fn write_audio_block(&mut self, _block: &AudioBlock) -> RecorderResult<()> {
        Ok(())
    }

    fn finalize(self: Box<Self>) -> RecorderResult<PathBuf> {
        Err(screencorder::RecorderError::FinalizeFailed {
            reason: "container trailer write failed".to_string(),
            partial_path: self.partial,
        })
    }

    fn partial_path(&self) -> PathBuf {
        self.partial.clone()
    }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn screen_only_session_records_and_finalizes() {
    let (sink, state) = MemorySink::new();
    let mut session = Session::builder(test_config())
        .screen_surface(SolidSurface::factory([10, 20, 30]))
        .sink(sink)
        .start()
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        state.lock().unwrap().frames.len() >= 5
    }));

    let summary = session.stop().unwrap().expect("first stop returns summary");
    let state = state.lock().unwrap();

    assert!(state.finalized);
    assert_eq!(summary.output_path, Some(PathBuf::from("out.mp4")));
    assert_eq!(summary.video_frames as usize, state.frames.len());
    assert_eq!(summary.audio_blocks, 0);
    assert!(state.blocks.is_empty());
    for frame in &state.frames {
        assert_eq!(frame.resolution(), Resolution::new(WIDTH, HEIGHT));
    }
}

#[test]
fn second_stop_is_a_noop() {
    let (sink, _state) = MemorySink::new();
    let mut session = Session::builder(test_config())
        .screen_surface(SolidSurface::factory([0, 0, 0]))
        .sink(sink)
        .start()
        .unwrap();

    std::thread::sleep(Duration::from_millis(50));
    assert!(session.stop().unwrap().is_some());
    assert!(session.stop().unwrap().is_none());
    assert!(session.stop().unwrap().is_none());
}

#[test]
fn track_timestamps_never_decrease() {
    let mut config = test_config();
    config.enable_audio = true;
    let script = vec![vec![1i16; 8], vec![2i16; 8], vec![3i16; 8]];

    let (sink, state) = MemorySink::new();
    let mut session = Session::builder(config)
        .screen_surface(SolidSurface::factory([1, 2, 3]))
        .audio_input(ScriptedAudio::factory(script))
        .sink(sink)
        .start()
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        state.lock().unwrap().frames.len() >= 10
    }));
    session.stop().unwrap();

    let state = state.lock().unwrap();
    assert!(state
        .frames
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(state.blocks.len(), 3);
    assert!(state
        .blocks
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn partial_final_audio_block_is_zero_padded() {
    let mut config = test_config();
    config.enable_audio = true;
    // 4 frames * 2 channels = 8 samples per full block; the last is short.
    let script = vec![vec![5i16; 8], vec![5i16; 8], vec![7i16; 3]];

    let (sink, state) = MemorySink::new();
    let mut session = Session::builder(config)
        .screen_surface(SolidSurface::factory([0, 0, 0]))
        .audio_input(ScriptedAudio::factory(script))
        .sink(sink)
        .start()
        .unwrap();

    std::thread::sleep(Duration::from_millis(100));
    let summary = session.stop().unwrap().unwrap();

    let state = state.lock().unwrap();
    assert_eq!(summary.audio_blocks, 3);
    for block in &state.blocks {
        assert_eq!(block.frame_count(), 4);
        assert_eq!(block.samples.len(), 8);
    }
    let last = &state.blocks[2];
    assert_eq!(&last.samples[..3], &[7, 7, 7]);
    assert_eq!(&last.samples[3..], &[0, 0, 0, 0, 0]);
}

#[test]
fn audio_captured_before_the_first_video_frame_is_trimmed() {
    let mut config = test_config();
    config.enable_audio = true;
    // Audio flows from session start at ~5ms per block; the screen source
    // takes 100ms to deliver its first frame.
    let script = vec![vec![1i16; 8]; 60];

    let (sink, state) = MemorySink::new();
    let mut session = Session::builder(config)
        .screen_surface(SlowStartSurface::factory(
            [0, 0, 0],
            Duration::from_millis(100),
        ))
        .audio_input(ScriptedAudio::factory_paced(
            script,
            Duration::from_millis(5),
        ))
        .sink(sink)
        .start()
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        state.lock().unwrap().frames.len() >= 5
    }));
    // Let a few more audio blocks land after the video origin.
    std::thread::sleep(Duration::from_millis(50));
    session.stop().unwrap();

    let state = state.lock().unwrap();
    let video_start = state.frames[0].timestamp;
    // Blocks captured while the video track had no frames yet never reach
    // the container; everything kept sits at or after the video origin.
    assert!(!state.blocks.is_empty());
    assert!(state.blocks.iter().all(|b| b.timestamp > video_start));
}

#[test]
fn no_camera_means_composite_equals_screen() {
    let (sink, state) = MemorySink::new();
    let mut session = Session::builder(test_config())
        .screen_surface(SolidSurface::factory([90, 60, 30]))
        .sink(sink)
        .start()
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        !state.lock().unwrap().frames.is_empty()
    }));
    session.stop().unwrap();

    let state = state.lock().unwrap();
    let frame = &state.frames[0];
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            assert_eq!(frame.pixel(x, y), [90, 60, 30]);
        }
    }
}

#[test]
fn camera_overlay_is_blended_opaquely() {
    let mut config = test_config();
    config.camera_device_index = Some(0);

    let (sink, state) = MemorySink::new();
    let mut session = Session::builder(config)
        .screen_surface(SolidSurface::factory([10, 10, 10]))
        .camera_surface(SolidSurface::factory([0, 200, 0]))
        .sink(sink)
        .start()
        .unwrap();

    // Wait for a composite that has actually seen a camera frame.
    assert!(wait_until(Duration::from_secs(2), || {
        state
            .lock()
            .unwrap()
            .frames
            .last()
            .map(|f| f.pixel(0, 0) == [0, 200, 0])
            .unwrap_or(false)
    }));
    session.stop().unwrap();

    let state = state.lock().unwrap();
    let frame = state.frames.last().unwrap();
    // Overlay covers (0,0)..(6,6); everything else is screen.
    assert_eq!(frame.pixel(0, 0), [0, 200, 0]);
    assert_eq!(frame.pixel(5, 5), [0, 200, 0]);
    assert_eq!(frame.pixel(6, 6), [10, 10, 10]);
    assert_eq!(frame.pixel(WIDTH - 1, HEIGHT - 1), [10, 10, 10]);
}

#[test]
fn camera_gap_below_threshold_reuses_last_frame() {
    let mut config = test_config();
    config.camera_device_index = Some(0);
    config.source_lost_threshold = 10_000;

    let (sink, state) = MemorySink::new();
    let mut session = Session::builder(config)
        .screen_surface(SolidSurface::factory([10, 10, 10]))
        .camera_surface(DyingSurface::factory([200, 0, 0], 1))
        .sink(sink)
        .start()
        .unwrap();
    let mut events = session.subscribe();

    assert!(wait_until(Duration::from_secs(2), || {
        state
            .lock()
            .unwrap()
            .frames
            .last()
            .map(|f| f.pixel(0, 0) == [200, 0, 0])
            .unwrap_or(false)
    }));
    // Keep recording through a run of camera misses.
    std::thread::sleep(Duration::from_millis(100));
    session.stop().unwrap();

    let state = state.lock().unwrap();
    // The stale camera frame stays in the overlay for every later composite.
    assert_eq!(state.frames.last().unwrap().pixel(0, 0), [200, 0, 0]);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::SourceLost { .. }),
            "camera misses below the threshold must not escalate"
        );
    }
}

#[test]
fn screen_loss_halts_encoding_and_still_finalizes() {
    let mut config = test_config();
    config.source_lost_threshold = 3;

    let (sink, state) = MemorySink::new();
    let mut session = Session::builder(config)
        .screen_surface(DyingSurface::factory([50, 50, 50], 3))
        .sink(sink)
        .start()
        .unwrap();
    let mut events = session.subscribe();

    assert!(wait_until(Duration::from_secs(2), || session.screen_lost()));

    // Give the encode loop a tick to observe the flag, then confirm no
    // further frames are written.
    std::thread::sleep(Duration::from_millis(50));
    let frames_at_halt = state.lock().unwrap().frames.len();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(state.lock().unwrap().frames.len(), frames_at_halt);

    let summary = session.stop().unwrap().expect("partial output finalizes");
    assert!(state.lock().unwrap().finalized);
    assert_eq!(summary.video_frames as usize, frames_at_halt);

    let mut saw_loss = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::SourceLost { source, .. } = event {
            assert_eq!(source, SourceKind::Screen);
            saw_loss = true;
        }
    }
    assert!(saw_loss);
}

#[test]
fn overlay_placement_change_takes_effect_mid_session() {
    let mut config = test_config();
    config.camera_device_index = Some(0);

    let (sink, state) = MemorySink::new();
    let mut session = Session::builder(config)
        .screen_surface(SolidSurface::factory([10, 10, 10]))
        .camera_surface(SolidSurface::factory([0, 0, 200]))
        .sink(sink)
        .start()
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        state
            .lock()
            .unwrap()
            .frames
            .last()
            .map(|f| f.pixel(0, 0) == [0, 0, 200])
            .unwrap_or(false)
    }));

    session.set_overlay_placement(OverlayPlacement {
        x: 8,
        y: 6,
        width: 6,
        height: 6,
    });
    assert!(wait_until(Duration::from_secs(2), || {
        state
            .lock()
            .unwrap()
            .frames
            .last()
            .map(|f| f.pixel(8, 6) == [0, 0, 200] && f.pixel(0, 0) == [10, 10, 10])
            .unwrap_or(false)
    }));
    session.stop().unwrap();
}

#[test]
fn preview_tap_observes_composites() {
    let (sink, state) = MemorySink::new();
    let mut session = Session::builder(test_config())
        .screen_surface(SolidSurface::factory([40, 80, 120]))
        .sink(sink)
        .start()
        .unwrap();

    let preview = session.preview();
    assert!(wait_until(Duration::from_secs(2), || {
        preview.borrow().is_some()
    }));
    {
        let latest = preview.borrow();
        let frame = latest.as_ref().unwrap();
        assert_eq!(frame.resolution(), Resolution::new(WIDTH, HEIGHT));
        assert_eq!(frame.pixel(0, 0), [40, 80, 120]);
    }
    session.stop().unwrap();

    // The tap never gates the encoder: frames kept flowing regardless of
    // how rarely the receiver was read.
    assert!(!state.lock().unwrap().frames.is_empty());
}

#[test]
fn finalize_failure_surfaces_error_and_event_with_partial_path() {
    let dir = tempfile::tempdir().unwrap();
    let partial = dir.path().join("out.video.mp4");

    let mut config = test_config();
    config.output_path = dir.path().join("out.mp4");
    let mut session = Session::builder(config)
        .screen_surface(SolidSurface::factory([0, 0, 0]))
        .sink(Box::new(BrokenSink {
            partial: partial.clone(),
        }))
        .start()
        .unwrap();
    let mut events = session.subscribe();

    std::thread::sleep(Duration::from_millis(50));
    let err = session.stop().expect_err("finalize failure propagates");
    assert_eq!(err.partial_path(), Some(&partial));

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::FinalizeFailed { partial_path } = event {
            assert_eq!(partial_path, partial);
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    // A failed stop still counts as stopped; the session is not reusable.
    assert!(session.stop().unwrap().is_none());
}

#[test]
fn device_open_failure_surfaces_before_the_session_exists() {
    let (sink, state) = MemorySink::new();
    let result = Session::builder(test_config())
        .screen_surface(Box::new(|| {
            Err(CaptureError::Device("no display attached".to_string()))
        }))
        .sink(sink)
        .start();

    assert!(matches!(
        result,
        Err(screencorder::RecorderError::DeviceUnavailable(_))
    ));
    let state = state.lock().unwrap();
    assert!(state.frames.is_empty());
    assert!(!state.finalized);
}
