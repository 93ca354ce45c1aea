//! # screencorder
//!
//! Screen recording with a repositionable camera overlay and a synchronized
//! audio track.
//!
//! Three independent producers — screen frames, camera frames, PCM audio
//! blocks — run on their own threads at their own rates. The compositor
//! reads the freshest screen and camera frames through single-slot
//! latest-value registers once per encoder tick, blends the camera over the
//! screen at the current overlay placement, and hands the composite to the
//! muxer, the sole writer of the output container.
//!
//! ```rust,ignore
//! use screencorder::{CaptureRegion, Session, SessionConfig, OverlayPlacement};
//!
//! let config = SessionConfig::new(
//!     CaptureRegion { x: 0, y: 0, width: 1920, height: 1080 },
//!     "demo.mp4",
//! );
//! let mut session = Session::start(config)?;
//! session.set_overlay_placement(OverlayPlacement { x: 24, y: 24, width: 320, height: 240 });
//! // ... record ...
//! let summary = session.stop()?;
//! # Ok::<(), screencorder::RecorderError>(())
//! ```
//!
//! The preview tap ([`Session::preview`]) and the event broadcast
//! ([`Session::subscribe`]) are how a UI observes a session; neither sits
//! on the encode path.

pub mod capture;
pub mod clock;
pub mod compositor;
pub mod config;
pub mod encoder;
pub mod error;
pub mod event;
pub mod frame;
pub mod session;

pub use clock::{FrameClock, Timestamp};
pub use compositor::{FrameCompositor, OverlayPlacement};
pub use config::SessionConfig;
pub use encoder::{ContainerSink, Muxer, MuxerState};
pub use error::{RecorderError, RecorderResult};
pub use event::{SessionEvent, SourceKind};
pub use frame::{AudioBlock, CaptureRegion, Frame, Resolution};
pub use session::{Session, SessionBuilder, SessionSummary};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for binaries embedding the recorder.
///
/// Respects `RUST_LOG`; defaults to debug for this crate. Call once.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screencorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
