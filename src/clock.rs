//! Session timeline
//!
//! The presentation timeline all captured media is stamped against. One
//! clock is created per session at start (t=0); every producer and the
//! encoder read it.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A point on the session's presentation timeline.
///
/// Millisecond-or-better resolution, monotonic within a session. Serialized
/// as whole milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    pub fn from_millis(ms: u64) -> Self {
        Timestamp(Duration::from_millis(ms))
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }
}

impl Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.as_millis())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Timestamp::from_millis)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

/// Monotonic timing authority for one session.
///
/// `now()` is non-decreasing and cannot fail; it is a pure read of a
/// monotonic system timer relative to the session origin.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    origin: Instant,
}

impl FrameClock {
    /// Start a new timeline with t=0 at the current instant.
    pub fn start() -> Self {
        FrameClock {
            origin: Instant::now(),
        }
    }

    /// Current position on the session timeline.
    pub fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }
}
