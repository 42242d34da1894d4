//! Configuration surface for the playback pipeline.
//!
//! The only externally tunable knob is the target buffering delay — every
//! other derived quantity (ring capacity, output block size, margin) is
//! computed from it plus the codec parameters supplied at
//! [`crate::playback::PlaybackCore::open`] time.

use serde::{Deserialize, Serialize};

use crate::playback::Ticks;

/// Playback pipeline configuration, deserializable from JSON (or any other
/// `serde` format) so callers can load it alongside the rest of an
/// application's configuration rather than hardcoding it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Target steady-state buffering delay, in milliseconds.
    pub target_buffering_ms: u64,
}

impl PlaybackConfig {
    /// The target buffering delay expressed in the tick unit
    /// [`crate::playback::PlaybackCore::init`] expects.
    pub fn target_buffering(&self) -> Ticks {
        Ticks::from_millis(self.target_buffering_ms)
    }
}

impl Default for PlaybackConfig {
    /// 50ms matches the default this pipeline's original C counterpart
    /// ships with.
    fn default() -> Self {
        PlaybackConfig {
            target_buffering_ms: 50,
        }
    }
}
