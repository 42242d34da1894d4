//! Adaptive audio playback pipeline.
//!
//! Bridges a network-paced frame producer and a real-time audio device:
//! a lock-free single-producer/single-consumer [`ring_buffer::SampleRing`]
//! absorbs jitter, a [`moving_average::MovingAverage`] tracks the buffering
//! level over time, and a [`resampler::Resampler`] is nudged periodically
//! to correct for clock drift between the producer's and the device's
//! clocks. [`playback::PlaybackCore`] wires these together and is the only
//! type most callers need.
//!
//! ```no_run
//! use adaptive_playback::{CodecParams, Frame, FrameSink, PlaybackConfig, PlaybackCore};
//!
//! let config = PlaybackConfig::default();
//! let mut core = PlaybackCore::with_default_resampler(config.target_buffering());
//!
//! let params = CodecParams {
//!     sample_rate: 48_000,
//!     channels: 2,
//!     format: adaptive_playback::SampleFormat::Interleaved,
//! };
//! core.open(&params)?;
//!
//! let samples = vec![0.0f32; 1920]; // 960 frames, stereo
//! let frame = Frame::interleaved(&samples, 960);
//! core.push(&frame)?;
//!
//! core.close();
//! # Ok::<(), adaptive_playback::PlaybackError>(())
//! ```

pub mod config;
mod device;
pub mod error;
pub mod frame;
pub mod moving_average;
pub mod playback;
pub mod resampler;
pub mod ring_buffer;

pub use config::PlaybackConfig;
pub use error::{PlaybackError, Result};
pub use frame::{CodecParams, Frame, FramePlanes, FrameSink, SampleFormat};
pub use moving_average::MovingAverage;
pub use playback::{PlaybackCore, Ticks, TICK_FREQUENCY};
pub use resampler::{Resampler, ResamplerFactory, RubatoResampler};
pub use ring_buffer::SampleRing;
