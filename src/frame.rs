//! Types describing the frame-sink boundary the pipeline exposes to its
//! (unspecified) frame-source collaborator, and the codec parameters it
//! needs to open a playback session.

/// Sample layout of an input frame's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// A single buffer, samples interleaved `[L0, R0, L1, R1, ...]`.
    Interleaved,
    /// One buffer per channel.
    Planar,
}

/// Codec parameters supplied to [`crate::playback::PlaybackCore::open`].
#[derive(Debug, Clone, Copy)]
pub struct CodecParams {
    /// Input sample rate in Hz. Must be `> 0`.
    pub sample_rate: u32,
    /// Number of channels. Must be `> 0`.
    pub channels: u16,
    /// Layout of the sample data the frame source will supply.
    pub format: SampleFormat,
}

/// Plane data of a decoded input frame.
#[derive(Debug, Clone, Copy)]
pub enum FramePlanes<'a> {
    /// A single interleaved buffer.
    Interleaved(&'a [f32]),
    /// One buffer per channel, each `nb_samples` long.
    Planar(&'a [&'a [f32]]),
}

/// A decoded audio frame handed to [`crate::playback::PlaybackCore::push`].
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// The sample data.
    pub planes: FramePlanes<'a>,
    /// Number of input samples per channel in this frame.
    pub nb_samples: usize,
}

impl<'a> Frame<'a> {
    /// Build a frame from a single interleaved buffer.
    pub fn interleaved(data: &'a [f32], nb_samples: usize) -> Self {
        Frame {
            planes: FramePlanes::Interleaved(data),
            nb_samples,
        }
    }

    /// Build a frame from one buffer per channel.
    pub fn planar(planes: &'a [&'a [f32]], nb_samples: usize) -> Self {
        Frame {
            planes: FramePlanes::Planar(planes),
            nb_samples,
        }
    }
}

/// The frame-sink interface the pipeline exposes to its frame source.
///
/// External collaborators (frame source, device discovery, protocol
/// framing) are not specified here; this trait is the only contract the
/// pipeline requires of whatever drives it.
pub trait FrameSink {
    /// Acquire resources for a playback session.
    fn open(&mut self, params: &CodecParams) -> crate::error::Result<()>;

    /// Push one decoded frame. Called from the frame-source thread.
    fn push(&mut self, frame: &Frame) -> crate::error::Result<()>;

    /// Release all resources acquired by `open`.
    fn close(&mut self);
}
