//! The resampler adapter: the narrow contract [`crate::playback::PlaybackCore`]
//! needs from an external resampler, plus one concrete binding.
//!
//! The core never inspects resampler internals (spec.md §4.3) — it only
//! needs to push a frame and get back a (possibly different) number of
//! output samples, ask how many samples of delay the resampler is currently
//! holding, and nudge its output rate by a signed amount over a distance.
//! [`RubatoResampler`] is one real implementation of that contract, built on
//! the `rubato` crate the same way the retrieval pack's own playback
//! examples use it (accumulate interleaved input, deinterleave into
//! per-channel chunks, resample, reinterleave).

use crate::error::{PlaybackError, Result};
use crate::frame::{Frame, FramePlanes};
use rubato::{
    Resampler as RubatoResamplerTrait, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

/// The contract the playback core needs from a resampler.
///
/// Implementors are free to resample across different rates internally;
/// this crate only ever drives one at a fixed input rate == output rate,
/// using [`Resampler::set_compensation`] to skew the output slightly for
/// clock-drift correction.
pub trait Resampler: Send {
    /// Samples of delay currently held inside the resampler (already-pushed
    /// input that hasn't produced output yet).
    fn delay(&self) -> usize;

    /// Convert `frame` into `out` (capacity `out_capacity` interleaved
    /// samples). Returns the number of output frames written, which may be
    /// zero (if not enough input has accumulated to produce a block yet)
    /// and is never more than `out_capacity / channels`.
    fn convert(&mut self, frame: &Frame, out: &mut [f32], out_capacity: usize) -> Result<usize>;

    /// Skew the output by `diff` samples spread over the next `distance`
    /// output samples. `diff` may be negative (shrink output) or positive
    /// (grow it).
    fn set_compensation(&mut self, diff: i32, distance: u32) -> Result<()>;
}

/// A factory that builds a [`Resampler`] once the input's channel count is
/// known (at [`crate::playback::PlaybackCore::open`] time).
pub type ResamplerFactory =
    Box<dyn FnMut(&crate::frame::CodecParams) -> Result<Box<dyn Resampler>> + Send>;

/// Fixed input chunk size (frames) fed to the underlying sinc resampler.
/// Small enough to keep the pipeline's own latency budget (a handful of
/// milliseconds) from being dwarfed by resampler-internal buffering.
const CHUNK_SIZE: usize = 256;

/// A [`Resampler`] built on `rubato::SincFixedIn`.
///
/// Input is accumulated per channel until a full chunk is available, then
/// resampled and reinterleaved into the caller's output buffer — the same
/// accumulate/deinterleave/process/reinterleave shape used by the
/// real-world `rubato`-based playback examples in the retrieval pack.
pub struct RubatoResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    input_planes: Vec<Vec<f32>>,
    chunk_in: Vec<Vec<f32>>,
    chunk_out: Vec<Vec<f32>>,
    pending_frames: usize,
}

impl RubatoResampler {
    /// Build a resampler for `channels` channels, same input and output
    /// rate (the pipeline only ever uses this resampler for clock-drift
    /// compensation, not sample-rate conversion).
    pub fn new(channels: u16) -> Result<Self> {
        let channels = channels as usize;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            oversampling_factor: 160,
            interpolation: SincInterpolationType::Linear,
            window: WindowFunction::BlackmanHarris2,
        };
        // Ratio starts at 1.0 (no drift yet); max_relative_ratio bounds how
        // far `set_compensation` can ever push it, comfortably above the 2%
        // cap the playback core itself enforces.
        let inner = SincFixedIn::<f32>::new(1.0, 1.05, params, CHUNK_SIZE, channels)
            .map_err(|e| PlaybackError::ResamplerInit(e.to_string()))?;
        let chunk_out = inner.output_buffer_allocate(true);

        Ok(RubatoResampler {
            inner,
            channels,
            input_planes: vec![Vec::new(); channels],
            chunk_in: vec![vec![0.0; CHUNK_SIZE]; channels],
            chunk_out,
            pending_frames: 0,
        })
    }

    fn accumulate(&mut self, frame: &Frame) {
        match frame.planes {
            FramePlanes::Interleaved(data) => {
                for plane in &mut self.input_planes {
                    plane.reserve(frame.nb_samples);
                }
                for i in 0..frame.nb_samples {
                    for (ch, plane) in self.input_planes.iter_mut().enumerate() {
                        plane.push(data[i * self.channels + ch]);
                    }
                }
            }
            FramePlanes::Planar(planes) => {
                for (ch, plane) in self.input_planes.iter_mut().enumerate() {
                    plane.extend_from_slice(&planes[ch][..frame.nb_samples]);
                }
            }
        }
        self.pending_frames += frame.nb_samples;
    }
}

impl Resampler for RubatoResampler {
    fn delay(&self) -> usize {
        // Algorithmic latency (roughly half the sinc filter length) plus
        // whatever hasn't yet formed a full chunk.
        self.inner.output_delay() + self.pending_frames
    }

    fn convert(&mut self, frame: &Frame, out: &mut [f32], out_capacity: usize) -> Result<usize> {
        self.accumulate(frame);

        let mut total_written = 0usize;
        let out_capacity_frames = out_capacity / self.channels;

        while self.pending_frames >= CHUNK_SIZE && total_written < out_capacity_frames {
            for (ch, chunk) in self.chunk_in.iter_mut().enumerate() {
                chunk.copy_from_slice(&self.input_planes[ch][..CHUNK_SIZE]);
            }

            let (_, out_len) = self
                .inner
                .process_into_buffer(&self.chunk_in, &mut self.chunk_out, None)
                .map_err(|e| PlaybackError::ResampleConvert(e.to_string()))?;

            let remaining_capacity = out_capacity_frames - total_written;
            let frames_to_copy = out_len.min(remaining_capacity);
            for i in 0..frames_to_copy {
                for ch in 0..self.channels {
                    out[(total_written + i) * self.channels + ch] = self.chunk_out[ch][i];
                }
            }
            total_written += frames_to_copy;

            for plane in &mut self.input_planes {
                plane.drain(0..CHUNK_SIZE);
            }
            self.pending_frames -= CHUNK_SIZE;

            if frames_to_copy < out_len {
                // Caller's buffer is full; leftover resampled frames are
                // dropped. The core always sizes `out` generously (delay +
                // nb_samples + 256), so this should not happen in practice.
                break;
            }
        }

        Ok(total_written)
    }

    fn set_compensation(&mut self, diff: i32, distance: u32) -> Result<()> {
        if distance == 0 {
            return Ok(());
        }
        let relative = 1.0 + f64::from(diff) / f64::from(distance);
        self.inner
            .set_resample_ratio_relative(relative, true)
            .map_err(|e| PlaybackError::ResampleConvert(e.to_string()))?;
        Ok(())
    }
}
