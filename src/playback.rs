//! The playback core: owns the ring, the smoothed buffering average, the
//! resampler, and the audio device, and implements the
//! [`crate::frame::FrameSink`] contract.
//!
//! `push` is grounded directly in the push algorithm a real-time audio
//! playback pipeline needs to reconcile a network-paced producer with a
//! fixed-rate consumer: fast-path writes outside the lock when there's
//! headroom, a locked slow path that also handles the overflow/initial-
//! buffering caps, and a once-per-second recompute of the resampler's
//! clock-drift compensation from the smoothed buffering average.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{best_effort_raise_priority, DeviceHandle, RingSource, Shared};
use crate::error::{PlaybackError, Result};
use crate::frame::{CodecParams, Frame, FrameSink};
use crate::moving_average::MovingAverage;
use crate::resampler::{Resampler, ResamplerFactory, RubatoResampler};
use crate::ring_buffer::SampleRing;

/// Ticks per second used to express [`Ticks`] durations, independent of any
/// particular sample rate. Microsecond resolution.
pub const TICK_FREQUENCY: u64 = 1_000_000;

/// A duration expressed in an abstract tick unit, converted to a sample
/// count once the codec's sample rate is known at `open` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticks(pub u64);

impl Ticks {
    /// Build a `Ticks` value from a millisecond count.
    pub fn from_millis(ms: u64) -> Self {
        Ticks(ms * TICK_FREQUENCY / 1000)
    }

    fn to_samples(self, sample_rate: u32) -> u32 {
        (self.0 * u64::from(sample_rate) / TICK_FREQUENCY) as u32
    }
}

const OUTPUT_BLOCK_MS: u64 = 5;
const MARGIN_MS: u64 = 30;
const AVERAGE_WINDOW: u32 = 32;

/// Orchestrates a single playback session: a [`SampleRing`] between a
/// network-paced producer and the real-time audio device, a
/// [`MovingAverage`] of the buffering level, and a [`Resampler`] nudged
/// periodically to correct for clock drift between the two clocks.
pub struct PlaybackCore {
    resampler_factory: ResamplerFactory,
    target_buffering_ticks: Ticks,

    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    target_buffering: u32,
    output_block_samples: u32,
    margin_samples: u32,

    ring: Option<Arc<SampleRing>>,
    shared: Option<Arc<Shared>>,
    resampler: Option<Box<dyn Resampler>>,
    device: Option<DeviceHandle>,

    scratch: Vec<f32>,
    previous_can_write: usize,
    samples_since_resync: u64,
}

impl PlaybackCore {
    /// Construct a core that has not yet opened a device. `target_buffering`
    /// is the only state carried across `open`/`close` cycles.
    pub fn init(target_buffering: Ticks, resampler_factory: ResamplerFactory) -> Self {
        PlaybackCore {
            resampler_factory,
            target_buffering_ticks: target_buffering,
            sample_rate: 0,
            channels: 0,
            frame_size: 0,
            target_buffering: 0,
            output_block_samples: 0,
            margin_samples: 0,
            ring: None,
            shared: None,
            resampler: None,
            device: None,
            scratch: Vec::new(),
            previous_can_write: 0,
            samples_since_resync: 0,
        }
    }

    /// Convenience constructor using [`RubatoResampler`] as the resampler.
    pub fn with_default_resampler(target_buffering: Ticks) -> Self {
        let factory: ResamplerFactory = Box::new(|params: &CodecParams| {
            RubatoResampler::new(params.channels).map(|r| Box::new(r) as Box<dyn Resampler>)
        });
        PlaybackCore::init(target_buffering, factory)
    }

    fn ensure_scratch(&mut self, min_frames: usize) -> Result<()> {
        let min_elems = min_frames * self.frame_size;
        if min_elems > self.scratch.len() {
            let new_elems = min_elems + 1024;
            let additional = new_elems - self.scratch.len();
            self.scratch
                .try_reserve(additional)
                .map_err(|_| PlaybackError::ScratchAlloc { requested: new_elems })?;
            self.scratch.resize(new_elems, 0.0);
        }
        Ok(())
    }

    fn max_buffered(&self) -> u64 {
        u64::from(self.target_buffering)
            + 12 * u64::from(self.output_block_samples)
            + u64::from(self.target_buffering) / 10
    }

    fn max_initial_buffered(&self) -> u64 {
        u64::from(self.target_buffering) + 2 * u64::from(self.output_block_samples)
    }

    fn open_impl(&mut self, params: &CodecParams) -> Result<()> {
        assert!(params.sample_rate > 0, "sample rate must be > 0");
        assert!(params.channels > 0, "channel count must be > 0");

        let resampler = (self.resampler_factory)(params)?;

        let sample_rate = params.sample_rate;
        let channels = params.channels;
        let frame_size = channels as usize;
        let target_buffering = self.target_buffering_ticks.to_samples(sample_rate);
        let output_block_samples = (OUTPUT_BLOCK_MS * u64::from(sample_rate) / 1000) as u32;
        let margin_samples = (MARGIN_MS * u64::from(sample_rate) / 1000) as u32;

        // One second of headroom above the target on top of the target
        // itself, comfortably above `max_buffered`.
        let capacity = target_buffering as usize + sample_rate as usize;
        let ring = Arc::new(
            SampleRing::try_new(capacity, frame_size).map_err(PlaybackError::RingAlloc)?,
        );

        let shared = Arc::new(Shared {
            device_lock: Mutex::new(MovingAverage::init(AVERAGE_WINDOW)),
            received: std::sync::atomic::AtomicBool::new(false),
            played: std::sync::atomic::AtomicBool::new(false),
        });

        let (stream, stream_handle) = rodio::OutputStream::try_default()
            .map_err(|e| PlaybackError::DeviceOpen(e.to_string()))?;
        let sink = rodio::Sink::try_new(&stream_handle)
            .map_err(|e| PlaybackError::DeviceOpen(e.to_string()))?;

        let source = RingSource::new(
            ring.clone(),
            shared.clone(),
            sample_rate,
            channels,
            target_buffering,
            margin_samples,
            output_block_samples as usize,
        );
        sink.append(source);

        best_effort_raise_priority();
        sink.play();

        self.sample_rate = sample_rate;
        self.channels = channels;
        self.frame_size = frame_size;
        self.target_buffering = target_buffering;
        self.output_block_samples = output_block_samples;
        self.margin_samples = margin_samples;
        self.ring = Some(ring);
        self.shared = Some(shared);
        self.resampler = Some(resampler);
        self.scratch = Vec::new();
        self.previous_can_write = capacity;
        self.samples_since_resync = 0;
        self.device = Some(DeviceHandle::new(stream, sink));

        Ok(())
    }

    fn push_impl(&mut self, frame: &Frame) -> Result<()> {
        // Computed up front, before `resampler` below takes a mutable
        // borrow of `self.resampler` — everything after that point reaches
        // these as plain locals rather than through `self` methods, so the
        // borrow checker can see the two borrows as disjoint.
        let frame_size = self.frame_size;
        let sample_rate = self.sample_rate;
        let target_buffering = self.target_buffering;
        let max_buffered = self.max_buffered();
        let max_initial_buffered = self.max_initial_buffered();

        let delay = self
            .resampler
            .as_ref()
            .expect("push called before open")
            .delay();
        let min_frames = delay + frame.nb_samples + 256;
        self.ensure_scratch(min_frames)?;

        let ring = self.ring.clone().expect("push called before open");
        let shared = self.shared.clone().expect("push called before open");

        let scratch_capacity_frames = self.scratch.len() / frame_size;
        let resampler = self.resampler.as_mut().expect("push called before open");
        let mut written = resampler.convert(frame, &mut self.scratch, self.scratch.len())?;
        written = written.min(scratch_capacity_frames);

        let lockless_write = written <= self.previous_can_write;
        if lockless_write {
            ring.prepare_write(&self.scratch, written);
        }

        let mut buffered;
        let played;
        {
            let mut avg = shared.device_lock.lock();
            buffered = ring.can_read();

            if lockless_write {
                ring.commit_write(written);
            } else {
                let can_write = ring.can_write();
                let mut to_write = written;
                let mut src_offset = 0usize;
                if to_write > ring.capacity() {
                    let excess = to_write - ring.capacity();
                    src_offset = excess * frame_size;
                    to_write = ring.capacity();
                }
                if to_write > can_write {
                    let skip_samples = to_write - can_write;
                    ring.skip(skip_samples);
                    buffered -= skip_samples;
                    if shared.played.load(Ordering::Acquire) {
                        avg.avg -= skip_samples as f64;
                    }
                }
                let src_len = to_write * frame_size;
                ring.write(&self.scratch[src_offset..src_offset + src_len], to_write);
                written = to_write;
            }

            buffered += written;
            played = shared.played.load(Ordering::Acquire);

            if played {
                if (buffered as u64) > max_buffered {
                    let skip_samples = buffered - max_buffered as usize;
                    ring.skip(skip_samples);
                    eprintln!(
                        "playback: buffering threshold exceeded, skipping {skip_samples} samples"
                    );
                }

                let instantaneous_compensation = written as i64 - frame.nb_samples as i64;
                avg.avg += instantaneous_compensation as f64;
                avg.push(buffered as f64);
            } else if (buffered as u64) > max_initial_buffered {
                let skip_samples = buffered - max_initial_buffered as usize;
                ring.skip(skip_samples);
                buffered -= skip_samples;
            }

            self.previous_can_write = ring.can_write();
            shared.received.store(true, Ordering::Release);
        }

        if played {
            self.samples_since_resync += written as u64;
            if self.samples_since_resync >= u64::from(sample_rate) {
                self.samples_since_resync = 0;
                recompute_compensation(resampler, &shared, buffered, target_buffering, sample_rate);
            }
        }

        Ok(())
    }

    fn close_impl(&mut self) {
        if let Some(device) = self.device.take() {
            device.sink.pause();
            // Dropping `device` here tears down the sink (and the
            // `RingSource` it owns, releasing its `Arc` clones) and the
            // output stream.
        }
        self.scratch.clear();
        self.scratch.shrink_to_fit();
        self.ring = None;
        self.resampler = None;
        self.shared = None;
        self.previous_can_write = 0;
        self.samples_since_resync = 0;
    }
}

/// Recompute and apply the resampler's clock-drift compensation from the
/// smoothed buffering average. A free function (not a `PlaybackCore`
/// method) so it can be called while a field-level mutable borrow of
/// `self.resampler` is still held in `push_impl`.
fn recompute_compensation(
    resampler: &mut Box<dyn Resampler>,
    shared: &Arc<Shared>,
    buffered: usize,
    target_buffering: u32,
    sample_rate: u32,
) {
    let avg_value = shared.device_lock.lock().get();
    let mut diff = f64::from(target_buffering) - avg_value;
    if diff < 0.0 && (buffered as f64) < f64::from(target_buffering) {
        // The buffer is already below target; don't also accelerate.
        diff = 0.0;
    }

    let distance = 4 * i64::from(sample_rate);
    let abs_max_diff = distance / 50;
    let diff_samples = (diff as i64).clamp(-abs_max_diff, abs_max_diff);

    if let Err(e) = resampler.set_compensation(diff_samples as i32, distance as u32) {
        eprintln!("playback: resampler compensation failed: {e}");
    }
}

impl FrameSink for PlaybackCore {
    fn open(&mut self, params: &CodecParams) -> Result<()> {
        self.open_impl(params)
    }

    fn push(&mut self, frame: &Frame) -> Result<()> {
        self.push_impl(frame)
    }

    fn close(&mut self) {
        self.close_impl()
    }
}

impl Drop for PlaybackCore {
    fn drop(&mut self) {
        self.close_impl();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_from_millis_round_trips_to_samples() {
        let ticks = Ticks::from_millis(50);
        assert_eq!(ticks.to_samples(48_000), 2_400);
    }

    #[test]
    fn max_buffered_and_initial_caps_are_ordered() {
        let mut core = PlaybackCore::with_default_resampler(Ticks::from_millis(50));
        core.target_buffering = 2_400;
        core.output_block_samples = 240;
        assert!(core.max_initial_buffered() < core.max_buffered());
    }
}
