//! The real-time consumer side: a `rodio::Source` pulling from the
//! [`crate::ring_buffer::SampleRing`], and the `OutputStream`/`Sink` pair
//! that keeps the audio device alive.
//!
//! `rodio::Source` is a per-sample `Iterator`, not a per-block callback, so
//! [`RingSource`] keeps a small internal block buffer and refills it one
//! block at a time — the refill is the actual pull callback described in
//! spec.md §4.4, run under the same lock the producer uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rodio::{OutputStream, Sink};

use crate::moving_average::MovingAverage;
use crate::ring_buffer::SampleRing;

/// State shared between the producer ([`crate::playback::PlaybackCore`])
/// and the consumer ([`RingSource`]), beyond the lock-free ring itself.
///
/// `device_lock` is "the device lock" spec.md refers to throughout §4.4 and
/// §5: acquiring it brackets every place either side touches the smoothed
/// buffering average, and, on the producer side, every ring-cursor mutation
/// that must be observed atomically alongside an average adjustment.
pub(crate) struct Shared {
    pub device_lock: Mutex<MovingAverage>,
    /// At least one frame has been pushed. Gates whether underflow silence
    /// counts toward the average (there is nothing to have underflowed
    /// from before the first frame arrives).
    pub received: AtomicBool,
    /// The initial buffering gate has released and playback has begun
    /// producing real samples.
    pub played: AtomicBool,
}

/// A `rodio::Source` that pulls interleaved frames out of a [`SampleRing`],
/// enforcing the initial-buffering gate and silence-filling on underflow.
pub(crate) struct RingSource {
    ring: Arc<SampleRing>,
    shared: Arc<Shared>,
    sample_rate: u32,
    channels: u16,
    target_buffering: u32,
    margin_samples: u32,
    block_frames: usize,
    block_buf: Vec<f32>,
    block_pos: usize,
}

impl RingSource {
    pub fn new(
        ring: Arc<SampleRing>,
        shared: Arc<Shared>,
        sample_rate: u32,
        channels: u16,
        target_buffering: u32,
        margin_samples: u32,
        block_frames: usize,
    ) -> Self {
        let block_len = block_frames * channels as usize;
        RingSource {
            ring,
            shared,
            sample_rate,
            channels,
            target_buffering,
            margin_samples,
            block_frames,
            block_buf: vec![0.0; block_len],
            // Force a refill on the very first `next()` call.
            block_pos: block_len,
        }
    }

    /// The pull callback: refill `block_buf` with the next `block_frames`
    /// worth of samples, under the device lock.
    fn refill(&mut self) {
        let mut avg = self.shared.device_lock.lock();

        if !self.shared.played.load(Ordering::Acquire) {
            let buffered = self.ring.can_read();
            if (buffered as u64 + self.margin_samples as u64) < self.target_buffering as u64 {
                self.block_buf.iter_mut().for_each(|s| *s = 0.0);
                self.block_pos = 0;
                return;
            }
        }

        let buffered = self.ring.can_read();
        let read = buffered.min(self.block_frames);
        if read > 0 {
            let read_len = read * self.channels as usize;
            self.ring.read(&mut self.block_buf[..read_len], read);
        }
        if read < self.block_frames {
            let silence_frames = self.block_frames - read;
            let silence_start = read * self.channels as usize;
            self.block_buf[silence_start..]
                .iter_mut()
                .for_each(|s| *s = 0.0);
            if self.shared.received.load(Ordering::Acquire) {
                avg.avg += silence_frames as f64;
            }
        }

        self.shared.played.store(true, Ordering::Release);
        self.block_pos = 0;
    }
}

impl Iterator for RingSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.block_pos >= self.block_buf.len() {
            self.refill();
        }
        let sample = self.block_buf[self.block_pos];
        self.block_pos += 1;
        Some(sample)
    }
}

impl rodio::Source for RingSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.block_buf.len() - self.block_pos)
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        // An open-ended live stream: no known duration.
        None
    }
}

/// Keeps the output stream and sink alive for the lifetime of a playback
/// session. Dropping it pauses and releases the device.
pub(crate) struct DeviceHandle {
    // Never read directly; dropping it tears down the platform output
    // stream. Must outlive `sink`.
    _stream: OutputStream,
    pub sink: Sink,
}

impl DeviceHandle {
    pub fn new(stream: OutputStream, sink: Sink) -> Self {
        DeviceHandle {
            _stream: stream,
            sink,
        }
    }
}

/// Best-effort real-time scheduling for the calling (audio device) thread.
/// Failure is silently ignored: it only affects scheduling jitter, never
/// correctness.
#[cfg(target_os = "linux")]
pub(crate) fn best_effort_raise_priority() {
    unsafe {
        let param = libc::sched_param { sched_priority: 1 };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            let _ = libc::setpriority(libc::PRIO_PROCESS, 0, -10);
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn best_effort_raise_priority() {}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Arc<Shared> {
        Arc::new(Shared {
            device_lock: Mutex::new(MovingAverage::init(32)),
            received: AtomicBool::new(false),
            played: AtomicBool::new(false),
        })
    }

    /// Pull one `block_frames`-sized block out of `source` by driving its
    /// `Iterator` interface, mirroring how `rodio` consumes a `Source`
    /// sample by sample.
    fn pull_block(source: &mut RingSource, channels: usize, block_frames: usize) -> Vec<f32> {
        (0..block_frames * channels)
            .map(|_| source.next().expect("source is infinite"))
            .collect()
    }

    #[test]
    fn initial_buffering_gate_emits_silence_and_does_not_set_played() {
        let ring = Arc::new(SampleRing::new(32, 1));
        let shared = shared();
        // target=10, margin=2: with nothing buffered, 0 + 2 < 10, so the
        // gate must hold and emit silence without flipping `played`.
        let mut source = RingSource::new(ring, shared.clone(), 48_000, 1, 10, 2, 4);

        let block = pull_block(&mut source, 1, 4);
        assert_eq!(block, vec![0.0; 4], "gate must emit all-silence");
        assert!(
            !shared.played.load(Ordering::Acquire),
            "played must not latch while the gate is still holding"
        );
    }

    #[test]
    fn gate_releases_and_latches_played_once_target_is_met() {
        let ring = Arc::new(SampleRing::new(32, 1));
        ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0], 10);
        let shared = shared();
        let mut source = RingSource::new(ring, shared.clone(), 48_000, 1, 10, 2, 4);

        let block = pull_block(&mut source, 1, 4);
        assert_eq!(block, vec![1.0, 2.0, 3.0, 4.0], "real samples, not silence");
        assert!(
            shared.played.load(Ordering::Acquire),
            "played must latch once the gate releases"
        );
    }

    #[test]
    fn underflow_after_played_fills_silence_and_adjusts_average() {
        let ring = Arc::new(SampleRing::new(32, 1));
        ring.write(&[1.0, 2.0], 2);
        let shared = shared();
        shared.played.store(true, Ordering::Release);
        shared.received.store(true, Ordering::Release);
        let initial_avg = shared.device_lock.lock().avg;
        let mut source = RingSource::new(ring, shared.clone(), 48_000, 1, 10, 2, 4);

        // Only 2 of the 4 requested frames are available: the rest must be
        // silence, and the 2 silent frames must register on `avg`.
        let block = pull_block(&mut source, 1, 4);
        assert_eq!(block, vec![1.0, 2.0, 0.0, 0.0]);
        let avg_after = shared.device_lock.lock().avg;
        assert_eq!(
            avg_after - initial_avg,
            2.0,
            "two silent frames must be reflected in avg immediately"
        );
    }

    #[test]
    fn underflow_before_any_push_does_not_touch_average() {
        let ring = Arc::new(SampleRing::new(32, 1));
        let shared = shared();
        shared.played.store(true, Ordering::Release);
        // `received` stays false: nothing has ever been pushed, so silence
        // here is not an "underflow event" worth tracking.
        let initial_avg = shared.device_lock.lock().avg;
        let mut source = RingSource::new(ring, shared.clone(), 48_000, 1, 10, 2, 4);

        let block = pull_block(&mut source, 1, 4);
        assert_eq!(block, vec![0.0; 4]);
        assert_eq!(shared.device_lock.lock().avg, initial_avg);
    }

    #[test]
    fn played_never_reverts_once_latched() {
        let ring = Arc::new(SampleRing::new(32, 1));
        // target=4, margin=1: 5 buffered frames clears the gate immediately.
        ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0], 5);
        let shared = shared();
        let mut source = RingSource::new(ring, shared.clone(), 48_000, 1, 4, 1, 4);

        // First block releases the gate and latches `played`, leaving 1
        // frame behind.
        let _ = pull_block(&mut source, 1, 4);
        assert!(shared.played.load(Ordering::Acquire));

        // A later block that underflows (only 1 frame left) must not
        // unlatch it, even though the same condition that originally gated
        // playback (insufficient buffering) is true again.
        let _ = pull_block(&mut source, 1, 4);
        assert!(
            shared.played.load(Ordering::Acquire),
            "played must never revert to false"
        );
    }
}
