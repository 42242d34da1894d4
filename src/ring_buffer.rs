//! Fixed-capacity SPSC ring of interleaved audio frames.
//!
//! One producer thread (the frame source) and one consumer thread (the audio
//! device's own real-time thread) share this buffer. Cursor bookkeeping uses
//! ever-increasing [`AtomicUsize`] counters — the difference between them,
//! not either value mod capacity, is the live state — so `can_read() +
//! can_write() == capacity()` holds unconditionally, with no off-by-one slot
//! reserved to distinguish "full" from "empty".
//!
//! `prepare_write` never touches memory the consumer can read (everything at
//! or past the current write cursor is unread by construction), so it needs
//! no lock. `commit_write` and `skip` publish cursor changes with `Release`
//! ordering and must be called while the caller holds whatever lock also
//! guards the moving average (see [`crate::playback`]).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed-capacity single-producer/single-consumer ring of interleaved
/// audio frames (`frame = channels` `f32` samples).
pub struct SampleRing {
    buffer: UnsafeCell<Box<[f32]>>,
    /// Samples (channels) per frame.
    frame_size: usize,
    /// Capacity in frames.
    capacity: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

// SAFETY: single producer calls `prepare_write`/`commit_write`/`write`/`skip`
// from one thread; single consumer calls `read` from one (different) thread.
// The producer never writes at or behind the consumer's read cursor (the
// fast path is only taken when `n <= can_write()`), and the consumer never
// reads at or ahead of the producer's write cursor (`n <= can_read()`).
// `Release` stores on the cursor that changed, paired with `Acquire` loads
// on both sides, establish the happens-before edge for the samples
// themselves.
unsafe impl Send for SampleRing {}
unsafe impl Sync for SampleRing {}

impl SampleRing {
    /// Allocate a ring able to hold `capacity` frames of `frame_size`
    /// interleaved samples each. `capacity` need not be a power of two —
    /// unlike a mask-indexed ring, this buffer is sized from a
    /// latency budget (`target_buffering + 1s`), not for fast modulo.
    pub fn new(capacity: usize, frame_size: usize) -> Self {
        Self::try_new(capacity, frame_size).expect("ring allocation failed")
    }

    /// Fallible counterpart of [`Self::new`], used where an allocation
    /// failure should surface as a [`crate::error::PlaybackError`] rather
    /// than abort the process.
    pub fn try_new(capacity: usize, frame_size: usize) -> Result<Self, String> {
        assert!(capacity > 0, "ring capacity must be > 0");
        assert!(frame_size > 0, "frame size must be > 0");
        let elems = capacity
            .checked_mul(frame_size)
            .ok_or_else(|| "ring size overflows usize".to_string())?;
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(elems)
            .map_err(|e| e.to_string())?;
        buffer.resize(elems, 0.0f32);
        Ok(SampleRing {
            buffer: UnsafeCell::new(buffer.into_boxed_slice()),
            frame_size,
            capacity,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        })
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently readable. Callable by either side.
    pub fn can_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Frames currently writable. Callable by either side.
    pub fn can_write(&self) -> usize {
        self.capacity - self.can_read()
    }

    fn copy_in(&self, dst_frame: usize, src: &[f32], n: usize) {
        debug_assert!(src.len() >= n * self.frame_size);
        // SAFETY: only the producer writes into the buffer, and only at
        // frames the consumer cannot yet read (enforced by callers via the
        // `n <= can_write()` invariant).
        let buffer = unsafe { &mut *self.buffer.get() };
        let cap_elems = self.capacity * self.frame_size;
        let start = (dst_frame % self.capacity) * self.frame_size;
        let len = n * self.frame_size;
        if start + len <= cap_elems {
            buffer[start..start + len].copy_from_slice(&src[..len]);
        } else {
            let first = cap_elems - start;
            buffer[start..].copy_from_slice(&src[..first]);
            buffer[..len - first].copy_from_slice(&src[first..len]);
        }
    }

    fn copy_out(&self, dst: &mut [f32], src_frame: usize, n: usize) {
        debug_assert!(dst.len() >= n * self.frame_size);
        // SAFETY: only the consumer reads, and only frames already
        // committed by the producer (enforced via `n <= can_read()`).
        let buffer = unsafe { &*self.buffer.get() };
        let cap_elems = self.capacity * self.frame_size;
        let start = (src_frame % self.capacity) * self.frame_size;
        let len = n * self.frame_size;
        if start + len <= cap_elems {
            dst[..len].copy_from_slice(&buffer[start..start + len]);
        } else {
            let first = cap_elems - start;
            dst[..first].copy_from_slice(&buffer[start..]);
            dst[first..len].copy_from_slice(&buffer[..len - first]);
        }
    }

    /// Copy `n` frames from `src` into the write region without advancing
    /// the producer cursor. Requires `n <= can_write()`. Safe to call
    /// without the device lock: the write region is never read.
    pub fn prepare_write(&self, src: &[f32], n: usize) {
        debug_assert!(n <= self.can_write());
        let write = self.write_pos.load(Ordering::Relaxed);
        self.copy_in(write, src, n);
    }

    /// Publish `n` previously prepared frames by advancing the producer
    /// cursor. Must be called under the device lock.
    pub fn commit_write(&self, n: usize) {
        let write = self.write_pos.load(Ordering::Relaxed);
        self.write_pos.store(write.wrapping_add(n), Ordering::Release);
    }

    /// Equivalent to `prepare_write` + `commit_write`; used on the slow
    /// path, already under the device lock.
    pub fn write(&self, src: &[f32], n: usize) {
        self.prepare_write(src, n);
        self.commit_write(n);
    }

    /// Copy and consume `n` frames. Called only from the device callback,
    /// already under the device lock.
    pub fn read(&self, dst: &mut [f32], n: usize) {
        debug_assert!(n <= self.can_read());
        let read = self.read_pos.load(Ordering::Relaxed);
        self.copy_out(dst, read, n);
        self.read_pos.store(read.wrapping_add(n), Ordering::Release);
    }

    /// Drop the oldest `n` readable frames. Called by the producer under
    /// the device lock as part of the overflow policy.
    pub fn skip(&self, n: usize) {
        debug_assert!(n <= self.can_read());
        let read = self.read_pos.load(Ordering::Relaxed);
        self.read_pos.store(read.wrapping_add(n), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ring_is_empty_and_full_writable() {
        let ring = SampleRing::new(16, 2);
        assert_eq!(ring.can_read(), 0);
        assert_eq!(ring.can_write(), 16);
        assert_eq!(ring.can_read() + ring.can_write(), ring.capacity());
    }

    #[test]
    fn write_then_read_round_trips() {
        let ring = SampleRing::new(8, 2);
        let src = vec![1.0, 2.0, 3.0, 4.0]; // 2 frames, 2 channels
        ring.write(&src, 2);
        assert_eq!(ring.can_read(), 2);
        assert_eq!(ring.can_write(), 6);

        let mut dst = vec![0.0; 4];
        ring.read(&mut dst, 2);
        assert_eq!(dst, src);
        assert_eq!(ring.can_read(), 0);
        assert_eq!(ring.can_write(), 8);
    }

    #[test]
    fn wraps_across_the_boundary() {
        let ring = SampleRing::new(4, 1);
        ring.write(&[1.0, 2.0, 3.0], 3);
        let mut dst = vec![0.0; 2];
        ring.read(&mut dst, 2);
        assert_eq!(dst, vec![1.0, 2.0]);
        // Write cursor now at 3, read cursor at 2: writing 3 more wraps.
        ring.write(&[4.0, 5.0, 6.0], 3);
        assert_eq!(ring.can_read(), 4);
        let mut dst2 = vec![0.0; 4];
        ring.read(&mut dst2, 4);
        assert_eq!(dst2, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn skip_drops_oldest_samples() {
        let ring = SampleRing::new(8, 1);
        ring.write(&[1.0, 2.0, 3.0, 4.0], 4);
        ring.skip(2);
        assert_eq!(ring.can_read(), 2);
        let mut dst = vec![0.0; 2];
        ring.read(&mut dst, 2);
        assert_eq!(dst, vec![3.0, 4.0]);
    }

    #[test]
    fn prepare_write_is_published_only_on_commit() {
        let ring = SampleRing::new(8, 1);
        ring.prepare_write(&[1.0, 2.0], 2);
        assert_eq!(ring.can_read(), 0, "prepare must not advance the cursor");
        ring.commit_write(2);
        assert_eq!(ring.can_read(), 2);
    }

    #[test]
    fn invariant_holds_across_many_operations() {
        let ring = SampleRing::new(37, 3); // deliberately not a power of two
        let mut produced = 0usize;
        let mut consumed = 0usize;
        for step in 0..500 {
            let writable = ring.can_write();
            let to_write = (step % 11).min(writable);
            if to_write > 0 {
                let src = vec![step as f32; to_write * 3];
                ring.write(&src, to_write);
                produced += to_write;
            }
            let readable = ring.can_read();
            let to_read = (step % 7).min(readable);
            if to_read > 0 {
                let mut dst = vec![0.0; to_read * 3];
                ring.read(&mut dst, to_read);
                consumed += to_read;
            }
            assert_eq!(ring.can_read() + ring.can_write(), ring.capacity());
            assert!(ring.can_read() <= ring.capacity());
        }
        assert_eq!(produced - consumed, ring.can_read());
    }
}
