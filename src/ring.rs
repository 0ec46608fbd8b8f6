/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Bounded circular sample buffer shared between one writer (the beam's
//! ingest path) and many readers (worker threads running a DFB iteration).
//!
//! The ring performs no locking of its own. `last` only ever moves forward
//! from the single ingest thread; `done` only ever moves forward from under
//! the beam lock (see [`crate::beam`]). Readers are handed a [`RingView`]
//! clamped to `[done, last)` at the moment it is constructed, so a worker can
//! never observe indices the writer hasn't initialized yet, regardless of
//! what it does with the handle.

use crate::packet::Sample8;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Samples are stored behind `UnsafeCell` because the writer and readers
/// touch disjoint index ranges concurrently by construction, not because the
/// compiler can see that.
struct Storage {
    cells: Box<[UnsafeCell<Sample8>]>,
}

// SAFETY: callers only ever write at indices in `[last, last+n)` before
// advancing `last`, and only ever read indices in `[done, last)`. The two
// ranges never overlap because `done <= last` is an invariant maintained by
// `InputRing::advance_done`.
unsafe impl Sync for Storage {}

pub struct InputRing {
    storage: Storage,
    capacity: u64,
    done: AtomicU64,
    next: AtomicU64,
    last: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingFull;

impl InputRing {
    pub fn new(capacity: usize) -> Self {
        let cells = (0..capacity)
            .map(|_| UnsafeCell::new(Sample8::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            storage: Storage { cells },
            capacity: capacity as u64,
            done: AtomicU64::new(0),
            next: AtomicU64::new(0),
            last: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Acquire)
    }

    pub fn next(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    pub fn free(&self) -> u64 {
        self.capacity - (self.last() - self.done())
    }

    pub fn samples(&self) -> u64 {
        self.last() - self.done()
    }

    /// Resets all cursors to zero; used on the PENDING -> RUNNING transition.
    pub fn reset(&self) {
        self.done.store(0, Ordering::Release);
        self.next.store(0, Ordering::Release);
        self.last.store(0, Ordering::Release);
    }

    pub fn set_next(&self, idx: u64) {
        self.next.store(idx, Ordering::Release);
    }

    pub fn advance_next(&self, n: u64) {
        self.next.fetch_add(n, Ordering::AcqRel);
    }

    /// Moves `done` forward. Callers must hold the beam lock and must never
    /// move `done` past the oldest incomplete pending-list entry.
    pub fn advance_done(&self, idx: u64) {
        debug_assert!(idx <= self.next());
        self.done.store(idx, Ordering::Release);
    }

    /// Writes `samples` at the current `last` position and advances `last`.
    /// The caller (the beam's single ingest thread) is responsible for
    /// ensuring `self.free() >= samples.len()` beforehand.
    pub fn write(&self, samples: &[Sample8]) -> Result<(), RingFull> {
        if samples.len() as u64 > self.free() {
            return Err(RingFull);
        }
        let start = self.last();
        for (offset, sample) in samples.iter().enumerate() {
            let idx = ((start + offset as u64) % self.capacity) as usize;
            // SAFETY: this index lies in [last, last+n), which readers never
            // touch until `last` below has been published.
            unsafe {
                *self.storage.cells[idx].get() = *sample;
            }
        }
        self.last.fetch_add(samples.len() as u64, Ordering::Release);
        Ok(())
    }

    /// A read-only view clamped to `[done, last)`, safe to hand to a worker
    /// thread. `start`/`len` outside that range are silently clamped rather
    /// than causing out-of-bounds access.
    pub fn view(&self, start: u64, len: u64) -> RingView<'_> {
        let done = self.done();
        let last = self.last();
        let clamped_start = start.max(done).min(last);
        let clamped_end = (start + len).max(clamped_start).min(last);
        RingView {
            ring: self,
            start: clamped_start,
            len: clamped_end - clamped_start,
        }
    }
}

pub struct RingView<'a> {
    ring: &'a InputRing,
    start: u64,
    len: u64,
}

impl<'a> RingView<'a> {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the view into `out`, converting to complex float as it goes.
    /// `out.len()` must equal `self.len()`.
    pub fn copy_to_complex(&self, out: &mut [num_complex::Complex32], swap: bool) {
        assert_eq!(out.len() as u64, self.len);
        let cap = self.ring.capacity;
        for i in 0..self.len {
            let idx = ((self.start + i) % cap) as usize;
            // SAFETY: index lies in [done, last) at view-construction time;
            // `done` cannot have advanced past `self.start` since only the
            // beam lock moves `done`, and the caller holds a `RingView`
            // built after acquiring whatever snapshot it needed.
            let sample = unsafe { *self.ring.storage.cells[idx].get() };
            out[i as usize] = sample.to_complex_f32(swap);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let ring = InputRing::new(16);
        let samples: Vec<Sample8> = (0..8).map(|i| Sample8 { i, q: -i }).collect();
        ring.write(&samples).unwrap();
        assert_eq!(ring.last(), 8);
        let view = ring.view(0, 8);
        assert_eq!(view.len(), 8);
        let mut out = vec![num_complex::Complex32::default(); 8];
        view.copy_to_complex(&mut out, false);
        assert_eq!(out[3].re, 3.0);
        assert_eq!(out[3].im, -3.0);
    }

    #[test]
    fn write_wraps_around_capacity() {
        let ring = InputRing::new(4);
        ring.write(&[Sample8 { i: 1, q: 1 }; 4]).unwrap();
        ring.advance_done(4);
        ring.write(&[Sample8 { i: 2, q: 2 }; 4]).unwrap();
        let view = ring.view(4, 4);
        let mut out = vec![num_complex::Complex32::default(); 4];
        view.copy_to_complex(&mut out, false);
        assert!(out.iter().all(|c| c.re == 2.0));
    }

    #[test]
    fn write_rejects_when_full() {
        let ring = InputRing::new(4);
        let err = ring.write(&[Sample8::default(); 5]).unwrap_err();
        assert_eq!(err, RingFull);
    }

    #[test]
    fn view_clamps_to_done_last_window() {
        let ring = InputRing::new(16);
        ring.write(&[Sample8 { i: 1, q: 1 }; 10]).unwrap();
        ring.advance_done(2);
        let view = ring.view(0, 100);
        assert_eq!(view.len(), 8);
    }
}
