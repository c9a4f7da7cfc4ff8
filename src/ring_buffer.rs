//! Lock-free fixed-record ring buffer (§4.1, C1).
//!
//! One producer, one consumer, bounded capacity. Positions are `u32`
//! counters that wrap modulo `2*capacity` rather than the buffer index
//! directly — the classic "doubled modulus" trick that lets `write_pos -
//! read_pos` distinguish "empty" from "full" without a sentinel slot.
//! The buffer index is always `pos & (capacity - 1)`.
//!
//! # Memory ordering
//!
//! - `write`: loads `read_pos` with `Acquire`, stores the new `write_pos`
//!   with `Release`.
//! - `read`/`drain`: loads `write_pos` with `Acquire`, stores the new
//!   `read_pos` with `Release`.
//!
//! This pairs the producer's publish with the consumer's observation and
//! vice versa, so a consumer that observes a given `write_pos` also
//! observes every record written before it.

use crate::invariants::{debug_assert_bounded_occupancy, debug_assert_monotonic};
use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// A single fixed-width record slot, stored as raw bytes so the layout is
/// stable regardless of the producer's native type — records placed here
/// must already be in their on-wire encoding.
pub struct RingBuffer {
    record_size: usize,
    capacity: u32,
    mask: u32,
    two_capacity: u32,
    write_pos: CachePadded<AtomicU32>,
    read_pos: CachePadded<AtomicU32>,
    storage: UnsafeCell<Box<[u8]>>,
}

// Safety: `storage` is only accessed through the write/read protocol below,
// which upholds the single-producer/single-consumer discipline documented
// on each method.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Creates a ring holding `capacity` records of `record_size` bytes
    /// each. `capacity` must be a power of two.
    pub fn new(capacity: u32, record_size: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        assert!(record_size > 0, "record_size must be > 0");
        let storage = vec![0u8; capacity as usize * record_size].into_boxed_slice();
        Self {
            record_size,
            capacity,
            mask: capacity - 1,
            two_capacity: capacity * 2,
            write_pos: CachePadded::new(AtomicU32::new(0)),
            read_pos: CachePadded::new(AtomicU32::new(0)),
            storage: UnsafeCell::new(storage),
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    #[inline]
    fn advance(&self, pos: u32) -> u32 {
        let next = pos + 1;
        if next == self.two_capacity {
            0
        } else {
            next
        }
    }

    #[inline]
    fn distance(&self, write_pos: u32, read_pos: u32) -> u32 {
        if write_pos >= read_pos {
            write_pos - read_pos
        } else {
            write_pos + self.two_capacity - read_pos
        }
    }

    /// Number of records currently queued.
    pub fn len(&self) -> u32 {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        self.distance(write_pos, read_pos)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Writes one record. Producer-only.
    ///
    /// # Panics
    /// Panics if `record.len() != record_size`.
    pub fn write(&self, record: &[u8]) -> Result<(), crate::error::RingError> {
        assert_eq!(record.len(), self.record_size, "record size mismatch");

        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let occupied = self.distance(write_pos, read_pos);
        debug_assert_bounded_occupancy!(occupied, self.capacity);
        if occupied >= self.capacity {
            return Err(crate::error::RingError::WriteFull);
        }

        let slot = (write_pos & self.mask) as usize;
        let offset = slot * self.record_size;
        // Safety: slot is not in [read_pos, write_pos) so the consumer is
        // not reading it; single producer means no other writer touches it.
        unsafe {
            let storage = &mut *self.storage.get();
            storage[offset..offset + self.record_size].copy_from_slice(record);
        }

        let new_write = self.advance(write_pos);
        debug_assert_monotonic!("write_pos", write_pos, new_write);
        self.write_pos.store(new_write, Ordering::Release);
        Ok(())
    }

    /// Reads every currently-available record, invoking `f` for each, and
    /// advances `read_pos` once at the end (amortizing the atomic store
    /// the way the drain worker wants). Consumer-only. Returns the number
    /// of records drained.
    pub fn drain<F: FnMut(&[u8])>(&self, mut f: F) -> usize {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let avail = self.distance(write_pos, read_pos);
        if avail == 0 {
            return 0;
        }

        let mut pos = read_pos;
        for _ in 0..avail {
            let slot = (pos & self.mask) as usize;
            let offset = slot * self.record_size;
            // Safety: [read_pos, write_pos) was published by the producer's
            // Release store on write_pos, observed here via Acquire; only
            // the consumer reads these slots.
            unsafe {
                let storage = &*self.storage.get();
                f(&storage[offset..offset + self.record_size]);
            }
            pos = self.advance(pos);
        }

        debug_assert_monotonic!("read_pos", read_pos, pos);
        self.read_pos.store(pos, Ordering::Release);
        avail as usize
    }

    /// Drop-oldest backpressure policy (§4.5): discards the single oldest
    /// queued record by advancing `read_pos` past it.
    ///
    /// This is the one place a producer mutates `read_pos`, so it uses a
    /// CAS loop instead of a plain store to stay correct if the consumer
    /// is concurrently draining the same ring.
    pub fn drop_oldest(&self) -> bool {
        loop {
            let read_pos = self.read_pos.load(Ordering::Acquire);
            let write_pos = self.write_pos.load(Ordering::Acquire);
            if read_pos == write_pos {
                return false;
            }
            let advanced = self.advance(read_pos);
            if self
                .read_pos
                .compare_exchange_weak(read_pos, advanced, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(b: u8) -> Vec<u8> {
        vec![b; 8]
    }

    #[test]
    fn write_then_drain_round_trips() {
        let ring = RingBuffer::new(4, 8);
        for i in 0..4u8 {
            ring.write(&rec(i)).unwrap();
        }
        assert!(ring.is_full());

        let mut seen = Vec::new();
        let n = ring.drain(|r| seen.push(r[0]));
        assert_eq!(n, 4);
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(ring.is_empty());
    }

    #[test]
    fn write_fails_when_full() {
        let ring = RingBuffer::new(2, 4);
        assert!(ring.write(&[1; 4]).is_ok());
        assert!(ring.write(&[2; 4]).is_ok());
        assert!(matches!(
            ring.write(&[3; 4]),
            Err(crate::error::RingError::WriteFull)
        ));
    }

    #[test]
    fn capacity_boundaries() {
        // capacity - 1, capacity, capacity + 1 writes on an 8-slot ring.
        let ring = RingBuffer::new(8, 4);
        for i in 0..7u8 {
            ring.write(&[i; 4]).unwrap();
        }
        assert!(!ring.is_full());
        ring.write(&[7; 4]).unwrap();
        assert!(ring.is_full());
        assert!(ring.write(&[8; 4]).is_err());
    }

    #[test]
    fn wraps_across_many_laps() {
        let ring = RingBuffer::new(4, 1);
        for lap in 0..100u32 {
            for i in 0..4u8 {
                ring.write(&[i]).unwrap();
            }
            let mut seen = Vec::new();
            let n = ring.drain(|r| seen.push(r[0]));
            assert_eq!(n, 4, "lap {lap}");
            assert_eq!(seen, vec![0, 1, 2, 3], "lap {lap}");
        }
    }

    #[test]
    fn drop_oldest_frees_one_slot() {
        let ring = RingBuffer::new(2, 4);
        ring.write(&[1; 4]).unwrap();
        ring.write(&[2; 4]).unwrap();
        assert!(ring.write(&[3; 4]).is_err());
        assert!(ring.drop_oldest());
        ring.write(&[3; 4]).unwrap();
        let mut seen = Vec::new();
        ring.drain(|r| seen.push(r[0]));
        assert_eq!(seen, vec![2, 3]);
    }

    #[test]
    fn drop_oldest_on_empty_ring_is_noop() {
        let ring = RingBuffer::new(2, 4);
        assert!(!ring.drop_oldest());
    }
}
