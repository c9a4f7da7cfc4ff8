//! Ring pool and active-ring swapper (§4.2, C2).
//!
//! A lane owns `R` rings. Exactly one is "active" at a time; the producer
//! always writes to the active ring. When the active ring reports full,
//! the producer calls [`RingPool::swap_active`] to lease in a fresh ring
//! from the free queue and hand the full one to the drain worker via the
//! submit queue. Ring ownership is tracked purely by which of the four
//! places an index currently sits in — active, submit queue, held by the
//! drain, or free queue — never by a shared reference.

use crate::error::RingError;
use crate::invariants::debug_assert_ring_index_in_range;
use crate::ring_buffer::RingBuffer;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub struct RingPool {
    rings: Vec<RingBuffer>,
    active_idx: AtomicU32,
    submit_queue: ArrayQueue<u32>,
    free_queue: ArrayQueue<u32>,
    ring_swaps: AtomicU64,
    pool_exhaustions: AtomicU64,
}

impl RingPool {
    /// Creates a pool of `ring_count` rings, each `ring_capacity` records
    /// of `record_size` bytes. Ring 0 starts active; the rest start free.
    pub fn new(ring_count: u32, ring_capacity: u32, record_size: usize) -> Self {
        assert!(ring_count >= 2, "a pool needs at least one spare ring");
        let rings = (0..ring_count)
            .map(|_| RingBuffer::new(ring_capacity, record_size))
            .collect();

        let submit_queue = ArrayQueue::new(ring_count as usize);
        let free_queue = ArrayQueue::new(ring_count as usize);
        for idx in 1..ring_count {
            free_queue.push(idx).expect("free queue sized to ring_count");
        }

        Self {
            rings,
            active_idx: AtomicU32::new(0),
            submit_queue,
            free_queue,
            ring_swaps: AtomicU64::new(0),
            pool_exhaustions: AtomicU64::new(0),
        }
    }

    pub fn ring_count(&self) -> u32 {
        self.rings.len() as u32
    }

    /// The ring currently receiving producer writes.
    pub fn active_ring(&self) -> &RingBuffer {
        let idx = self.active_idx.load(Ordering::Acquire);
        debug_assert_ring_index_in_range!(idx, self.rings.len());
        &self.rings[idx as usize]
    }

    pub fn ring(&self, idx: u32) -> &RingBuffer {
        &self.rings[idx as usize]
    }

    /// Number of rings sitting in the free queue right now — the signal
    /// the backpressure controller watches (§4.5).
    pub fn free_rings(&self) -> u32 {
        self.free_queue.len() as u32
    }

    pub fn ring_swaps(&self) -> u64 {
        self.ring_swaps.load(Ordering::Relaxed)
    }

    pub fn pool_exhaustions(&self) -> u64 {
        self.pool_exhaustions.load(Ordering::Relaxed)
    }

    /// Leases in a fresh ring and submits the stale active ring to the
    /// drain worker. Producer-only.
    pub fn swap_active(&self) -> Result<(), RingError> {
        let Some(new_idx) = self.free_queue.pop() else {
            self.pool_exhaustions.fetch_add(1, Ordering::Relaxed);
            return Err(RingError::PoolExhausted);
        };

        let stale_idx = self.active_idx.swap(new_idx, Ordering::Release);
        self.submit_queue
            .push(stale_idx)
            .expect("submit queue sized to ring_count");
        self.ring_swaps.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drain-only: takes the next ring index awaiting consumption.
    pub fn take_ring(&self) -> Option<u32> {
        self.submit_queue.pop()
    }

    /// Drain-only: returns a fully-drained ring to the free pool.
    pub fn return_ring(&self, idx: u32) {
        self.free_queue
            .push(idx)
            .expect("free queue sized to ring_count");
    }
}
