//! Lane and thread lane set (§4.3, C3).
//!
//! A lane bundles a ring pool with the counters and flags the rest of the
//! system needs to route and account for events on one (thread, kind)
//! pair. A `ThreadLaneSet` pairs an index lane (4 rings) with a detail
//! lane (2 rings) for one thread, cache-line isolated so producer writes
//! to one lane never bounce the other lane's cache line.

use crate::error::RingError;
use crate::ring_pool::RingPool;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Ring count for an index lane (§3 `Lane` invariant: `R=4` for index).
pub const INDEX_LANE_RINGS: u32 = 4;
/// Ring count for a detail lane (§3 `Lane` invariant: `R=2` for detail).
pub const DETAIL_LANE_RINGS: u32 = 2;

pub struct Lane {
    pool: RingPool,
    written: AtomicU64,
    dropped: AtomicU64,
    bytes_dropped: AtomicU64,
    /// Consulted cheaply by the selective-persistence controller (§4.7)
    /// without walking the window state.
    marked_event_seen: AtomicBool,
}

impl Lane {
    pub fn new(ring_count: u32, ring_capacity: u32, record_size: usize) -> Self {
        Self {
            pool: RingPool::new(ring_count, ring_capacity, record_size),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            bytes_dropped: AtomicU64::new(0),
            marked_event_seen: AtomicBool::new(false),
        }
    }

    pub fn index_lane(ring_capacity: u32, record_size: usize) -> Self {
        Self::new(INDEX_LANE_RINGS, ring_capacity, record_size)
    }

    /// `max_record_size` is the widest a `DetailEvent` (24-byte header plus
    /// payload) can be for the configured stack-capture size; each slot is
    /// allocated at that width and a record's unused tail goes unwritten —
    /// `total_length` in the header is what tells a reader how much of the
    /// slot is real.
    pub fn detail_lane(ring_capacity: u32, max_record_size: usize) -> Self {
        Self::new(DETAIL_LANE_RINGS, ring_capacity, max_record_size)
    }

    pub fn pool(&self) -> &RingPool {
        &self.pool
    }

    /// Writes one record to the active ring, swapping in a fresh ring and
    /// retrying once if the active ring was full. Returns
    /// [`RingError::PoolExhausted`] when no spare ring is available — the
    /// caller must then consult the backpressure controller (§4.5).
    pub fn write(&self, record: &[u8]) -> Result<(), RingError> {
        match self.pool.active_ring().write(record) {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(RingError::WriteFull) => {
                self.pool.swap_active()?;
                self.pool.active_ring().write(record).expect("fresh ring has space");
                self.written.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Like [`Lane::write`], but zero-pads `record` up to the ring's slot
    /// width first — for the detail lane, where records are shorter than
    /// the slot they occupy.
    pub fn write_padded(&self, record: &[u8]) -> Result<(), RingError> {
        let slot_width = self.pool.active_ring().record_size();
        assert!(record.len() <= slot_width, "record exceeds detail slot width");
        if record.len() == slot_width {
            return self.write(record);
        }
        let mut padded = vec![0u8; slot_width];
        padded[..record.len()].copy_from_slice(record);
        self.write(&padded)
    }

    pub fn record_drop(&self, bytes: u64) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.bytes_dropped.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Moves a record that was already counted in `written` over to
    /// `dropped` — used when drop-oldest evicts a record from the ring
    /// after it was written, so `written + dropped` never double-counts
    /// it against `events_generated`.
    pub fn reclassify_as_dropped(&self, bytes: u64) {
        let _ = self
            .written
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |w| Some(w.saturating_sub(1)));
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.bytes_dropped.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped.load(Ordering::Relaxed)
    }

    pub fn take_ring(&self) -> Option<u32> {
        self.pool.take_ring()
    }

    pub fn return_ring(&self, idx: u32) {
        self.pool.return_ring(idx);
    }

    pub fn mark_event(&self) {
        self.marked_event_seen.store(true, Ordering::Release);
    }

    pub fn clear_marked_event(&self) {
        self.marked_event_seen.store(false, Ordering::Release);
    }

    pub fn has_marked_event(&self) -> bool {
        self.marked_event_seen.load(Ordering::Acquire)
    }
}

/// One thread's index + detail lanes, plus the bookkeeping the drain and
/// registry need (§3 `ThreadLaneSet`). Lanes are wrapped in `CachePadded`
/// so a producer hammering the index lane never shares a cache line with
/// the (much colder) detail lane.
pub struct ThreadLaneSet {
    thread_id: AtomicU32,
    pub slot_index: u32,
    pub active: std::sync::atomic::AtomicBool,
    pub index_lane: CachePadded<Lane>,
    pub detail_lane: CachePadded<Lane>,
    pub events_generated: AtomicU64,
    pub last_event_ts: AtomicU64,
}

impl ThreadLaneSet {
    pub fn new(
        thread_id: u32,
        slot_index: u32,
        index_ring_capacity: u32,
        detail_ring_capacity: u32,
        index_record_size: usize,
        max_detail_record_size: usize,
    ) -> Self {
        Self {
            thread_id: AtomicU32::new(thread_id),
            slot_index,
            active: std::sync::atomic::AtomicBool::new(true),
            index_lane: CachePadded::new(Lane::index_lane(index_ring_capacity, index_record_size)),
            detail_lane: CachePadded::new(Lane::detail_lane(
                detail_ring_capacity,
                max_detail_record_size,
            )),
            events_generated: AtomicU64::new(0),
            last_event_ts: AtomicU64::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id.load(Ordering::Relaxed)
    }

    pub fn thread_id_store(&self, thread_id: u32) {
        self.thread_id.store(thread_id, Ordering::Relaxed);
    }

    pub fn record_event(&self, timestamp_ns: u64) {
        self.events_generated.fetch_add(1, Ordering::Relaxed);
        self.last_event_ts.store(timestamp_ns, Ordering::Relaxed);
    }
}
