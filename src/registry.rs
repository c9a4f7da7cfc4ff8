//! Thread registry (§4.4, C4).
//!
//! A fixed array of [`ThreadLaneSet`] slots. A thread claims a slot by
//! winning a CAS on that slot's `active` flag; once a slot has been used
//! in the current session it is never handed to a different thread again
//! — even after the owner unregisters — so the drain can keep draining
//! residual rings without racing a fresh claimant. Slots are only eligible
//! for reuse after [`ThreadRegistry::reopen_registrations`], which models
//! the session boundary in §3's "ThreadRegistry" lifecycle note.

use crate::lane::ThreadLaneSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub const MAX_THREADS: usize = 64;

struct Slot {
    lanes: ThreadLaneSet,
    ever_used: AtomicBool,
}

pub struct ThreadRegistry {
    slots: Vec<Slot>,
    thread_count: AtomicU32,
    accepting_registrations: AtomicBool,
    shutdown_requested: AtomicBool,
    index_ring_capacity: u32,
    detail_ring_capacity: u32,
    index_record_size: usize,
    max_detail_record_size: usize,
}

impl ThreadRegistry {
    pub fn new(
        index_ring_capacity: u32,
        detail_ring_capacity: u32,
        index_record_size: usize,
        max_detail_record_size: usize,
    ) -> Self {
        let slots = (0..MAX_THREADS)
            .map(|i| Slot {
                lanes: {
                    let set = ThreadLaneSet::new(
                        0,
                        i as u32,
                        index_ring_capacity,
                        detail_ring_capacity,
                        index_record_size,
                        max_detail_record_size,
                    );
                    set.active.store(false, Ordering::Relaxed);
                    set
                },
                ever_used: AtomicBool::new(false),
            })
            .collect();

        Self {
            slots,
            thread_count: AtomicU32::new(0),
            accepting_registrations: AtomicBool::new(true),
            shutdown_requested: AtomicBool::new(false),
            index_ring_capacity,
            detail_ring_capacity,
            index_record_size,
            max_detail_record_size,
        }
    }

    /// Claims the lowest never-used slot for `thread_id`. Returns `None`
    /// when registrations are closed (shutdown in progress) or every slot
    /// has been used this session (§7 `RegistryFull`).
    pub fn register(&self, thread_id: u32) -> Option<&ThreadLaneSet> {
        if !self.accepting_registrations.load(Ordering::Acquire) {
            return None;
        }

        for slot in &self.slots {
            if slot.ever_used.load(Ordering::Relaxed) {
                continue;
            }
            if slot
                .lanes
                .active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                slot.ever_used.store(true, Ordering::Relaxed);
                slot.lanes.thread_id_store(thread_id);
                self.thread_count.fetch_add(1, Ordering::Relaxed);
                return Some(&slot.lanes);
            }
        }
        tracing::warn!(thread_id, "thread registry full, producer will run untracked");
        None
    }

    /// Releases a thread's slot. Lane content (including any residual
    /// submitted rings) is left intact for the drain to finish consuming.
    pub fn unregister(&self, lanes: &ThreadLaneSet) {
        lanes.active.store(false, Ordering::Release);
        self.thread_count.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get_active_count(&self) -> u32 {
        self.thread_count.load(Ordering::Relaxed)
    }

    /// Enumeration for the drain worker. Tolerates `active == false`: an
    /// unregistered slot may still have submitted rings awaiting drain.
    pub fn get_thread_at(&self, i: usize) -> Option<&ThreadLaneSet> {
        self.slots.get(i).map(|s| &s.lanes)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        self.accepting_registrations.store(false, Ordering::Release);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Resets every slot to virgin state and reopens registration — the
    /// session-boundary transition named in §3.
    pub fn reopen_registrations(&mut self) {
        self.slots = (0..MAX_THREADS)
            .map(|i| Slot {
                lanes: ThreadLaneSet::new(
                    0,
                    i as u32,
                    self.index_ring_capacity,
                    self.detail_ring_capacity,
                    self.index_record_size,
                    self.max_detail_record_size,
                ),
                ever_used: AtomicBool::new(false),
            })
            .collect();
        self.thread_count.store(0, Ordering::Relaxed);
        self.accepting_registrations.store(true, Ordering::Release);
        self.shutdown_requested.store(false, Ordering::Release);
    }
}
