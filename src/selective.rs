//! Selective-persistence controller (§4.7, C7).
//!
//! Detail lanes are expensive to persist in full, so the drain only ever
//! writes detail windows that were "marked" interesting while they were
//! live. A window is a span of the detail lane's rings; it starts, rolls
//! forward as rings fill, and is closed either when a mark landed inside
//! it (dump it) or when it rolled off without one (discard it). The
//! decisive rule from §4.7 is `pool exhausted AND mark seen`: a window
//! is only worth dumping once backpressure already forced a ring to be
//! recycled — persisting every marked window regardless of pressure would
//! defeat the point of being selective.

use crate::lane::Lane;
use crate::marking::{MarkingPolicy, Probe};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Open,
    PendingDump,
    Discarded,
    Dumped,
}

pub struct SelectivePersistenceWindow {
    pub window_id: u64,
    pub thread_id: u32,
    pub first_ring: u32,
    pub state: WindowState,
}

#[derive(Debug, Serialize)]
pub struct WindowMetadata {
    pub window_id: u64,
    pub thread_id: u32,
    pub ring_index: u32,
    pub dump_reason: &'static str,
}

pub struct SelectivePersistenceController {
    next_window_id: AtomicU64,
    windows_opened: AtomicU64,
    windows_dumped: AtomicU64,
    windows_discarded: AtomicU64,
}

impl SelectivePersistenceController {
    pub fn new() -> Self {
        Self {
            next_window_id: AtomicU64::new(0),
            windows_opened: AtomicU64::new(0),
            windows_dumped: AtomicU64::new(0),
            windows_discarded: AtomicU64::new(0),
        }
    }

    pub fn start_new_window(&self, thread_id: u32, first_ring: u32) -> SelectivePersistenceWindow {
        let window_id = self.next_window_id.fetch_add(1, Ordering::Relaxed);
        self.windows_opened.fetch_add(1, Ordering::Relaxed);
        SelectivePersistenceWindow {
            window_id,
            thread_id,
            first_ring,
            state: WindowState::Open,
        }
    }

    /// Gates the lane's mark on the configured policy matching `probe`.
    /// Returns `true` iff the policy matched and the mark was set.
    pub fn mark_event(&self, lane: &Lane, policy: &MarkingPolicy, probe: &Probe<'_>) -> bool {
        if policy.matches_probe(probe) {
            lane.mark_event();
            true
        } else {
            false
        }
    }

    /// `true` iff the window should be dumped: a mark landed in it and the
    /// ring pool backing it has hit exhaustion at least once. Either
    /// condition alone leaves the window open or discards it.
    pub fn should_dump(&self, lane: &Lane) -> bool {
        lane.has_marked_event() && lane.pool().pool_exhaustions() > 0
    }

    pub fn close_window_for_dump(
        &self,
        mut window: SelectivePersistenceWindow,
    ) -> SelectivePersistenceWindow {
        window.state = WindowState::PendingDump;
        window
    }

    pub fn discard_window(
        &self,
        mut window: SelectivePersistenceWindow,
    ) -> SelectivePersistenceWindow {
        window.state = WindowState::Discarded;
        self.windows_discarded.fetch_add(1, Ordering::Relaxed);
        window
    }

    /// Hands the active ring to the drain and clears the lane's mark so
    /// the next window starts clean.
    pub fn perform_selective_swap(&self, lane: &Lane) -> Result<(), crate::error::RingError> {
        lane.pool().swap_active()?;
        lane.clear_marked_event();
        Ok(())
    }

    pub fn write_window_metadata<W: std::io::Write>(
        &self,
        writer: &mut W,
        meta: &WindowMetadata,
    ) -> std::io::Result<()> {
        let line = serde_json::to_string(meta)?;
        writeln!(writer, "{line}")
    }

    pub fn mark_dump_complete(&self, mut window: SelectivePersistenceWindow) -> SelectivePersistenceWindow {
        window.state = WindowState::Dumped;
        self.windows_dumped.fetch_add(1, Ordering::Relaxed);
        window
    }

    pub fn windows_opened(&self) -> u64 {
        self.windows_opened.load(Ordering::Relaxed)
    }

    pub fn windows_dumped(&self) -> u64 {
        self.windows_dumped.load(Ordering::Relaxed)
    }

    pub fn windows_discarded(&self) -> u64 {
        self.windows_discarded.load(Ordering::Relaxed)
    }
}

impl Default for SelectivePersistenceController {
    fn default() -> Self {
        Self::new()
    }
}
