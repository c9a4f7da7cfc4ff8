//! Backpressure controller (§4.5, C5).
//!
//! Watches a lane's free-ring ratio and walks a `Normal -> Pressure ->
//! Dropping -> Recovery -> Normal` state machine. `Dropping` is where a
//! configured [`DropPolicy`] actually discards queued records; the other
//! states are purely advisory (exposed for metrics/logging).

use crate::invariants::debug_assert_valid_transition;
use crate::lane::Lane;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BackpressureLevel {
    Normal = 0,
    Pressure = 1,
    Dropping = 2,
    Recovery = 3,
}

impl BackpressureLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Normal,
            1 => Self::Pressure,
            2 => Self::Dropping,
            _ => Self::Recovery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPolicy {
    /// Discard the oldest queued record to make room (default).
    DropOldest,
    /// Reject the incoming record, leaving the queue untouched.
    DropNewest,
    /// Reserved for priority-aware dropping; currently behaves like
    /// `DropNewest` (rejects the incoming record) until priority tagging
    /// is added to `IndexEvent`.
    DropByPriority,
}

#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    /// Free-ring percentage (0.0-1.0) below which `Normal` enters `Pressure`.
    pub pressure_ratio: f32,
    /// Free-ring percentage above which `Pressure`/`Recovery` head back
    /// toward `Normal`.
    pub recovery_ratio: f32,
    /// How long a lane must stay above `recovery_ratio` after its last
    /// drop before `Recovery` is allowed to settle to `Normal`.
    pub stability_period_ns: u64,
    pub policy: DropPolicy,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            pressure_ratio: 0.25,
            recovery_ratio: 0.5,
            stability_period_ns: 1_000_000_000,
            policy: DropPolicy::DropOldest,
        }
    }
}

pub struct BackpressureController {
    config: BackpressureConfig,
    state: AtomicU8,
    transitions: AtomicU64,
    records_dropped: AtomicU64,
    records_rejected: AtomicU32,
    last_drop_ns: AtomicU64,
}

impl BackpressureController {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(BackpressureLevel::Normal as u8),
            transitions: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            records_rejected: AtomicU32::new(0),
            last_drop_ns: AtomicU64::new(0),
        }
    }

    pub fn level(&self) -> BackpressureLevel {
        BackpressureLevel::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    fn free_pct(lane: &Lane) -> f32 {
        let pool = lane.pool();
        pool.free_rings() as f32 / pool.ring_count() as f32
    }

    /// Recomputes the level from the lane's current free-ring count and
    /// publishes the new state, walking exactly one edge of
    /// `Normal -> Pressure -> Dropping -> Recovery -> Normal` per call. Call
    /// this on every pool-exhaustion signal from
    /// [`crate::error::RingError::PoolExhausted`] and periodically from the
    /// drain loop so `Recovery` can be observed even without new producer
    /// traffic.
    pub fn check_exhaustion(&self, lane: &Lane, now_ns: u64) -> BackpressureLevel {
        let pool = lane.pool();
        let free_rings = pool.free_rings();
        let free_pct = Self::free_pct(lane);
        let current = self.level();

        let next = match current {
            BackpressureLevel::Normal => {
                if free_pct < self.config.pressure_ratio {
                    BackpressureLevel::Pressure
                } else {
                    current
                }
            }
            BackpressureLevel::Pressure => {
                if free_rings == 0 {
                    BackpressureLevel::Dropping
                } else if free_pct > self.config.recovery_ratio {
                    BackpressureLevel::Normal
                } else {
                    current
                }
            }
            BackpressureLevel::Dropping => {
                if free_rings > 0 {
                    BackpressureLevel::Recovery
                } else {
                    current
                }
            }
            BackpressureLevel::Recovery => {
                if free_rings == 0 {
                    BackpressureLevel::Dropping
                } else if free_pct > self.config.recovery_ratio
                    && now_ns.saturating_sub(self.last_drop_ns.load(Ordering::Relaxed)) > self.config.stability_period_ns
                {
                    BackpressureLevel::Normal
                } else {
                    current
                }
            }
        };

        if next != current {
            let allowed = matches!(
                (current, next),
                (BackpressureLevel::Normal, BackpressureLevel::Pressure)
                    | (BackpressureLevel::Pressure, BackpressureLevel::Dropping)
                    | (BackpressureLevel::Pressure, BackpressureLevel::Normal)
                    | (BackpressureLevel::Dropping, BackpressureLevel::Recovery)
                    | (BackpressureLevel::Recovery, BackpressureLevel::Dropping)
                    | (BackpressureLevel::Recovery, BackpressureLevel::Normal)
            );
            debug_assert_valid_transition!(current, next, allowed);
            self.state.store(next as u8, Ordering::Relaxed);
            self.transitions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?current, ?next, ?free_pct, "backpressure state transition");
        }
        next
    }

    /// Applies the configured drop policy once in `Dropping` state.
    /// Returns `true` if a queued record was actually discarded.
    pub fn apply_drop_policy(&self, lane: &Lane, incoming_record_bytes: u64, now_ns: u64) -> bool {
        match self.config.policy {
            DropPolicy::DropOldest => {
                let dropped = lane.pool().active_ring().drop_oldest();
                if dropped {
                    lane.reclassify_as_dropped(incoming_record_bytes);
                    self.records_dropped.fetch_add(1, Ordering::Relaxed);
                    self.last_drop_ns.store(now_ns, Ordering::Relaxed);
                }
                dropped
            }
            DropPolicy::DropNewest | DropPolicy::DropByPriority => {
                lane.record_drop(incoming_record_bytes);
                self.records_rejected.fetch_add(1, Ordering::Relaxed);
                self.last_drop_ns.store(now_ns, Ordering::Relaxed);
                false
            }
        }
    }
}
