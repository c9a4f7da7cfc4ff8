//! Debug assertion macros for lock-free data-plane invariants.
//!
//! Active only under `debug_assertions`, so release builds pay nothing.
//! Each macro documents the one invariant it checks so a failure points
//! straight at the violated guarantee instead of a generic assert.

/// `0 <= write_pos - read_pos <= capacity` after a commit.
macro_rules! debug_assert_bounded_occupancy {
    ($occupied:expr, $capacity:expr) => {
        debug_assert!(
            $occupied <= $capacity,
            "ring occupancy {} exceeds capacity {}",
            $occupied,
            $capacity
        )
    };
}

/// A position counter only moves forward (mod 2*capacity wrap aside).
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old || ($old > $new && $old - $new > (u32::MAX / 2)),
            "{} moved backward from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Every ring index belongs to exactly one of {active, submitted, held, free}.
macro_rules! debug_assert_ring_index_in_range {
    ($idx:expr, $ring_count:expr) => {
        debug_assert!(
            ($idx as usize) < $ring_count,
            "ring index {} out of range for pool of {} rings",
            $idx,
            $ring_count
        )
    };
}

/// `detail_seq == u32::MAX` xor a detail record was actually reserved.
macro_rules! debug_assert_detail_seq_consistent {
    ($detail_enabled:expr, $detail_seq:expr) => {
        debug_assert!(
            $detail_enabled != ($detail_seq == u32::MAX),
            "detail_seq {} inconsistent with detail_enabled={}",
            $detail_seq,
            $detail_enabled
        )
    };
}

/// Backpressure state transitions only along the documented edges.
macro_rules! debug_assert_valid_transition {
    ($from:expr, $to:expr, $allowed:expr) => {
        debug_assert!(
            $from == $to || $allowed,
            "illegal backpressure transition {:?} -> {:?}",
            $from,
            $to
        )
    };
}

pub(crate) use debug_assert_bounded_occupancy;
pub(crate) use debug_assert_detail_seq_consistent;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_ring_index_in_range;
pub(crate) use debug_assert_valid_transition;
