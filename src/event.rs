//! ATF v2 wire records (§3): `IndexEvent` (fixed 32 bytes), `DetailEvent`
//! header (24 bytes) + payload, and the per-thread `ThreadCounters` that
//! hand out the sequence numbers linking them.
//!
//! These are specified as byte-exact little-endian layouts with explicit
//! field offsets rather than as a `#[repr(C)]` struct reinterpreted in
//! place: the records cross a shared-memory boundary and later an on-disk
//! boundary, and neither guarantees a stable native layout across the
//! compilers that read them back. Each type owns an `encode`/`decode`
//! pair instead.

use crate::invariants::debug_assert_detail_seq_consistent;
use std::sync::atomic::{AtomicU32, Ordering};

/// Sentinel `detail_seq` meaning "no paired detail event".
pub const NO_DETAIL: u32 = 0xFFFF_FFFF;

/// Size in bytes of one [`IndexEvent`] record on the wire.
pub const INDEX_EVENT_SIZE: usize = 32;

/// Size in bytes of a [`DetailEvent`] header, excluding the payload.
pub const DETAIL_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventKind {
    Call = 1,
    Return = 2,
    Exception = 3,
}

impl EventKind {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Call),
            2 => Some(Self::Return),
            3 => Some(Self::Exception),
            _ => None,
        }
    }
}

/// One fixed-size, 32-byte index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEvent {
    pub timestamp_ns: u64,
    pub function_id: u64,
    pub thread_id: u32,
    pub event_kind: u32,
    pub call_depth: u32,
    pub detail_seq: u32,
}

impl IndexEvent {
    pub fn encode(&self) -> [u8; INDEX_EVENT_SIZE] {
        let mut buf = [0u8; INDEX_EVENT_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        buf[8..16].copy_from_slice(&self.function_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.thread_id.to_le_bytes());
        buf[20..24].copy_from_slice(&self.event_kind.to_le_bytes());
        buf[24..28].copy_from_slice(&self.call_depth.to_le_bytes());
        buf[28..32].copy_from_slice(&self.detail_seq.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < INDEX_EVENT_SIZE {
            return None;
        }
        Some(Self {
            timestamp_ns: u64::from_le_bytes(buf[0..8].try_into().ok()?),
            function_id: u64::from_le_bytes(buf[8..16].try_into().ok()?),
            thread_id: u32::from_le_bytes(buf[16..20].try_into().ok()?),
            event_kind: u32::from_le_bytes(buf[20..24].try_into().ok()?),
            call_depth: u32::from_le_bytes(buf[24..28].try_into().ok()?),
            detail_seq: u32::from_le_bytes(buf[28..32].try_into().ok()?),
        })
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_u32(self.event_kind)
    }

    pub fn has_detail(&self) -> bool {
        self.detail_seq != NO_DETAIL
    }
}

/// A variable-length detail record: 24-byte header plus an opaque payload
/// (function-call registers/stack snapshot, or function-return registers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailEvent {
    pub event_type: u16,
    pub flags: u16,
    pub index_seq: u32,
    pub thread_id: u32,
    pub timestamp_ns: u64,
    pub payload: Vec<u8>,
}

impl DetailEvent {
    pub fn total_length(&self) -> u32 {
        (DETAIL_HEADER_SIZE + self.payload.len()) as u32
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_length() as usize);
        buf.extend_from_slice(&self.total_length().to_le_bytes());
        buf.extend_from_slice(&self.event_type.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.index_seq.to_le_bytes());
        buf.extend_from_slice(&self.thread_id.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < DETAIL_HEADER_SIZE {
            return None;
        }
        let total_length = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let event_type = u16::from_le_bytes(buf[4..6].try_into().ok()?);
        let flags = u16::from_le_bytes(buf[6..8].try_into().ok()?);
        let index_seq = u32::from_le_bytes(buf[8..12].try_into().ok()?);
        let thread_id = u32::from_le_bytes(buf[12..16].try_into().ok()?);
        let timestamp_ns = u64::from_le_bytes(buf[16..24].try_into().ok()?);
        let total_length = total_length as usize;
        if total_length < DETAIL_HEADER_SIZE || buf.len() < total_length {
            return None;
        }
        let payload = buf[DETAIL_HEADER_SIZE..total_length].to_vec();
        Some(Self {
            event_type,
            flags,
            index_seq,
            thread_id,
            timestamp_ns,
            payload,
        })
    }
}

/// Per-thread monotonic counters reserving index/detail sequence numbers
/// in one atomic step (§3 "reserved atomically in one step").
#[derive(Debug, Default)]
pub struct ThreadCounters {
    index_count: AtomicU32,
    detail_count: AtomicU32,
}

impl ThreadCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next index sequence, and — iff `detail_enabled` — the
    /// next detail sequence. Returns `(index_seq, detail_seq)`, with
    /// `detail_seq == NO_DETAIL` when detail is disabled (§4.8).
    pub fn reserve(&self, detail_enabled: bool) -> (u32, u32) {
        let index_seq = self.index_count.fetch_add(1, Ordering::Relaxed);
        let detail_seq = if detail_enabled {
            self.detail_count.fetch_add(1, Ordering::Relaxed)
        } else {
            NO_DETAIL
        };
        debug_assert_detail_seq_consistent!(detail_enabled, detail_seq);
        (index_seq, detail_seq)
    }

    pub fn index_count(&self) -> u32 {
        self.index_count.load(Ordering::Relaxed)
    }

    pub fn detail_count(&self) -> u32 {
        self.detail_count.load(Ordering::Relaxed)
    }
}
