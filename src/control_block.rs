//! Shared control block (§4.12, C11).
//!
//! A small fixed-layout record describing session-wide state, written to
//! a well-known file in the session directory so an external monitor
//! (or a recovering process after a crash) can learn the session's
//! status without attaching to the tracer's own memory. Same
//! byte-exact little-endian discipline as [`crate::event`] and
//! [`crate::atf`], for the same reason: this crosses a process boundary.

pub const CONTROL_BLOCK_MAGIC: [u8; 4] = *b"ADCB";
pub const CONTROL_BLOCK_VERSION: u32 = 1;
pub const CONTROL_BLOCK_SIZE: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionStatus {
    Running = 0,
    ShuttingDown = 1,
    Completed = 2,
}

impl SessionStatus {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Running),
            1 => Some(Self::ShuttingDown),
            2 => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    pub pid: u32,
    pub status: SessionStatus,
    pub active_thread_count: u32,
    pub session_start_ns: u64,
    pub last_update_ns: u64,
    pub registry_capacity: u32,
}

impl ControlBlock {
    pub fn encode(&self) -> [u8; CONTROL_BLOCK_SIZE] {
        let mut buf = [0u8; CONTROL_BLOCK_SIZE];
        buf[0..4].copy_from_slice(&CONTROL_BLOCK_MAGIC);
        buf[4..8].copy_from_slice(&CONTROL_BLOCK_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.pid.to_le_bytes());
        buf[12] = self.status as u8;
        buf[16..20].copy_from_slice(&self.active_thread_count.to_le_bytes());
        buf[20..28].copy_from_slice(&self.session_start_ns.to_le_bytes());
        buf[28..36].copy_from_slice(&self.last_update_ns.to_le_bytes());
        buf[36..40].copy_from_slice(&self.registry_capacity.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < CONTROL_BLOCK_SIZE || buf[0..4] != CONTROL_BLOCK_MAGIC {
            return None;
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        if version != CONTROL_BLOCK_VERSION {
            return None;
        }
        Some(Self {
            pid: u32::from_le_bytes(buf[8..12].try_into().ok()?),
            status: SessionStatus::from_u8(buf[12])?,
            active_thread_count: u32::from_le_bytes(buf[16..20].try_into().ok()?),
            session_start_ns: u64::from_le_bytes(buf[20..28].try_into().ok()?),
            last_update_ns: u64::from_le_bytes(buf[28..36].try_into().ok()?),
            registry_capacity: u32::from_le_bytes(buf[36..40].try_into().ok()?),
        })
    }

    /// Writes the encoded block to `path` atomically by writing to a
    /// sibling temp file and renaming over the destination — a concurrent
    /// reader never observes a torn write.
    pub fn write_atomic(&self, path: &std::path::Path) -> std::io::Result<()> {
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, self.encode())?;
        std::fs::rename(&tmp_path, path)
    }

    pub fn read_from(path: &std::path::Path) -> std::io::Result<Option<Self>> {
        let bytes = std::fs::read(path)?;
        Ok(Self::decode(&bytes))
    }
}
