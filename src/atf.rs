//! ATF v2 binary writer.
//!
//! One file per (thread, lane) pair: `index.atf` holds fixed 32-byte
//! [`crate::event::IndexEvent`] records, `detail.atf` holds variable
//! [`crate::event::DetailEvent`] records. Both share the same 64-byte
//! envelope layout — a placeholder header written up front, the record
//! stream, and a matching footer written only on a clean
//! [`AtfWriter::finalize`], which also seeks back to offset 0 and
//! rewrites the header with the final counters. The footer is
//! authoritative: a reader that finds one trusts its `event_count`
//! outright, while a reader that finds a header with no footer (the
//! process died mid-session) must instead re-scan the record stream and
//! recover whatever is intact — the header alone never claims a record
//! count once it's past the placeholder stage.
//!
//! Every record is length-delimited well enough to make that rescan
//! possible: index records are fixed-width, and a truncated detail
//! record's `total_length` prefix lets a scanner detect a short last
//! write and stop there instead of reading garbage.

use crate::error::TracerError;
use crate::event::{DetailEvent, IndexEvent};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const HEADER_SIZE: usize = 64;
pub const FOOTER_SIZE: usize = 64;
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

pub const INDEX_HEADER_MAGIC: [u8; 4] = *b"ATI2";
pub const INDEX_FOOTER_MAGIC: [u8; 4] = *b"2ITA";
pub const DETAIL_HEADER_MAGIC: [u8; 4] = *b"ATD2";
pub const DETAIL_FOOTER_MAGIC: [u8; 4] = *b"2DTA";

pub const ENDIAN_LITTLE: u8 = 0x01;
pub const ATF_FORMAT_VERSION: u8 = 1;

pub const ARCH_UNKNOWN: u8 = 0;
pub const ARCH_X86_64: u8 = 1;
pub const ARCH_AARCH64: u8 = 2;

pub const OS_UNKNOWN: u8 = 0;
pub const OS_LINUX: u8 = 1;
pub const OS_MACOS: u8 = 2;
pub const OS_WINDOWS: u8 = 3;

pub const CLOCK_MONOTONIC: u8 = 1;

/// Bit 0 of `flags`: set on the index header iff a paired detail file was
/// created for this thread and ended up with at least one event in it.
pub const FLAG_HAS_DETAIL_FILE: u32 = 1 << 0;

/// The platform this process is running on, for the header's `arch`/`os`
/// fields — best-effort, consulted only for the wire format, never for
/// behavior.
pub fn current_arch() -> u8 {
    match std::env::consts::ARCH {
        "x86_64" => ARCH_X86_64,
        "aarch64" => ARCH_AARCH64,
        _ => ARCH_UNKNOWN,
    }
}

pub fn current_os() -> u8 {
    match std::env::consts::OS {
        "linux" => OS_LINUX,
        "macos" => OS_MACOS,
        "windows" => OS_WINDOWS,
        _ => OS_UNKNOWN,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtfKind {
    Index,
    Detail,
}

impl AtfKind {
    fn header_magic(self) -> [u8; 4] {
        match self {
            AtfKind::Index => INDEX_HEADER_MAGIC,
            AtfKind::Detail => DETAIL_HEADER_MAGIC,
        }
    }

    fn footer_magic(self) -> [u8; 4] {
        match self {
            AtfKind::Index => INDEX_FOOTER_MAGIC,
            AtfKind::Detail => DETAIL_FOOTER_MAGIC,
        }
    }
}

/// The 64-byte envelope shared by both the header (written at offset 0)
/// and the footer (written after the last record) — same field layout,
/// different magic and, for the footer, final rather than placeholder
/// counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtfEnvelope {
    pub magic: [u8; 4],
    pub endian: u8,
    pub version: u8,
    pub arch: u8,
    pub os: u8,
    pub flags: u32,
    pub thread_id: u32,
    pub clock_type: u8,
    pub event_size: u32,
    pub event_count: u32,
    pub events_offset: u64,
    pub footer_offset: u64,
    pub time_start_ns: u64,
    pub time_end_ns: u64,
}

impl AtfEnvelope {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4] = self.endian;
        buf[5] = self.version;
        buf[6] = self.arch;
        buf[7] = self.os;
        buf[8..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.thread_id.to_le_bytes());
        buf[16] = self.clock_type;
        // buf[17..24] is reserved padding, left zeroed.
        buf[24..28].copy_from_slice(&self.event_size.to_le_bytes());
        buf[28..32].copy_from_slice(&self.event_count.to_le_bytes());
        buf[32..40].copy_from_slice(&self.events_offset.to_le_bytes());
        buf[40..48].copy_from_slice(&self.footer_offset.to_le_bytes());
        buf[48..56].copy_from_slice(&self.time_start_ns.to_le_bytes());
        buf[56..64].copy_from_slice(&self.time_end_ns.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: buf[0..4].try_into().ok()?,
            endian: buf[4],
            version: buf[5],
            arch: buf[6],
            os: buf[7],
            flags: u32::from_le_bytes(buf[8..12].try_into().ok()?),
            thread_id: u32::from_le_bytes(buf[12..16].try_into().ok()?),
            clock_type: buf[16],
            event_size: u32::from_le_bytes(buf[24..28].try_into().ok()?),
            event_count: u32::from_le_bytes(buf[28..32].try_into().ok()?),
            events_offset: u64::from_le_bytes(buf[32..40].try_into().ok()?),
            footer_offset: u64::from_le_bytes(buf[40..48].try_into().ok()?),
            time_start_ns: u64::from_le_bytes(buf[48..56].try_into().ok()?),
            time_end_ns: u64::from_le_bytes(buf[56..64].try_into().ok()?),
        })
    }

    /// `true` if this buffer's magic matches `kind`'s footer magic — the
    /// test a recovering reader runs to decide whether the file was
    /// finalized cleanly.
    pub fn magic_matches(buf: &[u8], kind: AtfKind) -> bool {
        buf.len() >= 4 && buf[0..4] == kind.footer_magic()
    }
}

/// Kept as a type alias so callers decoding either half of the envelope
/// can spell out which one they mean.
pub type AtfHeader = AtfEnvelope;
pub type AtfFooter = AtfEnvelope;

pub struct AtfWriter {
    file: BufWriter<File>,
    path: PathBuf,
    kind: AtfKind,
    thread_id: u32,
    event_count: u32,
    bytes_written: u64,
    time_start_ns: Option<u64>,
    time_end_ns: u64,
    finalized: bool,
}

impl AtfWriter {
    pub fn create(path: impl AsRef<Path>, kind: AtfKind, thread_id: u32, created_ns: u64) -> Result<Self, TracerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| TracerError::from_io(&path.to_string_lossy(), e))?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        let header = AtfEnvelope {
            magic: kind.header_magic(),
            endian: ENDIAN_LITTLE,
            version: ATF_FORMAT_VERSION,
            arch: current_arch(),
            os: current_os(),
            flags: 0,
            thread_id,
            clock_type: CLOCK_MONOTONIC,
            event_size: crate::event::INDEX_EVENT_SIZE as u32,
            event_count: 0,
            events_offset: HEADER_SIZE as u64,
            footer_offset: 0,
            time_start_ns: 0,
            time_end_ns: created_ns,
        };
        writer
            .write_all(&header.encode())
            .map_err(|e| TracerError::from_io(&path.to_string_lossy(), e))?;

        Ok(Self {
            file: writer,
            path,
            kind,
            thread_id,
            event_count: 0,
            bytes_written: 0,
            time_start_ns: None,
            time_end_ns: created_ns,
            finalized: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self) -> u64 {
        self.event_count as u64
    }

    fn write_bytes(&mut self, timestamp_ns: u64, bytes: &[u8]) -> Result<(), TracerError> {
        self.file
            .write_all(bytes)
            .map_err(|e| TracerError::from_io(&self.path.to_string_lossy(), e))?;
        self.event_count += 1;
        self.bytes_written += bytes.len() as u64;
        self.time_start_ns.get_or_insert(timestamp_ns);
        self.time_end_ns = timestamp_ns;
        Ok(())
    }

    pub fn append_index(&mut self, _seq: u64, event: &IndexEvent) -> Result<(), TracerError> {
        debug_assert_eq!(self.kind, AtfKind::Index, "append_index on a detail writer");
        let buf = event.encode();
        self.write_bytes(event.timestamp_ns, &buf)
    }

    pub fn append_detail(&mut self, _seq: u64, event: &DetailEvent) -> Result<(), TracerError> {
        debug_assert_eq!(self.kind, AtfKind::Detail, "append_detail on an index writer");
        let buf = event.encode();
        self.write_bytes(event.timestamp_ns, &buf)
    }

    /// Flushes, seeks back to rewrite the header with final counters,
    /// appends the footer, and fsyncs. `has_detail_file` only matters for
    /// an index writer: it sets flags bit 0 when the paired detail file
    /// was created and actually holds events. Idempotent: calling twice
    /// is a no-op on the second call.
    pub fn finalize(&mut self, finalized_ns: u64, has_detail_file: bool) -> Result<(), TracerError> {
        if self.finalized {
            return Ok(());
        }
        self.file
            .flush()
            .map_err(|e| TracerError::from_io(&self.path.to_string_lossy(), e))?;

        let time_start_ns = self.time_start_ns.unwrap_or(finalized_ns);
        let time_end_ns = if self.event_count == 0 { finalized_ns } else { self.time_end_ns };
        let footer_offset = HEADER_SIZE as u64 + self.bytes_written;
        let flags = if has_detail_file && self.kind == AtfKind::Index {
            FLAG_HAS_DETAIL_FILE
        } else {
            0
        };

        let header = AtfEnvelope {
            magic: self.kind.header_magic(),
            endian: ENDIAN_LITTLE,
            version: ATF_FORMAT_VERSION,
            arch: current_arch(),
            os: current_os(),
            flags,
            thread_id: self.thread_id,
            clock_type: CLOCK_MONOTONIC,
            event_size: crate::event::INDEX_EVENT_SIZE as u32,
            event_count: self.event_count,
            events_offset: HEADER_SIZE as u64,
            footer_offset,
            time_start_ns,
            time_end_ns,
        };

        self.file
            .get_mut()
            .seek(SeekFrom::Start(0))
            .map_err(|e| TracerError::from_io(&self.path.to_string_lossy(), e))?;
        self.file
            .get_mut()
            .write_all(&header.encode())
            .map_err(|e| TracerError::from_io(&self.path.to_string_lossy(), e))?;
        self.file
            .get_mut()
            .seek(SeekFrom::End(0))
            .map_err(|e| TracerError::from_io(&self.path.to_string_lossy(), e))?;

        let footer = AtfEnvelope {
            magic: self.kind.footer_magic(),
            ..header
        };
        self.file
            .get_mut()
            .write_all(&footer.encode())
            .map_err(|e| TracerError::from_io(&self.path.to_string_lossy(), e))?;

        self.sync()?;
        self.finalized = true;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), TracerError> {
        self.file
            .flush()
            .map_err(|e| TracerError::from_io(&self.path.to_string_lossy(), e))?;
        self.file
            .get_ref()
            .sync_all()
            .map_err(|e| {
                let err = TracerError::from_io(&self.path.to_string_lossy(), e);
                if matches!(err, TracerError::DiskFull { .. }) {
                    let _ = write_recoverable_sentinel(&self.path);
                }
                err
            })
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// Drops a `<file>.recoverable` marker next to an ATF file that hit
/// `ENOSPC` mid-write, so session recovery knows to attempt a rescan
/// instead of trusting a (missing) footer.
fn write_recoverable_sentinel(atf_path: &Path) -> io::Result<()> {
    let mut sentinel = atf_path.as_os_str().to_owned();
    sentinel.push(".recoverable");
    File::create(sentinel)?;
    Ok(())
}

/// Re-scans an index file that has no trustworthy footer, returning the
/// number of whole [`IndexEvent`] records found before the tail went
/// short or corrupt.
pub fn recover_index_records(buf: &[u8]) -> usize {
    let body = &buf[HEADER_SIZE.min(buf.len())..];
    body.chunks_exact(crate::event::INDEX_EVENT_SIZE)
        .take_while(|chunk| IndexEvent::decode(chunk).is_some())
        .count()
}
