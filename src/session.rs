//! Session directory layout (§5).
//!
//! Every trace session gets its own directory tree:
//! `<root>/session_<label>/pid_<pid>/thread_<slot>/{index.atf,detail.atf}`,
//! with a `manifest.json` at the session root recording what ran and
//! when. Layout is computed, not stored — nothing here opens a file
//! until [`SessionLayout::create_dirs`] is called.

use crate::config::RegistryMode;
use crate::error::TracerError;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub struct SessionLayout {
    session_dir: PathBuf,
}

impl SessionLayout {
    pub fn new(session_root: &Path, session_label: &str, pid: u32) -> Self {
        Self {
            session_dir: session_root
                .join(format!("session_{session_label}"))
                .join(format!("pid_{pid}")),
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn thread_dir(&self, slot_index: u32) -> PathBuf {
        self.session_dir.join(format!("thread_{slot_index}"))
    }

    pub fn index_path(&self, slot_index: u32) -> PathBuf {
        self.thread_dir(slot_index).join("index.atf")
    }

    pub fn detail_path(&self, slot_index: u32) -> PathBuf {
        self.thread_dir(slot_index).join("detail.atf")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.session_dir.join("manifest.json")
    }

    pub fn control_block_path(&self) -> PathBuf {
        self.session_dir.join("control.bin")
    }

    pub fn create_thread_dir(&self, slot_index: u32) -> Result<(), TracerError> {
        std::fs::create_dir_all(self.thread_dir(slot_index))
            .map_err(|e| TracerError::from_io(&self.thread_dir(slot_index).to_string_lossy(), e))
    }

    pub fn create_session_dir(&self) -> Result<(), TracerError> {
        std::fs::create_dir_all(&self.session_dir)
            .map_err(|e| TracerError::from_io(&self.session_dir.to_string_lossy(), e))
    }
}

/// A label built from the session start time and process id, with no
/// dependency on a calendar/timezone crate — just monotonic-enough
/// nanoseconds since the epoch, which is all the layout needs to be
/// unique across runs.
pub fn session_label(unix_ns: u128) -> String {
    format!("{unix_ns}")
}

#[derive(Debug, Serialize)]
pub struct SessionManifest {
    pub session_label: String,
    pub pid: u32,
    pub started_ns: u64,
    pub registry_capacity: u32,
    pub registry_mode: String,
}

impl SessionManifest {
    pub fn new(session_label: String, pid: u32, started_ns: u64, registry_capacity: u32, mode: RegistryMode) -> Self {
        let registry_mode = match mode {
            RegistryMode::GlobalOnly => "global_only",
            RegistryMode::DualWrite => "dual_write",
            RegistryMode::PerThreadOnly => "per_thread_only",
        }
        .to_string();
        Self {
            session_label,
            pid,
            started_ns,
            registry_capacity,
            registry_mode,
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<(), TracerError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TracerError::InvalidArgument(format!("manifest serialization failed: {e}")))?;
        std::fs::write(path, json).map_err(|e| TracerError::from_io(&path.to_string_lossy(), e))
    }
}
