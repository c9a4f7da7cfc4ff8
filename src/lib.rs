//! Lock-free function-call tracer core: per-thread lanes, ring buffers,
//! backpressure, ATF v2 writer, drain worker and shutdown coordinator.
//!
//! This crate is the runtime data plane only. Hook installation, the CLI,
//! and the trace reader are external collaborators that drive this
//! surface: register a thread, record events through the returned
//! handle, and shut the session down to get a finalized, synced set of
//! `index.atf`/`detail.atf` files per thread.

pub mod atf;
pub mod backpressure;
pub mod config;
pub mod control_block;
pub mod drain;
pub mod error;
pub mod event;
pub(crate) mod invariants;
pub mod lane;
pub mod marking;
pub mod registry;
pub mod ring_buffer;
pub mod ring_pool;
pub mod selective;
pub mod session;
pub mod shutdown;

use atf::{AtfKind, AtfWriter};
use backpressure::{BackpressureController, BackpressureLevel};
use config::TracerConfig;
use control_block::{ControlBlock, SessionStatus};
use crossbeam::utils::Backoff;
use drain::{drain_once, DrainSink};
use error::TracerError;
use event::{DetailEvent, EventKind, IndexEvent, ThreadCounters};
use lane::ThreadLaneSet;
use registry::ThreadRegistry;
use session::{SessionLayout, SessionManifest};
use shutdown::{ShutdownCoordinator, ShutdownSummary};
use std::collections::HashMap;
use std::sync::Mutex;

/// Installs a `tracing-subscriber` formatter reading `RUST_LOG`. Opt-in:
/// an embedder that already owns global logging should skip this and
/// just let the crate's `tracing` calls flow into its own subscriber.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

struct PerThreadState {
    counters: ThreadCounters,
    index_backpressure: BackpressureController,
    detail_backpressure: BackpressureController,
}

impl PerThreadState {
    fn new(backpressure: backpressure::BackpressureConfig) -> Self {
        Self {
            counters: ThreadCounters::new(),
            index_backpressure: BackpressureController::new(backpressure),
            detail_backpressure: BackpressureController::new(backpressure),
        }
    }
}

/// One thread's write surface, returned by [`Tracer::register_thread`].
/// `'a` ties the handle's lifetime to the tracer so it can never outlive
/// the registry slot it was issued from.
pub struct ProducerHandle<'a> {
    tracer: &'a Tracer,
    lanes: &'a ThreadLaneSet,
    state: &'a PerThreadState,
}

impl<'a> ProducerHandle<'a> {
    /// Records one event. `payload` is `Some` to also emit a paired
    /// detail record (e.g. a register/stack snapshot); `None` skips the
    /// detail lane entirely, per §4.8's `detail_seq = NO_DETAIL` path.
    pub fn record(&self, kind: EventKind, function_id: u64, call_depth: u32, timestamp_ns: u64, payload: Option<&[u8]>) {
        let (index_seq, detail_seq) = self.state.counters.reserve(payload.is_some());
        self.lanes.record_event(timestamp_ns);

        if let Some(bytes) = payload {
            let detail = DetailEvent {
                event_type: kind as u16,
                flags: 0,
                index_seq,
                thread_id: self.lanes.thread_id(),
                timestamp_ns,
                payload: bytes.to_vec(),
            };
            self.write_detail(&detail);
        }

        let index = IndexEvent {
            timestamp_ns,
            function_id,
            thread_id: self.lanes.thread_id(),
            event_kind: kind as u32,
            call_depth,
            detail_seq,
        };
        self.write_index(&index);
    }

    /// Writes to the index lane, falling through to the backpressure
    /// controller on a full lane and retrying with a bounded, backed-off
    /// spin rather than either blocking forever or giving up after a
    /// single attempt.
    fn write_index(&self, event: &IndexEvent) {
        let buf = event.encode();
        let mut backoff = Backoff::new();
        loop {
            if self.lanes.index_lane.write(&buf).is_ok() {
                return;
            }
            let level = self
                .state
                .index_backpressure
                .check_exhaustion(&self.lanes.index_lane, event.timestamp_ns);
            if level == BackpressureLevel::Dropping {
                self.state.index_backpressure.apply_drop_policy(
                    &self.lanes.index_lane,
                    buf.len() as u64,
                    event.timestamp_ns,
                );
            }
            if self.lanes.index_lane.write(&buf).is_ok() || backoff.is_completed() {
                return;
            }
            backoff.snooze();
        }
    }

    fn write_detail(&self, event: &DetailEvent) {
        let buf = event.encode();
        let slot_width = self.lanes.detail_lane.pool().active_ring().record_size();
        if buf.len() > slot_width {
            tracing::warn!(len = ?buf.len(), ?slot_width, "detail payload exceeds configured slot width, dropping");
            self.lanes.detail_lane.record_drop(buf.len() as u64);
            return;
        }
        let mut backoff = Backoff::new();
        loop {
            if self.lanes.detail_lane.write_padded(&buf).is_ok() {
                return;
            }
            let level = self
                .state
                .detail_backpressure
                .check_exhaustion(&self.lanes.detail_lane, event.timestamp_ns);
            if level == BackpressureLevel::Dropping {
                self.state.detail_backpressure.apply_drop_policy(
                    &self.lanes.detail_lane,
                    buf.len() as u64,
                    event.timestamp_ns,
                );
            }
            if self.lanes.detail_lane.write_padded(&buf).is_ok() || backoff.is_completed() {
                return;
            }
            backoff.snooze();
        }
    }

    pub fn mark_event(&self) {
        self.lanes.detail_lane.mark_event();
    }

    pub fn thread_id(&self) -> u32 {
        self.lanes.thread_id()
    }

    pub fn slot_index(&self) -> u32 {
        self.lanes.slot_index
    }

    pub fn unregister(self) {
        self.tracer.registry.unregister(self.lanes);
    }
}

struct AtfSink {
    writers: HashMap<u32, (AtfWriter, AtfWriter)>,
}

impl DrainSink for AtfSink {
    fn consume_index(&mut self, thread_id: u32, record: &[u8]) {
        if let Some((index, _)) = self.writers.get_mut(&thread_id) {
            if let Some(event) = IndexEvent::decode(record) {
                let seq = index.record_count();
                let _ = index.append_index(seq, &event);
            }
        }
    }

    fn consume_detail(&mut self, thread_id: u32, record: &[u8]) {
        if let Some((_, detail)) = self.writers.get_mut(&thread_id) {
            if let Some(event) = DetailEvent::decode(record) {
                let seq = detail.record_count();
                let _ = detail.append_detail(seq, &event);
            }
        }
    }

    fn finalize_all(&mut self, now_ns: u64) -> u32 {
        let mut finalized = 0u32;
        for (index, detail) in self.writers.values_mut() {
            let has_detail_file = detail.record_count() > 0;
            if index.finalize(now_ns, has_detail_file).is_ok() {
                finalized += 1;
            }
            if detail.finalize(now_ns, false).is_ok() {
                finalized += 1;
            }
        }
        finalized
    }
}

/// Top-level facade wiring the registry, lanes, drain worker, ATF writers
/// and shutdown coordinator into one session.
pub struct Tracer {
    config: TracerConfig,
    registry: ThreadRegistry,
    layout: SessionLayout,
    /// Indexed by registry slot, not thread id — preallocated at startup
    /// alongside the registry's own fixed slot array so a `ProducerHandle`
    /// can borrow a slot's state directly from `&self` with no interior
    /// mutability on the hot path.
    per_thread: Vec<PerThreadState>,
    sink: Mutex<AtfSink>,
    shutdown: ShutdownCoordinator,
    pid: u32,
    started_ns: u64,
}

impl Tracer {
    pub fn start(config: TracerConfig, pid: u32, session_label: String, started_ns: u64) -> Result<Self, TracerError> {
        config.validate()?;
        let layout = SessionLayout::new(&config.session_root, &session_label, pid);
        layout.create_session_dir()?;

        let manifest = SessionManifest::new(
            session_label,
            pid,
            started_ns,
            registry::MAX_THREADS as u32,
            config.registry_mode,
        );
        manifest.write_to(&layout.manifest_path())?;

        let registry = ThreadRegistry::new(
            config.index_ring_capacity,
            config.detail_ring_capacity,
            config.index_record_size,
            config.max_detail_record_size,
        );
        let shutdown = ShutdownCoordinator::new(config.drain_ceiling_passes)
            .map_err(|e| TracerError::from_io("shutdown wake pipe", e))?;
        let per_thread = (0..registry.capacity())
            .map(|_| PerThreadState::new(config.backpressure))
            .collect();

        let control_block = ControlBlock {
            pid,
            status: SessionStatus::Running,
            active_thread_count: 0,
            session_start_ns: started_ns,
            last_update_ns: started_ns,
            registry_capacity: registry::MAX_THREADS as u32,
        };
        control_block
            .write_atomic(&layout.control_block_path())
            .map_err(|e| TracerError::from_io(&layout.control_block_path().to_string_lossy(), e))?;

        tracing::info!(pid = ?pid, "tracer session started");

        Ok(Self {
            config,
            registry,
            layout,
            per_thread,
            sink: Mutex::new(AtfSink { writers: HashMap::new() }),
            shutdown,
            pid,
            started_ns,
        })
    }

    /// Refreshes the on-disk control block (§4.12) with the registry's
    /// current active thread count, so an external monitor reading it
    /// mid-session sees live state rather than only the startup snapshot.
    pub fn refresh_control_block(&self, now_ns: u64) -> std::io::Result<()> {
        let block = ControlBlock {
            pid: self.pid,
            status: SessionStatus::Running,
            active_thread_count: self.registry.get_active_count(),
            session_start_ns: self.started_ns,
            last_update_ns: now_ns,
            registry_capacity: registry::MAX_THREADS as u32,
        };
        block.write_atomic(&self.layout.control_block_path())
    }

    pub fn install_signal_handlers(&self) {
        self.shutdown.install_signal_handlers();
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn register_thread(&self, thread_id: u32, now_ns: u64) -> Result<ProducerHandle<'_>, TracerError> {
        let lanes = self
            .registry
            .register(thread_id)
            .ok_or(TracerError::RegistryFull)?;

        self.layout.create_thread_dir(lanes.slot_index)?;
        let index_writer = AtfWriter::create(
            self.layout.index_path(lanes.slot_index),
            AtfKind::Index,
            thread_id,
            now_ns,
        )?;
        let detail_writer = AtfWriter::create(
            self.layout.detail_path(lanes.slot_index),
            AtfKind::Detail,
            thread_id,
            now_ns,
        )?;
        self.sink
            .lock()
            .expect("sink mutex poisoned")
            .writers
            .insert(thread_id, (index_writer, detail_writer));

        let state = &self.per_thread[lanes.slot_index as usize];

        Ok(ProducerHandle {
            tracer: self,
            lanes,
            state,
        })
    }

    pub fn drain_once(&self) -> drain::DrainStats {
        let mut sink = self.sink.lock().expect("sink mutex poisoned");
        drain_once(&self.registry, &mut *sink)
    }

    pub fn index_path(&self, slot_index: u32) -> std::path::PathBuf {
        self.layout.index_path(slot_index)
    }

    pub fn detail_path(&self, slot_index: u32) -> std::path::PathBuf {
        self.layout.detail_path(slot_index)
    }

    pub fn shutdown(&self, now_ns: impl Fn() -> u64 + Copy) -> ShutdownSummary {
        let mut sink = self.sink.lock().expect("sink mutex poisoned");
        let summary = self.shutdown.execute_shutdown(&self.registry, &mut *sink, now_ns);
        tracing::info!(rings_drained = ?summary.rings_drained, index_records = ?summary.index_records, "tracer session shut down");

        let final_block = ControlBlock {
            pid: self.pid,
            status: SessionStatus::Completed,
            active_thread_count: 0,
            session_start_ns: self.started_ns,
            last_update_ns: now_ns(),
            registry_capacity: registry::MAX_THREADS as u32,
        };
        let _ = final_block.write_atomic(&self.layout.control_block_path());

        summary
    }

    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown();
    }
}
