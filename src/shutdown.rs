//! Shutdown coordinator (§4.11, C10).
//!
//! `SIGINT`/`SIGTERM` land on an arbitrary thread at an arbitrary point,
//! so the handler itself must stay within the narrow set of operations
//! POSIX guarantees are async-signal-safe: it touches only atomics and
//! issues exactly one `write(2)` to wake the shutdown thread out of its
//! poll. All real work — stopping producers, running a final drain,
//! finalizing every ATF file, building the summary — happens afterward
//! on a normal thread, walking the phases in order. The whole sequence
//! is idempotent: a second `SIGTERM` while shutdown is already underway
//! is a no-op past the initial flag flip.

use crate::drain::{drain_once, DrainSink, WakePipe};
use crate::registry::ThreadRegistry;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownPhase {
    Idle = 0,
    StoppingThreads = 1,
    Draining = 2,
    Finalizing = 3,
    Summary = 4,
    Completed = 5,
}

impl ShutdownPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::StoppingThreads,
            2 => Self::Draining,
            3 => Self::Finalizing,
            4 => Self::Summary,
            _ => Self::Completed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownSummary {
    pub rings_drained: u32,
    pub index_records: u64,
    pub detail_records: u64,
    pub files_finalized: u32,
    pub timed_out: bool,
}

static SIGNAL_WAKE_FD: AtomicI32 = AtomicI32::new(-1);
static SIGNAL_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Async-signal-safe handler body. Installed for both `SIGINT` and
/// `SIGTERM` by [`ShutdownCoordinator::install_signal_handlers`].
extern "C" fn handle_signal(_sig: libc::c_int) {
    SIGNAL_REQUESTED.store(true, Ordering::Relaxed);
    let fd = SIGNAL_WAKE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = [1u8];
        unsafe {
            libc::write(fd as RawFd, byte.as_ptr() as *const libc::c_void, 1);
        }
    }
}

pub struct ShutdownCoordinator {
    wake: WakePipe,
    phase: AtomicU8,
    requested: AtomicBool,
    drain_ceiling_passes: u32,
}

impl ShutdownCoordinator {
    pub fn new(drain_ceiling_passes: u32) -> std::io::Result<Self> {
        Ok(Self {
            wake: WakePipe::new()?,
            phase: AtomicU8::new(ShutdownPhase::Idle as u8),
            requested: AtomicBool::new(false),
            drain_ceiling_passes,
        })
    }

    /// Registers `SIGINT`/`SIGTERM` handlers that wake this coordinator.
    /// Only one coordinator's handlers can be active process-wide, since
    /// the signal-safe state they touch is a process static.
    pub fn install_signal_handlers(&self) {
        SIGNAL_WAKE_FD.store(self.wake.write_fd(), Ordering::Relaxed);
        unsafe {
            libc::signal(libc::SIGINT, handle_signal as usize);
            libc::signal(libc::SIGTERM, handle_signal as usize);
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Requests shutdown from ordinary (non-signal-handler) code, e.g. a
    /// supervising thread reacting to a control-plane command.
    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::Release);
        self.wake.wake();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire) || SIGNAL_REQUESTED.load(Ordering::Relaxed)
    }

    pub fn wait_for_request(&self) {
        while !self.is_requested() {
            self.wake.wait();
        }
    }

    /// Runs every phase to completion and returns the summary. Calling
    /// this more than once returns the same summary without re-draining
    /// or re-finalizing anything.
    pub fn execute_shutdown(
        &self,
        registry: &ThreadRegistry,
        sink: &mut dyn DrainSink,
        now_ns: impl Fn() -> u64,
    ) -> ShutdownSummary {
        if self.phase() == ShutdownPhase::Completed {
            return ShutdownSummary {
                rings_drained: 0,
                index_records: 0,
                detail_records: 0,
                files_finalized: 0,
                timed_out: false,
            };
        }

        tracing::info!("shutdown starting");
        self.phase.store(ShutdownPhase::StoppingThreads as u8, Ordering::Release);
        registry.request_shutdown();

        self.phase.store(ShutdownPhase::Draining as u8, Ordering::Release);
        let mut total = crate::drain::DrainStats::default();
        let mut timed_out = true;
        for _ in 0..self.drain_ceiling_passes.max(1) {
            let stats = drain_once(registry, sink);
            total.rings_drained += stats.rings_drained;
            total.index_records += stats.index_records;
            total.detail_records += stats.detail_records;
            if stats.rings_drained == 0 {
                timed_out = false;
                break;
            }
        }

        self.phase.store(ShutdownPhase::Finalizing as u8, Ordering::Release);
        let files_finalized = sink.finalize_all(now_ns());

        self.phase.store(ShutdownPhase::Summary as u8, Ordering::Release);
        let summary = ShutdownSummary {
            rings_drained: total.rings_drained,
            index_records: total.index_records,
            detail_records: total.detail_records,
            files_finalized,
            timed_out,
        };

        self.phase.store(ShutdownPhase::Completed as u8, Ordering::Release);
        tracing::info!(
            rings_drained = summary.rings_drained,
            index_records = summary.index_records,
            detail_records = summary.detail_records,
            files_finalized = summary.files_finalized,
            timed_out = summary.timed_out,
            "shutdown summary"
        );
        eprintln!(
            "shutdown summary: rings_drained={} index_records={} detail_records={} files_finalized={} timed_out={}",
            summary.rings_drained,
            summary.index_records,
            summary.detail_records,
            summary.files_finalized,
            summary.timed_out,
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::DrainSink;
    use crate::registry::ThreadRegistry;
    use serial_test::serial;

    struct NullSink;
    impl DrainSink for NullSink {
        fn consume_index(&mut self, _thread_id: u32, _record: &[u8]) {}
        fn consume_detail(&mut self, _thread_id: u32, _record: &[u8]) {}
    }

    #[test]
    fn request_shutdown_sets_flag_and_wakes() {
        let coordinator = ShutdownCoordinator::new(4).unwrap();
        assert!(!coordinator.is_requested());
        coordinator.request_shutdown();
        assert!(coordinator.is_requested());
    }

    #[test]
    fn execute_shutdown_walks_phases_and_is_idempotent() {
        let coordinator = ShutdownCoordinator::new(4).unwrap();
        let registry = ThreadRegistry::new(2, 2, 4, 4);
        let mut sink = NullSink;
        let summary = coordinator.execute_shutdown(&registry, &mut sink, || 0);
        assert_eq!(coordinator.phase(), ShutdownPhase::Completed);
        assert_eq!(summary.files_finalized, 0);

        let second = coordinator.execute_shutdown(&registry, &mut sink, || 0);
        assert_eq!(second.rings_drained, 0);
    }

    #[test]
    fn registry_stops_accepting_new_threads_mid_shutdown() {
        let coordinator = ShutdownCoordinator::new(4).unwrap();
        let registry = ThreadRegistry::new(2, 2, 4, 4);
        let mut sink = NullSink;
        coordinator.execute_shutdown(&registry, &mut sink, || 0);
        assert!(registry.shutdown_requested());
        assert!(registry.register(1).is_none());
    }

    // `install_signal_handlers` touches the process-wide SIGNAL_WAKE_FD /
    // SIGINT / SIGTERM handlers, which every test process shares — must
    // run alone or a concurrent test's signal delivery races this one.
    #[test]
    #[serial]
    fn install_signal_handlers_wires_the_wake_pipe() {
        let coordinator = ShutdownCoordinator::new(4).unwrap();
        assert!(!coordinator.is_requested());
        coordinator.install_signal_handlers();
        assert_eq!(SIGNAL_WAKE_FD.load(Ordering::Relaxed), coordinator.wake.write_fd());

        handle_signal(libc::SIGTERM);
        assert!(SIGNAL_REQUESTED.load(Ordering::Relaxed));
        assert!(coordinator.is_requested());

        SIGNAL_REQUESTED.store(false, Ordering::Relaxed);
        SIGNAL_WAKE_FD.store(-1, Ordering::Relaxed);
    }
}
