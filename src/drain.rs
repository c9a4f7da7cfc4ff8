//! Drain worker (§4.10, C9).
//!
//! A single background thread that owns every ring a producer has
//! submitted. Each pass walks the thread registry, drains any rings
//! waiting in a lane's submit queue through a [`DrainSink`], and returns
//! the emptied ring to that lane's free queue so the producer can lease
//! it again. Sleeping between passes is driven by a self-pipe: a signal
//! handler or [`crate::shutdown::ShutdownCoordinator`] can wake the
//! worker immediately by writing one byte, but the worker also polls on
//! a 10ms ceiling so a missed wakeup can never wedge it.

use crate::lane::Lane;
use crate::registry::ThreadRegistry;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};

const POLL_TIMEOUT_MS: i32 = 10;

/// Sink for records emptied out of a lane's rings. Implemented by the ATF
/// writer pair owning a thread's `index.atf`/`detail.atf` files.
pub trait DrainSink {
    fn consume_index(&mut self, thread_id: u32, record: &[u8]);
    fn consume_detail(&mut self, thread_id: u32, record: &[u8]);

    /// Finalizes every file this sink owns (header/footer + fsync) and
    /// returns how many were finalized successfully. Called once, during
    /// shutdown's `Finalizing` phase, after the last drain pass.
    fn finalize_all(&mut self, _now_ns: u64) -> u32 {
        0
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DrainStats {
    pub rings_drained: u32,
    pub index_records: u64,
    pub detail_records: u64,
}

fn drain_lane(lane: &Lane, thread_id: u32, is_index: bool, sink: &mut dyn DrainSink, stats: &mut DrainStats) {
    while let Some(idx) = lane.take_ring() {
        let ring = lane.pool().ring(idx);
        let drained = ring.drain(|record| {
            if is_index {
                sink.consume_index(thread_id, record);
            } else {
                sink.consume_detail(thread_id, record);
            }
        });
        if is_index {
            stats.index_records += drained as u64;
        } else {
            stats.detail_records += drained as u64;
        }
        lane.return_ring(idx);
        stats.rings_drained += 1;
    }
}

/// Drains every submitted ring across every registry slot once. Called
/// both from the worker's steady-state loop and, synchronously, during
/// shutdown's `Draining` phase to guarantee a final pass after producers
/// have stopped.
pub fn drain_once(registry: &ThreadRegistry, sink: &mut dyn DrainSink) -> DrainStats {
    let mut stats = DrainStats::default();
    for i in 0..registry.capacity() {
        let Some(lanes) = registry.get_thread_at(i) else {
            continue;
        };
        drain_lane(&lanes.index_lane, lanes.thread_id(), true, sink, &mut stats);
        drain_lane(&lanes.detail_lane, lanes.thread_id(), false, sink, &mut stats);
    }
    stats
}

/// Self-pipe used to wake the drain worker out of its poll early. `write`
/// from the signal-safe side is a single `libc::write` of one byte, per
/// the async-signal-safety discipline §4.11 also relies on.
pub struct WakePipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakePipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe {
            libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK);
            libc::fcntl(fds[1], libc::F_SETFL, libc::O_NONBLOCK);
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    /// Async-signal-safe: a single `write(2)` of one byte, nothing else.
    pub fn wake(&self) {
        let byte = [1u8];
        unsafe {
            libc::write(self.write_fd, byte.as_ptr() as *const libc::c_void, 1);
        }
    }

    fn drain_wakes(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }

    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    /// Blocks until either a wake byte arrives or `POLL_TIMEOUT_MS`
    /// elapses, whichever is first.
    pub fn wait(&self) {
        let mut pfd = libc::pollfd {
            fd: self.read_fd,
            events: libc::POLLIN,
            revents: 0,
        };
        unsafe {
            libc::poll(&mut pfd, 1, POLL_TIMEOUT_MS);
        }
        self.drain_wakes();
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Runs the steady-state drain loop until `should_stop` returns true,
/// recording a heartbeat timestamp each pass so liveness can be checked
/// from outside the worker thread.
pub struct DrainWorker {
    wake: WakePipe,
    heartbeat_ns: AtomicU64,
    passes: AtomicU64,
}

impl DrainWorker {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            wake: WakePipe::new()?,
            heartbeat_ns: AtomicU64::new(0),
            passes: AtomicU64::new(0),
        })
    }

    pub fn wake_handle(&self) -> &WakePipe {
        &self.wake
    }

    pub fn heartbeat_ns(&self) -> u64 {
        self.heartbeat_ns.load(Ordering::Relaxed)
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn run(
        &self,
        registry: &ThreadRegistry,
        sink: &mut dyn DrainSink,
        now_ns: impl Fn() -> u64,
        mut should_stop: impl FnMut() -> bool,
    ) {
        loop {
            drain_once(registry, sink);
            self.heartbeat_ns.store(now_ns(), Ordering::Relaxed);
            self.passes.fetch_add(1, Ordering::Relaxed);
            if should_stop() {
                break;
            }
            self.wake.wait();
        }
        // Final pass after the stop signal: producers may have submitted
        // one last ring between the last drain and observing the stop.
        drain_once(registry, sink);
    }
}
