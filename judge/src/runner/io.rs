//! Pipe plumbing used by the batch and interactive test runners: plain OS
//! pipes plus a bounded pump that moves bytes from one file descriptor to
//! another while enforcing an output-size cap.

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::{RawFd, FromRawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::Result;

/// Represent a pipe with a read end and a write end. The read end and the
/// write end of the pipe can be manipulated independently.
///
/// The first field of the tuple struct is the read end, the second field of
/// the tuple struct is the write end.
pub struct Pipe(pub Option<File>, pub Option<File>);

impl Pipe {
    /// Create a new `Pipe` instance.
    pub fn new() -> Result<Pipe> {
        let (read_fd, write_fd) = nix::unistd::pipe()?;
        Ok(Pipe::from_raw_fd(read_fd, write_fd))
    }

    /// Create a new `Pipe` instance whose 2 ends are constructed from raw
    /// file descriptors.
    pub fn from_raw_fd(read_fd: RawFd, write_fd: RawFd) -> Pipe {
        Pipe(
            Some(unsafe { File::from_raw_fd(read_fd) }),
            Some(unsafe { File::from_raw_fd(write_fd) }),
        )
    }

    /// Get a reference to the read end of the pipe.
    pub fn read_end(&self) -> Option<&File> {
        self.0.as_ref()
    }

    /// Get a reference to the write end of the pipe.
    pub fn write_end(&self) -> Option<&File> {
        self.1.as_ref()
    }

    /// Take ownership of the read end of the pipe, leaving `None` in the
    /// corresponding slot in this `Pipe` instance.
    pub fn take_read_end(&mut self) -> Option<File> {
        self.0.take()
    }

    /// Take ownership of the write end of the pipe, leaving `None` in the
    /// corresponding slot in this `Pipe` instance.
    pub fn take_write_end(&mut self) -> Option<File> {
        self.1.take()
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.take_read_end();
        self.take_write_end();
    }
}

/// Outcome of a `spawn_pump` run, read after the returned `JoinHandle` is
/// joined.
#[derive(Clone)]
pub struct PumpOutcome {
    exceeded: Arc<AtomicBool>,
    bytes_written: Arc<AtomicUsize>,
}

impl PumpOutcome {
    /// Did the pump stop storing bytes because `cap_bytes` was reached?
    pub fn exceeded_cap(&self) -> bool {
        self.exceeded.load(Ordering::SeqCst)
    }

    /// Total bytes actually written to `dest` (capped at `cap_bytes`).
    pub fn bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::SeqCst)
    }
}

/// Copy bytes from `source` into `dest` on a background thread, stopping
/// `dest` from growing past `cap_bytes` even if `source` has more to give —
/// the splice-pump cap named in `spec.md` §4.7 step 2, which classifies the
/// judgee's output as exceeding its output size limit rather than letting
/// `dest` grow unbounded. Reading from `source` continues past the cap (and
/// is discarded) so the producer is never blocked on a full pipe.
pub fn spawn_pump(mut source: File, mut dest: File, cap_bytes: usize) -> (JoinHandle<()>, PumpOutcome) {
    let exceeded = Arc::new(AtomicBool::new(false));
    let bytes_written = Arc::new(AtomicUsize::new(0));
    let outcome = PumpOutcome { exceeded: exceeded.clone(), bytes_written: bytes_written.clone() };

    let handle = std::thread::spawn(move || {
        let mut buf = [0u8; 64 * 1024];
        let mut written = 0usize;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };

            if written >= cap_bytes {
                exceeded.store(true, Ordering::SeqCst);
                continue;
            }

            let take = n.min(cap_bytes - written);
            if dest.write_all(&buf[..take]).is_err() {
                break;
            }
            written += take;
            if take < n {
                exceeded.store(true, Ordering::SeqCst);
            }
        }
        bytes_written.store(written, Ordering::SeqCst);
    });

    (handle, outcome)
}
