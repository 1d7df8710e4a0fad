use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;

use crate::backend::Multiplexer;
use crate::error::GpioError;

/// Scripted multiplexer: `wait` hands out queued batches verbatim, including
/// descriptors that were never registered.
pub struct MockMultiplexer {
    interests: Mutex<FxHashSet<RawFd>>,
    script: Mutex<Script>,
    pushed: Condvar,
    capacity: usize,
    waits: AtomicU64,
}

#[derive(Default)]
struct Script {
    batches: VecDeque<Result<Vec<RawFd>, io::ErrorKind>>,
    woken: bool,
}

impl Default for MockMultiplexer {
    fn default() -> Self {
        Self::new(32)
    }
}

impl MockMultiplexer {
    pub fn new(capacity: usize) -> Self {
        Self {
            interests: Mutex::new(FxHashSet::default()),
            script: Mutex::new(Script::default()),
            pushed: Condvar::new(),
            capacity: capacity.max(1),
            waits: AtomicU64::new(0),
        }
    }

    pub fn push_batch(&self, fds: impl IntoIterator<Item = RawFd>) {
        self.script
            .lock()
            .batches
            .push_back(Ok(fds.into_iter().collect()));
        self.pushed.notify_all();
    }

    pub fn push_error(&self, kind: io::ErrorKind) {
        self.script.lock().batches.push_back(Err(kind));
        self.pushed.notify_all();
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.interests.lock().contains(&fd)
    }

    pub fn pending(&self) -> usize {
        self.script.lock().batches.len()
    }

    /// Number of `wait` calls that returned a batch or an error.
    pub fn completed_waits(&self) -> u64 {
        self.waits.load(Ordering::Acquire)
    }
}

impl Multiplexer for MockMultiplexer {
    fn add_interest(&self, fd: RawFd) -> Result<(), GpioError> {
        if fd < 0 {
            return Err(GpioError::RegistrationFailed {
                fd,
                source: io::Error::from_raw_os_error(9), // EBADF
            });
        }
        if !self.interests.lock().insert(fd) {
            return Err(GpioError::RegistrationFailed {
                fd,
                source: io::Error::from(io::ErrorKind::AlreadyExists),
            });
        }
        Ok(())
    }

    fn remove_interest(&self, fd: RawFd) -> Result<(), GpioError> {
        if !self.interests.lock().remove(&fd) {
            return Err(GpioError::RegistrationFailed {
                fd,
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Ok(())
    }

    fn wait(&self, ready: &mut Vec<RawFd>, timeout: Option<Duration>) -> Result<usize, GpioError> {
        ready.clear();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut script = self.script.lock();

        while script.batches.is_empty() {
            if std::mem::take(&mut script.woken) {
                return Ok(0);
            }
            match deadline {
                Some(deadline) => {
                    if self.pushed.wait_until(&mut script, deadline).timed_out() {
                        return Ok(0);
                    }
                }
                None => self.pushed.wait(&mut script),
            }
        }

        let next = script.batches.pop_front();
        self.waits.fetch_add(1, Ordering::AcqRel);
        match next {
            Some(Ok(mut batch)) => {
                // bursts larger than the buffer stay queued for the next wait
                if batch.len() > self.capacity {
                    let rest = batch.split_off(self.capacity);
                    script.batches.push_front(Ok(rest));
                }
                ready.extend(batch);
                Ok(ready.len())
            }
            Some(Err(kind)) => Err(GpioError::WaitFailed(io::Error::from(kind))),
            None => Ok(0),
        }
    }

    fn wake(&self) -> Result<(), GpioError> {
        self.script.lock().woken = true;
        self.pushed.notify_all();
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
