//! Completion signals for submitted jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// One-shot completion flag a worker raises after running a job.
///
/// Waiters block on a condition variable instead of spinning.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    done: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl CompletionSignal {
    /// Creates an unsignalled completion flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag and wakes every waiter.
    pub fn signal(&self) {
        // Taken so a waiter cannot check the flag and then miss the notify.
        let _guard = self.mutex.lock();
        self.done.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    /// Blocks until the flag is raised.
    pub fn wait(&self) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.mutex.lock();
        while !self.done.load(Ordering::Acquire) {
            self.condvar.wait(&mut guard);
        }
    }

    /// Waits with timeout. Returns true if the flag was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        let mut guard = self.mutex.lock();
        if !self.done.load(Ordering::Acquire) {
            let _ = self.condvar.wait_for(&mut guard, timeout);
        }
        self.done.load(Ordering::Acquire)
    }

    /// Returns true if already raised.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Handle returned to a caller for tracking one job.
#[derive(Clone, Debug)]
pub struct JobHandle {
    signal: Arc<CompletionSignal>,
}

impl JobHandle {
    /// Wraps a shared completion signal.
    #[must_use]
    pub fn new(signal: Arc<CompletionSignal>) -> Self {
        Self { signal }
    }

    /// Waits for the job to finish running.
    pub fn wait(&self) {
        self.signal.wait();
    }

    /// Waits with timeout. Returns true if completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.signal.wait_timeout(timeout)
    }

    /// Returns true if already completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.signal.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_wakes_waiter() {
        let signal = Arc::new(CompletionSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait())
        };

        signal.signal();
        waiter.join().unwrap();
        assert!(signal.is_done());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let handle = JobHandle::new(Arc::new(CompletionSignal::new()));
        assert!(!handle.wait_timeout(Duration::from_millis(5)));
        assert!(!handle.is_done());
    }
}
