use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Notification primitive with bounded waits.
///
/// Every [`BlockSignal::notify`] bumps a generation counter, so a waiter that recorded the
/// generation before checking its condition never misses a notification sent in between.
#[derive(Debug, Default)]
pub(crate) struct BlockSignal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl BlockSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    pub(crate) fn notify(&self) {
        *self.generation.lock() += 1;
        self.condvar.notify_all();
    }

    /// Blocks until notified after `generation`, or until `timeout` elapses. Returns
    /// whether a notification arrived.
    pub(crate) fn wait_since(&self, generation: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut current = self.generation.lock();
        while *current == generation {
            if self.condvar.wait_until(&mut current, deadline).timed_out() {
                return *current != generation;
            }
        }
        true
    }

    /// Blocks until `condition` holds, re-checking it on every notification, or until
    /// `timeout` elapses. Returns the last value of `condition`.
    pub(crate) fn wait_until<F: FnMut() -> bool>(&self, timeout: Duration, mut condition: F) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let generation = self.generation();
            if condition() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.wait_since(generation, deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_wait_since_returns_on_missed_notification() {
        let signal = BlockSignal::new();
        let generation = signal.generation();
        signal.notify();
        assert!(signal.wait_since(generation, Duration::from_secs(10)));
    }

    #[test]
    fn test_wait_since_times_out() {
        let signal = BlockSignal::new();
        let generation = signal.generation();
        assert!(!signal.wait_since(generation, Duration::from_millis(20)));
    }

    #[test]
    fn test_wait_until_condition() {
        let signal = Arc::new(BlockSignal::new());
        let done = Arc::new(AtomicBool::new(false));

        let handle = {
            let signal = signal.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                done.store(true, Ordering::SeqCst);
                signal.notify();
            })
        };

        assert!(signal.wait_until(Duration::from_secs(10), || done.load(Ordering::SeqCst)));
        handle.join().unwrap();

        assert!(!signal.wait_until(Duration::from_millis(10), || false));
    }
}
