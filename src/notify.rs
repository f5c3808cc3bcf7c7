use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

fn relock<T>(result: std::sync::LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Single-slot "data changed" wake-up.
///
/// Any number of `notify` calls between two waits collapse into one wake-up. Waiters
/// always re-read full state, so at-least-once delivery is enough.
#[derive(Debug, Default)]
pub struct Notifier {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        *relock(self.pending.lock()) = true;
        self.cond.notify_all();
    }

    /// Returns `true` if a notification was consumed, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = relock(self.pending.lock());
        while !*pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            pending = match self.cond.wait_timeout(pending, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *pending = false;
        true
    }
}

/// Sticky stop request for periodic workers.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        *relock(self.stopped.lock()) = true;
        self.cond.notify_all();
    }

    /// Sleeps for `timeout` unless stopped first. Returns `true` once stopped.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = relock(self.stopped.lock());
        match self.cond.wait_timeout_while(guard, timeout, |stopped| !*stopped) {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_notifications_collapse() {
        let notifier = Notifier::new();
        notifier.notify();
        notifier.notify();
        assert!(notifier.wait_timeout(Duration::from_millis(10)));
        assert!(!notifier.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wakes_waiting_thread() {
        let notifier = Arc::new(Notifier::new());
        let waiter = {
            let notifier = notifier.clone();
            thread::spawn(move || notifier.wait_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        notifier.notify();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_stop_signal_is_sticky_and_prompt() {
        let stop = Arc::new(StopSignal::new());
        let worker = {
            let stop = stop.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let stopped = stop.wait(Duration::from_secs(30));
                (stopped, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        stop.stop();
        let (stopped, elapsed) = worker.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
        assert!(stop.wait(Duration::from_secs(30)));
    }
}
