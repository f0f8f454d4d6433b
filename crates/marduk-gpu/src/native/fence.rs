use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::NativeFence;

/// Fence emulated on the CPU.
///
/// Queues record the highest signaled value; whoever models GPU progress
/// calls [`complete_to`](Self::complete_to), which wakes blocked waiters.
#[derive(Debug, Default)]
pub struct CpuFence {
    signaled: AtomicU64,
    completed: Mutex<u64>,
    cond: Condvar,
}

impl CpuFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest value a queue has enqueued for this fence.
    #[inline]
    pub fn signaled_value(&self) -> u64 {
        self.signaled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_signaled(&self, value: u64) {
        self.signaled.fetch_max(value, Ordering::AcqRel);
    }

    /// Advances the completed value. Values never move backwards.
    pub fn complete_to(&self, value: u64) {
        let mut completed = self.completed.lock();
        if value > *completed {
            *completed = value;
            self.cond.notify_all();
        }
    }

    /// Completes everything signaled so far.
    pub fn complete_signaled(&self) {
        self.complete_to(self.signaled_value());
    }

    /// Waits for `value`, calling `poll` between bounded sleeps when given.
    ///
    /// Backends whose completion callbacks only run while the device is polled
    /// pass a poll hook; pure CPU fences pass `None` and sleep on the condvar.
    pub(crate) fn wait_with(
        &self,
        value: u64,
        timeout: Option<Duration>,
        poll: Option<&dyn Fn()>,
    ) -> bool {
        const POLL_SLICE: Duration = Duration::from_millis(1);

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut completed = self.completed.lock();

        while *completed < value {
            if let Some(poll) = poll {
                // Completion callbacks take this lock; release it while polling.
                drop(completed);
                poll();
                completed = self.completed.lock();
                if *completed >= value {
                    break;
                }
            }

            let slice = match (deadline, poll.is_some()) {
                (Some(deadline), _) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    if poll.is_some() { remaining.min(POLL_SLICE) } else { remaining }
                }
                (None, true) => POLL_SLICE,
                (None, false) => {
                    self.cond.wait(&mut completed);
                    continue;
                }
            };

            let _ = self.cond.wait_for(&mut completed, slice);
        }

        true
    }
}

impl NativeFence for CpuFence {
    fn completed_value(&self) -> u64 {
        *self.completed.lock()
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> bool {
        self.wait_with(value, timeout, None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn completed_value_never_decreases() {
        let fence = CpuFence::new();
        fence.complete_to(5);
        fence.complete_to(3);
        assert_eq!(fence.completed_value(), 5);
    }

    #[test]
    fn wait_times_out_when_not_reached() {
        let fence = CpuFence::new();
        let start = Instant::now();
        assert!(!fence.wait(1, Some(Duration::from_millis(30))));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn wait_wakes_on_completion_from_another_thread() {
        let fence = Arc::new(CpuFence::new());
        let waiter = {
            let fence = fence.clone();
            thread::spawn(move || fence.wait(3, None))
        };

        thread::sleep(Duration::from_millis(10));
        fence.mark_signaled(3);
        fence.complete_signaled();

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn poll_hook_drives_completion() {
        let fence = Arc::new(CpuFence::new());
        fence.mark_signaled(2);
        let hook_fence = fence.clone();
        let poll = move || hook_fence.complete_signaled();
        assert!(fence.wait_with(2, Some(Duration::from_secs(1)), Some(&poll)));
    }
}
