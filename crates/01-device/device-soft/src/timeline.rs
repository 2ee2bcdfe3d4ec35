//! Completion timeline shared between the producer and a simulated consumer.
//!
//! Every command that can be waited on gets a sequence number from
//! [`Timeline::submit`]. The consumer side advances `completed` as it finishes
//! work; a fence with sequence `n` has signalled once `completed >= n`.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Progress {
    submitted: u64,
    completed: u64,
}

#[derive(Debug, Default)]
struct TimelineInner {
    progress: Mutex<Progress>,
    retired: Condvar,
}

/// Monotonic submitted/completed counters with blocking waits.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    inner: Arc<TimelineInner>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next sequence number.
    pub fn submit(&self) -> u64 {
        self.submit_with(|seq| seq)
    }

    /// Allocates the next sequence number and runs `f` while the timeline is locked.
    ///
    /// A consumer that reads [`Timeline::submitted`] afterwards is guaranteed
    /// to observe every side effect `f` performed (for example, a channel send
    /// announcing the submitted work).
    pub fn submit_with<R>(&self, f: impl FnOnce(u64) -> R) -> R {
        let mut progress = self.inner.progress.lock();
        progress.submitted += 1;
        f(progress.submitted)
    }

    pub fn submitted(&self) -> u64 {
        self.inner.progress.lock().submitted
    }

    pub fn completed(&self) -> u64 {
        self.inner.progress.lock().completed
    }

    pub fn is_complete(&self, seq: u64) -> bool {
        self.completed() >= seq
    }

    /// Marks every command up to and including `seq` as finished.
    pub fn retire_through(&self, seq: u64) {
        let mut progress = self.inner.progress.lock();
        let target = seq.min(progress.submitted);
        if target > progress.completed {
            progress.completed = target;
            self.inner.retired.notify_all();
        }
    }

    /// Marks everything submitted so far as finished.
    pub fn retire_all(&self) {
        let mut progress = self.inner.progress.lock();
        if progress.completed < progress.submitted {
            progress.completed = progress.submitted;
            self.inner.retired.notify_all();
        }
    }

    /// Blocks until `seq` has completed. Returns `false` on timeout.
    pub fn wait_for(&self, seq: u64, timeout: Option<Duration>) -> bool {
        let mut progress = self.inner.progress.lock();
        // A deadline too far out to represent is the same as no deadline.
        match timeout.and_then(|timeout| Instant::now().checked_add(timeout)) {
            None => {
                while progress.completed < seq {
                    self.inner.retired.wait(&mut progress);
                }
                true
            }
            Some(deadline) => {
                while progress.completed < seq {
                    if self
                        .inner
                        .retired
                        .wait_until(&mut progress, deadline)
                        .timed_out()
                    {
                        return progress.completed >= seq;
                    }
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn retire_never_passes_submitted() {
        let timeline = Timeline::new();
        let first = timeline.submit();
        timeline.retire_through(first + 10);
        assert_eq!(timeline.completed(), first);
        assert!(!timeline.is_complete(first + 1));
    }

    #[test]
    fn wait_times_out_without_consumer() {
        let timeline = Timeline::new();
        let seq = timeline.submit();
        assert!(!timeline.wait_for(seq, Some(Duration::from_millis(10))));
        timeline.retire_all();
        assert!(timeline.wait_for(seq, Some(Duration::from_millis(10))));
    }

    #[test]
    fn wait_wakes_on_retire_from_other_thread() {
        let timeline = Timeline::new();
        let seq = timeline.submit();
        let consumer = timeline.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            consumer.retire_through(seq);
        });
        assert!(timeline.wait_for(seq, None));
        handle.join().unwrap();
    }
}
