//! Periodic task scheduling
//!
//! Each grabber runs on its own scheduler thread: video at a fixed rate,
//! audio with a fixed delay between cycles. A cycle always runs to
//! completion; cancellation is cooperative, either from the task itself or
//! from a bounded shutdown.

use parking_lot::{Condvar, Mutex as ParkingMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a scheduled task wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    /// Stop scheduling this task; the thread exits after this cycle.
    Cancel,
}

/// A periodic task running on a dedicated thread.
pub struct Scheduler {
    shutdown: Arc<AtomicBool>,
    finished: Arc<(ParkingMutex<bool>, Condvar)>,
    handle: Option<std::thread::JoinHandle<()>>,
    name: &'static str,
}

impl Scheduler {
    /// Runs `task` every `period`, first run after one full period. Late
    /// cycles are not compensated; the next run is simply rescheduled from
    /// the current time.
    pub fn fixed_rate<F>(name: &'static str, period: Duration, task: F) -> Self
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        Self::spawn(name, period, period, true, task)
    }

    /// Runs `task` immediately, then waits `period` between the end of one
    /// cycle and the start of the next.
    pub fn fixed_delay<F>(name: &'static str, period: Duration, task: F) -> Self
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        Self::spawn(name, Duration::ZERO, period, false, task)
    }

    fn spawn<F>(
        name: &'static str,
        initial_delay: Duration,
        period: Duration,
        fixed_rate: bool,
        mut task: F,
    ) -> Self
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let finished = Arc::new((ParkingMutex::new(false), Condvar::new()));
        let thread_shutdown = shutdown.clone();
        let thread_finished = finished.clone();

        let handle = std::thread::Builder::new()
            .name(format!("windowcast-{name}"))
            .spawn(move || {
                let mut next = Instant::now() + initial_delay;
                loop {
                    let now = Instant::now();
                    if now < next {
                        std::thread::sleep(next - now);
                    }
                    if thread_shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    if task() == Tick::Cancel {
                        tracing::debug!("{} scheduler cancelled by task", name);
                        break;
                    }
                    if fixed_rate {
                        next += period;
                        let now = Instant::now();
                        if next < now {
                            // Fell behind; skip the missed slots.
                            next = now;
                        }
                    } else {
                        next = Instant::now() + period;
                    }
                }
                let (lock, cvar) = &*thread_finished;
                *lock.lock() = true;
                cvar.notify_all();
            })
            .expect("failed to spawn scheduler thread");

        Scheduler {
            shutdown,
            finished,
            handle: Some(handle),
            name,
        }
    }

    /// Requests shutdown and waits up to `timeout` for the in-flight cycle
    /// and the thread to finish. A thread that does not finish in time is
    /// detached rather than blocked on forever.
    pub fn shutdown(mut self, timeout: Duration) {
        self.shutdown.store(true, Ordering::SeqCst);
        let (lock, cvar) = &*self.finished;
        let mut done = lock.lock();
        let deadline = Instant::now() + timeout;
        while !*done {
            if cvar.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        let finished = *done;
        drop(done);
        if finished {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        } else {
            tracing::warn!("{} scheduler did not stop within {:?}, detaching", self.name, timeout);
            self.handle.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fixed_rate_runs_repeatedly() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let scheduler = Scheduler::fixed_rate("test", Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Tick::Continue
        });
        std::thread::sleep(Duration::from_millis(60));
        scheduler.shutdown(Duration::from_secs(1));
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_task_self_cancel_stops_scheduling() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let scheduler = Scheduler::fixed_delay("test", Duration::from_millis(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Tick::Cancel
        });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_is_bounded() {
        let scheduler = Scheduler::fixed_delay("test", Duration::from_millis(1), move || {
            std::thread::sleep(Duration::from_millis(200));
            Tick::Continue
        });
        std::thread::sleep(Duration::from_millis(10));
        let started = Instant::now();
        scheduler.shutdown(Duration::from_millis(20));
        assert!(started.elapsed() < Duration::from_millis(150));
    }
}
