//! Abstract clock consumed by the pacing engine, plus a concrete
//! `Instant`-based implementation usable standalone.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of a blocking [`Clock::wait`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The target time was reached.
    Ok,
    /// The clock fired earlier than scheduled (implementation-defined
    /// early wakeup); treated the same as `Ok` by callers.
    Early,
    /// [`Clock::unschedule`] was called before the target time elapsed.
    Unscheduled,
}

/// Opaque handle to a scheduled single-shot wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockId(u64);

impl ClockId {
    /// Mint a new id. Exposed so that custom [`Clock`] implementations
    /// (outside this crate) can hand out ids from their own counter;
    /// `SystemClock` uses it internally too.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// The clock interface the pacing engine consumes. Implementations must
/// make `unschedule` safe to call concurrently with a blocking `wait` on
/// the same id from another thread: that's the one place the pacing
/// engine releases its coordination mutex (see `engine::PacingEngine`).
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Reference point running time `0` is measured from.
    fn epoch(&self) -> Instant;

    /// Schedule a one-shot wakeup at `target`. Does not block.
    fn new_single_shot(&self, target: Instant) -> ClockId;

    /// Block the calling thread until `id`'s target time elapses or it is
    /// unscheduled from another thread.
    fn wait(&self, id: ClockId) -> WaitResult;

    /// Cause a concurrent `wait(id)` to return `Unscheduled`. A no-op if
    /// the id already fired or was never scheduled.
    fn unschedule(&self, id: ClockId);

    /// Offset added to running-time targets to produce absolute clock
    /// targets.
    fn base_time(&self) -> Duration;

    /// Convert a running time into an absolute target for
    /// `new_single_shot`.
    fn target_for_running_time(&self, running_time: Duration) -> Instant {
        self.epoch() + self.base_time() + running_time
    }
}

#[derive(Debug)]
struct Timer {
    target: Instant,
    state: Mutex<TimerState>,
    condvar: Condvar,
}

#[derive(Debug, PartialEq, Eq)]
enum TimerState {
    Pending,
    Unscheduled,
}

/// A `std::time::Instant`-based [`Clock`] built on a mutex+condvar timer
/// per scheduled wait, the same suspension-point contract spec.md §5
/// requires: `wait` blocks without holding any lock the pacing engine
/// needs, and a concurrent `unschedule` wakes it immediately.
pub struct SystemClock {
    epoch: Instant,
    base_time: Duration,
    next_id: AtomicU64,
    timers: Mutex<std::collections::HashMap<u64, Arc<Timer>>>,
}

impl SystemClock {
    pub fn new(base_time: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            base_time,
            next_id: AtomicU64::new(0),
            timers: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch(&self) -> Instant {
        self.epoch
    }

    fn new_single_shot(&self, target: Instant) -> ClockId {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let timer = Arc::new(Timer {
            target,
            state: Mutex::new(TimerState::Pending),
            condvar: Condvar::new(),
        });
        self.timers.lock().unwrap().insert(id, timer);
        ClockId::new(id)
    }

    fn wait(&self, id: ClockId) -> WaitResult {
        let Some(timer) = self.timers.lock().unwrap().get(&id.0).cloned() else {
            return WaitResult::Unscheduled;
        };

        let now = Instant::now();
        let result = if timer.target <= now {
            WaitResult::Ok
        } else {
            let timeout = timer.target - now;
            let guard = timer.state.lock().unwrap();
            let (guard, timed_out) = self
                .condvar_wait(&timer, guard, timeout);
            match (&*guard, timed_out) {
                (TimerState::Unscheduled, _) => WaitResult::Unscheduled,
                (TimerState::Pending, true) => WaitResult::Ok,
                (TimerState::Pending, false) => WaitResult::Early,
            }
        };

        self.timers.lock().unwrap().remove(&id.0);
        result
    }

    fn unschedule(&self, id: ClockId) {
        let Some(timer) = self.timers.lock().unwrap().get(&id.0).cloned() else {
            return;
        };
        let mut state = timer.state.lock().unwrap();
        *state = TimerState::Unscheduled;
        timer.condvar.notify_all();
    }

    fn base_time(&self) -> Duration {
        self.base_time
    }
}

impl SystemClock {
    fn condvar_wait<'a>(
        &self,
        timer: &Timer,
        guard: std::sync::MutexGuard<'a, TimerState>,
        timeout: Duration,
    ) -> (std::sync::MutexGuard<'a, TimerState>, bool) {
        let (guard, result) = timer.condvar.wait_timeout(guard, timeout).unwrap();
        (guard, result.timed_out())
    }
}
