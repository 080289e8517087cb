//! Timer scheduling for eager eviction.
//!
//! A [`TimerScheduler`] runs a callback once after a delay and can cancel it
//! by handle. [`TokioScheduler`] backs production use; [`ManualScheduler`]
//! only fires when told to, against a [`Clock`] the test controls.

use residenthub_core::{Clock, Timestamp};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::AbortHandle;

/// Callback run when a timer fires.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle identifying a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Schedules one-shot callbacks.
///
/// A cancelled timer must never run its callback. Cancelling a handle that
/// already fired or was already cancelled is a no-op.
pub trait TimerScheduler: Send + Sync {
    /// Run `task` once, `after` from now.
    fn schedule(&self, after: Duration, task: TimerTask) -> TimerHandle;

    /// Cancel a pending timer.
    fn cancel(&self, handle: TimerHandle);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// TOKIO SCHEDULER
// ============================================================================

/// Scheduler backed by `tokio::time::sleep` tasks.
///
/// The pending map is the source of truth: a task runs its callback only if
/// it can still remove its own id, so a cancel that wins the race always
/// suppresses the callback even if the abort arrives late.
#[derive(Debug)]
pub struct TokioScheduler {
    runtime: Handle,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, Option<AbortHandle>>>>,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Bind to the runtime of the calling context.
    pub fn try_current() -> Result<Self, TryCurrentError> {
        Ok(Self::new(Handle::try_current()?))
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl TimerScheduler for TokioScheduler {
    fn schedule(&self, after: Duration, task: TimerTask) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Registered before spawning so a zero-delay task finds its entry.
        lock(&self.pending).insert(id, None);

        let pending = Arc::clone(&self.pending);
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let still_pending = lock(&pending).remove(&id).is_some();
            if still_pending {
                task();
            }
        });

        if let Some(slot) = lock(&self.pending).get_mut(&id) {
            *slot = Some(join.abort_handle());
        }
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(Some(abort)) = lock(&self.pending).remove(&handle.0) {
            abort.abort();
        }
    }
}

// ============================================================================
// MANUAL SCHEDULER
// ============================================================================

struct ManualTimer {
    deadline: Timestamp,
    task: TimerTask,
}

/// Scheduler for deterministic tests.
///
/// Deadlines are computed from the injected clock at schedule time. Nothing
/// fires until [`ManualScheduler::fire_due`] is called.
pub struct ManualScheduler {
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    timers: Mutex<HashMap<u64, ManualTimer>>,
    fired: AtomicU64,
}

impl ManualScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: AtomicU64::new(1),
            timers: Mutex::new(HashMap::new()),
            fired: AtomicU64::new(0),
        }
    }

    /// Run every timer whose deadline is at or before the clock's current
    /// time, earliest first. Returns how many fired.
    ///
    /// Callbacks run without the scheduler lock held, so they may schedule
    /// or cancel other timers.
    pub fn fire_due(&self) -> usize {
        let mut count = 0;
        loop {
            let now = self.clock.now();
            let next = {
                let mut timers = lock(&self.timers);
                let due = timers
                    .iter()
                    .filter(|(_, t)| t.deadline <= now)
                    .min_by_key(|(id, t)| (t.deadline, **id))
                    .map(|(id, _)| *id);
                due.and_then(|id| timers.remove(&id))
            };
            match next {
                Some(timer) => {
                    (timer.task)();
                    self.fired.fetch_add(1, Ordering::Relaxed);
                    count += 1;
                }
                None => return count,
            }
        }
    }

    /// Timers that have neither fired nor been cancelled.
    pub fn pending_count(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Total callbacks run so far.
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        lock(&self.timers).values().map(|t| t.deadline).min()
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending_count())
            .field("fired", &self.fired_count())
            .finish()
    }
}

impl TimerScheduler for ManualScheduler {
    fn schedule(&self, after: Duration, task: TimerTask) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let delta = chrono::Duration::from_std(after).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();
        let deadline = now.checked_add_signed(delta).unwrap_or(Timestamp::MAX_UTC);
        lock(&self.timers).insert(id, ManualTimer { deadline, task });
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        lock(&self.timers).remove(&handle.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use residenthub_core::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> TimerTask {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_manual_scheduler_fires_only_when_due() {
        let clock = Arc::new(ManualClock::fixed());
        let scheduler = ManualScheduler::new(clock.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_millis(100), counter_task(&counter));
        assert_eq!(scheduler.fire_due(), 0);

        clock.advance(Duration::from_millis(99));
        assert_eq!(scheduler.fire_due(), 0);

        clock.advance(Duration::from_millis(1));
        assert_eq!(scheduler.fire_due(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_manual_scheduler_next_deadline_tracks_pending() {
        let clock = Arc::new(ManualClock::fixed());
        let scheduler = ManualScheduler::new(clock.clone());
        let counter = Arc::new(AtomicUsize::new(0));
        let start = clock.now();
        assert_eq!(scheduler.next_deadline(), None);

        let late = scheduler.schedule(Duration::from_millis(300), counter_task(&counter));
        let early = scheduler.schedule(Duration::from_millis(100), counter_task(&counter));
        assert_ne!(late.id(), early.id());
        assert_eq!(
            scheduler.next_deadline(),
            Some(start + chrono::Duration::milliseconds(100))
        );

        scheduler.cancel(early);
        assert_eq!(
            scheduler.next_deadline(),
            Some(start + chrono::Duration::milliseconds(300))
        );
    }

    #[test]
    fn test_manual_scheduler_cancel_suppresses_callback() {
        let clock = Arc::new(ManualClock::fixed());
        let scheduler = ManualScheduler::new(clock.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = scheduler.schedule(Duration::from_millis(10), counter_task(&counter));
        scheduler.cancel(handle);
        scheduler.cancel(handle);

        clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.fire_due(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_manual_scheduler_fires_in_deadline_order() {
        let clock = Arc::new(ManualClock::fixed());
        let scheduler = ManualScheduler::new(clock.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, delay) in [("late", 30u64), ("early", 10), ("middle", 20)] {
            let order = Arc::clone(&order);
            scheduler.schedule(
                Duration::from_millis(delay),
                Box::new(move || order.lock().unwrap().push(label)),
            );
        }

        clock.advance(Duration::from_millis(30));
        assert_eq!(scheduler.fire_due(), 3);
        assert_eq!(*order.lock().unwrap(), vec!["early", "middle", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_after_delay() {
        let scheduler = TokioScheduler::try_current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_millis(50), counter_task(&counter));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel() {
        let scheduler = TokioScheduler::try_current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = scheduler.schedule(Duration::from_millis(50), counter_task(&counter));
        scheduler.cancel(handle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_count(), 0);
    }
}
