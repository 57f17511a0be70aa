//! Deadline scheduling and sleeping.
//!
//! Every timer a node owns (the heartbeat tick, the shutdown disconnect
//! request, the shutdown deadline) is an entry in one [`Scheduler`]. The
//! scheduler keeps its own virtual clock: production code advances it from
//! a tokio interval through [`spawn_driver`], tests advance it by hand and
//! observe exactly which jobs fired.
//!
//! Entries cannot be cancelled once scheduled.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Identifier handed out for every scheduled entry.
pub type TimerId = u64;

enum Task {
    Once(Box<dyn FnOnce() + Send>),
    Every {
        period: Duration,
        job: Arc<dyn Fn() + Send + Sync>,
    },
}

struct Inner {
    now: Duration,
    next_id: TimerId,
    /// Keyed by (due, id) so entries due at the same instant fire in the
    /// order they were scheduled
    queue: BTreeMap<(Duration, TimerId), Task>,
}

/// Virtual-time deadline queue.
pub struct Scheduler {
    inner: Mutex<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                now: Duration::ZERO,
                next_id: 1,
                queue: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current virtual time, measured from scheduler creation.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    fn insert(&self, delay: Duration, task: Task) -> TimerId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let due = inner.now + delay;
        inner.queue.insert((due, id), task);
        id
    }

    /// Runs `job` once, `delay` from now. A zero delay fires on the next
    /// advance.
    ///
    /// # Returns
    ///
    /// An id usable with [`Scheduler::deadline`]
    pub fn schedule_after<F>(&self, delay: Duration, job: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.insert(delay, Task::Once(Box::new(job)))
    }

    /// Runs `job` every `period`, first one period from now.
    pub fn schedule_every<F>(&self, period: Duration, job: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        self.insert(
            period,
            Task::Every {
                period,
                job: Arc::new(job),
            },
        )
    }

    /// When the entry will next fire, `None` once a one-shot has fired.
    pub fn deadline(&self, id: TimerId) -> Option<Duration> {
        self.lock()
            .queue
            .keys()
            .find(|(_, entry_id)| *entry_id == id)
            .map(|(due, _)| *due)
    }

    /// Earliest due time over all entries.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.lock().queue.keys().next().map(|(due, _)| *due)
    }

    /// Number of scheduled entries, repeating ones included.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Moves virtual time forward by `by`, firing everything that comes due.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        self.advance_to(target)
    }

    /// Moves virtual time forward to `target`, firing due entries in
    /// deadline order. Jobs run without the scheduler lock held, so they
    /// may schedule further entries; anything they schedule at or before
    /// `target` fires in this same call. Returns how many jobs ran.
    pub fn advance_to(&self, target: Duration) -> usize {
        let mut fired = 0;

        loop {
            let (key, task) = {
                let mut inner = self.lock();
                let due_key = match inner.queue.keys().next() {
                    Some(key) if key.0 <= target => *key,
                    _ => {
                        if target > inner.now {
                            inner.now = target;
                        }
                        return fired;
                    }
                };
                let task = match inner.queue.remove(&due_key) {
                    Some(task) => task,
                    None => return fired,
                };
                if due_key.0 > inner.now {
                    inner.now = due_key.0;
                }
                (due_key, task)
            };

            fired += 1;
            match task {
                Task::Once(job) => job(),
                Task::Every { period, job } => {
                    job();
                    self.lock().queue.insert(
                        (key.0 + period, key.1),
                        Task::Every { period, job },
                    );
                }
            }
        }
    }
}

/// Drives a scheduler from the tokio clock at the given resolution.
pub fn spawn_driver(scheduler: Arc<Scheduler>, resolution: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let start = Instant::now();
        let mut ticker = interval(resolution);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            scheduler.advance_to(start.elapsed());
        }
    })
}

/// Sleeping primitive used by blocking retry loops.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeping on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_one_shot_fires_once_at_deadline() {
        let scheduler = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = scheduler.schedule_after(Duration::from_secs(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(scheduler.deadline(id), Some(Duration::from_secs(30)));
        assert_eq!(scheduler.advance(Duration::from_secs(29)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.advance(Duration::from_secs(1)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.deadline(id), None);
        assert_eq!(scheduler.advance(Duration::from_secs(60)), 0);
    }

    #[test]
    fn test_recurring_entry_keeps_its_period() {
        let scheduler = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = scheduler.schedule_every(Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.advance(Duration::from_secs(185));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.deadline(id), Some(Duration::from_secs(240)));
        assert_eq!(scheduler.now(), Duration::from_secs(185));
    }

    #[test]
    fn test_same_deadline_fires_in_schedule_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            scheduler.schedule_after(Duration::from_secs(5), move || order.lock().unwrap().push(i));
        }
        scheduler.advance(Duration::from_secs(5));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_jobs_can_schedule_more_jobs() {
        let scheduler = Arc::new(Scheduler::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = scheduler.clone();
        let counter = hits.clone();
        scheduler.schedule_after(Duration::from_secs(1), move || {
            let counter = counter.clone();
            inner_scheduler.schedule_after(Duration::ZERO, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(scheduler.advance(Duration::from_secs(1)), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_follows_tokio_clock() {
        let scheduler = Arc::new(Scheduler::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        scheduler.schedule_after(Duration::from_secs(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let driver = spawn_driver(scheduler.clone(), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        driver.abort();
    }
}
