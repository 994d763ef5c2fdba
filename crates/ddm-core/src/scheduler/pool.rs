//! Worker-thread pool backing the [`super::Scheduler`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::{events::EventBus, Schedulable};

/// How long a worker blocks on the waiting queue before re-checking the
/// shutdown flag (§4.6: "blocking ≤500 ms then polling for shutdown").
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub(super) struct Inner {
    queue: Mutex<VecDeque<Box<dyn Schedulable>>>,
    queue_cv: Condvar,
    pub(super) active_count: AtomicUsize,
    pub(super) roads: AtomicUsize,
    shutdown: AtomicBool,
    generation: AtomicUsize,
    pub(super) events: EventBus,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl Inner {
    pub(super) fn spawn(roads: usize) -> Arc<Self> {
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            active_count: AtomicUsize::new(0),
            roads: AtomicUsize::new(roads),
            shutdown: AtomicBool::new(false),
            generation: AtomicUsize::new(0),
            events: EventBus::new(),
            workers: Mutex::new(Vec::new()),
        });
        inner.spawn_workers(roads, inner.generation.load(Ordering::Acquire));
        inner
    }

    fn spawn_workers(self: &Arc<Self>, count: usize, generation: usize) {
        let mut workers = self.workers.lock().unwrap();
        for _ in 0..count {
            let inner = Arc::clone(self);
            workers.push(std::thread::spawn(move || inner.worker_loop(generation)));
        }
    }

    fn worker_loop(&self, generation: usize) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            if self.generation.load(Ordering::Acquire) != generation {
                // A resize retired this worker generation; exit quietly.
                return;
            }

            let unit = {
                let mut queue = self.queue.lock().unwrap();
                loop {
                    if let Some(unit) = queue.pop_front() {
                        break Some(unit);
                    }
                    if self.shutdown.load(Ordering::Acquire)
                        || self.generation.load(Ordering::Acquire) != generation
                    {
                        break None;
                    }
                    let (guard, _) = self
                        .queue_cv
                        .wait_timeout(queue, QUEUE_POLL_INTERVAL)
                        .unwrap();
                    queue = guard;
                }
            };

            let Some(unit) = unit else { return };

            self.active_count.fetch_add(1, Ordering::AcqRel);
            unit.run();
            self.active_count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub(super) fn submit(self: &Arc<Self>, unit: Box<dyn Schedulable>) {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(unit);
        self.queue_cv.notify_one();
    }

    pub(super) fn resize(self: &Arc<Self>, roads: usize) {
        // Retire the current worker generation and spawn a fresh one at
        // the new size. Only called while active_count == 0 (checked by
        // the caller), so there is no in-flight work to preserve.
        self.generation.fetch_add(1, Ordering::AcqRel);
        {
            let _queue = self.queue.lock().unwrap();
            self.queue_cv.notify_all();
        }
        let mut workers = self.workers.lock().unwrap();
        for w in workers.drain(..) {
            let _ = w.join();
        }
        drop(workers);
        self.roads.store(roads, Ordering::Release);
        self.spawn_workers(roads, self.generation.load(Ordering::Acquire));
    }

    pub(super) fn shutdown(self: &Arc<Self>) {
        self.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.queue.lock().unwrap();
            self.queue_cv.notify_all();
        }
        let mut workers = self.workers.lock().unwrap();
        for w in workers.drain(..) {
            let _ = w.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Scheduler;
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingUnit(Arc<AtomicU32>);
    impl Schedulable for CountingUnit {
        fn run(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn submitted_units_all_run() {
        let scheduler = Scheduler::new(2);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..10 {
            scheduler.submit(Box::new(CountingUnit(Arc::clone(&counter))));
        }
        let done = scheduler.wait_until(
            || counter.load(Ordering::SeqCst) == 10,
            Duration::from_secs(5),
        );
        assert!(done);
    }

    #[test]
    fn set_roads_rejects_zero() {
        let scheduler = Scheduler::new(1);
        assert!(scheduler.set_roads(0).is_err());
    }

    #[test]
    fn set_roads_resizes_pool_when_idle() {
        let scheduler = Scheduler::new(1);
        assert_eq!(scheduler.roads(), 1);
        scheduler.set_roads(4).unwrap();
        assert_eq!(scheduler.roads(), 4);
    }
}
