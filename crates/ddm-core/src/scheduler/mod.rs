//! Scheduler (C6): a bounded pool of *roads* worker threads, a FIFO
//! waiting queue for overflow, and a non-blocking lifecycle event bus.
//!
//! §9's "Polymorphism Mission vs Task" note becomes [`Schedulable`]: the
//! pool only ever runs that capability, so it treats a Mission's driver
//! and a Task's byte pump identically — "each occupies exactly one slot
//! while running" (§4.6).

mod events;
mod pool;

pub use events::{EventBus, LifecycleEvent, MissionLogFields, Observer};

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DdmError, Result};

/// A unit of work the scheduler can run to completion: one Mission driver
/// or one Task's byte pump.
pub trait Schedulable: Send {
    fn run(self: Box<Self>);
}

/// Bounded worker pool described in §4.6. Dispatch pulls from the waiting
/// queue FIFO; a slot freeing polls for shutdown at ~500 ms so `cancel`
/// and process exit stay responsive without busy-waiting.
pub struct Scheduler {
    inner: Arc<pool::Inner>,
}

impl Scheduler {
    pub fn new(roads: usize) -> Self {
        Scheduler {
            inner: pool::Inner::spawn(roads.max(1)),
        }
    }

    /// Places a unit of work in the pool (if a slot is free) or the
    /// waiting queue (FIFO, otherwise).
    pub fn submit(&self, unit: Box<dyn Schedulable>) {
        self.inner.submit(unit);
    }

    /// Broadcasts cancellation intent to every observer and lets callers
    /// react (e.g. a Mission flipping its tasks' cancel tokens). The
    /// scheduler itself holds no Mission/Task references — cancellation
    /// of in-flight work is the caller's responsibility via those handles.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Current number of roads (pool size).
    pub fn roads(&self) -> usize {
        self.inner.roads.load(Ordering::Acquire)
    }

    /// Resizes the pool. Rejected (returns [`DdmError::Config`]) while any
    /// worker is busy, per §4.6's "set(roads=N) ... rejected while any
    /// mission is in-flight".
    pub fn set_roads(&self, roads: usize) -> Result<()> {
        if roads == 0 {
            return Err(DdmError::Config {
                field: "roads",
                reason: "must be > 0".to_string(),
            });
        }
        if self.inner.active_count.load(Ordering::Acquire) > 0 {
            return Err(DdmError::Config {
                field: "roads",
                reason: "scheduler is busy".to_string(),
            });
        }
        self.inner.resize(roads);
        Ok(())
    }

    /// Waits (polling `poll_interval`) until `predicate` returns true, or
    /// `timeout` elapses. `timeout = Duration::ZERO` waits indefinitely,
    /// matching §6's `wait(mission?, timeout)` convention.
    pub fn wait_until(&self, mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        let poll_interval = Duration::from_millis(100);
        let deadline = if timeout.is_zero() {
            None
        } else {
            Some(std::time::Instant::now() + timeout)
        };
        loop {
            if predicate() {
                return true;
            }
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    return false;
                }
            }
            std::thread::sleep(poll_interval);
        }
    }

    /// Shuts down all worker threads. Already-running units finish; queued
    /// units are dropped without running.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}
