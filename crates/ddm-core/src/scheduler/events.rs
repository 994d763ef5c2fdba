//! Lifecycle event bus: a non-blocking broadcast of Mission/Task state
//! transitions to whatever C7 observers (progress renderer, event log)
//! are attached. §4.6's closing note: publishing must never backpressure
//! a worker, so `publish` only ever takes a brief lock to clone the
//! observer list and calls out to each observer with the lock released.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::mission::{Body, MissionData};

/// The five columns §4.7/§6's log record format names (`{url, goal_path,
/// rename, body, options}`), bundled once here so every terminal variant
/// of [`LifecycleEvent`] carries the same identifying context without
/// repeating five fields four times over.
#[derive(Debug, Clone)]
pub struct MissionLogFields {
    pub url: String,
    pub goal_path: PathBuf,
    pub rename: Option<String>,
    /// `"json"`, `"form"`, or `None` for a bodyless GET.
    pub body: Option<&'static str>,
    /// Short rendering of the request options bag (conflict policy, split
    /// eligibility) — the rest of §6's "bag of request parameters".
    pub options: String,
}

impl MissionLogFields {
    pub(crate) fn from_data(data: &MissionData) -> Self {
        MissionLogFields {
            url: data.url.clone(),
            goal_path: data.goal_dir.clone(),
            rename: data.rename.clone(),
            body: match &data.body {
                Some(Body::Json(_)) => Some("json"),
                Some(Body::Form(_)) => Some("form"),
                None => None,
            },
            options: format!(
                "conflict_policy={:?} allow_split={}",
                data.conflict_policy, data.allow_split
            ),
        }
    }
}

/// One state transition worth telling an observer about. Carries just
/// enough identifying context (§4.7's log record fields) for an
/// `EventLog` line or a `ProgressRenderer` redraw without either needing
/// to reach back into the Mission/Task for more.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    MissionStarted {
        mission_id: u64,
        url: String,
    },
    MissionSkipped {
        mission_id: u64,
        fields: MissionLogFields,
        path: std::path::PathBuf,
    },
    MissionSucceeded {
        mission_id: u64,
        fields: MissionLogFields,
        path: std::path::PathBuf,
        bytes: u64,
    },
    MissionFailed {
        mission_id: u64,
        fields: MissionLogFields,
        error: String,
    },
    MissionCanceled {
        mission_id: u64,
        fields: MissionLogFields,
    },
    TaskStarted {
        mission_id: u64,
        task: String,
    },
    TaskFinished {
        mission_id: u64,
        task: String,
        result: crate::mission::MissionResult,
    },
}

/// Receives broadcast [`LifecycleEvent`]s. Implementors must not block —
/// a slow observer would otherwise stall every worker thread publishing
/// through the same bus.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

/// Holds the attached observers and fans events out to all of them.
pub struct EventBus {
    observers: Mutex<Vec<Arc<dyn Observer>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Attaches an observer for the lifetime of the scheduler. There is no
    /// matching `detach`; observers are expected to live as long as the
    /// engine that registered them.
    pub fn attach(&self, observer: Arc<dyn Observer>) {
        self.observers.lock().unwrap().push(observer);
    }

    /// Broadcasts `event` to every attached observer. Takes the lock only
    /// long enough to clone the observer list; every `on_event` callback
    /// runs with the bus unlocked, so a slow observer never blocks another
    /// worker's `publish` call (§4.6: "the bus is non-blocking").
    pub fn publish(&self, event: LifecycleEvent) {
        let observers = self.observers.lock().unwrap().clone();
        for observer in observers.iter() {
            observer.on_event(&event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingObserver(Arc<AtomicUsize>);
    impl Observer for CountingObserver {
        fn on_event(&self, _event: &LifecycleEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn publish_reaches_every_attached_observer() {
        let bus = EventBus::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        bus.attach(Arc::new(CountingObserver(Arc::clone(&count_a))));
        bus.attach(Arc::new(CountingObserver(Arc::clone(&count_b))));

        bus.publish(LifecycleEvent::MissionStarted {
            mission_id: 1,
            url: "https://example.com".to_string(),
        });

        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publish_with_no_observers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(LifecycleEvent::MissionCanceled {
            mission_id: 7,
            fields: MissionLogFields::from_data(&MissionData::new(
                "https://example.com/a",
                "/tmp",
            )),
        });
    }
}
