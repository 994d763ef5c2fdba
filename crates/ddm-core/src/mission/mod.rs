//! Mission: one user-submitted download, possibly split into several
//! [`Task`]s that each fetch a contiguous byte range of the same file.

mod data;
mod task;

pub use data::{Body, ConflictPolicy, Method, MissionData};
pub use task::{Task, TaskRange};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{DdmError, Result};

/// Lifecycle state shared by Mission and Task.
///
/// Monotonic: `waiting -> running -> done`. `done` is absorbing; nothing
/// transitions out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MissionState {
    Waiting = 0,
    Running = 1,
    Done = 2,
}

impl MissionState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => MissionState::Waiting,
            1 => MissionState::Running,
            _ => MissionState::Done,
        }
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MissionState::Waiting => "waiting",
            MissionState::Running => "running",
            MissionState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of a mission or task. Only meaningful once
/// `state() == MissionState::Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MissionResult {
    /// Not yet terminal.
    Unknown = 0,
    Success = 1,
    /// Destination already existed and the conflict policy was `skip`.
    Skipped = 2,
    Canceled = 3,
    Failed = 4,
}

impl MissionResult {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => MissionResult::Unknown,
            1 => MissionResult::Success,
            2 => MissionResult::Skipped,
            3 => MissionResult::Canceled,
            _ => MissionResult::Failed,
        }
    }
}

impl fmt::Display for MissionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MissionResult::Unknown => "unknown",
            MissionResult::Success => "success",
            MissionResult::Skipped => "skipped",
            MissionResult::Canceled => "canceled",
            MissionResult::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One user-submitted download.
///
/// Cheap to clone (an `Arc` around the shared state); handed back to
/// callers of `Engine::submit` as the handle they poll or wait on.
#[derive(Clone)]
pub struct Mission(Arc<Inner>);

struct Inner {
    id: u64,
    data: MissionData,
    /// Final resolved destination path, filled in once the resolver has
    /// run (conflict policy applied, filename derived). `None` until then.
    resolved_path: Mutex<Option<std::path::PathBuf>>,
    /// Declared total size from the HEAD probe, if known up front.
    total_size: Mutex<Option<u64>>,
    tasks: Mutex<Vec<Arc<Task>>>,
    state: AtomicU8,
    result: AtomicU8,
    error: Mutex<Option<String>>,
    bytes_downloaded: AtomicU64,
    /// Set by [`Mission::cancel`]; the aggregator (§4.3) consults this to
    /// distinguish an explicit cancellation from a task failure when every
    /// child task has reached `Done`.
    cancel_requested: AtomicBool,
    /// Flipped by whichever sibling task's completion first observes every
    /// task terminal (§5's "completed-count under a mutex"), so the
    /// downloader's aggregation step runs exactly once per mission even
    /// when two tasks finish concurrently.
    aggregated: AtomicBool,
    done: Condvar,
    done_lock: Mutex<bool>,
}

impl Mission {
    pub(crate) fn new(id: u64, data: MissionData) -> Self {
        Mission(Arc::new(Inner {
            id,
            data,
            resolved_path: Mutex::new(None),
            total_size: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            state: AtomicU8::new(MissionState::Waiting as u8),
            result: AtomicU8::new(MissionResult::Unknown as u8),
            error: Mutex::new(None),
            bytes_downloaded: AtomicU64::new(0),
            cancel_requested: AtomicBool::new(false),
            aggregated: AtomicBool::new(false),
            done: Condvar::new(),
            done_lock: Mutex::new(false),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn data(&self) -> &MissionData {
        &self.0.data
    }

    pub fn state(&self) -> MissionState {
        MissionState::from_u8(self.0.state.load(Ordering::Acquire))
    }

    pub fn result(&self) -> MissionResult {
        MissionResult::from_u8(self.0.result.load(Ordering::Acquire))
    }

    pub fn resolved_path(&self) -> Option<std::path::PathBuf> {
        self.0.resolved_path.lock().unwrap().clone()
    }

    pub(crate) fn set_resolved_path(&self, path: std::path::PathBuf) {
        *self.0.resolved_path.lock().unwrap() = Some(path);
    }

    pub fn total_size(&self) -> Option<u64> {
        *self.0.total_size.lock().unwrap()
    }

    pub(crate) fn set_total_size(&self, size: u64) {
        *self.0.total_size.lock().unwrap() = Some(size);
    }

    pub(crate) fn set_tasks(&self, tasks: Vec<Arc<Task>>) {
        *self.0.tasks.lock().unwrap() = tasks;
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.0.tasks.lock().unwrap().clone()
    }

    /// Sum of every task's `bytes_downloaded`. Cheap enough to poll from a
    /// progress renderer every few hundred milliseconds.
    pub fn bytes_downloaded(&self) -> u64 {
        self.0
            .tasks
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.bytes_downloaded())
            .sum()
    }

    pub(crate) fn mark_running(&self) {
        self.0
            .state
            .store(MissionState::Running as u8, Ordering::Release);
    }

    /// Monotonic: a mission already `done` cannot be re-finished.
    pub(crate) fn mark_terminal(&self, result: MissionResult, error: Option<String>) {
        if self.state() == MissionState::Done {
            return;
        }
        *self.0.error.lock().unwrap() = error;
        self.0
            .result
            .store(result as u8, Ordering::Release);
        self.0
            .state
            .store(MissionState::Done as u8, Ordering::Release);
        let mut done = self.0.done_lock.lock().unwrap();
        *done = true;
        self.0.done.notify_all();
    }

    pub fn error(&self) -> Option<String> {
        self.0.error.lock().unwrap().clone()
    }

    /// Request cancellation: flips every task's cancel token. The pump
    /// loops notice at the next 64 KiB chunk boundary (spec §5) and unwind
    /// to `MissionResult::Canceled`; this call does not itself block.
    pub fn cancel(&self) {
        self.0.cancel_requested.store(true, Ordering::Relaxed);
        for task in self.0.tasks.lock().unwrap().iter() {
            task.cancel_token().store(true, Ordering::Relaxed);
        }
    }

    /// Whether [`Mission::cancel`] was ever called. The aggregator uses
    /// this to prefer `Canceled` over `Failed` once every task is terminal.
    pub fn is_cancel_requested(&self) -> bool {
        self.0.cancel_requested.load(Ordering::Relaxed)
    }

    /// Flips every task's cancel token without setting
    /// `cancel_requested`. Used when one sibling task's failure should
    /// stop the others early (§4.3) — the mission still finishes
    /// `Failed`, not `Canceled`, since the user never asked to cancel it.
    pub(crate) fn abort_siblings(&self) {
        for task in self.0.tasks.lock().unwrap().iter() {
            task.cancel_token().store(true, Ordering::Relaxed);
        }
    }

    /// Block the calling thread until the mission reaches `Done`.
    pub fn wait(&self) -> Result<MissionResult> {
        self.wait_timeout(None)
    }

    /// Blocks until `Done`, or until `timeout` elapses. `timeout = None`
    /// (or, per the public `Engine::wait` convention, `Duration::ZERO`)
    /// waits indefinitely.
    pub fn wait_timeout(&self, timeout: Option<std::time::Duration>) -> Result<MissionResult> {
        let mut done = self.0.done_lock.lock().unwrap();
        match timeout {
            None => {
                while !*done {
                    done = self.0.done.wait(done).unwrap();
                }
            }
            Some(timeout) => {
                let (guard, timed_out) = self
                    .0
                    .done
                    .wait_timeout_while(done, timeout, |done| !*done)
                    .unwrap();
                done = guard;
                if timed_out.timed_out() && !*done {
                    return Err(DdmError::ConnectError("wait timed out".to_string()));
                }
            }
        }
        drop(done);
        match self.result() {
            MissionResult::Failed => Err(DdmError::ConnectError(
                self.error().unwrap_or_else(|| "download failed".to_string()),
            )),
            MissionResult::Canceled => Err(DdmError::Canceled),
            result => Ok(result),
        }
    }

    /// True once every child task has reached `Done`. A single-task
    /// mission is terminal the moment its one task is.
    pub fn all_tasks_terminal(&self) -> bool {
        self.0.tasks.lock().unwrap().iter().all(|t| t.is_terminal())
    }

    /// True if any child task terminated with `Failed`.
    pub fn any_task_failed(&self) -> bool {
        self.0
            .tasks
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.result() == MissionResult::Failed)
    }

    /// Claims the right to run the downloader's one-time aggregation step.
    /// Returns `true` for exactly one caller across however many sibling
    /// tasks race to call this after `all_tasks_terminal()` first becomes
    /// true; every other caller gets `false` and must return without
    /// touching the recorder, the backing file, or the event bus.
    pub(crate) fn try_begin_aggregate(&self) -> bool {
        self.0
            .aggregated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Mission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mission")
            .field("id", &self.id())
            .field("url", &self.data().url)
            .field("state", &self.state())
            .field("result", &self.result())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> MissionData {
        MissionData::new("https://example.com/file.bin", "/tmp")
    }

    #[test]
    fn new_mission_starts_waiting_and_unknown() {
        let m = Mission::new(1, sample_data());
        assert_eq!(m.state(), MissionState::Waiting);
        assert_eq!(m.result(), MissionResult::Unknown);
    }

    #[test]
    fn mark_terminal_is_monotonic() {
        let m = Mission::new(1, sample_data());
        m.mark_running();
        m.mark_terminal(MissionResult::Success, None);
        assert_eq!(m.result(), MissionResult::Success);
        m.mark_terminal(MissionResult::Failed, Some("late error".into()));
        assert_eq!(m.result(), MissionResult::Success);
        assert_eq!(m.error(), None);
    }

    #[test]
    fn try_begin_aggregate_succeeds_for_exactly_one_caller() {
        use std::sync::atomic::AtomicUsize;

        let m = Arc::new(Mission::new(1, sample_data()));
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if m.try_begin_aggregate() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        // A later, non-concurrent caller still finds the claim taken.
        assert!(!m.try_begin_aggregate());
    }

    #[test]
    fn wait_unblocks_after_mark_terminal() {
        let m = Mission::new(1, sample_data());
        let m2 = m.clone();
        let handle = std::thread::spawn(move || m2.wait());
        std::thread::sleep(std::time::Duration::from_millis(20));
        m.mark_terminal(MissionResult::Success, None);
        let result = handle.join().unwrap().unwrap();
        assert_eq!(result, MissionResult::Success);
    }
}
