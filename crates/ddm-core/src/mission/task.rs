//! Sub-range task belonging to a mission.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::{MissionResult, MissionState};

/// The byte range a task is responsible for.
///
/// `None` means "whole file, single task" (no `Range` header is ever sent).
/// `Some` carries a half-open start and an optional open end: the last
/// range of a split mission is transmitted open-ended (`bytes=start-`) but
/// its logical end is the mission's declared size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRange {
    Whole,
    Bounded { start: u64, end: u64 },
    Open { start: u64 },
}

impl TaskRange {
    /// HTTP `Range` header value for this range, or `None` for `TaskRange::Whole`
    /// (which issues a plain, unranged GET).
    pub fn range_header_value(&self) -> Option<String> {
        match self {
            TaskRange::Whole => None,
            TaskRange::Bounded { start, end } => Some(format!("bytes={}-{}", start, end - 1)),
            TaskRange::Open { start } => Some(format!("bytes={}-", start)),
        }
    }

    /// Start offset within the destination file.
    pub fn start_offset(&self) -> u64 {
        match self {
            TaskRange::Whole => 0,
            TaskRange::Bounded { start, .. } | TaskRange::Open { start } => *start,
        }
    }

    /// Total byte budget, if bounded.
    pub fn budget(&self) -> Option<u64> {
        match self {
            TaskRange::Bounded { start, end } => Some(end - start),
            TaskRange::Whole | TaskRange::Open { .. } => None,
        }
    }
}

/// A byte-range sub-download belonging to a Mission.
///
/// A single-task mission (no split) has exactly one `Task` with
/// `range == TaskRange::Whole`.
pub struct Task {
    /// 1-based index among the mission's tasks.
    pub index: usize,
    /// Total number of tasks in the parent mission (for `Display`).
    pub total: usize,
    pub mission_id: u64,
    pub range: TaskRange,
    state: AtomicU8State,
    result: AtomicU8Result,
    bytes_downloaded: AtomicU64,
    cancel_flag: Arc<AtomicBool>,
}

/// Mission/Task share the same small state space; reuse the same atomic
/// encoding for both rather than duplicating it.
struct AtomicU8State(std::sync::atomic::AtomicU8);
struct AtomicU8Result(std::sync::atomic::AtomicU8);

impl AtomicU8State {
    fn new(s: MissionState) -> Self {
        Self(std::sync::atomic::AtomicU8::new(s as u8))
    }
    fn load(&self) -> MissionState {
        MissionState::from_u8(self.0.load(Ordering::Acquire))
    }
    fn store(&self, s: MissionState) {
        self.0.store(s as u8, Ordering::Release);
    }
}

impl AtomicU8Result {
    fn new(r: MissionResult) -> Self {
        Self(std::sync::atomic::AtomicU8::new(r as u8))
    }
    fn load(&self) -> MissionResult {
        MissionResult::from_u8(self.0.load(Ordering::Acquire))
    }
    fn store(&self, r: MissionResult) {
        self.0.store(r as u8, Ordering::Release);
    }
}

impl Task {
    pub fn new(mission_id: u64, index: usize, total: usize, range: TaskRange) -> Self {
        Task {
            index,
            total,
            mission_id,
            range,
            state: AtomicU8State::new(MissionState::Waiting),
            result: AtomicU8Result::new(MissionResult::Unknown),
            bytes_downloaded: AtomicU64::new(0),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> MissionState {
        self.state.load()
    }

    pub fn result(&self) -> MissionResult {
        self.result.load()
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }

    pub fn add_bytes(&self, n: u64) -> u64 {
        self.bytes_downloaded.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn is_terminal(&self) -> bool {
        self.state() == MissionState::Done
    }

    /// Token this task's pump polls at each chunk boundary (spec §5: "every
    /// 64 KiB"). Shared with the mission so `cancel()` can flip every child.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    pub fn mark_running(&self) {
        self.state.store(MissionState::Running);
    }

    /// Monotonic: does nothing once already `done` (terminal is absorbing).
    pub fn mark_terminal(&self, result: MissionResult) {
        if self.state() == MissionState::Done {
            return;
        }
        self.result.store(result);
        self.state.store(MissionState::Done);
    }
}

impl fmt::Display for Task {
    /// Spec-mandated task identifier format: `"k/N"`, 1-based.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_range_has_no_header() {
        assert_eq!(TaskRange::Whole.range_header_value(), None);
    }

    #[test]
    fn bounded_range_header_is_inclusive_end() {
        let r = TaskRange::Bounded { start: 10, end: 20 };
        assert_eq!(r.range_header_value().as_deref(), Some("bytes=10-19"));
        assert_eq!(r.budget(), Some(10));
    }

    #[test]
    fn open_range_header_has_no_upper_bound() {
        let r = TaskRange::Open { start: 20 };
        assert_eq!(r.range_header_value().as_deref(), Some("bytes=20-"));
        assert_eq!(r.budget(), None);
    }

    #[test]
    fn task_display_is_k_of_n() {
        let t = Task::new(1, 2, 3, TaskRange::Whole);
        assert_eq!(t.to_string(), "2/3");
    }

    #[test]
    fn task_state_transitions_are_monotonic() {
        let t = Task::new(1, 1, 1, TaskRange::Whole);
        assert_eq!(t.state(), MissionState::Waiting);
        t.mark_running();
        assert_eq!(t.state(), MissionState::Running);
        t.mark_terminal(MissionResult::Success);
        assert_eq!(t.state(), MissionState::Done);
        assert_eq!(t.result(), MissionResult::Success);
        // Terminal is absorbing: a later mark_terminal is a no-op.
        t.mark_terminal(MissionResult::Failed);
        assert_eq!(t.result(), MissionResult::Success);
    }
}
