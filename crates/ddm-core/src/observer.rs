//! Observers (C7): consumers of the scheduler's lifecycle event bus.
//!
//! `EventLog` is the only observer built into the engine itself — a
//! terminal-mission record sink with a configurable verbosity. The
//! progress renderer spec.md §4.7 also names ("polls every slot at ~0.4s
//! and prints waiting count plus per-slot progress") is a read-only
//! counter poller, not an event subscriber; it lives in `ddm-cli` instead,
//! reading `Mission`/`Scheduler` state directly rather than through this
//! bus (SPEC_FULL §4.7).

use crate::scheduler::{LifecycleEvent, Observer};

/// How chatty the terminal-mission record sink is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogVerbosity {
    /// Log every terminal mission (success, skip, cancel, failure).
    All,
    /// Log only missions that end `Failed`.
    FailedOnly,
    /// Attach no event log at all.
    None,
}

/// Writes one structured record per terminal mission, per §4.7's "on each
/// terminal Mission, writes `{url, path, rename, body, options}`".
///
/// Routed through `tracing` under `target: "ddm_core::event_log"` rather
/// than a bespoke file format — the engine's one log sink
/// ([`crate::logging::init_logging`]) and its `EnvFilter` already govern
/// this, so there is no second file or second verbosity knob to wire up.
pub struct EventLog {
    verbosity: LogVerbosity,
}

impl EventLog {
    pub fn new(verbosity: LogVerbosity) -> Self {
        EventLog { verbosity }
    }
}

impl Observer for EventLog {
    fn on_event(&self, event: &LifecycleEvent) {
        if self.verbosity == LogVerbosity::None {
            return;
        }
        match event {
            LifecycleEvent::MissionSucceeded {
                mission_id,
                fields,
                path,
                bytes,
            } => {
                if self.verbosity == LogVerbosity::All {
                    tracing::info!(
                        target: "ddm_core::event_log",
                        mission_id,
                        url = %fields.url,
                        goal_path = %fields.goal_path.display(),
                        rename = fields.rename.as_deref().unwrap_or(""),
                        body = fields.body.unwrap_or(""),
                        options = %fields.options,
                        path = %path.display(),
                        bytes,
                        result = "success",
                        "mission finished"
                    );
                }
            }
            LifecycleEvent::MissionSkipped {
                mission_id,
                fields,
                path,
            } => {
                if self.verbosity == LogVerbosity::All {
                    tracing::info!(
                        target: "ddm_core::event_log",
                        mission_id,
                        url = %fields.url,
                        goal_path = %fields.goal_path.display(),
                        rename = fields.rename.as_deref().unwrap_or(""),
                        body = fields.body.unwrap_or(""),
                        options = %fields.options,
                        path = %path.display(),
                        result = "skipped",
                        "mission finished"
                    );
                }
            }
            LifecycleEvent::MissionCanceled { mission_id, fields } => {
                if self.verbosity == LogVerbosity::All {
                    tracing::info!(
                        target: "ddm_core::event_log",
                        mission_id,
                        url = %fields.url,
                        goal_path = %fields.goal_path.display(),
                        rename = fields.rename.as_deref().unwrap_or(""),
                        body = fields.body.unwrap_or(""),
                        options = %fields.options,
                        result = "canceled",
                        "mission finished"
                    );
                }
            }
            LifecycleEvent::MissionFailed {
                mission_id,
                fields,
                error,
            } => {
                // `failed-only` verbosity still logs failures.
                tracing::warn!(
                    target: "ddm_core::event_log",
                    mission_id,
                    url = %fields.url,
                    goal_path = %fields.goal_path.display(),
                    rename = fields.rename.as_deref().unwrap_or(""),
                    body = fields.body.unwrap_or(""),
                    options = %fields.options,
                    error,
                    result = "failed",
                    "mission finished"
                );
            }
            LifecycleEvent::MissionStarted { .. }
            | LifecycleEvent::TaskStarted { .. }
            | LifecycleEvent::TaskFinished { .. } => {
                // Per-task chatter is not a "terminal mission" record;
                // `all` still surfaces it at debug level for troubleshooting.
                if self.verbosity == LogVerbosity::All {
                    tracing::debug!(target: "ddm_core::event_log", ?event, "lifecycle event");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::MissionData;
    use crate::scheduler::MissionLogFields;
    use std::path::PathBuf;

    fn sample_fields() -> MissionLogFields {
        MissionLogFields::from_data(&MissionData::new("https://example.com/a", "/tmp"))
    }

    #[test]
    fn none_verbosity_ignores_everything() {
        let log = EventLog::new(LogVerbosity::None);
        log.on_event(&LifecycleEvent::MissionFailed {
            mission_id: 1,
            fields: sample_fields(),
            error: "boom".to_string(),
        });
    }

    #[test]
    fn failed_only_still_reports_failures() {
        let log = EventLog::new(LogVerbosity::FailedOnly);
        log.on_event(&LifecycleEvent::MissionFailed {
            mission_id: 1,
            fields: sample_fields(),
            error: "boom".to_string(),
        });
        log.on_event(&LifecycleEvent::MissionSucceeded {
            mission_id: 2,
            fields: sample_fields(),
            path: PathBuf::from("/tmp/a"),
            bytes: 10,
        });
    }
}
