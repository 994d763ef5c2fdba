//! Downloader (C5): the per-mission driver. Resolves a destination,
//! decides whether to split into range [`Task`]s, and drives each task's
//! byte pump (§4.5.1) until the mission reaches a terminal state.
//!
//! [`MissionDriver`] and [`TaskPump`] are the two [`Schedulable`] units the
//! scheduler ever runs — the tagged "schedulable unit" capability §9
//! recommends in place of a Mission/Task inheritance hierarchy.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use crate::connector::{
    apply_header_defaults, open_with_retry, ConnectOutcome, HttpClient, HttpMethod, OpenStream,
    RequestSpec,
};
use crate::error::DdmError;
use crate::mission::{Body, ConflictPolicy, Mission, MissionData, MissionResult, MissionState, Task, TaskRange};
use crate::recorder::Recorder;
use crate::resolver::{self, ResolveInput};
use crate::scheduler::{EventBus, LifecycleEvent, MissionLogFields, Schedulable, Scheduler};
use crate::segmenter::plan_block_ranges;
use crate::storage::StorageWriter;

/// How long a task's pump blocks on the next chunk before re-checking its
/// cancel flag. Bounds the "poll at chunk boundary" delay §5 requires for
/// a read that never returns a chunk (the connector itself enforces the
/// hard read timeout; this is just the cancellation check cadence).
const CHUNK_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Settings a [`MissionDriver`] needs from `EngineConfig`, snapshotted per
/// mission so a running download is unaffected by a later config change.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub retry: u32,
    pub interval: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub block_size: u64,
    /// Configured page URL used to derive a default `Referer` (§4.4 step 2).
    pub page_url: Option<String>,
}

/// Shared context every driver/pump needs a handle to.
pub(crate) struct DriverContext {
    pub client: Arc<dyn HttpClient>,
    pub scheduler: Arc<Scheduler>,
}

impl DriverContext {
    fn events(&self) -> &EventBus {
        self.scheduler.events()
    }
}

/// The Mission driver: resolve -> split-decision -> spawn sub-tasks ->
/// stream task 1 inline -> hand the rest to the scheduler (§4.5).
pub struct MissionDriver {
    mission: Mission,
    settings: DownloadSettings,
    ctx: Arc<DriverContext>,
}

impl MissionDriver {
    pub fn new(mission: Mission, settings: DownloadSettings, ctx: Arc<DriverContext>) -> Self {
        MissionDriver { mission, settings, ctx }
    }
}

impl Schedulable for MissionDriver {
    fn run(self: Box<Self>) {
        run_mission(&self.mission, &self.settings, &self.ctx);
    }
}

fn run_mission(mission: &Mission, settings: &DownloadSettings, ctx: &Arc<DriverContext>) {
    // Step 1: terminal/cancelled before a slot ever freed for it.
    if mission.state() == MissionState::Done {
        return;
    }

    // Step 2.
    mission.mark_running();
    ctx.events().publish(LifecycleEvent::MissionStarted {
        mission_id: mission.id(),
        url: mission.data().url.clone(),
    });

    let data = mission.data();

    // Step 3: short-circuit skip without ever opening a connection.
    if data.conflict_policy == ConflictPolicy::Skip {
        if let Some(rename) = &data.rename {
            let candidate = data.goal_dir.join(rename);
            if candidate.exists() {
                finish_skipped(mission, ctx, candidate);
                return;
            }
        }
    }

    // Step 4: open the stream.
    let mut spec = RequestSpec::new(data.url.clone(), HttpMethod::from(data.effective_method()));
    spec.connect_timeout = data.connect_timeout.unwrap_or(settings.connect_timeout);
    spec.read_timeout = data.read_timeout.unwrap_or(settings.read_timeout);
    for (k, v) in &data.headers {
        spec.headers.insert(k.clone(), v.clone());
    }
    spec.body = body_bytes(data);
    apply_header_defaults(&mut spec, settings.page_url.as_deref());

    let outcome = open_with_retry(&*ctx.client, &spec, settings.retry + 1, settings.interval);
    let stream = match outcome {
        ConnectOutcome::Opened(stream) => stream,
        ConnectOutcome::Failed(message) => {
            // Step 5.
            finish_failed(mission, ctx, DdmError::ConnectError(message).to_string());
            return;
        }
    };

    // Step 6: resolve filename/path/size from the opened response.
    let resolved = match resolver::resolve(ResolveInput {
        url: &data.url,
        goal_dir: &data.goal_dir,
        rename: data.rename.as_deref(),
        conflict_policy: data.conflict_policy,
        content_disposition: stream.headers.content_disposition.as_deref(),
        encoding: &stream.headers.encoding,
    }) {
        Ok(r) => r,
        Err(e) => {
            stream.join();
            finish_failed(mission, ctx, e.to_string());
            return;
        }
    };

    if let Some(size) = stream.headers.content_length {
        mission.set_total_size(size);
    }
    mission.set_resolved_path(resolved.path.clone());

    // Step 7: the resolver itself decided to skip (destination already
    // existed under the response-driven `skip` policy).
    if resolved.skip {
        stream.join();
        finish_skipped(mission, ctx, resolved.path);
        return;
    }

    let initial_len = fs::metadata(&resolved.path).map(|m| m.len()).unwrap_or(0);
    let writer = match StorageWriter::open_existing(&resolved.path) {
        Ok(w) => w,
        Err(e) => {
            stream.join();
            finish_failed(
                mission,
                ctx,
                DdmError::FileSystemError {
                    path: resolved.path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                }
                .to_string(),
            );
            return;
        }
    };
    if let Some(size) = mission.total_size() {
        let _ = writer.preallocate(initial_len.max(size));
    }
    let recorder = Arc::new(Recorder::new(writer, initial_len));

    // Step 8: split decision.
    let can_split = data.allow_split
        && stream.headers.accept_ranges
        && mission
            .total_size()
            .map(|size| size > settings.block_size)
            .unwrap_or(false);

    let ranges = if can_split {
        plan_block_ranges(mission.total_size().unwrap(), settings.block_size)
    } else {
        vec![TaskRange::Whole]
    };
    let total = ranges.len();
    let tasks: Vec<Arc<Task>> = ranges
        .into_iter()
        .enumerate()
        .map(|(i, r)| Arc::new(Task::new(mission.id(), i + 1, total, r)))
        .collect();
    mission.set_tasks(tasks.clone());

    let pump_ctx = Arc::new(PumpContext {
        mission: mission.clone(),
        recorder,
        ctx: Arc::clone(ctx),
        settings: settings.clone(),
        spec_template: spec,
    });

    let mut tasks = tasks.into_iter();
    if let Some(first) = tasks.next() {
        // Task 1 runs inline, holding the mission driver's slot, per §4.6:
        // "The parent Mission's driver holds a slot while its chunk-0
        // Task runs."
        run_task(first, &pump_ctx, Some(stream));
    }
    for task in tasks {
        ctx.scheduler.submit(Box::new(TaskPump {
            task,
            pump: Arc::clone(&pump_ctx),
        }));
    }
}

fn body_bytes(data: &MissionData) -> Option<Vec<u8>> {
    match &data.body {
        Some(Body::Json(value)) => serde_json::to_vec(value).ok(),
        Some(Body::Form(fields)) => Some(
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields.iter())
                .finish()
                .into_bytes(),
        ),
        None => None,
    }
}

fn finish_skipped(mission: &Mission, ctx: &Arc<DriverContext>, path: PathBuf) {
    mission.mark_terminal(MissionResult::Skipped, None);
    ctx.events().publish(LifecycleEvent::MissionSkipped {
        mission_id: mission.id(),
        fields: MissionLogFields::from_data(mission.data()),
        path,
    });
}

fn finish_failed(mission: &Mission, ctx: &Arc<DriverContext>, error: String) {
    delete_backing_file(mission);
    mission.mark_terminal(MissionResult::Failed, Some(error.clone()));
    ctx.events().publish(LifecycleEvent::MissionFailed {
        mission_id: mission.id(),
        fields: MissionLogFields::from_data(mission.data()),
        error,
    });
}

fn delete_backing_file(mission: &Mission) {
    if let Some(path) = mission.resolved_path() {
        let _ = fs::remove_file(path);
    }
}

/// Context shared by a mission's task-1 inline pump and every sibling
/// [`TaskPump`] the scheduler runs for it.
struct PumpContext {
    mission: Mission,
    recorder: Arc<Recorder>,
    ctx: Arc<DriverContext>,
    settings: DownloadSettings,
    /// Base request (URL, headers, body, timeouts) shared by every sibling
    /// task; each clones it and adds its own `Range` header.
    spec_template: RequestSpec,
}

/// A sub-range task the scheduler runs once a slot is free. Issues its
/// own ranged request through C4 (§4.5.1's "sibling tasks issue their own
/// requests").
struct TaskPump {
    task: Arc<Task>,
    pump: Arc<PumpContext>,
}

impl Schedulable for TaskPump {
    fn run(self: Box<Self>) {
        run_task(self.task, &self.pump, None);
    }
}

/// Runs one task to completion: open its stream (or reuse `opened` for
/// task 1), pump bytes into the recorder, finalize its result, and drive
/// the mission aggregator.
fn run_task(task: Arc<Task>, pump: &Arc<PumpContext>, opened: Option<OpenStream>) {
    task.mark_running();
    pump.ctx.events().publish(LifecycleEvent::TaskStarted {
        mission_id: pump.mission.id(),
        task: task.to_string(),
    });

    let stream = match opened {
        Some(stream) => stream,
        None => {
            let mut spec = pump.spec_template.clone();
            if let Some(range_header) = task.range.range_header_value() {
                spec = spec.with_range(&range_header);
            }
            match open_with_retry(
                &*pump.ctx.client,
                &spec,
                pump.settings.retry + 1,
                pump.settings.interval,
            ) {
                ConnectOutcome::Opened(stream) => stream,
                ConnectOutcome::Failed(_message) => {
                    task.mark_terminal(MissionResult::Failed);
                    finish_task(&task, pump);
                    return;
                }
            }
        }
    };

    pump_bytes(&task, &stream, &pump.recorder);
    stream.join();

    // `pump_bytes` only marks the task terminal on cancellation or a
    // stream error; a normal EOF (or budget reached) falls through here.
    if task.state() != MissionState::Done {
        let budget = task.range.budget();
        let result = match budget {
            Some(budget) if task.bytes_downloaded() < budget => MissionResult::Failed,
            _ => MissionResult::Success,
        };
        task.mark_terminal(result);
    }

    finish_task(&task, pump);
}

fn finish_task(task: &Arc<Task>, pump: &Arc<PumpContext>) {
    pump.ctx.events().publish(LifecycleEvent::TaskFinished {
        mission_id: pump.mission.id(),
        task: task.to_string(),
        result: task.result(),
    });

    // A task failure drives the mission to `failed` immediately and
    // cancels siblings rather than waiting for them to finish naturally
    // (§4.3's "A task failure immediately drives the mission to failed
    // and broadcasts cancel to siblings").
    if task.result() == MissionResult::Failed && !pump.mission.is_cancel_requested() {
        pump.mission.abort_siblings();
    }

    aggregate(pump);
}

/// Reads chunks from `stream` in ~64 KiB increments, writing each one to
/// the shared recorder at the task's next offset, until the stream ends,
/// the task's byte budget (if any) is satisfied, or the task's cancel
/// flag is observed (§4.5.1, §5).
fn pump_bytes(task: &Arc<Task>, stream: &OpenStream, recorder: &Recorder) {
    let cancel = task.cancel_token();
    let budget = task.range.budget();
    let start = task.range.start_offset();

    loop {
        if cancel.load(Ordering::Relaxed) {
            task.mark_terminal(MissionResult::Canceled);
            return;
        }

        match stream.chunks.recv_timeout(CHUNK_POLL_INTERVAL) {
            Ok(Ok(mut chunk)) => {
                if chunk.is_empty() {
                    // Tolerate zero-length chunks (§9).
                    continue;
                }
                if let Some(budget) = budget {
                    let remaining = budget.saturating_sub(task.bytes_downloaded());
                    if remaining == 0 {
                        break;
                    }
                    if chunk.len() as u64 > remaining {
                        chunk.truncate(remaining as usize);
                    }
                }
                let offset = match task.range {
                    TaskRange::Whole => None,
                    _ => Some(start + task.bytes_downloaded()),
                };
                if recorder.add(&chunk, offset).is_err() {
                    task.mark_terminal(MissionResult::Failed);
                    return;
                }
                task.add_bytes(chunk.len() as u64);
                if let Some(budget) = budget {
                    if task.bytes_downloaded() >= budget {
                        break;
                    }
                }
            }
            Ok(Err(_io_error)) => {
                task.mark_terminal(MissionResult::Failed);
                return;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Evaluates §4.3's aggregation rule once every task belonging to
/// `pump.mission` is terminal: success (with a size check), failure
/// (deleting the file and keeping `is_cancel_requested` separate from an
/// ordinary task failure), or explicit cancellation.
///
/// §5's "all tasks done" condition must be evaluated exactly once per
/// mission even though every sibling task's completion calls in here
/// concurrently. `try_begin_aggregate` is the completed-count-under-a-
/// mutex the spec asks for, expressed as a single compare-exchange on the
/// mission: only the thread that flips it runs the body below, so a
/// duplicate terminal event or a second `recorder.flush()` against an
/// already-finished mission can't happen.
fn aggregate(pump: &Arc<PumpContext>) {
    let mission = &pump.mission;
    if !mission.all_tasks_terminal() {
        return;
    }
    if !mission.try_begin_aggregate() {
        return;
    }

    let fields = MissionLogFields::from_data(mission.data());

    if mission.is_cancel_requested() {
        pump.recorder.clear();
        delete_backing_file(mission);
        mission.mark_terminal(MissionResult::Canceled, None);
        pump.ctx.events().publish(LifecycleEvent::MissionCanceled {
            mission_id: mission.id(),
            fields,
        });
        return;
    }

    if mission.any_task_failed() {
        pump.recorder.clear();
        delete_backing_file(mission);
        let error = "one or more tasks failed".to_string();
        mission.mark_terminal(MissionResult::Failed, Some(error.clone()));
        pump.ctx.events().publish(LifecycleEvent::MissionFailed {
            mission_id: mission.id(),
            fields,
            error,
        });
        return;
    }

    if let Some(expected) = mission.total_size() {
        // Compare against bytes actually streamed into the recorder, not
        // `fs::metadata` — the backing file is preallocated to `expected`
        // up front (§4.1 step 5 / `set_len` above) so its on-disk length
        // alone can't distinguish a complete download from a truncated one.
        let actual = mission.bytes_downloaded();
        if actual != expected {
            pump.recorder.clear();
            delete_backing_file(mission);
            let error = DdmError::SizeMismatch { expected, actual }.to_string();
            mission.mark_terminal(MissionResult::Failed, Some(error.clone()));
            pump.ctx.events().publish(LifecycleEvent::MissionFailed {
                mission_id: mission.id(),
                fields,
                error,
            });
            return;
        }
    }

    let _ = pump.recorder.flush();
    let bytes = mission.bytes_downloaded();
    let path = mission.resolved_path().unwrap_or_default();
    mission.mark_terminal(MissionResult::Success, None);
    pump.ctx.events().publish(LifecycleEvent::MissionSucceeded {
        mission_id: mission.id(),
        fields,
        path,
        bytes,
    });
}
