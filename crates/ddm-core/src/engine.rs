//! Public façade (§6 "External interfaces"): the one type a caller needs
//! to submit downloads, wait on them, and read back results.
//!
//! Owns the id counter, the `id -> Mission` map, the [`Scheduler`], and
//! the shared [`HttpClient`]. Nothing outside this module constructs a
//! [`MissionDriver`] directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{self, EngineConfig};
use crate::connector::{CurlConnector, HttpClient};
use crate::downloader::{DownloadSettings, DriverContext, MissionDriver};
use crate::error::{DdmError, Result};
use crate::mission::{Mission, MissionData, MissionResult, MissionState};
use crate::observer::{EventLog, LogVerbosity};
use crate::scheduler::{Observer, Scheduler};

/// Concurrent HTTP(S) download engine: one bounded worker pool shared by
/// every mission it is asked to run.
pub struct Engine {
    next_id: AtomicU64,
    missions: Mutex<HashMap<u64, Mission>>,
    config: Mutex<EngineConfig>,
    scheduler: Arc<Scheduler>,
    driver_ctx: Arc<DriverContext>,
}

impl Engine {
    /// Builds an engine around `config`, wiring the default `curl`-backed
    /// connector and a `roads`-sized worker pool.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_client(config, Arc::new(CurlConnector::new()))
    }

    /// Same as [`Engine::new`] but with a caller-supplied [`HttpClient`] —
    /// the seam tests substitute an in-process fake through.
    pub fn with_client(config: EngineConfig, client: Arc<dyn HttpClient>) -> Self {
        let scheduler = Arc::new(Scheduler::new(config.roads));
        let driver_ctx = Arc::new(DriverContext {
            client,
            scheduler: Arc::clone(&scheduler),
        });
        Engine {
            next_id: AtomicU64::new(1),
            missions: Mutex::new(HashMap::new()),
            config: Mutex::new(config),
            scheduler,
            driver_ctx,
        }
    }

    /// Loads configuration from the XDG config file (creating a default
    /// one on first run, exactly like the teacher's `load_or_init`).
    pub fn from_disk() -> anyhow::Result<Self> {
        Ok(Self::new(config::load_or_init()?))
    }

    /// Attaches an observer (e.g. [`EventLog`]) to the scheduler's event
    /// bus. Convenience wrapper so callers don't need `ddm_core::scheduler`
    /// in scope just to wire up logging.
    pub fn attach_observer(&self, observer: Arc<dyn Observer>) {
        self.scheduler.events().attach(observer);
    }

    /// Attaches the built-in terminal-mission record sink at the given
    /// verbosity (§4.7).
    pub fn attach_event_log(&self, verbosity: LogVerbosity) {
        self.attach_observer(Arc::new(EventLog::new(verbosity)));
    }

    /// Non-blocking enqueue: validates `data`, assigns an id, and submits
    /// the mission's driver to the scheduler. Returns the handle
    /// immediately; the caller decides whether/when to wait.
    pub fn add(&self, data: MissionData) -> Result<Mission> {
        if data.url.trim().is_empty() {
            return Err(DdmError::UrlEmpty);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mission = Mission::new(id, data);
        self.missions.lock().unwrap().insert(id, mission.clone());

        let settings = self.download_settings();
        self.scheduler.submit(Box::new(MissionDriver::new(
            mission.clone(),
            settings,
            Arc::clone(&self.driver_ctx),
        )));
        Ok(mission)
    }

    /// Blocking single-file convenience: forces `allow_split = false`
    /// (§6 "`download(...)` (blocking single-file convenience with
    /// `split=false`)") and waits for the mission to finish before
    /// returning it.
    pub fn download(&self, mut data: MissionData) -> Result<Mission> {
        data.allow_split = false;
        let mission = self.add(data)?;
        mission.wait()?;
        Ok(mission)
    }

    /// Blocks on one mission (`timeout = Duration::ZERO` waits
    /// indefinitely), or on every currently-tracked mission when `mission`
    /// is `None`, in which case there is no single result to return.
    pub fn wait(&self, mission: Option<&Mission>, timeout: Duration) -> Result<Option<MissionResult>> {
        match mission {
            Some(m) => {
                let result = if timeout.is_zero() {
                    m.wait()?
                } else {
                    m.wait_timeout(Some(timeout))?
                };
                Ok(Some(result))
            }
            None => {
                let snapshot: Vec<Mission> = self.missions.lock().unwrap().values().cloned().collect();
                let finished = self
                    .scheduler
                    .wait_until(|| snapshot.iter().all(|m| m.state() == MissionState::Done), timeout);
                if !finished {
                    return Err(DdmError::ConnectError("wait timed out".to_string()));
                }
                Ok(None)
            }
        }
    }

    /// Snapshot of every tracked mission. When `keep` is `false`, missions
    /// already `Done` are dropped from the engine's internal map after the
    /// snapshot is taken, so a caller polling `show` in a loop doesn't
    /// accumulate finished missions forever.
    pub fn show(&self, keep: bool) -> Vec<Mission> {
        let mut missions = self.missions.lock().unwrap();
        let snapshot: Vec<Mission> = missions.values().cloned().collect();
        if !keep {
            missions.retain(|_, m| m.state() != MissionState::Done);
        }
        snapshot
    }

    /// Cancels every mission that hasn't reached a terminal state yet.
    pub fn cancel(&self) {
        for mission in self.missions.lock().unwrap().values() {
            mission.cancel();
        }
    }

    pub fn get_mission(&self, id: u64) -> Option<Mission> {
        self.missions.lock().unwrap().get(&id).cloned()
    }

    /// Every mission whose result is `Failed` — §7's "`getFailedMissions()`
    /// returns the list of missions whose result is `failed`".
    pub fn get_failed_missions(&self) -> Vec<Mission> {
        self.missions
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.result() == MissionResult::Failed)
            .cloned()
            .collect()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> EngineConfig {
        self.config.lock().unwrap().clone()
    }

    /// Resizes the worker pool and updates the stored config together;
    /// rejected (propagating the scheduler's busy error) while any unit is
    /// in flight.
    pub fn set_roads(&self, roads: usize) -> Result<()> {
        self.scheduler.set_roads(roads)?;
        self.config.lock().unwrap().set_roads(roads)?;
        Ok(())
    }

    /// Applies an arbitrary mutation to the stored config (e.g. several
    /// `EngineConfig` setters at once), returning whatever error the first
    /// failing setter produces.
    pub fn update_config(&self, f: impl FnOnce(&mut EngineConfig) -> Result<()>) -> Result<()> {
        let mut cfg = self.config.lock().unwrap();
        f(&mut cfg)
    }

    /// Persists the current configuration back to the XDG config file.
    pub fn save_config(&self) -> anyhow::Result<()> {
        let path = config::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.config_to_toml()?)?;
        Ok(())
    }

    /// Renders the current configuration as TOML, for callers (e.g. the
    /// CLI's `config show`) that just want to display it.
    pub fn config_to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(&self.config())?)
    }

    fn download_settings(&self) -> DownloadSettings {
        let cfg = self.config.lock().unwrap();
        DownloadSettings {
            retry: cfg.retry,
            interval: cfg.interval,
            connect_timeout: cfg.timeout,
            read_timeout: cfg.timeout,
            block_size: cfg.block_size,
            page_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectFailure, OpenStream, RequestSpec};

    /// Every attempt fails fast; good enough for tests that only assert on
    /// `Engine::add`'s synchronous return value, not on the mission ever
    /// reaching a terminal state.
    struct AlwaysFailsClient;

    impl HttpClient for AlwaysFailsClient {
        fn open(&self, _spec: &RequestSpec) -> std::result::Result<OpenStream, ConnectFailure> {
            Err(ConnectFailure::Transport("no network in tests".to_string()))
        }
    }

    #[test]
    fn add_rejects_empty_url() {
        let engine = Engine::with_client(EngineConfig::default(), Arc::new(AlwaysFailsClient));
        let data = MissionData::new("", "/tmp");
        assert!(engine.add(data).is_err());
    }

    #[test]
    fn get_mission_finds_what_was_added() {
        let engine = Engine::with_client(EngineConfig::default(), Arc::new(AlwaysFailsClient));
        let data = MissionData::new("https://example.com/a", "/tmp");
        let mission = engine.add(data).unwrap();
        assert!(engine.get_mission(mission.id()).is_some());
        assert!(engine.get_mission(mission.id() + 1000).is_none());
    }
}
