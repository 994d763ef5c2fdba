//! The "passive observer reading counters" spec.md §4.7 describes: a
//! plain stdout poller, not an event-bus subscriber. It never touches
//! `tracing` and never locks a worker — it only reads `Mission` state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ddm_core::{Engine, Mission, MissionState};

const POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Spawns a background thread that redraws a one-line-per-mission status
/// block roughly every 0.4 s. Dropping the returned handle (via
/// [`ProgressRenderer::stop`]) ends the thread and leaves the terminal on
/// a fresh line.
pub struct ProgressRenderer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressRenderer {
    pub fn spawn(engine: Arc<Engine>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let handle = std::thread::spawn(move || run(engine, stop_clone));
        ProgressRenderer {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(engine: Arc<Engine>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        let missions = engine.show(true);
        let waiting = missions
            .iter()
            .filter(|m| m.state() == MissionState::Waiting)
            .count();
        let active: Vec<&Mission> = missions
            .iter()
            .filter(|m| m.state() == MissionState::Running)
            .collect();

        if !active.is_empty() || waiting > 0 {
            print!("\rwaiting={:<3} ", waiting);
            for mission in &active {
                print!("[{}] {}  ", mission.id(), progress_repr(mission));
            }
            print!("\x1b[K");
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    println!();
}

fn progress_repr(mission: &Mission) -> String {
    let downloaded = mission.bytes_downloaded();
    match mission.total_size() {
        Some(total) if total > 0 => {
            let pct = (downloaded as f64 / total as f64 * 100.0).min(100.0);
            format!("{pct:5.1}% {}", mission.data().url)
        }
        _ => format!("{downloaded}B {}", mission.data().url),
    }
}
