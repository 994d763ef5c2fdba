//! Integration test: local HTTP server with Range support, driven through
//! the real [`Engine`] + [`CurlConnector`] stack end to end.
//!
//! Starts a minimal range-capable server, submits a mission, waits for it
//! on the scheduler, and asserts the downloaded file matches the served
//! body byte-for-byte.

mod common;

use ddm_core::config::EngineConfig;
use ddm_core::connector::CurlConnector;
use ddm_core::mission::MissionData;
use ddm_core::{Engine, MissionResult};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn engine_with(roads: usize, block_size: u64) -> Engine {
    let mut cfg = EngineConfig::default();
    let _ = cfg.set_roads(roads);
    cfg.block_size = block_size;
    cfg.retry = 1;
    cfg.interval = Duration::from_millis(10);
    Engine::with_client(cfg, Arc::new(CurlConnector::new()))
}

#[test]
fn multi_segment_download_completes_and_file_matches() {
    let body: Vec<u8> = (0u8..100).cycle().take(64 * 1024).collect();
    let base_url = common::range_server::start(body.clone());
    let download_dir = tempdir().unwrap();

    // `Engine::download` forces `allow_split = false` (§6), so use `add` +
    // `wait` directly to exercise the split path this test is about.
    let engine = engine_with(4, 8 * 1024);
    let data = MissionData::new(format!("{base_url}file.bin"), download_dir.path());
    let mission = engine.add(data).unwrap();
    mission.wait().unwrap();

    assert_eq!(mission.result(), MissionResult::Success);
    assert!(mission.tasks().len() > 1, "expected a split download");
    let path = mission.resolved_path().expect("resolved path");
    let content = std::fs::read(&path).unwrap();
    assert_eq!(content.len(), body.len());
    assert_eq!(content, body);
}

#[test]
fn head_blocked_falls_back_to_single_stream_get() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let base_url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: false,
            support_ranges: true,
            advertise_ranges: true,
        },
    );
    let download_dir = tempdir().unwrap();

    // No leading HEAD probe in this engine (§4.5: the GET itself carries
    // the headers), so a server that refuses HEAD never matters here —
    // this exercises the same "small split-ineligible download" path as
    // the no-range case below, just against a HEAD-hostile server.
    let engine = engine_with(2, 4 * 1024);
    let data = MissionData::new(format!("{base_url}a"), download_dir.path());
    let mission = engine.download(data).unwrap();

    assert_eq!(mission.result(), MissionResult::Success);
    let path = mission.resolved_path().expect("resolved path");
    assert_eq!(std::fs::read(&path).unwrap(), body);
}

#[test]
fn no_range_support_falls_back_to_single_whole_task() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let base_url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: true,
            support_ranges: false,
            advertise_ranges: false,
        },
    );
    let download_dir = tempdir().unwrap();

    let engine = engine_with(4, 1024);
    let data = MissionData::new(format!("{base_url}b"), download_dir.path())
        .with_allow_split(true);
    let mission = engine.add(data).unwrap();
    mission.wait().unwrap();

    assert_eq!(mission.result(), MissionResult::Success);
    assert_eq!(mission.tasks().len(), 1, "split must be disabled without Accept-Ranges");
    let path = mission.resolved_path().expect("resolved path");
    assert_eq!(std::fs::read(&path).unwrap(), body);
}

#[test]
fn concurrent_rename_missions_resolve_to_distinct_files() {
    let body = b"same url, same dir, two missions".to_vec();
    let base_url = common::range_server::start(body.clone());
    let download_dir = tempdir().unwrap();

    let engine = engine_with(4, 1024 * 1024);
    let first = engine
        .download(MissionData::new(format!("{base_url}dup.bin"), download_dir.path()))
        .unwrap();
    let second = engine
        .download(MissionData::new(format!("{base_url}dup.bin"), download_dir.path()))
        .unwrap();

    assert_eq!(first.result(), MissionResult::Success);
    assert_eq!(second.result(), MissionResult::Success);
    let p1 = first.resolved_path().unwrap();
    let p2 = second.resolved_path().unwrap();
    assert_ne!(p1, p2);
    assert_eq!(std::fs::read(p1).unwrap(), body);
    assert_eq!(std::fs::read(p2).unwrap(), body);
}
