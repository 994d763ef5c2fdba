mod cli;
mod progress;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use cli::{Cli, Command};
use ddm_core::{Engine, MissionData};

fn main() -> ExitCode {
    if ddm_core::logging::init_logging().is_err() {
        ddm_core::logging::init_logging_stderr();
    }

    let cli = Cli::parse();
    let engine = match Engine::from_disk() {
        Ok(engine) => engine,
        Err(err) => {
            tracing::warn!(error = %err, "falling back to default configuration");
            Engine::new(ddm_core::config::EngineConfig::default())
        }
    };

    if let Some(command) = &cli.command {
        return run_command(&engine, command);
    }

    if cli.urls.is_empty() {
        eprintln!("ddm: no URLs given (use `ddm --help`)");
        return ExitCode::FAILURE;
    }

    if cli.rename.is_some() && cli.urls.len() > 1 {
        eprintln!("ddm: --rename only makes sense with a single URL");
        return ExitCode::FAILURE;
    }

    if let Err(err) = apply_overrides(&engine, &cli) {
        eprintln!("ddm: {err}");
        return ExitCode::FAILURE;
    }

    engine.attach_event_log(cli.verbosity.into());

    let engine = Arc::new(engine);
    let renderer = if cli.quiet {
        None
    } else {
        Some(progress::ProgressRenderer::spawn(Arc::clone(&engine)))
    };

    let mut missions = Vec::with_capacity(cli.urls.len());
    for url in &cli.urls {
        let mut data = MissionData::new(url.clone(), cli.dir.clone().unwrap_or_else(|| engine.config().goal_path))
            .with_conflict_policy(cli.on_conflict.into())
            .with_allow_split(!cli.no_split);
        if let Some(rename) = &cli.rename {
            data = data.with_rename(rename.clone());
        }
        for (key, value) in &cli.headers {
            data = data.with_header(key.clone(), value.clone());
        }
        match engine.add(data) {
            Ok(mission) => missions.push(mission),
            Err(err) => eprintln!("ddm: {url}: {err}"),
        }
    }

    let _ = engine.wait(None, Duration::ZERO);
    if let Some(renderer) = renderer {
        renderer.stop();
    }

    let mut failed = 0;
    for mission in &missions {
        match mission.result() {
            ddm_core::MissionResult::Success => {
                if let Some(path) = mission.resolved_path() {
                    println!("{}  ->  {}", mission.data().url, path.display());
                }
            }
            ddm_core::MissionResult::Skipped => {
                println!("{}  skipped", mission.data().url);
            }
            ddm_core::MissionResult::Canceled => {
                println!("{}  canceled", mission.data().url);
                failed += 1;
            }
            ddm_core::MissionResult::Failed | ddm_core::MissionResult::Unknown => {
                let reason = mission.error().unwrap_or_else(|| "unknown error".to_string());
                eprintln!("{}  failed: {reason}", mission.data().url);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn apply_overrides(engine: &Engine, cli: &Cli) -> ddm_core::Result<()> {
    engine.update_config(|cfg| {
        if let Some(retry) = cli.retry {
            cfg.set_retry(retry)?;
        }
        if let Some(interval) = cli.interval {
            cfg.set_interval(interval)?;
        }
        if let Some(timeout) = cli.timeout {
            cfg.set_timeout(timeout)?;
        }
        if let Some(block_size) = &cli.block_size {
            cfg.set_block_size(block_size)?;
        }
        Ok(())
    })?;
    if let Some(roads) = cli.roads {
        engine.set_roads(roads)?;
    }
    Ok(())
}

fn run_command(engine: &Engine, command: &Command) -> ExitCode {
    match command {
        Command::ConfigShow => match engine.config_to_toml() {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("ddm: {err}");
                ExitCode::FAILURE
            }
        },
        Command::ConfigInit => match engine.save_config() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("ddm: {err}");
                ExitCode::FAILURE
            }
        },
    }
}
