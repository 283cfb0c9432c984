//! pfsmig — layout-aware parallel file system migration.
//!
//! Usage: `pfsmig -c <config> [-n <world>]`
//!
//! The binary stands in for a multi-process launch: it runs the whole world
//! (producers, queue owners, consumers) as one thread per rank inside this
//! process. `-n` supplies the world size; without it the config must carry
//! explicit role counts, whose sum is used instead.
//!
//! Exit codes: 0 success, 1 usage error, 2 invalid configuration/topology.

use anyhow::Context;
use pfsmig::{run_world, ConfigSource, MigrateConfig, PipelineError, RankCaps, WorldReport};
use std::path::PathBuf;
use std::process::ExitCode;

struct Args {
    config_path: PathBuf,
    world: Option<usize>,
}

fn parse_args() -> Result<Args, String> {
    let mut config_path = None;
    let mut world = None;
    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "-c" => {
                let value = argv.next().ok_or("-c requires a path")?;
                config_path = Some(PathBuf::from(value));
            }
            "-n" => {
                let value = argv.next().ok_or("-n requires a number")?;
                let parsed = value
                    .parse::<usize>()
                    .map_err(|_| format!("invalid world size '{value}'"))?;
                world = Some(parsed);
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    let config_path = config_path.ok_or("missing required -c <config>")?;
    Ok(Args { config_path, world })
}

fn usage() {
    eprintln!("Usage: pfsmig -c <config> [-n <world>]");
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("pfsmig: {err}");
            usage();
            return ExitCode::from(1);
        }
    };

    // World size: launcher-style flag first, else the config's explicit
    // role counts.
    let config = MigrateConfig::load_or_default(&args.config_path);
    let world = match args.world {
        Some(world) => world,
        None => match config.explicit_roles() {
            Some((p, q, c)) => (p + q + c) as usize,
            None => {
                eprintln!("pfsmig: no -n and no explicit role counts in the config");
                usage();
                return ExitCode::from(1);
            }
        },
    };

    match run(world, config) {
        Ok(report) => {
            print_summary(&report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("pfsmig: {err:#}");
            let fatal_config = err
                .downcast_ref::<PipelineError>()
                .is_some_and(|e| matches!(e, PipelineError::Config(_) | PipelineError::Plan(_)));
            ExitCode::from(if fatal_config { 2 } else { 1 })
        }
    }
}

fn run(world: usize, config: MigrateConfig) -> anyhow::Result<WorldReport> {
    run_world(world, ConfigSource::Value(config), |_rank, _role, cfg| {
        RankCaps::local_fs(cfg)
    })
    .context("migration world failed")
}

fn print_summary(report: &WorldReport) {
    let files: u64 = report.producers.iter().map(|p| p.files_seen).sum();
    let skipped: u64 = report.producers.iter().map(|p| p.files_skipped).sum();
    println!(
        "pfsmig: {} files ({} skipped), {} tasks dispatched, {} executed, {} bytes copied",
        files,
        skipped,
        report.tasks_sent(),
        report.tasks_executed(),
        report.bytes_copied(),
    );
    if report.misrouted() > 0 {
        println!("pfsmig: WARNING {} misrouted messages", report.misrouted());
    }
}
