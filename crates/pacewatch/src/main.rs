//! pacewatch - frame-pacing capture CLI
//!
//! Subcommands:
//! - `pacewatch capture <process>` - run the probe, capture a process, print its report
//! - `pacewatch analyze <file>` - per-process reports from a recorded probe log
//! - `pacewatch config` - show the effective configuration and where it came from

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use paceconf::PaceConfig;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use pacewatch::capture::{
    sessions_from_log, CaptureOptions, CaptureOrchestrator, CaptureSettings, CaptureStatus, MemorySink,
    NoOverlay, ReportSink, Session, SessionReport,
};
use pacewatch::probe::{ProbeService, ProbeSettings, ProcessSource};
use pacewatch::{
    telemetry, FrametimeStatistics, Metric, OnlineMetricState, ProbeSchema, StatisticsOptions,
};

const LIVE_SUMMARY_EVERY: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "pacewatch")]
#[command(about = "Frame-pacing capture and frame-time statistics")]
#[command(version)]
struct Cli {
    /// Config file replacing ./pacewatch.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture one process and print its report
    Capture {
        /// Process name without the .exe suffix
        process: String,

        /// Pick this pid when several processes share the name
        #[arg(long)]
        pid: Option<u32>,

        /// Capture length in seconds (0 runs until Ctrl-C)
        #[arg(short, long, default_value = "0")]
        duration: f64,

        /// Delay before the capture starts, in seconds
        #[arg(long, default_value = "0")]
        delay: f64,

        /// Seconds of pre-capture history to include
        #[arg(long, default_value = "0")]
        backfill: f64,

        /// How long to wait for the process to show up, in seconds
        #[arg(long, default_value = "30")]
        wait: u64,

        /// Free-form note stored with the session
        #[arg(long)]
        comment: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Also write each report to the state directory
        #[arg(long)]
        save: bool,
    },

    /// Analyze a recorded probe log
    Analyze {
        /// Probe CSV output
        file: PathBuf,

        /// Only report this process
        #[arg(short, long)]
        process: Option<String>,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, sources) = PaceConfig::load_with_sources_from(cli.config.as_deref())?;
    telemetry::init(&config.telemetry.log_level)?;

    match cli.command {
        Commands::Capture {
            process,
            pid,
            duration,
            delay,
            backfill,
            wait,
            comment,
            json,
            save,
        } => {
            let mut options = CaptureOptions::new(process, pid.unwrap_or_default())
                .with_duration(duration)
                .with_delay(delay)
                .with_backfill(backfill);
            options.comment = comment;
            let output = Output { json, save };
            capture(&config, options, pid.is_some(), Duration::from_secs(wait), output).await?;
        }
        Commands::Analyze {
            file,
            process,
            json,
        } => {
            analyze(&config, &file, process.as_deref(), json).await?;
        }
        Commands::Config => {
            for file in &sources.files {
                println!("# loaded: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {}", var);
            }
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

struct Output {
    json: bool,
    save: bool,
}

fn statistics(config: &PaceConfig) -> Result<FrametimeStatistics> {
    let options = StatisticsOptions::try_from(&config.statistics)
        .context("invalid [statistics] section")?;
    Ok(FrametimeStatistics::new(options))
}

fn print_reports(sessions: &[Session], stats: &FrametimeStatistics, json: bool) -> Result<()> {
    let reports: Vec<SessionReport> = sessions
        .iter()
        .map(|s| SessionReport::build(s, stats))
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", report.render());
        }
    }
    Ok(())
}

async fn capture(
    config: &PaceConfig,
    mut options: CaptureOptions,
    pid_given: bool,
    wait: Duration,
    output: Output,
) -> Result<()> {
    let stats = statistics(config)?;
    let probe = Arc::new(ProbeService::new(
        Arc::new(ProcessSource::from(&config.probe)),
        ProbeSettings::from(&config.probe),
    ));
    probe.start().await?;

    let online = Arc::new(OnlineMetricState::new(
        stats.clone(),
        config.statistics.live_window_secs,
    ));
    let memory = Arc::new(MemorySink::new());
    let sink = Arc::new(ReportSink::new(stats.clone(), memory.clone()));
    let orchestrator = CaptureOrchestrator::new(
        probe.clone(),
        online,
        sink,
        Arc::new(NoOverlay),
        CaptureSettings::from(&config.capture),
    );
    if options.backfill_seconds > 0.0 {
        orchestrator.start_fill_archive().await;
    }

    let name = options.target.process_name.clone();
    info!("waiting for {} to present frames", name);
    let processes = probe.processes();
    let found = tokio::time::timeout(wait, async {
        loop {
            let hit = if pid_given {
                processes
                    .contains(&name, options.target.pid)
                    .then_some(options.target.pid)
            } else {
                processes.find_by_name(&name)
            };
            if let Some(pid) = hit {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
    .await;
    let Ok(pid) = found else {
        probe.stop().await;
        bail!("{} did not present any frames within {:?}", name, wait);
    };
    options.target.pid = pid;
    let timed = options.is_timed();

    let status = orchestrator.status_stream();
    tokio::pin!(status);
    orchestrator.start_capture(options).await?;
    if timed {
        let finished = async {
            while let Some(update) = status.next().await {
                if matches!(update.status, CaptureStatus::Stopped | CaptureStatus::Error) {
                    break;
                }
            }
        };
        tokio::select! {
            _ = finished => {}
            _ = tokio::signal::ctrl_c() => {
                orchestrator.stop_if_capturing().await?;
            }
        }
    } else {
        info!("capturing, press Ctrl-C to stop");
        let mut live = tokio::time::interval(LIVE_SUMMARY_EVERY);
        live.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        live.tick().await;
        loop {
            tokio::select! {
                _ = live.tick() => {
                    info!("live: {}", orchestrator.live_summary(Metric::P1, Metric::P0Dot2));
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        orchestrator.stop_if_capturing().await?;
    }

    orchestrator.stop_fill_archive().await;
    probe.stop().await;
    info!(health = %probe.health().summary(), "probe stopped");

    let sessions = memory.sessions();
    if sessions.is_empty() {
        warn!("capture produced no frames");
    }
    if output.save {
        save_reports(&config.paths.state_dir, &sessions, &stats).await?;
    }
    print_reports(&sessions, &stats, output.json)
}

async fn save_reports(dir: &Path, sessions: &[Session], stats: &FrametimeStatistics) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    for session in sessions {
        let report = SessionReport::build(session, stats);
        let path = dir.join(format!("{}.json", session.id));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&report)?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("report saved to {}", path.display());
    }
    Ok(())
}

async fn analyze(config: &PaceConfig, file: &Path, process: Option<&str>, json: bool) -> Result<()> {
    let stats = statistics(config)?;
    let log = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let replay = sessions_from_log(&log, ProbeSchema::presentmon(config.probe.pc_latency));
    if replay.skipped > 0 {
        info!("skipped {} unparseable lines", replay.skipped);
    }
    let sessions: Vec<Session> = replay
        .sessions
        .into_iter()
        .filter(|s| process.map_or(true, |p| s.process_name.eq_ignore_ascii_case(p)))
        .collect();
    print_reports(&sessions, &stats, json)
}
