use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::json;

use pose_estimator_rs::recalibration::NoopRecalibrator;
use pose_estimator_rs::session::{SessionEvent, SessionLog};
use pose_estimator_rs::{FusionMode, PoseEstimator, TickOutcome};

#[derive(Parser, Debug)]
struct Args {
    /// Path to session_*.json[.gz]
    #[arg(long, conflicts_with = "session_dir")]
    session: Option<PathBuf>,

    /// Directory of recorded sessions to batch replay
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Replay with a different fusion mode than the one recorded
    #[arg(long, value_enum)]
    mode: Option<FusionMode>,

    /// Override the correction staleness window (seconds)
    #[arg(long)]
    staleness_window: Option<f64>,
}

fn run_once(path: &Path, args: &Args) -> anyhow::Result<serde_json::Value> {
    let log = SessionLog::load(path)?;

    let mut config = log.config.clone();
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(window) = args.staleness_window {
        config.staleness_window_secs = window;
    }
    config.validate()?;
    // Divergence is only meaningful when the estimator is configured as recorded
    let comparable = config == log.config;

    let mut estimator = PoseEstimator::new(config.clone(), Box::new(NoopRecalibrator));
    let mut skipped: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut ticks = 0u64;
    let mut published = 0u64;
    let mut reset_completions = 0u64;
    let mut max_divergence = 0.0_f64;
    let mut last_pose = None;

    for event in &log.events {
        match event {
            SessionEvent::Input { time, message } => {
                estimator.handle(message, *time);
            }
            SessionEvent::Start { .. } => estimator.start(),
            SessionEvent::Tick { time, pose: recorded } => {
                ticks += 1;
                match estimator.tick(*time) {
                    TickOutcome::Published { pose, .. } => {
                        published += 1;
                        if let Some(rec) = recorded.as_ref().filter(|_| comparable) {
                            let d = ((pose.x - rec.x).powi(2) + (pose.y - rec.y).powi(2)).sqrt();
                            max_divergence = max_divergence.max(d);
                        }
                        last_pose = Some(pose);
                    }
                    TickOutcome::Skipped(reason) => {
                        *skipped.entry(reason.label()).or_insert(0) += 1;
                    }
                    TickOutcome::Resetting => {}
                    TickOutcome::ResetComplete => reset_completions += 1,
                }
            }
        }
    }

    let duration_secs = match (log.events.first(), log.events.last()) {
        (Some(first), Some(last)) => last.time() - first.time(),
        _ => 0.0,
    };

    let stats = estimator.stats();
    Ok(json!({
        "session": path.display().to_string(),
        "started_at": log.started_at,
        "mode": format!("{:?}", estimator.config().mode),
        "duration_secs": duration_secs,
        "events": log.events.len(),
        "ticks": ticks,
        "published": published,
        "skipped": skipped,
        "corrections_applied": stats.corrections_applied,
        "corrections_rejected": stats.corrections_rejected,
        "max_correction_latency_secs": stats.max_correction_latency_secs,
        "resets_completed": reset_completions,
        "final_pose": last_pose,
        "max_divergence_m": if comparable { json!(max_divergence) } else { json!(null) },
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let mut results = Vec::new();

    if let Some(dir) = args.session_dir.as_ref() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !(name.starts_with("session_") && (name.ends_with(".json") || name.ends_with(".json.gz"))) {
                continue;
            }
            match run_once(&path, &args) {
                Ok(res) => results.push(res),
                Err(e) => log::error!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(session) = args.session.as_ref() {
        results.push(run_once(session, &args)?);
    } else {
        anyhow::bail!("Provide --session or --session-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
