use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use pose_estimator_rs::live_status::LiveStatus;
use pose_estimator_rs::publisher::{JsonLinesSink, PoseSink};
use pose_estimator_rs::recalibration::{CommandRecalibrator, NoopRecalibrator, Recalibrator};
use pose_estimator_rs::session::SessionLog;
use pose_estimator_rs::sources::{self, Clock, FlightProfile};
use pose_estimator_rs::{EstimatorConfig, FusionMode, Inbound, PoseEstimator, TickOutcome};

#[derive(Parser, Debug)]
#[command(name = "pose_estimator")]
#[command(about = "Delay-compensated pose estimator: flow odometry fused with late visual fixes", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fusion mode
    #[arg(long, value_enum)]
    mode: Option<FusionMode>,

    /// Prefix of the flight controller's streams
    #[arg(long)]
    source_prefix: Option<String>,

    /// Input source (sim, stdin); stdin feeds are timed by their velocity timestamps
    #[arg(long, default_value = "sim")]
    source: String,

    /// Simulated visual fix latency in seconds
    #[arg(long, default_value = "0.3")]
    latency: f64,

    /// Simulated reset trigger period in seconds (0 = never)
    #[arg(long, default_value = "0")]
    reset_every: f64,

    /// Command run for flat trim at startup and on every reset
    #[arg(long)]
    recalibrate_cmd: Option<String>,

    /// Record the session for the replay tool
    #[arg(long)]
    record: bool,

    /// Output directory
    #[arg(long, default_value = "pose_estimator_sessions")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => EstimatorConfig::from_json_file(path)?,
        None => EstimatorConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(prefix) = args.source_prefix.as_ref() {
        config.source_prefix = prefix.clone();
    }
    config.validate()?;

    eprintln!("[{}] Pose Estimator Starting", ts_now());
    eprintln!("  Duration: {} seconds (0=continuous)", args.duration);
    eprintln!("  Mode: {:?}", config.mode);
    eprintln!("  Inputs: {}, {}", config.odometry_channel(), config.navdata_channel());
    eprintln!(
        "  Outputs: {}, {}",
        config.mode.pose_channel(),
        config.mode.reset_complete_channel()
    );
    eprintln!("  Source: {}", args.source);
    eprintln!("  Output Dir: {}", args.output_dir.display());

    std::fs::create_dir_all(&args.output_dir)?;

    let recalibrator: Box<dyn Recalibrator> = match args.recalibrate_cmd.as_deref() {
        Some(line) => match CommandRecalibrator::from_command_line(line) {
            Some(cmd) => Box::new(cmd),
            None => anyhow::bail!("--recalibrate-cmd is empty"),
        },
        None => Box::new(NoopRecalibrator),
    };

    let (tx, mut rx) = mpsc::channel::<Inbound>(1000);
    let (_source_handle, mut clock) = match args.source.as_str() {
        "sim" => {
            let profile = FlightProfile {
                correction_latency: args.latency,
                reset_every: args.reset_every,
                ..FlightProfile::default()
            };
            let handle = tokio::spawn(sources::simulated_flight_loop(tx.clone(), profile));
            (handle, Clock::Wall)
        }
        // Piped feeds keep their own time base
        "stdin" => (tokio::spawn(sources::stdin_loop(tx.clone())), Clock::stream()),
        other => anyhow::bail!("unknown source '{}', expected sim or stdin", other),
    };
    drop(tx);

    let mut estimator = PoseEstimator::new(config.clone(), recalibrator);
    let mut sink = JsonLinesSink::new(std::io::stdout(), config.mode);
    let mut session = args
        .record
        .then(|| SessionLog::new(config.clone(), ts_now_clean()));

    let start = Utc::now();
    let mut last_status_update = Utc::now();
    let mut started = false;
    let mut inputs_open = true;

    let mut ticker = interval(Duration::from_secs_f64(config.tick_period_secs()));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    eprintln!("[{}] Waiting for {}...", ts_now(), config.odometry_channel());

    loop {
        ticker.tick().await;

        if args.duration > 0 {
            let elapsed = Utc::now().signed_duration_since(start);
            if elapsed.num_seconds() as u64 >= args.duration {
                eprintln!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
        }

        // Drain everything that arrived since the last tick
        loop {
            match rx.try_recv() {
                Ok(message) => {
                    clock.observe(&message);
                    let now = clock.now();
                    estimator.handle(&message, now);
                    if let Some(log) = session.as_mut() {
                        log.record_input(now, message);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    inputs_open = false;
                    break;
                }
            }
        }

        let now = clock.now();

        if !started {
            if !estimator.stream_active() {
                if !inputs_open {
                    eprintln!("[{}] Input closed before odometry arrived", ts_now());
                    break;
                }
                continue;
            }
            estimator.start();
            if let Some(log) = session.as_mut() {
                log.record_start(now);
            }
            started = true;
            eprintln!("[{}] Odometry active, estimator running", ts_now());
        }

        let published = match estimator.tick(now) {
            TickOutcome::Published { pose, .. } => {
                sink.publish_pose(&pose)?;
                Some(pose)
            }
            TickOutcome::ResetComplete => {
                sink.publish_reset_complete(now)?;
                None
            }
            TickOutcome::Skipped(_) | TickOutcome::Resetting => None,
        };
        if let Some(log) = session.as_mut() {
            log.record_tick(now, published);
        }

        // Update live status every 2 seconds
        let wall = Utc::now();
        if (wall.signed_duration_since(last_status_update).num_seconds() as u64) >= 2 {
            let uptime = wall.signed_duration_since(start).num_seconds().max(0) as u64;
            let status = LiveStatus::from_snapshot(&estimator.snapshot(), uptime);
            if let Err(e) = status.save(&args.output_dir.join("live_status.json")) {
                log::warn!("failed to write live status: {}", e);
            }
            last_status_update = wall;
        }

        if !inputs_open {
            eprintln!("[{}] Inputs closed, stopping...", ts_now());
            break;
        }
    }

    let uptime = Utc::now().signed_duration_since(start).num_seconds().max(0) as u64;
    let final_status = LiveStatus::from_snapshot(&estimator.snapshot(), uptime);
    final_status.save(&args.output_dir.join("live_status_final.json"))?;

    if let Some(mut log) = session {
        log.stats = estimator.stats().clone();
        let filename = args
            .output_dir
            .join(format!("session_{}.json.gz", ts_now_clean()));
        log.save(&filename)?;
        eprintln!(
            "[{}] Saved session: {} events, {} ticks to {}",
            ts_now(),
            log.events.len(),
            log.tick_count(),
            filename.display()
        );
    }

    let stats = estimator.stats();
    eprintln!("\n=== Final Stats ===");
    eprintln!("Ticks published: {}", stats.ticks_published);
    eprintln!("Ticks skipped: {}", stats.ticks_skipped);
    eprintln!("Corrections applied: {}", stats.corrections_applied);
    eprintln!("Resets completed: {}", stats.resets_completed);
    eprintln!("Max correction latency: {:.3} s", stats.max_correction_latency_secs);

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
