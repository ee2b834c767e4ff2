mod summary;

use chrono::Utc;
use std::path::PathBuf;
use summary::{fault_message, DiffSummary};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use window_delta_common::config::{Config, WatchConfig};
use window_delta_detector::{Detector, FrameSource, HttpSnapshotSource};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        bridge = config.source.base_url,
        window = %config.source.window,
        format = %config.source.pixel_format,
        sample_interval_ms = config.detector.sample_interval_ms,
        warmup_frames = config.detector.warmup_frames,
        poll_interval_ms = config.watch.poll_interval_ms,
        "starting window-delta watcher"
    );

    let source = match HttpSnapshotSource::from_config(&config.source) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create capture client");
            std::process::exit(1);
        }
    };

    let detector = match Detector::open(
        source,
        config.source.window,
        config.source.pixel_format,
        &config.detector,
    )
    .await
    {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "{}", fault_message(&e));
            std::process::exit(1);
        }
    };

    info!(
        width = detector.width(),
        height = detector.height(),
        stride = detector.stride(),
        "watching window"
    );

    if let Err(e) = detector.start() {
        error!(error = %e, "{}", fault_message(&e));
        std::process::exit(1);
    }

    let code = run_watch_loop(&detector, &config.watch).await;
    std::process::exit(code);
}

/// Poll the detector until Ctrl-C or a fault. Returns the process exit code.
async fn run_watch_loop<S: FrameSource>(detector: &Detector<S>, config: &WatchConfig) -> i32 {
    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut polls: u64 = 0;
    let mut last_changed: Option<bool> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(polls, "interrupted, stopping detector");
                return match detector.stop() {
                    Ok(()) => 0,
                    Err(e) => {
                        error!(error = %e, "{}", fault_message(&e));
                        1
                    }
                };
            }
            _ = ticker.tick() => {}
        }
        polls += 1;

        let diff = match detector.latest_diff() {
            Ok(Some(d)) => d,
            Ok(None) => {
                if polls % config.report_every == 0 {
                    debug!(
                        captured = detector.captured_frames(),
                        warmup = detector.warmup_frames(),
                        "waiting for first diff"
                    );
                }
                continue;
            }
            Err(e) => {
                error!(error = %e, "{}", fault_message(&e));
                return 1;
            }
        };

        let summary = DiffSummary::compute(diff.data(), detector.stride(), config.change_threshold);
        let changed = summary.is_changed();
        if last_changed != Some(changed) || polls % config.report_every == 0 {
            info!(
                changed,
                changed_bytes = summary.changed_bytes,
                ratio = format!("{:.4}", summary.changed_ratio()),
                max_delta = summary.max_delta,
                mean_delta = format!("{:.2}", summary.mean_delta),
                rows = ?summary.changed_rows,
                lag_ms = (Utc::now() - diff.captured_at()).num_milliseconds(),
                "window diff"
            );
        }
        last_changed = Some(changed);
    }
}
