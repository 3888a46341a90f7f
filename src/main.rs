// src/main.rs

mod arbiter;
mod camera;
mod config;
mod control;
mod inference;
mod metrics;
mod overlay;
mod perception;
mod runtime;
mod types;

use anyhow::{Context, Result};
use arbiter::CommandArbiter;
use control::ApproachStateMachine;
use inference::OnnxDetector;
use metrics::RuntimeMetrics;
use perception::PerceptionGate;
use runtime::{
    actuator_loop, ApproachNode, CameraFrame, EpisodeStart, PerceptionNode, TimedDetections,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::Config;
use walkdir::WalkDir;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🛻 duckie courier starting (config: {config_path})");

    let metrics = RuntimeMetrics::new();

    // Perception side.
    let gate = PerceptionGate::new(config.perception.clone(), config.model.image_size);
    let latch = gate.latch();
    let detector = Box::new(OnnxDetector::new(&config.model)?);
    let perception = PerceptionNode::new(
        gate,
        detector,
        config.model.image_size,
        config.perception.save_annotated,
        config.replay.output_dir.clone(),
        metrics.clone(),
    );

    // Control side.
    let machine = ApproachStateMachine::new(config.control.clone());
    let arbiter = CommandArbiter::new(latch);
    let approach = ApproachNode::new(machine, arbiter, config.control.min_delta_t, metrics.clone());

    let (camera_tx, camera_rx) = mpsc::channel::<CameraFrame>(8);
    let (episode_tx, episode_rx) = mpsc::channel::<EpisodeStart>(4);
    let (detection_tx, detection_rx) = mpsc::channel::<TimedDetections>(32);
    let (command_tx, command_rx) = mpsc::channel(32);

    let actuator = tokio::spawn(actuator_loop(command_rx));
    let perception_task = tokio::spawn(perception.run(camera_rx, episode_rx, command_tx.clone()));
    let approach_task = tokio::spawn(approach.run(detection_rx, command_tx.clone()));

    // Every run opens with a fresh episode and a standstill.
    episode_tx.send(EpisodeStart { timestamp: 0.0 }).await.ok();

    let camera_feed = tokio::spawn(feed_camera_frames(
        config.replay.image_dir.clone(),
        config.replay.frame_rate,
        camera_tx,
    ));
    let detection_feed = tokio::spawn(feed_detection_frames(
        config.replay.detections_file.clone(),
        config.replay.frame_rate,
        detection_tx,
    ));

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let loops = tokio::spawn(async move {
        let _ = perception_task.await;
        let _ = approach_task.await;
        let _ = done_tx.send(());
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            // Dropping the feeders closes the frame channels; both loops
            // drain what they already buffered and wind down.
            camera_feed.abort();
            detection_feed.abort();
        }
        _ = done_rx => {
            info!("replay sources exhausted");
        }
    }
    loops.await.ok();

    // Whatever ended the run, the wheels get one final stop.
    let final_stop = CommandArbiter::shutdown_command(metrics.started_at.elapsed().as_secs_f64());
    command_tx.send(final_stop).await.ok();
    drop(command_tx);
    drop(episode_tx);
    actuator.await.ok();

    metrics.log_summary();
    info!("✓ done");
    Ok(())
}

/// Replay stand-in for the camera topic: stream every image under
/// `dir` in name order at the configured rate.
async fn feed_camera_frames(
    dir: String,
    frame_rate: f64,
    frames: mpsc::Sender<CameraFrame>,
) -> Result<()> {
    let mut paths: Vec<PathBuf> = WalkDir::new(&dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    if paths.is_empty() {
        warn!("no camera frames under {dir}, perception loop will idle");
        return Ok(());
    }
    info!("replaying {} camera frames from {dir}", paths.len());

    let period = Duration::from_secs_f64(1.0 / frame_rate.max(1.0));
    let mut ticker = tokio::time::interval(period);
    let mut timestamp = 0.0;
    for path in paths {
        ticker.tick().await;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("could not read {}", path.display()))?;
        if frames.send(CameraFrame { bytes, timestamp }).await.is_err() {
            break;
        }
        timestamp += period.as_secs_f64();
    }
    Ok(())
}

/// Replay stand-in for the detection-list topic: one flat-encoded
/// frame per line, numbers separated by whitespace, `#` for comments.
async fn feed_detection_frames(
    path: String,
    frame_rate: f64,
    frames: mpsc::Sender<TimedDetections>,
) -> Result<()> {
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => {
            warn!("no detection replay at {path} ({e}), approach loop will idle");
            return Ok(());
        }
    };

    let period = Duration::from_secs_f64(1.0 / frame_rate.max(1.0));
    let mut ticker = tokio::time::interval(period);
    let mut timestamp = 0.0;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values: Vec<f64> = line
            .split_whitespace()
            .map(|tok| tok.parse().unwrap_or(f64::NAN))
            .collect();

        ticker.tick().await;
        if frames.send(TimedDetections { values, timestamp }).await.is_err() {
            break;
        }
        timestamp += period.as_secs_f64();
    }
    Ok(())
}
