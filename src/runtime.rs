// src/runtime.rs
//
// Event loops. One task per event source: camera frames drive the
// perception gate, detection frames drive the approach controller.
// They only share the stop latch; commands funnel through a single
// channel into the actuator task.

use crate::arbiter::CommandArbiter;
use crate::camera;
use crate::control::{ApproachStateMachine, ControlState};
use crate::inference::ObjectDetector;
use crate::metrics::RuntimeMetrics;
use crate::overlay;
use crate::perception::PerceptionGate;
use crate::types::{CarCommand, DetectionFrame};
use anyhow::{anyhow, Result};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Compressed camera frame as delivered by the transport layer.
pub struct CameraFrame {
    pub bytes: Vec<u8>,
    pub timestamp: f64,
}

/// Episode-start event; payload is just the timestamp.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeStart {
    pub timestamp: f64,
}

/// Flat-encoded detection list plus its capture timestamp.
pub struct TimedDetections {
    pub values: Vec<f64>,
    pub timestamp: f64,
}

pub struct PerceptionNode {
    gate: PerceptionGate,
    detector: Box<dyn ObjectDetector>,
    image_size: u32,
    save_annotated: bool,
    output_dir: String,
    metrics: RuntimeMetrics,
}

impl PerceptionNode {
    pub fn new(
        gate: PerceptionGate,
        detector: Box<dyn ObjectDetector>,
        image_size: u32,
        save_annotated: bool,
        output_dir: String,
        metrics: RuntimeMetrics,
    ) -> Self {
        Self {
            gate,
            detector,
            image_size,
            save_annotated,
            output_dir,
            metrics,
        }
    }

    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<CameraFrame>,
        mut episodes: mpsc::Receiver<EpisodeStart>,
        commands: mpsc::Sender<CarCommand>,
    ) -> Result<()> {
        let mut frame_id: u64 = 0;
        let mut episodes_open = true;
        loop {
            tokio::select! {
                biased;
                ev = episodes.recv(), if episodes_open => {
                    match ev {
                        Some(e) => {
                            self.gate.reset_episode();
                            publish(&commands, CarCommand::stop(e.timestamp)).await?;
                        }
                        None => episodes_open = false,
                    }
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    self.handle_frame(frame, &mut frame_id, &commands).await?;
                }
            }
        }
        info!("perception loop finished");
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        frame: CameraFrame,
        frame_id: &mut u64,
        commands: &mpsc::Sender<CarCommand>,
    ) -> Result<()> {
        self.metrics.inc(&self.metrics.camera_frames);

        // Rate limit: skipped frames keep answering with the latch as
        // it stands, the batch is never inspected.
        if !self.gate.due() {
            self.metrics.inc(&self.metrics.frames_skipped);
            return Ok(());
        }

        let rgb = match camera::decode_rgb(&frame.bytes) {
            Ok(img) => img,
            Err(e) => {
                warn!("dropping camera frame: {e:#}");
                self.metrics.inc(&self.metrics.decode_failures);
                publish(commands, CarCommand::stop(frame.timestamp)).await?;
                return Ok(());
            }
        };

        let resized = camera::resize_square(&rgb, self.image_size);
        let chw = camera::to_chw(&resized);

        let started = Instant::now();
        let batch = match self.detector.detect(&chw) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("inference failed, treating frame as empty: {e:#}");
                publish(commands, CarCommand::stop(frame.timestamp)).await?;
                return Ok(());
            }
        };
        self.metrics.set_timing(
            &self.metrics.inference_time_us,
            started.elapsed().as_micros() as u64,
        );

        self.metrics.inc(&self.metrics.gate_evaluations);
        if self.gate.evaluate(&batch) {
            self.metrics.inc(&self.metrics.gate_alarms);
        }

        if self.save_annotated && !batch.is_empty() {
            let mut annotated = resized;
            overlay::annotate(&mut annotated, &batch);
            if let Err(e) = overlay::save_annotated(&self.output_dir, *frame_id, &annotated) {
                warn!("could not save annotated frame: {e:#}");
            }
        }

        *frame_id += 1;
        Ok(())
    }
}

pub struct ApproachNode {
    machine: ApproachStateMachine,
    arbiter: CommandArbiter,
    min_delta_t: f64,
    metrics: RuntimeMetrics,
}

impl ApproachNode {
    pub fn new(
        machine: ApproachStateMachine,
        arbiter: CommandArbiter,
        min_delta_t: f64,
        metrics: RuntimeMetrics,
    ) -> Self {
        Self {
            machine,
            arbiter,
            min_delta_t,
            metrics,
        }
    }

    /// Detection frames must arrive in order; the hysteresis counters
    /// have no story for out-of-order updates, so this loop is the
    /// single consumer and never overlaps handlers.
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<TimedDetections>,
        commands: mpsc::Sender<CarCommand>,
    ) -> Result<()> {
        let mut last_timestamp: Option<f64> = None;
        while let Some(msg) = frames.recv().await {
            self.metrics.inc(&self.metrics.detection_frames);

            let delta_t = match last_timestamp {
                Some(prev) if msg.timestamp > prev => msg.timestamp - prev,
                // First frame, or a clock that stalled or jumped back.
                _ => self.min_delta_t,
            };
            last_timestamp = Some(msg.timestamp);

            let frame = DetectionFrame::decode(&msg.values);
            let proposed = match self.machine.update(&frame, delta_t, msg.timestamp) {
                Ok(cmd) => cmd,
                Err(e) => {
                    error!("control step failed, commanding stop: {e:#}");
                    CarCommand::stop(msg.timestamp)
                }
            };

            if self.machine.state() == ControlState::Captured {
                // Stand-in for the grabber confirmation from mission
                // logic: move straight on to delivery.
                self.machine.begin_delivery();
            }

            let cmd = self.arbiter.arbitrate(proposed);
            self.metrics.inc(&self.metrics.commands_published);
            publish(&commands, cmd).await?;
        }
        info!("approach loop finished");
        Ok(())
    }
}

/// Actuator stand-in: in deployment this is the wheels topic, here it
/// logs every command it accepts.
pub async fn actuator_loop(mut commands: mpsc::Receiver<CarCommand>) {
    while let Some(cmd) = commands.recv().await {
        debug!(
            "car command: v={:.3} omega={:.3} t={:.3}",
            cmd.v, cmd.omega, cmd.timestamp
        );
    }
    info!("actuator loop finished");
}

async fn publish(commands: &mpsc::Sender<CarCommand>, cmd: CarCommand) -> Result<()> {
    commands
        .send(cmd)
        .await
        .map_err(|_| anyhow!("actuator channel closed"))
}
