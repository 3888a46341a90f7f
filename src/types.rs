// src/types.rs

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub perception: PerceptionConfig,
    pub control: ControlConfig,
    pub replay: ReplayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    pub image_size: u32,
    pub num_threads: usize,
    pub use_cuda: bool,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// Camera frames dropped between gate evaluations.
    pub frames_skipped: u32,
    /// Class ids that count as a pedestrian-like obstacle.
    pub classes: Vec<u32>,
    pub min_score: f32,
    /// Boxes with a shorter side than this are too far away to matter.
    pub min_box_side: f32,
    pub save_annotated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub integral_clamp: f64,
    pub omega_offset: f64,
    pub omega_scaling: f64,
    pub scan_omega: f64,
    pub approach_speed: f64,
    pub target_id: i32,
    /// Fallback step when detection-frame timestamps are unusable.
    pub min_delta_t: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub image_dir: String,
    pub detections_file: String,
    pub output_dir: String,
    pub frame_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                path: "models/duckie_detector.onnx".to_string(),
                image_size: 416,
                num_threads: 4,
                use_cuda: false,
                confidence_threshold: 0.5,
            },
            perception: PerceptionConfig {
                frames_skipped: 2,
                classes: vec![0],
                min_score: 0.5,
                min_box_side: 10.0,
                save_annotated: false,
            },
            control: ControlConfig {
                kp: 0.25,
                ki: 0.4,
                kd: 0.027,
                integral_clamp: 0.04,
                omega_offset: 0.1,
                omega_scaling: 1.0,
                scan_omega: 0.3,
                approach_speed: 0.02,
                target_id: 0,
                min_delta_t: 1.0 / 30.0,
            },
            replay: ReplayConfig {
                image_dir: "data/frames".to_string(),
                detections_file: "data/detections.txt".to_string(),
                output_dir: "output".to_string(),
                frame_rate: 30.0,
            },
            logging: LoggingConfig {
                level: "duckie_courier=info,ort=warn".to_string(),
            },
        }
    }
}

/// One detected object in vehicle-relative polar coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub id: i32,
    /// Range in meters, non-negative.
    pub r: f64,
    /// Bearing in radians, signed, zero straight ahead.
    pub theta: f64,
}

/// Ordered detections from one inference cycle. Enumeration order is
/// preserved from the perception source; tie-breaks depend on it.
#[derive(Debug, Clone, Default)]
pub struct DetectionFrame {
    pub detections: Vec<Detection>,
}

impl DetectionFrame {
    /// Decode the flat wire encoding: count first, then (r, theta, id)
    /// triples. Malformed entries degrade to "not detected" rather than
    /// failing the cycle.
    pub fn decode(values: &[f64]) -> Self {
        let mut frame = DetectionFrame::default();
        let Some(&head) = values.first() else {
            return frame;
        };
        if !head.is_finite() || head < 0.0 {
            warn!("detection frame has invalid count {head}, dropping frame");
            return frame;
        }
        let count = head.round() as usize;
        for i in 0..count {
            let base = 1 + i * 3;
            let Some(triple) = values.get(base..base + 3) else {
                warn!("detection frame truncated: expected {count} triples, got {i}");
                break;
            };
            let (r, theta, id) = (triple[0], triple[1], triple[2]);
            if !r.is_finite() || r < 0.0 || !theta.is_finite() || !id.is_finite() {
                warn!("skipping malformed detection triple ({r}, {theta}, {id})");
                continue;
            }
            frame.detections.push(Detection {
                id: id.round() as i32,
                r,
                theta,
            });
        }
        frame
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Velocity command handed to the actuator interface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarCommand {
    pub v: f64,
    pub omega: f64,
    pub timestamp: f64,
}

impl CarCommand {
    pub fn stop(timestamp: f64) -> Self {
        Self {
            v: 0.0,
            omega: 0.0,
            timestamp,
        }
    }
}
