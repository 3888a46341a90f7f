// src/inference.rs
//
// ONNX detector behind the ObjectDetector trait. The rest of the
// system only sees three parallel sequences (boxes, classes, scores),
// so replay and test code can stand in for the real model.

use crate::types::ModelConfig;
use anyhow::{ensure, Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Parallel sequences of equal length; empty means no detections.
#[derive(Debug, Clone, Default)]
pub struct RawDetections {
    pub bboxes: Vec<[f32; 4]>,
    pub class_ids: Vec<u32>,
    pub scores: Vec<f32>,
}

impl RawDetections {
    pub fn push(&mut self, bbox: [f32; 4], class_id: u32, score: f32) {
        self.bboxes.push(bbox);
        self.class_ids.push(class_id);
        self.scores.push(score);
    }

    pub fn len(&self) -> usize {
        self.bboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }
}

pub trait ObjectDetector: Send {
    /// `chw` is a normalized CHW float image of the configured square
    /// input size.
    fn detect(&mut self, chw: &[f32]) -> Result<RawDetections>;
}

pub struct OnnxDetector {
    session: Session,
    image_size: usize,
    confidence_threshold: f32,
}

impl OnnxDetector {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        info!("Loading detection model: {}", config.path);

        let mut builder = Session::builder()?;
        if config.use_cuda {
            info!("Enabling CUDA execution provider");
            builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(0)
                .build()])?;
        }

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads)?
            .commit_from_file(&config.path)
            .context("Failed to load detection model")?;

        info!("✓ detector ready");

        Ok(Self {
            session,
            image_size: config.image_size as usize,
            confidence_threshold: config.confidence_threshold,
        })
    }
}

impl ObjectDetector for OnnxDetector {
    fn detect(&mut self, chw: &[f32]) -> Result<RawDetections> {
        let size = self.image_size;
        ensure!(
            chw.len() == 3 * size * size,
            "detector input has {} floats, expected {}",
            chw.len(),
            3 * size * size
        );

        let shape = [1, 3, size, size];
        let input_value = ort::value::Value::from_array((
            shape.as_slice(),
            chw.to_vec().into_boxed_slice(),
        ))?;

        let outputs = self.session.run(ort::inputs!["input" => input_value])?;
        let (output_shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        let dims: Vec<usize> = output_shape.iter().map(|&d| d as usize).collect();
        ensure!(
            dims.len() == 3 && dims[2] > 5,
            "unexpected model output shape {dims:?}"
        );

        let candidates = decode_predictions(
            data,
            dims[1],
            dims[2],
            size as f32,
            self.confidence_threshold,
        );
        let kept = non_max_suppression(candidates, NMS_IOU_THRESHOLD);

        let mut detections = RawDetections::default();
        for c in kept {
            detections.push(c.bbox, c.class_id, c.score);
        }
        debug!("{} detections after NMS", detections.len());
        Ok(detections)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    bbox: [f32; 4],
    class_id: u32,
    score: f32,
}

/// Parse YOLO-style rows `[cx, cy, w, h, obj, class...]` into scored
/// boxes clamped to the frame.
fn decode_predictions(
    data: &[f32],
    rows: usize,
    attrs: usize,
    image_size: f32,
    threshold: f32,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for row in data.chunks_exact(attrs).take(rows) {
        let objectness = row[4];
        if !objectness.is_finite() || objectness < threshold {
            continue;
        }

        let (mut class_id, mut class_conf) = (0u32, f32::MIN);
        for (i, &conf) in row[5..].iter().enumerate() {
            if conf > class_conf {
                class_id = i as u32;
                class_conf = conf;
            }
        }

        let score = objectness * class_conf;
        if !score.is_finite() || score < threshold {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let bbox = [
            (cx - w / 2.0).clamp(0.0, image_size),
            (cy - h / 2.0).clamp(0.0, image_size),
            (cx + w / 2.0).clamp(0.0, image_size),
            (cy + h / 2.0).clamp(0.0, image_size),
        ];
        out.push(Candidate {
            bbox,
            class_id,
            score,
        });
    }
    out
}

fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && iou(&k.bbox, &cand.bbox) > iou_threshold);
        if !overlaps {
            kept.push(cand);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
