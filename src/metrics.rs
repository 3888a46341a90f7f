// src/metrics.rs
//
// Runtime counters for both loops. Cheap atomics, read at shutdown
// for the summary line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RuntimeMetrics {
    pub camera_frames: Arc<AtomicU64>,
    pub frames_skipped: Arc<AtomicU64>,
    pub gate_evaluations: Arc<AtomicU64>,
    pub gate_alarms: Arc<AtomicU64>,
    pub decode_failures: Arc<AtomicU64>,
    pub detection_frames: Arc<AtomicU64>,
    pub commands_published: Arc<AtomicU64>,
    pub inference_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self {
            camera_frames: Arc::new(AtomicU64::new(0)),
            frames_skipped: Arc::new(AtomicU64::new(0)),
            gate_evaluations: Arc::new(AtomicU64::new(0)),
            gate_alarms: Arc::new(AtomicU64::new(0)),
            decode_failures: Arc::new(AtomicU64::new(0)),
            detection_frames: Arc::new(AtomicU64::new(0)),
            commands_published: Arc::new(AtomicU64::new(0)),
            inference_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.camera_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        info!(
            "run summary: {} camera frames ({:.1} fps, {} skipped, {} decode failures), \
             {} gate evaluations ({} alarms), {} detection frames, {} commands",
            self.camera_frames.load(Ordering::Relaxed),
            self.fps(),
            self.frames_skipped.load(Ordering::Relaxed),
            self.decode_failures.load(Ordering::Relaxed),
            self.gate_evaluations.load(Ordering::Relaxed),
            self.gate_alarms.load(Ordering::Relaxed),
            self.detection_frames.load(Ordering::Relaxed),
            self.commands_published.load(Ordering::Relaxed),
        );
    }
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_across_clones() {
        let metrics = RuntimeMetrics::new();
        let clone = metrics.clone();
        metrics.inc(&metrics.camera_frames);
        clone.inc(&clone.camera_frames);
        assert_eq!(metrics.camera_frames.load(Ordering::Relaxed), 2);
    }
}
