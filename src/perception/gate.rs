// src/perception/gate.rs

use crate::inference::RawDetections;
use crate::perception::filters;
use crate::types::PerceptionConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// One-way stop flag shared between the perception loop (writer) and
/// the command arbiter (reader). Within an episode it only ever goes
/// false → true; `release` is reserved for the episode-start event.
#[derive(Debug, Clone)]
pub struct StopLatch {
    engaged: Arc<AtomicBool>,
}

impl StopLatch {
    pub fn new() -> Self {
        Self {
            engaged: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn engage(&self) {
        self.engaged.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.engaged.store(false, Ordering::SeqCst);
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}

impl Default for StopLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds raw detection batches into the stop latch. Evaluation is
/// rate-limited: only one in `frames_skipped + 1` camera frames is
/// inspected, while the latch itself answers for every frame.
pub struct PerceptionGate {
    config: PerceptionConfig,
    image_size: f32,
    latch: StopLatch,
    frame_id: u32,
}

impl PerceptionGate {
    pub fn new(config: PerceptionConfig, image_size: u32) -> Self {
        Self {
            config,
            image_size: image_size as f32,
            latch: StopLatch::new(),
            frame_id: 0,
        }
    }

    /// Handle to the latch for the arbiter side.
    pub fn latch(&self) -> StopLatch {
        self.latch.clone()
    }

    /// Advance the frame counter; true when this frame is due for
    /// evaluation. The counter wraps mod `frames_skipped + 1`, so after
    /// start the first `frames_skipped` frames are dropped.
    pub fn due(&mut self) -> bool {
        self.frame_id = (self.frame_id + 1) % (1 + self.config.frames_skipped);
        self.frame_id == 0
    }

    /// Run the three admission masks over one batch and intersect them.
    /// Any surviving detection raises the alarm and engages the latch
    /// for the rest of the episode.
    pub fn evaluate(&mut self, batch: &RawDetections) -> bool {
        let class_mask: Vec<bool> = batch
            .class_ids
            .iter()
            .map(|&c| filters::passes_class(&self.config, c))
            .collect();
        let box_mask: Vec<bool> = batch
            .bboxes
            .iter()
            .map(|b| filters::passes_bbox(&self.config, b, self.image_size))
            .collect();
        let score_mask: Vec<bool> = batch
            .scores
            .iter()
            .map(|&s| filters::passes_score(&self.config, s))
            .collect();

        let alarm = (0..batch.len()).any(|i| class_mask[i] && box_mask[i] && score_mask[i]);

        if alarm {
            if !self.latch.is_engaged() {
                info!("pedestrian detected... stopping for the rest of the episode");
            }
            self.latch.engage();
        }
        alarm
    }

    /// Episode-start event: new episode, clean latch. Does not touch
    /// the approach side.
    pub fn reset_episode(&mut self) {
        info!("episode start, releasing stop latch");
        self.latch.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> PerceptionGate {
        let cfg = crate::types::Config::default().perception;
        PerceptionGate::new(cfg, 416)
    }

    fn batch(rows: &[([f32; 4], u32, f32)]) -> RawDetections {
        let mut b = RawDetections::default();
        for &(bbox, class_id, score) in rows {
            b.push(bbox, class_id, score);
        }
        b
    }

    const GOOD_BOX: [f32; 4] = [50.0, 50.0, 150.0, 200.0];

    #[test]
    fn test_alarm_requires_all_three_masks() {
        let mut g = gate();
        // Right class, right score, degenerate box.
        assert!(!g.evaluate(&batch(&[(([0.0, 0.0, 0.0, 0.0]), 0, 0.9)])));
        // Right box and score, wrong class.
        assert!(!g.evaluate(&batch(&[(GOOD_BOX, 2, 0.9)])));
        // Right box and class, low score.
        assert!(!g.evaluate(&batch(&[(GOOD_BOX, 0, 0.2)])));
        assert!(!g.latch().is_engaged());

        assert!(g.evaluate(&batch(&[(GOOD_BOX, 0, 0.9)])));
        assert!(g.latch().is_engaged());
    }

    #[test]
    fn test_masks_intersect_per_detection_not_across() {
        let mut g = gate();
        // One detection passes class+score with a bad box, another passes
        // box+score with the wrong class. No single detection passes all
        // three, so no alarm.
        let b = batch(&[
            ([0.0, 0.0, 2.0, 2.0], 0, 0.9),
            (GOOD_BOX, 2, 0.9),
        ]);
        assert!(!g.evaluate(&b));
        assert!(!g.latch().is_engaged());
    }

    #[test]
    fn test_latch_is_one_way_until_episode_reset() {
        let mut g = gate();
        assert!(g.evaluate(&batch(&[(GOOD_BOX, 0, 0.9)])));
        // Clean frames afterwards leave the latch engaged.
        assert!(!g.evaluate(&batch(&[])));
        assert!(!g.evaluate(&batch(&[(GOOD_BOX, 2, 0.9)])));
        assert!(g.latch().is_engaged());

        g.reset_episode();
        assert!(!g.latch().is_engaged());
    }

    #[test]
    fn test_empty_batch_is_valid_and_silent() {
        let mut g = gate();
        assert!(!g.evaluate(&batch(&[])));
        assert!(!g.latch().is_engaged());
    }

    #[test]
    fn test_due_skips_configured_frames() {
        let mut g = gate(); // frames_skipped = 2
        let pattern: Vec<bool> = (0..6).map(|_| g.due()).collect();
        assert_eq!(pattern, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn test_zero_skip_evaluates_every_frame() {
        let mut cfg = crate::types::Config::default().perception;
        cfg.frames_skipped = 0;
        let mut g = PerceptionGate::new(cfg, 416);
        assert!(g.due());
        assert!(g.due());
    }
}
