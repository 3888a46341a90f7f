// src/perception/filters.rs
//
// The three admission predicates for the pedestrian gate. Each one is
// independent; a detection only counts if it passes all of them.
// Malformed values (NaN, inverted boxes, negative scores) always fail
// rather than faulting the cycle.

use crate::types::PerceptionConfig;

pub fn passes_class(cfg: &PerceptionConfig, class_id: u32) -> bool {
    cfg.classes.contains(&class_id)
}

pub fn passes_score(cfg: &PerceptionConfig, score: f32) -> bool {
    score.is_finite() && score >= 0.0 && score >= cfg.min_score
}

/// Box must be well-formed, fully inside the model frame and not so
/// small that the object is clearly beyond stopping distance.
pub fn passes_bbox(cfg: &PerceptionConfig, bbox: &[f32; 4], image_size: f32) -> bool {
    let [x1, y1, x2, y2] = *bbox;
    if !bbox.iter().all(|v| v.is_finite()) {
        return false;
    }
    if x2 <= x1 || y2 <= y1 {
        return false;
    }
    if x1 < 0.0 || y1 < 0.0 || x2 > image_size || y2 > image_size {
        return false;
    }
    (x2 - x1) >= cfg.min_box_side && (y2 - y1) >= cfg.min_box_side
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PerceptionConfig {
        crate::types::Config::default().perception
    }

    #[test]
    fn test_class_filter_is_a_set_membership() {
        let cfg = cfg();
        assert!(passes_class(&cfg, 0));
        assert!(!passes_class(&cfg, 2));
    }

    #[test]
    fn test_score_filter_rejects_malformed_scores() {
        let cfg = cfg();
        assert!(passes_score(&cfg, 0.5));
        assert!(passes_score(&cfg, 0.9));
        assert!(!passes_score(&cfg, 0.49));
        assert!(!passes_score(&cfg, -0.1));
        assert!(!passes_score(&cfg, f32::NAN));
        assert!(!passes_score(&cfg, f32::INFINITY));
    }

    #[test]
    fn test_bbox_filter_rejects_degenerate_boxes() {
        let cfg = cfg();
        assert!(passes_bbox(&cfg, &[10.0, 10.0, 60.0, 80.0], 416.0));
        // Empty and inverted boxes.
        assert!(!passes_bbox(&cfg, &[10.0, 10.0, 10.0, 10.0], 416.0));
        assert!(!passes_bbox(&cfg, &[60.0, 10.0, 10.0, 80.0], 416.0));
        // NaN corner.
        assert!(!passes_bbox(&cfg, &[f32::NAN, 10.0, 60.0, 80.0], 416.0));
        // Outside the frame.
        assert!(!passes_bbox(&cfg, &[-5.0, 10.0, 60.0, 80.0], 416.0));
        assert!(!passes_bbox(&cfg, &[10.0, 10.0, 500.0, 80.0], 416.0));
        // Too small.
        assert!(!passes_bbox(&cfg, &[10.0, 10.0, 15.0, 80.0], 416.0));
    }
}
