// src/overlay.rs
//
// Debug annotation of gate input frames, saved as JPEGs when enabled.

use crate::inference::RawDetections;
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

pub const CLASS_NAMES: [&str; 4] = ["duckie", "cone", "truck", "bus"];
const CLASS_COLORS: [[u8; 3]; 4] = [
    [255, 255, 0], // duckie
    [255, 165, 0], // cone
    [0, 250, 0],   // truck
    [255, 0, 0],   // bus
];
const FALLBACK_COLOR: [u8; 3] = [200, 200, 200];
const BORDER: u32 = 2;

pub fn class_name(class_id: u32) -> &'static str {
    CLASS_NAMES.get(class_id as usize).copied().unwrap_or("?")
}

pub fn annotate(frame: &mut RgbImage, detections: &RawDetections) {
    for (bbox, &class_id) in detections.bboxes.iter().zip(&detections.class_ids) {
        let color = CLASS_COLORS
            .get(class_id as usize)
            .copied()
            .unwrap_or(FALLBACK_COLOR);
        draw_rect(frame, bbox, Rgb(color));
    }
}

pub fn save_annotated(dir: &str, frame_id: u64, frame: &RgbImage) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = Path::new(dir).join(format!("frame_{frame_id:06}.jpg"));
    frame
        .save(&path)
        .with_context(|| format!("could not save {}", path.display()))?;
    Ok(path)
}

fn draw_rect(img: &mut RgbImage, bbox: &[f32; 4], color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let x1 = (bbox[0].max(0.0) as u32).min(w - 1);
    let y1 = (bbox[1].max(0.0) as u32).min(h - 1);
    let x2 = (bbox[2].max(0.0) as u32).min(w - 1);
    let y2 = (bbox[3].max(0.0) as u32).min(h - 1);
    if x2 <= x1 || y2 <= y1 {
        return;
    }

    for x in x1..=x2 {
        for t in 0..BORDER {
            img.put_pixel(x, (y1 + t).min(h - 1), color);
            img.put_pixel(x, y2.saturating_sub(t), color);
        }
    }
    for y in y1..=y2 {
        for t in 0..BORDER {
            img.put_pixel((x1 + t).min(w - 1), y, color);
            img.put_pixel(x2.saturating_sub(t), y, color);
        }
    }
}
