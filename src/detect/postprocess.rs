//! YOLO-style pre/post processing shared by tensor engines.
//!
//! Kept independent of any inference runtime so the geometry can be tested
//! without a model file.

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};

use crate::detect::result::RawDetection;

/// Grey used for letterbox padding.
const PAD_VALUE: u8 = 114;

/// Upper bound on detections returned per image.
pub const MAX_DETECTIONS: usize = 300;

/// Mapping from network-input coordinates back to source-image pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl Letterbox {
    pub fn new(orig_w: u32, orig_h: u32, size: u32) -> Result<Self> {
        if orig_w == 0 || orig_h == 0 {
            return Err(anyhow!("image has zero dimension {}x{}", orig_w, orig_h));
        }
        let scale = (size as f32 / orig_w as f32).min(size as f32 / orig_h as f32);
        let new_w = ((orig_w as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((orig_h as f32 * scale).round() as u32).clamp(1, size);
        Ok(Self {
            scale,
            pad_x: ((size - new_w) / 2) as f32,
            pad_y: ((size - new_h) / 2) as f32,
            orig_w,
            orig_h,
        })
    }

    fn resized_dims(&self, size: u32) -> (u32, u32) {
        let w = ((self.orig_w as f32 * self.scale).round() as u32).clamp(1, size);
        let h = ((self.orig_h as f32 * self.scale).round() as u32).clamp(1, size);
        (w, h)
    }

    /// Convert a centre-format box in network space into a clamped
    /// `[x1, y1, x2, y2]` box in source pixels.
    pub fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
        let max_x = self.orig_w as f32;
        let max_y = self.orig_h as f32;
        let x1 = (cx - w / 2.0 - self.pad_x) / self.scale;
        let y1 = (cy - h / 2.0 - self.pad_y) / self.scale;
        let x2 = (cx + w / 2.0 - self.pad_x) / self.scale;
        let y2 = (cy + h / 2.0 - self.pad_y) / self.scale;
        [
            x1.clamp(0.0, max_x),
            y1.clamp(0.0, max_y),
            x2.clamp(0.0, max_x),
            y2.clamp(0.0, max_y),
        ]
    }
}

/// Letterbox an image into a `size x size` RGB canvas.
pub fn letterbox_image(image: &DynamicImage, size: u32) -> Result<(RgbImage, Letterbox)> {
    let params = Letterbox::new(image.width(), image.height(), size)?;
    let (new_w, new_h) = params.resized_dims(size);
    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    image::imageops::overlay(
        &mut canvas,
        &resized,
        params.pad_x as i64,
        params.pad_y as i64,
    );
    Ok((canvas, params))
}

/// Decode a YOLOv8 detection head.
///
/// `shape` must be `[1, 4 + nc, anchors]` or `[1, anchors, 4 + nc]`; `num_classes`
/// disambiguates the layout. Returns candidates above `confidence` in anchor order.
pub fn decode_yolo(
    data: &[f32],
    shape: &[usize],
    num_classes: usize,
    confidence: f32,
    letterbox: &Letterbox,
) -> Result<Vec<RawDetection>> {
    if shape.len() != 3 || shape[0] != 1 {
        return Err(anyhow!("unexpected detection head shape {:?}", shape));
    }
    let features = num_classes + 4;
    let (anchors, channel_major) = if shape[1] == features {
        (shape[2], true)
    } else if shape[2] == features {
        (shape[1], false)
    } else {
        return Err(anyhow!(
            "detection head shape {:?} does not match {} classes",
            shape,
            num_classes
        ));
    };
    if data.len() != anchors * features {
        return Err(anyhow!(
            "detection head has {} values, expected {}",
            data.len(),
            anchors * features
        ));
    }

    let at = |anchor: usize, feature: usize| -> f32 {
        if channel_major {
            data[feature * anchors + anchor]
        } else {
            data[anchor * features + feature]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best = (0usize, f32::NEG_INFINITY);
        for class_id in 0..num_classes {
            let score = at(anchor, 4 + class_id);
            if score > best.1 {
                best = (class_id, score);
            }
        }
        let (class_id, score) = best;
        if !score.is_finite() || score < confidence {
            continue;
        }
        let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) || w <= 0.0 || h <= 0.0 {
            continue;
        }
        let bbox = letterbox.unmap(cx, cy, w, h);
        if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
            continue;
        }
        candidates.push(RawDetection::new(class_id, score.min(1.0), bbox));
    }
    Ok(candidates)
}

/// Intersection over union of two `[x1, y1, x2, y2]` boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;
    if union <= f32::EPSILON {
        0.0
    } else {
        inter / union
    }
}

/// Class-aware non-maximum suppression.
///
/// Output is sorted by confidence, highest first, and capped at `MAX_DETECTIONS`.
pub fn non_max_suppression(
    mut candidates: Vec<RawDetection>,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawDetection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= MAX_DETECTIONS {
            break;
        }
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_pads_short_side() {
        let lb = Letterbox::new(1280, 640, 640).unwrap();
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 160.0);
    }

    #[test]
    fn unmap_round_trips_through_letterbox() {
        let lb = Letterbox::new(1280, 640, 640).unwrap();
        // Box covering source pixels (100, 100)-(300, 200).
        let bbox = lb.unmap(100.0, 160.0 + 75.0, 100.0, 50.0);
        assert_eq!(bbox, [100.0, 100.0, 300.0, 200.0]);
    }

    #[test]
    fn unmap_clamps_to_image() {
        let lb = Letterbox::new(640, 640, 640).unwrap();
        let bbox = lb.unmap(630.0, 5.0, 40.0, 40.0);
        assert_eq!(bbox, [610.0, 0.0, 640.0, 25.0]);
    }

    #[test]
    fn letterbox_image_has_network_size() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([255, 0, 0])));
        let (canvas, lb) = letterbox_image(&image, 64).unwrap();
        assert_eq!(canvas.dimensions(), (64, 64));
        assert_eq!(lb.pad_y, 16.0);
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([PAD_VALUE; 3]));
        assert_eq!(canvas.get_pixel(32, 32), &Rgb([255, 0, 0]));
    }

    #[test]
    fn decode_channel_major_head() {
        let lb = Letterbox::new(640, 640, 640).unwrap();
        // 2 classes, 2 anchors, layout [1, 6, 2].
        let data = vec![
            100.0, 300.0, // cx
            100.0, 300.0, // cy
            20.0, 20.0, // w
            20.0, 20.0, // h
            0.9, 0.1, // class 0
            0.05, 0.2, // class 1
        ];
        let out = decode_yolo(&data, &[1, 6, 2], 2, 0.25, &lb).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 0);
        assert_eq!(out[0].bbox, [90.0, 90.0, 110.0, 110.0]);
    }

    #[test]
    fn decode_anchor_major_head() {
        let lb = Letterbox::new(640, 640, 640).unwrap();
        let data = vec![
            50.0, 50.0, 10.0, 10.0, 0.1, 0.6, //
            70.0, 70.0, 10.0, 10.0, 0.3, 0.2,
        ];
        let out = decode_yolo(&data, &[1, 2, 6], 2, 0.25, &lb).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 1);
        assert_eq!(out[1].class_id, 0);
    }

    #[test]
    fn decode_rejects_mismatched_shape() {
        let lb = Letterbox::new(640, 640, 640).unwrap();
        assert!(decode_yolo(&[0.0; 12], &[1, 5, 3], 2, 0.25, &lb).is_err());
    }

    #[test]
    fn nms_suppresses_same_class_overlap_only() {
        let a = RawDetection::new(0, 0.9, [0.0, 0.0, 10.0, 10.0]);
        let b = RawDetection::new(0, 0.8, [1.0, 1.0, 11.0, 11.0]);
        let c = RawDetection::new(1, 0.7, [1.0, 1.0, 11.0, 11.0]);
        let d = RawDetection::new(0, 0.95, [50.0, 50.0, 60.0, 60.0]);
        let kept = non_max_suppression(vec![a, b, c, d], 0.5);
        let confidences: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.95, 0.9, 0.7]);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
        assert_eq!(iou(&[0.0, 0.0, 2.0, 2.0], &[0.0, 0.0, 2.0, 2.0]), 1.0);
    }
}
