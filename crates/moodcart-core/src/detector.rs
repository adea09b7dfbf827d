//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the grayscale frame into the 640×640 model input, decodes the
//! three anchor-free stride heads and suppresses overlapping boxes. Keypoint
//! heads are ignored; expression scoring only needs the face box.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
/// Detector score threshold for candidate faces.
pub const SCORE_THRESHOLD: f32 = 0.3;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Mapping from letterboxed model space back to frame space.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let (new_w, new_h) = Self::scaled_size(width, height, scale);
        Self {
            scale,
            pad_x: ((INPUT_SIZE - new_w) / 2) as f32,
            pad_y: ((INPUT_SIZE - new_h) / 2) as f32,
        }
    }

    fn scaled_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
        let w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        (w, h)
    }

    fn to_frame(self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score, bbox) output tensor indices for one stride.
type HeadSlots = (usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [HeadSlots; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox heads for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let heads = head_slots(&output_names);
        tracing::info!(path = %model_path.display(), ?heads, "loaded SCRFD model");

        Ok(Self { session, heads })
    }

    /// Detect faces, returning boxes in frame coordinates sorted by descending score.
    pub fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = letterbox_tensor(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in STRIDES.iter().zip(self.heads.iter()) {
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, boxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("boxes stride {stride}: {e}"))
            })?;
            candidates.extend(decode_stride(scores, boxes, stride, letterbox));
        }

        Ok(nms(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Locate score/bbox heads by name ("score_8", "bbox_8", ...), falling back to
/// the standard export order: [0-2] scores, [3-5] boxes.
fn head_slots(names: &[String]) -> [HeadSlots; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let named: Option<Vec<HeadSlots>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();
    match named {
        Some(slots) => [slots[0], slots[1], slots[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Resize into the letterboxed NCHW input, replicating gray into three channels.
fn letterbox_tensor(image: &GrayImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let (new_w, new_h) = Letterbox::scaled_size(image.width(), image.height(), letterbox.scale);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, px) in resized.enumerate_pixels() {
        let v = (px.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        let (tx, ty) = (off_x + x as usize, off_y + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }
    (tensor, letterbox)
}

fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: Letterbox,
) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE as usize / stride;
    let grid_h = INPUT_SIZE as usize / stride;
    let anchors = grid_w * grid_h * ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&idx| scores[idx] > SCORE_THRESHOLD)
        .filter_map(|idx| {
            let d = boxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * s;
            let cy = (cell / grid_w) as f32 * s;
            let (x1, y1) = letterbox.to_frame(cx - d[0] * s, cy - d[1] * s);
            let (x2, y2) = letterbox.to_frame(cx + d[2] * s, cy + d[3] * s);
            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: scores[idx],
            })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest score first.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence }
    }

    #[test]
    fn test_iou_partial() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert!(iou(&a, &bbox(20.0, 20.0, 5.0, 5.0, 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlap() {
        let result = nms(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            NMS_IOU_THRESHOLD,
        );
        let scores: Vec<f32> = result.iter().map(|b| b.confidence).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_letterbox_640x480() {
        let lb = Letterbox::fit(640, 480);
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        assert_eq!(lb.to_frame(100.0, 180.0), (100.0, 100.0));
    }

    #[test]
    fn test_letterbox_tensor_pads_with_zero() {
        let image = GrayImage::from_pixel(64, 32, image::Luma([255]));
        let (tensor, lb) = letterbox_tensor(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = tensor[[0, 2, 320, 320]];
        assert!((inside - (255.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_threshold_and_geometry() {
        let stride = 32;
        let anchors = (640 / stride) * (640 / stride) * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut boxes = vec![0.0f32; anchors * 4];
        // Anchor 2 → cell 1 → grid (1, 0) → centre (32, 0)
        scores[2] = 0.9;
        boxes[8..12].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);
        scores[3] = SCORE_THRESHOLD;

        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(&scores, &boxes, stride, lb);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0], bbox(16.0, 0.0, 32.0, 32.0, 0.9));
    }

    #[test]
    fn test_head_slots_named_and_positional() {
        let named: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(head_slots(&named), [(1, 0), (3, 2), (5, 4)]);

        let generic: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(head_slots(&generic), [(0, 3), (1, 4), (2, 5)]);
    }
}
