//! FER+ expression scorer via ONNX Runtime.
//!
//! Crops the detected face (with a small margin) to a 64×64 grayscale patch
//! and turns the eight FER+ logits into canonical-order emotion scores.

use crate::types::{BoundingBox, Emotion, ExpressionVector};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 64;
/// Extra context around the detector box, as a fraction of its size.
const FACE_MARGIN: f32 = 0.1;

/// FER+ output classes in model order; contempt has no canonical label.
const FERPLUS_CLASSES: [Option<Emotion>; 8] = [
    Some(Emotion::Neutral),
    Some(Emotion::Happy),
    Some(Emotion::Surprised),
    Some(Emotion::Sad),
    Some(Emotion::Angry),
    Some(Emotion::Disgusted),
    Some(Emotion::Fearful),
    None,
];

#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box {0:?} lies outside the frame")]
    EmptyCrop(BoundingBox),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// FER+ expression network.
pub struct ExpressionNet {
    session: Session,
}

impl ExpressionNet {
    pub fn load(model_path: &Path) -> Result<Self, ExpressionError> {
        if !model_path.exists() {
            return Err(ExpressionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FER+ model"
        );

        Ok(Self { session })
    }

    /// Score the expression of one detected face.
    pub fn infer(
        &mut self,
        image: &GrayImage,
        face: &BoundingBox,
    ) -> Result<ExpressionVector, ExpressionError> {
        let patch = face_patch(image, face)?;
        let input = Self::preprocess(&patch);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExpressionError::InferenceFailed(format!("logits: {e}")))?;
        scores_from_logits(logits)
    }

    /// FER+ takes raw (unnormalized) pixel intensities, 1×1×64×64.
    fn preprocess(patch: &GrayImage) -> Array4<f32> {
        let size = INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
        for (x, y, px) in patch.enumerate_pixels() {
            tensor[[0, 0, y as usize, x as usize]] = px.0[0] as f32;
        }
        tensor
    }
}

/// Crop the face box plus margin, clamped to the image, resized to the model input.
fn face_patch(image: &GrayImage, face: &BoundingBox) -> Result<GrayImage, ExpressionError> {
    let mx = face.width * FACE_MARGIN;
    let my = face.height * FACE_MARGIN;
    let x0 = (face.x - mx).max(0.0).floor() as u32;
    let y0 = (face.y - my).max(0.0).floor() as u32;
    let x1 = ((face.x + face.width + mx).ceil().max(0.0) as u32).min(image.width());
    let y1 = ((face.y + face.height + my).ceil().max(0.0) as u32).min(image.height());
    if x1 <= x0 || y1 <= y0 {
        return Err(ExpressionError::EmptyCrop(face.clone()));
    }
    let crop = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    Ok(imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle))
}

/// Softmax over all FER+ classes, then keep the ones with a canonical label.
fn scores_from_logits(logits: &[f32]) -> Result<ExpressionVector, ExpressionError> {
    if logits.len() != FERPLUS_CLASSES.len() {
        return Err(ExpressionError::InferenceFailed(format!(
            "expected {} logits, got {}",
            FERPLUS_CLASSES.len(),
            logits.len()
        )));
    }
    let peak = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - peak).exp()).collect();
    let total: f32 = exps.iter().sum();

    let pairs: Vec<(Emotion, f32)> = FERPLUS_CLASSES
        .iter()
        .zip(&exps)
        .filter_map(|(class, e)| class.map(|emotion| (emotion, e / total)))
        .collect();
    Ok(ExpressionVector::from_pairs(&pairs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_from_logits_maps_ferplus_order() {
        // Strong "surprise" logit at FER+ index 2.
        let logits = [0.0, 0.0, 10.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let v = scores_from_logits(&logits).unwrap();
        assert_eq!(v.dominant().0, Emotion::Surprised);
        assert!(v.score(Emotion::Surprised) > 0.99);
    }

    #[test]
    fn test_contempt_mass_is_dropped() {
        let logits = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 20.0];
        let v = scores_from_logits(&logits).unwrap();
        let sum: f32 = v.iter().map(|(_, s)| s).sum();
        assert!(sum < 0.01, "sum={sum}");
    }

    #[test]
    fn test_uniform_logits() {
        let v = scores_from_logits(&[1.0; 8]).unwrap();
        for (_, s) in v.iter() {
            assert!((s - 0.125).abs() < 1e-6);
        }
    }

    #[test]
    fn test_wrong_logit_count() {
        assert!(scores_from_logits(&[0.0; 7]).is_err());
    }

    #[test]
    fn test_face_patch_size_and_clamp() {
        let image = GrayImage::from_pixel(640, 480, image::Luma([90]));
        let face = BoundingBox {
            x: 600.0,
            y: -20.0,
            width: 80.0,
            height: 100.0,
            confidence: 0.9,
        };
        let patch = face_patch(&image, &face).unwrap();
        assert_eq!(patch.dimensions(), (INPUT_SIZE, INPUT_SIZE));
        assert!(patch.pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn test_face_patch_outside_frame() {
        let image = GrayImage::new(100, 100);
        let face = BoundingBox {
            x: 200.0,
            y: 200.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.9,
        };
        assert!(matches!(face_patch(&image, &face), Err(ExpressionError::EmptyCrop(_))));
    }

    #[test]
    fn test_preprocess_keeps_raw_intensity() {
        let patch = GrayImage::from_pixel(INPUT_SIZE, INPUT_SIZE, image::Luma([200]));
        let tensor = ExpressionNet::preprocess(&patch);
        assert_eq!(tensor.shape(), &[1, 1, 64, 64]);
        assert_eq!(tensor[[0, 0, 63, 63]], 200.0);
    }
}
