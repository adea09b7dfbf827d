//! Expression classifier: model-source fallback, readiness, face selection.
//!
//! Models are loaded once, trying each [`ModelSource`] in order and stopping
//! at the first one whose sub-models all load. If none does, the classifier
//! stays unready for the life of the process and every `classify` call
//! yields "no detections".

use crate::detector::FaceDetector;
use crate::expression::ExpressionNet;
use crate::types::{select_primary, BoundingBox, ExpressionVector};
use image::GrayImage;
use moodcart_hw::Frame;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD face detector file inside a model source.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// FER+ expression model file inside a model source.
pub const EXPRESSION_MODEL_FILE: &str = "emotion-ferplus-8.onnx";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("expression models unavailable: all {tried} model sources failed")]
    ModelUnavailable { tried: usize },
    #[error("detection failed: {0}")]
    DetectionFailed(String),
}

/// A named location holding a full set of sub-models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub name: String,
    pub dir: PathBuf,
}

impl ModelSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: dir.display().to_string(),
            dir,
        }
    }

    pub fn detector_path(&self) -> PathBuf {
        self.dir.join(DETECTOR_MODEL_FILE)
    }

    pub fn expression_path(&self) -> PathBuf {
        self.dir.join(EXPRESSION_MODEL_FILE)
    }
}

/// Outcome of model loading, reported to callers instead of raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelStatus {
    Ready { source: String },
    Unavailable { tried: Vec<String> },
}

impl ModelStatus {
    /// `Err(ModelUnavailable)` if loading failed.
    pub fn ensure_ready(&self) -> Result<(), ClassifierError> {
        match self {
            ModelStatus::Ready { .. } => Ok(()),
            ModelStatus::Unavailable { tried } => {
                Err(ClassifierError::ModelUnavailable { tried: tried.len() })
            }
        }
    }
}

/// Inference capability behind the classifier.
pub trait ExpressionBackend: Send {
    /// All faces found in the image, in detector order.
    fn detect_faces(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ClassifierError>;

    /// Expression scores for one face.
    fn expressions(
        &mut self,
        image: &GrayImage,
        face: &BoundingBox,
    ) -> Result<ExpressionVector, ClassifierError>;
}

/// SCRFD + FER+ backend.
pub struct OnnxBackend {
    detector: FaceDetector,
    expressions: ExpressionNet,
}

impl OnnxBackend {
    /// Load both sub-models from a source; any failure fails the whole source.
    pub fn load(source: &ModelSource) -> Result<Self, String> {
        let detector = FaceDetector::load(&source.detector_path()).map_err(|e| e.to_string())?;
        let expressions =
            ExpressionNet::load(&source.expression_path()).map_err(|e| e.to_string())?;
        Ok(Self {
            detector,
            expressions,
        })
    }
}

impl ExpressionBackend for OnnxBackend {
    fn detect_faces(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ClassifierError> {
        self.detector
            .detect(image)
            .map_err(|e| ClassifierError::DetectionFailed(e.to_string()))
    }

    fn expressions(
        &mut self,
        image: &GrayImage,
        face: &BoundingBox,
    ) -> Result<ExpressionVector, ClassifierError> {
        self.expressions
            .infer(image, face)
            .map_err(|e| ClassifierError::DetectionFailed(e.to_string()))
    }
}

/// Turns frames into the raw expression vector of the most confident face.
pub struct ExpressionClassifier {
    backend: Option<Box<dyn ExpressionBackend>>,
    status: ModelStatus,
}

impl ExpressionClassifier {
    /// Load ONNX models from the first source that fully succeeds.
    pub fn load(sources: &[ModelSource]) -> Self {
        Self::load_with(sources, |source| {
            OnnxBackend::load(source).map(|b| Box::new(b) as Box<dyn ExpressionBackend>)
        })
    }

    /// Load with a custom backend loader, trying sources in order.
    pub fn load_with<F>(sources: &[ModelSource], mut loader: F) -> Self
    where
        F: FnMut(&ModelSource) -> Result<Box<dyn ExpressionBackend>, String>,
    {
        for source in sources {
            match loader(source) {
                Ok(backend) => {
                    tracing::info!(source = %source.name, "expression models loaded");
                    return Self {
                        backend: Some(backend),
                        status: ModelStatus::Ready {
                            source: source.name.clone(),
                        },
                    };
                }
                Err(e) => {
                    tracing::warn!(source = %source.name, error = %e, "model source failed");
                }
            }
        }

        let err = ClassifierError::ModelUnavailable { tried: sources.len() };
        tracing::error!(error = %err, "expression detection disabled");
        Self {
            backend: None,
            status: ModelStatus::Unavailable {
                tried: sources.iter().map(|s| s.name.clone()).collect(),
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    pub fn ensure_ready(&self) -> Result<(), ClassifierError> {
        self.status.ensure_ready()
    }

    /// Raw expression vector of the most confident face, or `None` for no detections.
    ///
    /// Returns `Ok(None)` without running inference when the models are not loaded.
    pub fn classify(&mut self, frame: &Frame) -> Result<Option<ExpressionVector>, ClassifierError> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(None);
        };

        let image = frame_image(frame)?;
        let faces = backend.detect_faces(&image)?;
        let Some(face) = select_primary(&faces) else {
            return Ok(None);
        };
        tracing::trace!(faces = faces.len(), score = face.confidence, "selected face");
        backend.expressions(&image, face).map(Some)
    }
}

/// Copy the shared frame into an image buffer; the frame itself stays untouched.
fn frame_image(frame: &Frame) -> Result<GrayImage, ClassifierError> {
    GrayImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(|| {
        ClassifierError::DetectionFailed(format!(
            "frame buffer of {} bytes does not match {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        ))
    })
}

/// Default source directories in search order.
pub fn default_model_sources(user_dir: &Path) -> Vec<ModelSource> {
    vec![
        ModelSource::new(user_dir),
        ModelSource::new("/usr/share/moodcart/models"),
    ]
}
