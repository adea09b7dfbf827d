//! moodcart-core: Expression classification and recommendation policy.
//!
//! Uses SCRFD for face detection and FER+ for expression scoring, both
//! running via ONNX Runtime, and maps the dominant emotion to a price
//! window for catalog queries.

pub mod classifier;
pub mod detector;
pub mod expression;
pub mod policy;
pub mod types;

pub use classifier::{
    default_model_sources, ClassifierError, ExpressionBackend, ExpressionClassifier, ModelSource,
    ModelStatus, OnnxBackend,
};
pub use policy::{derive, Bucket, PolicyDecision, PolicyError, PriceWindow, MAX_TARGET_PRICE};
pub use types::{
    select_primary, BoundingBox, DetectionResult, Emotion, ExpressionVector, CONFIDENCE_GATE,
};
