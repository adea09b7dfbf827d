//! User entry points: camera control, recommendations, category search.

use crate::aggregator::{DetectionBoard, Inference};
use crate::session::{CaptureSession, SessionError, SessionState};
use moodcart_catalog::{CatalogError, CatalogQuery, Product, RecommendationFilters};
use moodcart_core::{
    ClassifierError, DetectionResult, Emotion, ModelStatus, PolicyError, PriceWindow,
};
use moodcart_hw::{CameraProvider, CaptureConstraints};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error(transparent)]
    Model(#[from] ClassifierError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// The recommendation list as last published, replaced wholesale per request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecommendationState {
    pub products: Vec<Product>,
    /// Derived window; `None` for plain category listings.
    pub window: Option<PriceWindow>,
    pub message: String,
    /// Dominant emotion the window was derived from.
    pub emotion: Option<Emotion>,
    pub loading: bool,
    /// Catalog failure behind an empty list.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantStatus {
    pub version: &'static str,
    pub session: SessionState,
    pub models: ModelStatus,
    pub detection: Option<DetectionResult>,
    pub notice: Option<String>,
}

pub struct Assistant {
    models: ModelStatus,
    board: Arc<DetectionBoard>,
    session: Mutex<CaptureSession>,
    session_state: watch::Receiver<SessionState>,
    catalog: CatalogQuery,
    recommendations: watch::Sender<RecommendationState>,
}

impl Assistant {
    pub fn new(
        inference: Arc<dyn Inference>,
        models: ModelStatus,
        provider: Arc<dyn CameraProvider>,
        catalog: CatalogQuery,
        sample_interval: Duration,
    ) -> Self {
        let board = Arc::new(DetectionBoard::new());
        let session = CaptureSession::new(
            provider,
            CaptureConstraints::default(),
            sample_interval,
            inference,
            board.clone(),
        );
        Self {
            models,
            board,
            session_state: session.subscribe_state(),
            session: Mutex::new(session),
            catalog,
            recommendations: watch::channel(RecommendationState::default()).0,
        }
    }

    /// Start the camera and the sampling loop.
    ///
    /// Refused with `ModelUnavailable` when no model source loaded, and with
    /// `CameraAccessDenied` once the camera has been denied.
    pub async fn start_camera(&self) -> Result<(), AssistantError> {
        self.models.ensure_ready()?;
        self.session.lock().await.start().await?;
        Ok(())
    }

    pub async fn stop_camera(&self) {
        self.session.lock().await.stop().await;
    }

    /// Derive a price window from the current detection and query the catalog.
    ///
    /// With no detection the neutral window applies. Catalog failures yield
    /// an empty list with `error` set. Oversized targets are refused before
    /// anything is published.
    pub async fn analyze_and_recommend(
        &self,
        target_price: u64,
        category: Option<&str>,
    ) -> Result<RecommendationState, AssistantError> {
        let emotion = self.board.current().map(|d| d.dominant_emotion);
        let decision = moodcart_core::derive(emotion, target_price)?;
        tracing::info!(
            emotion = ?emotion,
            bucket = ?decision.bucket,
            target_price,
            min = decision.window.min(),
            max = decision.window.max(),
            "recommending"
        );

        let filters =
            RecommendationFilters::within(&decision.window, normalize_category(category));
        let pending = RecommendationState {
            window: Some(decision.window),
            message: decision.message,
            emotion,
            loading: true,
            ..Default::default()
        };
        self.recommendations.send_replace(pending.clone());

        let outcome = self.catalog.query(&filters, Some(&decision.window)).await;
        Ok(self.settle(pending, outcome))
    }

    /// Plain category listing, independent of any detection.
    pub async fn search_by_category(&self, category: &str) -> RecommendationState {
        let category = normalize_category(Some(category));
        tracing::info!(category = ?category, "category search");
        let pending = RecommendationState {
            loading: true,
            ..Default::default()
        };
        self.recommendations.send_replace(pending.clone());

        let outcome = self.catalog.search_category(category).await;
        self.settle(pending, outcome)
    }

    fn settle(
        &self,
        pending: RecommendationState,
        outcome: Result<Vec<Product>, CatalogError>,
    ) -> RecommendationState {
        let state = match outcome {
            Ok(products) => RecommendationState {
                products,
                loading: false,
                ..pending
            },
            Err(e) => {
                tracing::warn!(error = %e, "catalog query failed");
                RecommendationState {
                    products: Vec::new(),
                    loading: false,
                    error: Some(e.to_string()),
                    ..pending
                }
            }
        };
        self.recommendations.send_replace(state.clone());
        state
    }

    pub fn current_detection(&self) -> Option<DetectionResult> {
        self.board.current()
    }

    pub fn recommendations(&self) -> RecommendationState {
        self.recommendations.borrow().clone()
    }

    pub async fn product(&self, id: &str) -> Result<Product, AssistantError> {
        Ok(self.catalog.product(id).await?)
    }

    pub fn status(&self) -> AssistantStatus {
        AssistantStatus {
            version: env!("CARGO_PKG_VERSION"),
            session: *self.session_state.borrow(),
            models: self.models.clone(),
            detection: self.board.current(),
            notice: self.board.notice(),
        }
    }
}

/// `"all"` and blank mean no category filter.
pub fn normalize_category(category: Option<&str>) -> Option<String> {
    let category = category?.trim();
    if category.is_empty() || category.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(category.to_string())
    }
}
