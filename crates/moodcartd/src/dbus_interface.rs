use crate::assistant::{Assistant, AssistantError};
use moodcart_catalog::CatalogError;
use moodcart_core::ClassifierError;
use serde::Serialize;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the Moodcart shopping assistant.
///
/// Bus name: org.moodcart.Assistant1
/// Object path: /org/moodcart/Assistant1
///
/// Structured replies are JSON strings.
pub struct AssistantService {
    assistant: Arc<Assistant>,
}

impl AssistantService {
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self { assistant }
    }
}

#[interface(name = "org.moodcart.Assistant1")]
impl AssistantService {
    /// Open the camera and begin expression sampling.
    async fn start_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start_camera requested");
        self.assistant.start_camera().await.map_err(to_fdo)
    }

    /// Stop sampling and release the camera.
    async fn stop_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop_camera requested");
        self.assistant.stop_camera().await;
        Ok(())
    }

    /// Recommend products around `target_price`, shaped by the current expression.
    ///
    /// An empty `category` means no category filter.
    async fn analyze_and_recommend(
        &self,
        target_price: u64,
        category: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(target_price, category, "analyze_and_recommend requested");
        let state = self
            .assistant
            .analyze_and_recommend(target_price, Some(category))
            .await
            .map_err(to_fdo)?;
        to_json(&state)
    }

    /// List products in a category without any price filtering.
    async fn search_by_category(&self, category: &str) -> zbus::fdo::Result<String> {
        tracing::info!(category, "search_by_category requested");
        let state = self.assistant.search_by_category(category).await;
        to_json(&state)
    }

    /// The last published recommendation list.
    async fn recommendations(&self) -> zbus::fdo::Result<String> {
        to_json(&self.assistant.recommendations())
    }

    /// Current detection result, or `null` when no face is detected.
    async fn current_expression(&self) -> zbus::fdo::Result<String> {
        to_json(&self.assistant.current_detection())
    }

    /// Product details by catalog id.
    async fn get_product(&self, id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(id, "get_product requested");
        let product = self.assistant.product(id).await.map_err(to_fdo)?;
        to_json(&product)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.assistant.status())
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn to_fdo(e: AssistantError) -> zbus::fdo::Error {
    tracing::warn!(error = %e, "request refused");
    match e {
        AssistantError::Model(ClassifierError::ModelUnavailable { .. }) => {
            zbus::fdo::Error::NotSupported(e.to_string())
        }
        AssistantError::Session(_) => zbus::fdo::Error::AccessDenied(e.to_string()),
        AssistantError::Catalog(CatalogError::NotFound(_)) => {
            zbus::fdo::Error::UnknownObject(e.to_string())
        }
        AssistantError::Policy(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        _ => zbus::fdo::Error::Failed(e.to_string()),
    }
}
