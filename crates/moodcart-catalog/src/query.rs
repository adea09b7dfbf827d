//! Bounded, filtered, sorted catalog queries trimmed for display.

use crate::catalog::{Catalog, CatalogError, CatalogRequest, MAX_SERVER_RECORDS};
use crate::product::Product;
use moodcart_core::PriceWindow;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maximum number of products handed to the display.
pub const DISPLAY_LIMIT: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecommendationFilters {
    pub category: Option<String>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub sort_order: SortOrder,
}

impl RecommendationFilters {
    /// Filters bounded by a derived price window, cheapest first.
    pub fn within(window: &PriceWindow, category: Option<String>) -> Self {
        Self {
            category,
            min_price: Some(window.min()),
            max_price: Some(window.max()),
            sort_order: SortOrder::Ascending,
        }
    }

    /// Plain category listing with no price bounds.
    pub fn category_only(category: Option<String>) -> Self {
        Self {
            category,
            ..Default::default()
        }
    }
}

/// Recommendation queries against a [`Catalog`].
#[derive(Clone)]
pub struct CatalogQuery {
    catalog: Arc<dyn Catalog>,
}

impl CatalogQuery {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Fetch at most [`MAX_SERVER_RECORDS`], re-check the price window locally
    /// when one is given, sort by numeric price and trim to [`DISPLAY_LIMIT`].
    pub async fn query(
        &self,
        filters: &RecommendationFilters,
        window: Option<&PriceWindow>,
    ) -> Result<Vec<Product>, CatalogError> {
        let request = CatalogRequest {
            category: filters.category.clone().filter(|c| !c.trim().is_empty()),
            min_price: filters.min_price,
            max_price: filters.max_price,
            limit: MAX_SERVER_RECORDS,
        };

        let mut products = self.catalog.query(&request).await?;
        let fetched = products.len();
        products.truncate(MAX_SERVER_RECORDS);

        // The server may compare prices as text; re-apply the window numerically.
        if let Some(window) = window {
            products.retain(|p| window.contains(p.price.value()));
        }

        match filters.sort_order {
            SortOrder::Ascending => {
                products.sort_by(|a, b| a.price.value().total_cmp(&b.price.value()))
            }
            SortOrder::Descending => {
                products.sort_by(|a, b| b.price.value().total_cmp(&a.price.value()))
            }
        }
        products.truncate(DISPLAY_LIMIT);

        tracing::debug!(
            category = ?request.category,
            min = ?request.min_price,
            max = ?request.max_price,
            fetched,
            shown = products.len(),
            "catalog query"
        );
        Ok(products)
    }

    /// Category listing: no price derivation and no price filtering.
    pub async fn search_category(
        &self,
        category: Option<String>,
    ) -> Result<Vec<Product>, CatalogError> {
        self.query(&RecommendationFilters::category_only(category), None)
            .await
    }

    pub async fn product(&self, id: &str) -> Result<Product, CatalogError> {
        self.catalog.get_by_id(id).await
    }
}
