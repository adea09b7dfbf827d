use crate::product::Product;
use async_trait::async_trait;
use thiserror::Error;

/// Upper bound on records fetched from a backend per query.
pub const MAX_SERVER_RECORDS: usize = 50;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("product not found: {0}")]
    NotFound(String),
    #[error("invalid price: {0:?}")]
    InvalidPrice(String),
    #[error("malformed catalog response: {0}")]
    Decode(String),
}

/// Server-side query. Price bounds are compared numerically where the backend can.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRequest {
    pub category: Option<String>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub limit: usize,
}

impl Default for CatalogRequest {
    fn default() -> Self {
        Self {
            category: None,
            min_price: None,
            max_price: None,
            limit: MAX_SERVER_RECORDS,
        }
    }
}

impl CatalogRequest {
    /// Requested limit, never above [`MAX_SERVER_RECORDS`].
    pub fn effective_limit(&self) -> usize {
        self.limit.min(MAX_SERVER_RECORDS)
    }

    pub fn has_price_bounds(&self) -> bool {
        self.min_price.is_some() || self.max_price.is_some()
    }
}

/// External product catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn query(&self, request: &CatalogRequest) -> Result<Vec<Product>, CatalogError>;

    /// `Err(NotFound)` when no product has this id.
    async fn get_by_id(&self, id: &str) -> Result<Product, CatalogError>;
}
