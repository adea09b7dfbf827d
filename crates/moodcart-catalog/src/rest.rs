//! PostgREST (Supabase-style) catalog client.

use crate::catalog::{Catalog, CatalogError, CatalogRequest};
use crate::product::{convert_records, Product, ProductRecord};
use async_trait::async_trait;
use std::time::Duration;

const SELECT_COLUMNS: &str =
    "id,productDisplayName,price,filename,baseColour,articleType,masterCategory,link";

/// Connection settings for a REST catalog.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`.
    pub base_url: String,
    pub table: String,
    /// Sent as both `apikey` and bearer token when present.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub struct RestCatalog {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RestCatalog {
    pub fn new(config: RestConfig) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CatalogError::Unavailable(format!("http client: {e}")))?;
        let endpoint = format!(
            "{}/rest/v1/{}",
            config.base_url.trim_end_matches('/'),
            config.table
        );
        tracing::info!(%endpoint, "using REST catalog");
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
        })
    }

    async fn fetch(&self, params: &[(String, String)]) -> Result<Vec<ProductRecord>, CatalogError> {
        let mut req = self.client.get(&self.endpoint).query(params);
        if let Some(key) = &self.api_key {
            req = req.header("apikey", key).bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        resp.json::<Vec<ProductRecord>>()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Catalog for RestCatalog {
    async fn query(&self, request: &CatalogRequest) -> Result<Vec<Product>, CatalogError> {
        let records = self.fetch(&query_params(request)).await?;
        Ok(convert_records(records))
    }

    async fn get_by_id(&self, id: &str) -> Result<Product, CatalogError> {
        let params = vec![
            ("select".to_string(), SELECT_COLUMNS.to_string()),
            ("id".to_string(), format!("eq.{id}")),
            ("limit".to_string(), "1".to_string()),
        ];
        match self.fetch(&params).await?.into_iter().next() {
            Some(record) => Product::try_from(record),
            None => Err(CatalogError::NotFound(id.to_string())),
        }
    }
}

/// PostgREST filter parameters for a request.
fn query_params(request: &CatalogRequest) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), SELECT_COLUMNS.to_string())];
    if let Some(category) = &request.category {
        params.push(("masterCategory".to_string(), format!("eq.{category}")));
    }
    if let Some(min) = request.min_price {
        params.push(("price".to_string(), format!("gte.{min}")));
    }
    if let Some(max) = request.max_price {
        params.push(("price".to_string(), format!("lte.{max}")));
    }
    params.push(("limit".to_string(), request.effective_limit().to_string()));
    params
}
