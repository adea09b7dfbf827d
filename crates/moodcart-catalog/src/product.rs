//! Product schema and boundary conversion from catalog records.

use crate::catalog::CatalogError;
use serde::{Deserialize, Serialize, Serializer};

/// Decimal price kept as the catalog's exact string, with its numeric value
/// parsed once for comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct Price {
    raw: String,
    value: f64,
}

impl Price {
    /// Parse a non-negative decimal price.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let trimmed = raw.trim();
        let value: f64 = trimmed
            .parse()
            .map_err(|_| CatalogError::InvalidPrice(raw.to_string()))?;
        if !value.is_finite() || value < 0.0 {
            return Err(CatalogError::InvalidPrice(raw.to_string()));
        }
        Ok(Self {
            raw: trimmed.to_string(),
            value,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// A catalog product. Owned by the catalog; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: String,
    pub display_name: String,
    pub price: Price,
    /// Image file reference.
    pub image_ref: String,
    pub category: String,
    pub colour: Option<String>,
    pub article_type: Option<String>,
    pub link: Option<String>,
}

impl Product {
    /// Direct link when the catalog has one, else the image reference.
    pub fn image_url(&self) -> &str {
        self.link.as_deref().unwrap_or(&self.image_ref)
    }
}

/// JSON scalar that may arrive as either a string or a number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
        }
    }
}

/// Catalog record using the catalog's own column names.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: Scalar,
    pub product_display_name: String,
    pub price: Scalar,
    #[serde(default)]
    pub filename: Option<String>,
    pub master_category: String,
    #[serde(default)]
    pub base_colour: Option<String>,
    #[serde(default)]
    pub article_type: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

impl TryFrom<ProductRecord> for Product {
    type Error = CatalogError;

    fn try_from(record: ProductRecord) -> Result<Self, Self::Error> {
        let price = Price::parse(&record.price.into_string())?;
        Ok(Product {
            id: record.id.into_string(),
            display_name: record.product_display_name,
            price,
            image_ref: record.filename.unwrap_or_default(),
            category: record.master_category,
            colour: non_empty(record.base_colour),
            article_type: non_empty(record.article_type),
            link: non_empty(record.link),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Convert records, dropping (and logging) any whose price does not parse.
pub(crate) fn convert_records(records: Vec<ProductRecord>) -> Vec<Product> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone().into_string();
            match Product::try_from(record) {
                Ok(product) => Some(product),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "dropping catalog record");
                    None
                }
            }
        })
        .collect()
}
