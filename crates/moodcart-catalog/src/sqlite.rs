//! SQLite-backed catalog.
//!
//! Prices are stored as text (matching the upstream dataset) and compared
//! with `CAST(price AS REAL)` so range filters are numeric.

use crate::catalog::{Catalog, CatalogError, CatalogRequest};
use crate::product::{convert_records, Product, ProductRecord, Scalar};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::Row;
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS products (
    id              TEXT PRIMARY KEY,
    display_name    TEXT NOT NULL,
    price           TEXT NOT NULL,
    filename        TEXT,
    master_category TEXT NOT NULL,
    base_colour     TEXT,
    article_type    TEXT,
    link            TEXT
);
CREATE INDEX IF NOT EXISTS idx_products_category ON products (master_category);
";

const COLUMNS: &str =
    "id, display_name, price, filename, master_category, base_colour, article_type, link";

pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    pub async fn open(path: &Path) -> Result<Self, CatalogError> {
        let conn = Connection::open(path).await.map_err(unavailable)?;
        tracing::info!(path = %path.display(), "opened sqlite catalog");
        Self::with_connection(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory().await.map_err(unavailable)?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, CatalogError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(unavailable)?;
        Ok(Self { conn })
    }

    /// Insert or replace products. Returns the number of rows written.
    pub async fn upsert(&self, products: Vec<Product>) -> Result<usize, CatalogError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut written = 0;
                {
                    let mut stmt = tx.prepare(&format!(
                        "INSERT OR REPLACE INTO products ({COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ))?;
                    for p in &products {
                        written += stmt.execute(rusqlite::params![
                            p.id,
                            p.display_name,
                            p.price.as_str(),
                            p.image_ref,
                            p.category,
                            p.colour,
                            p.article_type,
                            p.link,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(written)
            })
            .await
            .map_err(unavailable)
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn query(&self, request: &CatalogRequest) -> Result<Vec<Product>, CatalogError> {
        let (sql, params) = build_query(request);
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params), record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(unavailable)?;
        Ok(convert_records(records))
    }

    async fn get_by_id(&self, id: &str) -> Result<Product, CatalogError> {
        let key = id.to_string();
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {COLUMNS} FROM products WHERE id = ?1"))?;
                let rows = stmt
                    .query_map([key], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(unavailable)?;

        match records.into_iter().next() {
            Some(record) => Product::try_from(record),
            None => Err(CatalogError::NotFound(id.to_string())),
        }
    }
}

fn build_query(request: &CatalogRequest) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT {COLUMNS} FROM products WHERE 1 = 1");
    let mut params = Vec::new();
    if let Some(category) = &request.category {
        sql.push_str(" AND master_category = ?");
        params.push(Value::Text(category.clone()));
    }
    if let Some(min) = request.min_price {
        sql.push_str(" AND CAST(price AS REAL) >= ?");
        params.push(Value::Integer(min as i64));
    }
    if let Some(max) = request.max_price {
        sql.push_str(" AND CAST(price AS REAL) <= ?");
        params.push(Value::Integer(max as i64));
    }
    sql.push_str(" ORDER BY rowid LIMIT ?");
    params.push(Value::Integer(request.effective_limit() as i64));
    (sql, params)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ProductRecord> {
    Ok(ProductRecord {
        id: Scalar::Text(row.get(0)?),
        product_display_name: row.get(1)?,
        price: Scalar::Text(value_text(row.get(2)?)),
        filename: row.get(3)?,
        master_category: row.get(4)?,
        base_colour: row.get(5)?,
        article_type: row.get(6)?,
        link: row.get(7)?,
    })
}

/// Prices written by other tools may be stored with numeric affinity.
fn value_text(value: Value) -> String {
    match value {
        Value::Text(s) => s,
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Null | Value::Blob(_) => String::new(),
    }
}

fn unavailable(e: tokio_rusqlite::Error) -> CatalogError {
    CatalogError::Unavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::product;

    async fn seeded() -> SqliteCatalog {
        let catalog = SqliteCatalog::open_in_memory().await.unwrap();
        let written = catalog
            .upsert(vec![
                product("1", "95", "Apparel"),
                product("2", "180", "Apparel"),
                product("3", "600", "Apparel"),
                product("4", "1000", "Apparel"),
                product("5", "250", "Footwear"),
            ])
            .await
            .unwrap();
        assert_eq!(written, 5);
        catalog
    }

    fn ids(products: &[Product]) -> Vec<&str> {
        products.iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_numeric_price_range() {
        let catalog = seeded().await;
        let request = CatalogRequest {
            category: Some("Apparel".into()),
            min_price: Some(180),
            max_price: Some(600),
            ..Default::default()
        };
        let products = catalog.query(&request).await.unwrap();
        // Text comparison would have excluded "600" and included "1000".
        assert_eq!(ids(&products), vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_category_filter_only() {
        let catalog = seeded().await;
        let request = CatalogRequest {
            category: Some("Footwear".into()),
            ..Default::default()
        };
        assert_eq!(ids(&catalog.query(&request).await.unwrap()), vec!["5"]);
    }

    #[tokio::test]
    async fn test_limit_applies() {
        let catalog = seeded().await;
        let request = CatalogRequest {
            limit: 2,
            ..Default::default()
        };
        assert_eq!(catalog.query(&request).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let catalog = seeded().await;
        let p = catalog.get_by_id("3").await.unwrap();
        assert_eq!(p.price.as_str(), "600");
        assert_eq!(p.image_ref, "3.jpg");
        assert_eq!(
            catalog.get_by_id("missing").await.unwrap_err(),
            CatalogError::NotFound("missing".into())
        );
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let catalog = seeded().await;
        catalog.upsert(vec![product("1", "120", "Apparel")]).await.unwrap();
        assert_eq!(catalog.get_by_id("1").await.unwrap().price.value(), 120.0);
    }

    #[test]
    fn test_build_query_without_filters() {
        let (sql, params) = build_query(&CatalogRequest::default());
        assert!(!sql.contains("master_category ="));
        assert!(!sql.contains("CAST"));
        assert_eq!(params, vec![Value::Integer(50)]);
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(Value::Integer(600)), "600");
        assert_eq!(value_text(Value::Real(99.5)), "99.5");
    }
}
