//! moodcart-catalog: Product catalog access.
//!
//! Defines the explicit [`Product`] schema (price validated once at the
//! boundary), the [`Catalog`] backend trait with SQLite and PostgREST
//! implementations, and [`CatalogQuery`], which filters, sorts and trims
//! results for display.

pub mod catalog;
pub mod product;
pub mod query;
pub mod rest;
pub mod sqlite;

pub use catalog::{Catalog, CatalogError, CatalogRequest, MAX_SERVER_RECORDS};
pub use product::{Price, Product, ProductRecord};
pub use query::{CatalogQuery, RecommendationFilters, SortOrder, DISPLAY_LIMIT};
pub use rest::{RestCatalog, RestConfig};
pub use sqlite::SqliteCatalog;
