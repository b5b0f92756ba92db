//! Catalog seeding from a JSON product list.

use std::path::Path;

use domain::{Catalog, Product};

use crate::error::NodeError;

/// Reads a JSON array of products, e.g.
/// `[{ "id": "A", "name": "Water bottle", "price": 1000, "amountLeft": 10 }]`.
/// Prices are in cents.
pub async fn load_products(path: &Path) -> Result<Vec<Product>, NodeError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| NodeError::Catalog {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    serde_json::from_str(&raw).map_err(|e| NodeError::Catalog {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Loads the products at `path` into `catalog`, returning how many were added.
#[tracing::instrument(skip(catalog))]
pub async fn seed_catalog(catalog: &Catalog, path: &Path) -> Result<usize, NodeError> {
    let products = load_products(path).await?;
    let count = products.len();
    for product in products {
        catalog.upsert(product);
    }
    tracing::info!(count, "Catalog seeded");
    Ok(count)
}
