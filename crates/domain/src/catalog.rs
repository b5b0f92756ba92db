//! Product catalog with stock reservations, owned by the product service.
//!
//! Stock is taken under a [`ReservationId`] chosen by the checkout. Every
//! reservation is remembered, so pricing the same reservation again returns
//! the original answer without touching stock, and releasing it restores
//! stock exactly once no matter how often the release is delivered.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use common::{Money, ProductId, ReservationId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during catalog operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("product {0} not found")]
    UnknownProduct(ProductId),

    #[error("insufficient stock for product {0}")]
    InsufficientStock(ProductId),

    #[error("reservation {0} was already released")]
    ReservationReleased(ReservationId),

    #[error("no products requested")]
    EmptyRequest,
}

/// A sellable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub amount_left: u32,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Money, amount_left: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            amount_left,
        }
    }
}

/// Prices fixed for a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub reservation_id: ReservationId,
    pub prices: BTreeMap<ProductId, Money>,
    pub total_price: Money,
}

/// Stock taken for one checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub reservation_id: ReservationId,
    pub quantities: BTreeMap<ProductId, u32>,
    pub pricing: Option<Pricing>,
    pub released: bool,
}

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<ProductId, Product>,
    reservations: HashMap<ReservationId, Reservation>,
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    state: Arc<RwLock<CatalogState>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog stocked with `products`.
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::new();
        for product in products {
            catalog.upsert(product);
        }
        catalog
    }

    /// Inserts or replaces a product.
    pub fn upsert(&self, product: Product) {
        self.write().products.insert(product.id.clone(), product);
    }

    pub fn product(&self, id: &ProductId) -> Option<Product> {
        self.read().products.get(id).cloned()
    }

    /// Returns the known products among `ids`; unknown ids are skipped.
    pub fn products<'a>(&self, ids: impl IntoIterator<Item = &'a ProductId>) -> Vec<Product> {
        let state = self.read();
        ids.into_iter()
            .filter_map(|id| state.products.get(id).cloned())
            .collect()
    }

    pub fn amount_left(&self, id: &ProductId) -> Option<u32> {
        self.read().products.get(id).map(|p| p.amount_left)
    }

    pub fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.read().reservations.get(&id).cloned()
    }

    /// Validates stock for every item, takes it, and prices the items.
    ///
    /// Either every item is taken or none is. A repeated call with the same
    /// reservation id returns the first pricing unchanged.
    pub fn reserve(
        &self,
        reservation_id: ReservationId,
        items: &BTreeMap<ProductId, u32>,
    ) -> Result<Pricing, CatalogError> {
        let mut state = self.write();

        if let Some(existing) = state.reservations.get(&reservation_id) {
            return match (&existing.pricing, existing.released) {
                (Some(pricing), false) => Ok(pricing.clone()),
                _ => Err(CatalogError::ReservationReleased(reservation_id)),
            };
        }
        if items.is_empty() {
            return Err(CatalogError::EmptyRequest);
        }

        for (product_id, quantity) in items {
            let product = state
                .products
                .get(product_id)
                .ok_or_else(|| CatalogError::UnknownProduct(product_id.clone()))?;
            if product.amount_left < *quantity {
                return Err(CatalogError::InsufficientStock(product_id.clone()));
            }
        }

        let mut prices = BTreeMap::new();
        let mut total_price = Money::zero();
        for (product_id, quantity) in items {
            if let Some(product) = state.products.get_mut(product_id) {
                product.amount_left -= quantity;
                prices.insert(product_id.clone(), product.price);
                total_price += product.price.multiply(*quantity);
            }
        }

        let pricing = Pricing {
            reservation_id,
            prices,
            total_price,
        };
        state.reservations.insert(
            reservation_id,
            Reservation {
                reservation_id,
                quantities: items.clone(),
                pricing: Some(pricing.clone()),
                released: false,
            },
        );
        tracing::debug!(%reservation_id, total = %total_price, "Stock reserved");
        Ok(pricing)
    }

    /// Returns reserved stock.
    ///
    /// Returns `true` if stock was restored by this call, `false` if the
    /// reservation was already released. Releasing an unknown reservation
    /// records it as released, so a reserve request arriving late for the
    /// same id is refused instead of leaking stock.
    pub fn release(&self, reservation_id: ReservationId) -> bool {
        let mut state = self.write();
        let CatalogState {
            products,
            reservations,
        } = &mut *state;

        let reservation = reservations
            .entry(reservation_id)
            .or_insert_with(|| Reservation {
                reservation_id,
                quantities: BTreeMap::new(),
                pricing: None,
                released: false,
            });
        if reservation.released {
            return false;
        }
        reservation.released = true;

        for (product_id, quantity) in &reservation.quantities {
            if let Some(product) = products.get_mut(product_id) {
                product.amount_left += quantity;
            }
        }
        tracing::debug!(%reservation_id, "Stock released");
        !reservation.quantities.is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::with_products([
            Product::new("A", "Mug", Money::from_dollars(10), 10),
            Product::new("B", "Lamp", Money::from_dollars(25), 3),
        ])
    }

    fn items(pairs: &[(&str, u32)]) -> BTreeMap<ProductId, u32> {
        pairs.iter().map(|(id, q)| (ProductId::new(*id), *q)).collect()
    }

    #[test]
    fn test_reserve_prices_and_takes_stock() {
        let catalog = catalog();
        let pricing = catalog
            .reserve(ReservationId::new(), &items(&[("A", 2)]))
            .unwrap();

        assert_eq!(pricing.total_price, Money::from_dollars(20));
        assert_eq!(
            pricing.prices.get(&ProductId::new("A")),
            Some(&Money::from_dollars(10))
        );
        assert_eq!(catalog.amount_left(&ProductId::new("A")), Some(8));
    }

    #[test]
    fn test_insufficient_stock_takes_nothing() {
        let catalog = catalog();
        let err = catalog
            .reserve(ReservationId::new(), &items(&[("A", 1), ("B", 5)]))
            .unwrap_err();

        assert_eq!(err.to_string(), "insufficient stock for product B");
        assert_eq!(catalog.amount_left(&ProductId::new("A")), Some(10));
        assert_eq!(catalog.amount_left(&ProductId::new("B")), Some(3));
    }

    #[test]
    fn test_repeated_reserve_is_idempotent() {
        let catalog = catalog();
        let id = ReservationId::new();
        let first = catalog.reserve(id, &items(&[("A", 2)])).unwrap();
        let second = catalog.reserve(id, &items(&[("A", 2)])).unwrap();

        assert_eq!(first, second);
        assert_eq!(catalog.amount_left(&ProductId::new("A")), Some(8));
    }

    #[test]
    fn test_release_restores_exactly_once() {
        let catalog = catalog();
        let id = ReservationId::new();
        catalog.reserve(id, &items(&[("A", 2), ("B", 1)])).unwrap();

        assert!(catalog.release(id));
        assert!(!catalog.release(id));
        assert_eq!(catalog.amount_left(&ProductId::new("A")), Some(10));
        assert_eq!(catalog.amount_left(&ProductId::new("B")), Some(3));
    }

    #[test]
    fn test_release_before_reserve_blocks_late_reserve() {
        let catalog = catalog();
        let id = ReservationId::new();

        assert!(!catalog.release(id));
        let late = catalog.reserve(id, &items(&[("A", 2)]));

        assert_eq!(late, Err(CatalogError::ReservationReleased(id)));
        assert_eq!(catalog.amount_left(&ProductId::new("A")), Some(10));
    }

    #[test]
    fn test_unknown_product() {
        let catalog = catalog();
        let err = catalog
            .reserve(ReservationId::new(), &items(&[("Z", 1)]))
            .unwrap_err();
        assert_eq!(err, CatalogError::UnknownProduct(ProductId::new("Z")));
    }

    #[test]
    fn test_products_lookup_skips_unknown() {
        let catalog = catalog();
        let ids = [ProductId::new("A"), ProductId::new("Z")];
        let found = catalog.products(&ids);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Mug");
    }
}
