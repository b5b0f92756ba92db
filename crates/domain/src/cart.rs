//! Shopping carts, owned by the cart service.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during cart operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("Cart is empty")]
    Empty,

    #[error("Cart is locked while an order is processing")]
    Locked,

    #[error("Invalid quantity for product {0}")]
    InvalidQuantity(ProductId),
}

/// A user's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub user_id: UserId,
    pub products: BTreeMap<ProductId, u32>,
    pub is_order_processing: bool,
}

impl Cart {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            products: BTreeMap::new(),
            is_order_processing: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// In-memory cart storage.
#[derive(Debug, Clone, Default)]
pub struct CartStore {
    carts: Arc<RwLock<HashMap<UserId, Cart>>>,
}

impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the user's cart, empty if they never added anything.
    pub fn get(&self, user_id: &UserId) -> Cart {
        self.read()
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Cart::new(user_id.clone()))
    }

    /// Adds `quantity` of a product.
    pub fn add_product(
        &self,
        user_id: &UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity(product_id));
        }
        let mut carts = self.write();
        let cart = carts
            .entry(user_id.clone())
            .or_insert_with(|| Cart::new(user_id.clone()));
        if cart.is_order_processing {
            return Err(CartError::Locked);
        }
        *cart.products.entry(product_id).or_insert(0) += quantity;
        Ok(cart.clone())
    }

    /// Removes a product entirely.
    pub fn remove_product(&self, user_id: &UserId, product_id: &ProductId) -> Result<Cart, CartError> {
        let mut carts = self.write();
        let Some(cart) = carts.get_mut(user_id) else {
            return Ok(Cart::new(user_id.clone()));
        };
        if cart.is_order_processing {
            return Err(CartError::Locked);
        }
        cart.products.remove(product_id);
        Ok(cart.clone())
    }

    /// Sets or clears the order-processing lock and returns the cart contents.
    ///
    /// Locking an already locked cart returns the same snapshot, so a
    /// redelivered request is harmless. Unlocking never fails.
    pub fn set_order_processing(&self, user_id: &UserId, processing: bool) -> Result<Cart, CartError> {
        let mut carts = self.write();
        match carts.get_mut(user_id) {
            Some(cart) if processing && cart.is_empty() => Err(CartError::Empty),
            Some(cart) => {
                cart.is_order_processing = processing;
                Ok(cart.clone())
            }
            None if processing => Err(CartError::Empty),
            None => Ok(Cart::new(user_id.clone())),
        }
    }

    /// Empties the cart and releases its lock.
    pub fn clear(&self, user_id: &UserId) {
        self.write().remove(user_id);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<UserId, Cart>> {
        self.carts.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<UserId, Cart>> {
        self.carts.write().unwrap_or_else(|e| e.into_inner())
    }
}
