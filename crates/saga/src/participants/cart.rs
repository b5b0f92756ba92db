//! Cart service responders.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{MessageBus, Subscription};
use domain::{Cart, CartStore};
use rpc::{Rejection, RequestHandler, routes, serve};

use super::reject;
use crate::messages::{CartBlockRequest, CartCleared, CartRequest};

/// Sets or clears the order-processing lock and replies with the cart.
pub struct CartBlockHandler {
    store: CartStore,
}

#[async_trait]
impl RequestHandler for CartBlockHandler {
    type Request = CartBlockRequest;
    type Response = Cart;

    async fn handle(&self, request: CartBlockRequest) -> Result<Cart, Rejection> {
        self.store
            .set_order_processing(&request.user_id, request.is_order_processing)
            .map_err(reject)
    }
}

/// Replies with the current cart contents.
pub struct CartInfoHandler {
    store: CartStore,
}

#[async_trait]
impl RequestHandler for CartInfoHandler {
    type Request = CartRequest;
    type Response = Cart;

    async fn handle(&self, request: CartRequest) -> Result<Cart, Rejection> {
        Ok(self.store.get(&request.user_id))
    }
}

/// Empties the cart after a checkout went through.
pub struct CartClearHandler {
    store: CartStore,
}

#[async_trait]
impl RequestHandler for CartClearHandler {
    type Request = CartRequest;
    type Response = CartCleared;

    async fn handle(&self, request: CartRequest) -> Result<CartCleared, Rejection> {
        self.store.clear(&request.user_id);
        Ok(CartCleared {
            user_id: request.user_id,
        })
    }
}

/// Serves every cart route.
pub async fn serve_cart(
    bus: Arc<dyn MessageBus>,
    store: CartStore,
) -> bus::Result<Vec<Subscription>> {
    Ok(vec![
        serve(
            bus.clone(),
            routes::CART_PRODUCT_BLOCK,
            Arc::new(CartBlockHandler {
                store: store.clone(),
            }),
        )
        .await?,
        serve(
            bus.clone(),
            routes::CART_PRODUCT_INFO,
            Arc::new(CartInfoHandler {
                store: store.clone(),
            }),
        )
        .await?,
        serve(bus, routes::CART_CLEAR, Arc::new(CartClearHandler { store })).await?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::InMemoryBus;
    use common::UserId;
    use rpc::{RequestReplyClient, RpcError};

    async fn setup() -> (RequestReplyClient, CartStore) {
        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
        let store = CartStore::new();
        serve_cart(bus.clone(), store.clone()).await.unwrap();
        (RequestReplyClient::new(bus), store)
    }

    #[tokio::test]
    async fn block_replies_with_locked_snapshot() {
        let (client, store) = setup().await;
        let user = UserId::new("u1");
        store.add_product(&user, "A".into(), 2).unwrap();

        let cart: Cart = client
            .call(
                &routes::CART_PRODUCT_BLOCK,
                &CartBlockRequest {
                    user_id: user.clone(),
                    is_order_processing: true,
                },
            )
            .await
            .unwrap();

        assert!(cart.is_order_processing);
        assert_eq!(cart.products.len(), 1);
        assert!(store.get(&user).is_order_processing);
    }

    #[tokio::test]
    async fn blocking_empty_cart_is_rejected() {
        let (client, _store) = setup().await;
        let err = client
            .call::<_, Cart>(
                &routes::CART_PRODUCT_BLOCK,
                &CartBlockRequest {
                    user_id: UserId::new("nobody"),
                    is_order_processing: true,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::RemoteError("Cart is empty".into()));
    }

    #[tokio::test]
    async fn clear_empties_cart() {
        let (client, store) = setup().await;
        let user = UserId::new("u2");
        store.add_product(&user, "A".into(), 1).unwrap();

        let cleared: CartCleared = client
            .call(
                &routes::CART_CLEAR,
                &CartRequest {
                    user_id: user.clone(),
                },
            )
            .await
            .unwrap();

        assert_eq!(cleared.user_id, user);
        let info: Cart = client
            .call(&routes::CART_PRODUCT_INFO, &CartRequest { user_id: user })
            .await
            .unwrap();
        assert!(info.is_empty());
    }
}
