//! Product service responders.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{MessageBus, Subscription};
use domain::{Catalog, Pricing};
use rpc::{Rejection, RequestHandler, routes, serve};

use super::reject;
use crate::messages::{PriceRequest, StockReleased, UnlockRequest};

/// Takes stock for a reservation and replies with its prices.
///
/// A redelivered request for the same reservation gets the same prices
/// without taking stock twice.
pub struct PriceHandler {
    catalog: Catalog,
}

#[async_trait]
impl RequestHandler for PriceHandler {
    type Request = PriceRequest;
    type Response = Pricing;

    async fn handle(&self, request: PriceRequest) -> Result<Pricing, Rejection> {
        self.catalog
            .reserve(request.reservation_id, &request.products)
            .map_err(reject)
    }
}

/// Gives reserved stock back. Safe to repeat.
pub struct UnlockHandler {
    catalog: Catalog,
}

#[async_trait]
impl RequestHandler for UnlockHandler {
    type Request = UnlockRequest;
    type Response = StockReleased;

    async fn handle(&self, request: UnlockRequest) -> Result<StockReleased, Rejection> {
        let restored = self.catalog.release(request.reservation_id);
        if restored {
            metrics::counter!("stock_releases_total").increment(1);
        }
        Ok(StockReleased {
            reservation_id: request.reservation_id,
            restored,
        })
    }
}

/// Serves the pricing and unlock routes.
pub async fn serve_catalog(
    bus: Arc<dyn MessageBus>,
    catalog: Catalog,
) -> bus::Result<Vec<Subscription>> {
    Ok(vec![
        serve(
            bus.clone(),
            routes::PRODUCTS_TOTAL_PRICE,
            Arc::new(PriceHandler {
                catalog: catalog.clone(),
            }),
        )
        .await?,
        serve(
            bus,
            routes::ORDER_PRODUCT_UNLOCK,
            Arc::new(UnlockHandler { catalog }),
        )
        .await?,
    ])
}
