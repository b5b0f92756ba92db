use std::time::Duration;

/// Default deadline for a request/reply exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A request topic paired with the topic its replies arrive on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub request: &'static str,
    pub response: &'static str,
    pub timeout: Duration,
}

impl Route {
    pub const fn new(request: &'static str, response: &'static str) -> Self {
        Self {
            request,
            response,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Returns the same route with a different deadline.
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

/// Routes between the shop services.
pub mod routes {
    use super::Route;
    use bus::topics::*;

    pub const CART_PRODUCT_INFO: Route =
        Route::new(CART_PRODUCT_INFO_REQUEST, CART_PRODUCT_INFO_RESPONSE);
    pub const CART_PRODUCT_BLOCK: Route =
        Route::new(CART_PRODUCT_BLOCK_REQUEST, CART_PRODUCT_BLOCK_RESPONSE);
    pub const CART_CLEAR: Route = Route::new(CART_CLEAR_REQUEST, CART_CLEAR_RESPONSE);
    pub const PRODUCTS_TOTAL_PRICE: Route = Route::new(
        PRODUCTS_TOTAL_PRICE_BY_ID_REQUEST,
        PRODUCTS_TOTAL_PRICE_BY_ID_RESPONSE,
    );
    pub const ORDER_PRODUCT_UNLOCK: Route =
        Route::new(ORDER_PRODUCT_UNLOCK_REQUEST, ORDER_PRODUCT_UNLOCK_RESPONSE);
    pub const ORDER_CREATE: Route = Route::new(ORDER_CREATE_REQUEST, ORDER_CREATE_RESPONSE);
    pub const ORDER_SESSION: Route = Route::new(ORDER_SESSION_REQUEST, ORDER_SESSION_RESPONSE);
    pub const ORDER_INFO: Route = Route::new(ORDER_INFO_REQUEST, ORDER_INFO_RESPONSE);
    pub const ORDER_DELETE: Route = Route::new(ORDER_DELETE_REQUEST, ORDER_DELETE_RESPONSE);

    /// Every route, for start-up reply registration.
    pub const ALL: [Route; 9] = [
        CART_PRODUCT_INFO,
        CART_PRODUCT_BLOCK,
        CART_CLEAR,
        PRODUCTS_TOTAL_PRICE,
        ORDER_PRODUCT_UNLOCK,
        ORDER_CREATE,
        ORDER_SESSION,
        ORDER_INFO,
        ORDER_DELETE,
    ];
}
