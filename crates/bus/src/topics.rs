//! Topic names shared by the shop services.

pub const CART_PRODUCT_INFO_REQUEST: &str = "cart-product-info-request";
pub const CART_PRODUCT_INFO_RESPONSE: &str = "cart-product-info-response";

pub const CART_PRODUCT_BLOCK_REQUEST: &str = "cart-product-block-request";
pub const CART_PRODUCT_BLOCK_RESPONSE: &str = "cart-product-block-response";

pub const CART_CLEAR_REQUEST: &str = "cart-clear-request";
pub const CART_CLEAR_RESPONSE: &str = "cart-clear-response";

pub const PRODUCTS_TOTAL_PRICE_BY_ID_REQUEST: &str = "products-total-price-by-id-request";
pub const PRODUCTS_TOTAL_PRICE_BY_ID_RESPONSE: &str = "products-total-price-by-id-response";

pub const ORDER_PRODUCT_UNLOCK_REQUEST: &str = "order-product-unlock-request";
pub const ORDER_PRODUCT_UNLOCK_RESPONSE: &str = "order-product-unlock-response";

pub const ORDER_CREATE_REQUEST: &str = "order-create-request";
pub const ORDER_CREATE_RESPONSE: &str = "order-create-response";

pub const ORDER_SESSION_REQUEST: &str = "order-session-request";
pub const ORDER_SESSION_RESPONSE: &str = "order-session-response";

pub const ORDER_INFO_REQUEST: &str = "order-info-request";
pub const ORDER_INFO_RESPONSE: &str = "order-info-response";

pub const ORDER_DELETE_REQUEST: &str = "order-delete-request";
pub const ORDER_DELETE_RESPONSE: &str = "order-delete-response";

// Durable, outbox-backed topics.
pub const ORDER_PAID: &str = "order-paid";
pub const USER_REGISTRATION_EVENTS: &str = "user-registration-events";
pub const USER_PASSWORD_RESET_EVENTS: &str = "user-password-reset-events";

// Fire-and-forget notifications.
pub const ORDER_DELIVERED: &str = "order-delivered";
