//! Checkout saga, driven by the payment service.
//!
//! Steps, each undone in reverse order when a later one fails:
//!
//! 1. `block-cart`: lock the cart and take a snapshot (undo: unlock)
//! 2. `price-products`: reserve stock and fix prices (undo: unlock stock)
//! 3. `create-order`: persist the order in `CREATED` (undo: delete it)
//! 4. `open-payment-session`: open a provider session and attach it
//! 5. `clear-cart`: empty the cart, best effort
//!
//! The open payment session is the commit point: a cart that cannot be
//! cleared afterwards is logged and left blocked, the order stays.
//!
//! Payment itself completes out of band through the provider webhook.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId, ReservationId, SessionId, UserId};
use domain::{Cart, NewOrder, OrderLine, PaymentMethod, Pricing, RepaymentInfo};
use rpc::{RequestReplyClient, RetryPolicy, Route, RpcError, retry_with_backoff, routes};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError, StepError};
use crate::messages::{
    CartBlockRequest, CartCleared, CartRequest, OrderCreated, OrderDeleteRequest, OrderDeleted,
    OrderInfoRequest, PriceRequest, SessionAttached, SessionRequest, StockReleased, UnlockRequest,
};
use crate::participants::payment::{PaymentGateway, PaymentRequest, PaymentSession};
use crate::runner::{Saga, SagaStep};

pub const STEP_BLOCK_CART: &str = "block-cart";
pub const STEP_PRICE_PRODUCTS: &str = "price-products";
pub const STEP_CREATE_ORDER: &str = "create-order";
pub const STEP_OPEN_PAYMENT_SESSION: &str = "open-payment-session";
pub const STEP_CLEAR_CART: &str = "clear-cart";

/// Deadlines and retry settings for the checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutConfig {
    /// Deadline for requests without a dedicated setting.
    pub request_timeout: Duration,
    /// Deadline for pricing and reserving the cart contents.
    pub pricing_timeout: Duration,
    /// Deadline for attaching the payment session to the order.
    pub session_timeout: Duration,
    /// Retry policy for compensations.
    pub compensation_policy: RetryPolicy,
    /// Retries for clearing the cart once the payment session is open.
    pub cart_clear_policy: RetryPolicy,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            request_timeout: rpc::route::DEFAULT_TIMEOUT,
            pricing_timeout: Duration::from_secs(10),
            session_timeout: Duration::from_secs(10),
            compensation_policy: RetryPolicy::default(),
            cart_clear_policy: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(100))
                .build(),
        }
    }
}

/// A customer's request to pay for their cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub shipping_address: String,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

/// Where the customer goes to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReceipt {
    pub order_id: OrderId,
    pub session_id: SessionId,
    pub payment_url: String,
    pub total_price: Money,
}

/// Data accumulated by the checkout steps.
#[derive(Debug, Clone)]
pub struct CheckoutContext {
    pub request: CheckoutRequest,
    /// Chosen up front so that pricing and unlocking agree on it.
    pub reservation_id: ReservationId,
    pub cart: Option<Cart>,
    pub pricing: Option<Pricing>,
    pub order: Option<OrderCreated>,
    pub session: Option<PaymentSession>,
}

impl CheckoutContext {
    pub fn new(request: CheckoutRequest) -> Self {
        Self {
            request,
            reservation_id: ReservationId::new(),
            cart: None,
            pricing: None,
            order: None,
            session: None,
        }
    }

    /// Builds the order from the cart snapshot and the reserved prices.
    pub fn new_order(&self) -> std::result::Result<NewOrder, StepError> {
        let cart = self.cart.as_ref().ok_or(StepError::MissingData("cart"))?;
        let pricing = self
            .pricing
            .as_ref()
            .ok_or(StepError::MissingData("pricing"))?;

        let lines = cart
            .products
            .iter()
            .map(|(product_id, quantity)| {
                pricing
                    .prices
                    .get(product_id)
                    .map(|price| OrderLine::new(product_id.clone(), *quantity, *price))
                    .ok_or(StepError::MissingData("product price"))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(NewOrder {
            user_id: self.request.user_id.clone(),
            reservation_id: self.reservation_id,
            lines,
            shipping_address: self.request.shipping_address.clone(),
            total_price: pricing.total_price,
            payment_method: self.request.payment_method,
        })
    }

    fn receipt(&self) -> std::result::Result<CheckoutReceipt, StepError> {
        let order = self.order.as_ref().ok_or(StepError::MissingData("order"))?;
        let session = self
            .session
            .as_ref()
            .ok_or(StepError::MissingData("payment session"))?;
        Ok(CheckoutReceipt {
            order_id: order.order_id,
            session_id: session.session_id.clone(),
            payment_url: session.url.clone(),
            total_price: order.total_price,
        })
    }
}

struct BlockCart {
    client: RequestReplyClient,
    route: Route,
}

#[async_trait]
impl SagaStep<CheckoutContext> for BlockCart {
    fn name(&self) -> &'static str {
        STEP_BLOCK_CART
    }

    async fn execute(&self, ctx: &mut CheckoutContext) -> std::result::Result<(), StepError> {
        let cart: Cart = self
            .client
            .call(
                &self.route,
                &CartBlockRequest {
                    user_id: ctx.request.user_id.clone(),
                    is_order_processing: true,
                },
            )
            .await?;
        ctx.cart = Some(cart);
        Ok(())
    }

    async fn compensate(&self, ctx: &CheckoutContext) -> std::result::Result<(), StepError> {
        let _: Cart = self
            .client
            .call(
                &self.route,
                &CartBlockRequest {
                    user_id: ctx.request.user_id.clone(),
                    is_order_processing: false,
                },
            )
            .await?;
        Ok(())
    }

    fn compensates_own_failure(&self, error: &StepError) -> bool {
        error.is_ambiguous()
    }
}

struct PriceProducts {
    client: RequestReplyClient,
    route: Route,
    unlock: Route,
}

#[async_trait]
impl SagaStep<CheckoutContext> for PriceProducts {
    fn name(&self) -> &'static str {
        STEP_PRICE_PRODUCTS
    }

    async fn execute(&self, ctx: &mut CheckoutContext) -> std::result::Result<(), StepError> {
        let cart = ctx.cart.as_ref().ok_or(StepError::MissingData("cart"))?;
        let pricing: Pricing = self
            .client
            .call(
                &self.route,
                &PriceRequest {
                    reservation_id: ctx.reservation_id,
                    products: cart.products.clone(),
                },
            )
            .await?;
        tracing::info!(reservation_id = %ctx.reservation_id, total = %pricing.total_price, "Stock reserved");
        ctx.pricing = Some(pricing);
        Ok(())
    }

    async fn compensate(&self, ctx: &CheckoutContext) -> std::result::Result<(), StepError> {
        let released: StockReleased = self
            .client
            .call(
                &self.unlock,
                &UnlockRequest {
                    reservation_id: ctx.reservation_id,
                },
            )
            .await?;
        tracing::info!(reservation_id = %ctx.reservation_id, restored = released.restored, "Stock unlocked");
        Ok(())
    }

    // The catalog may have taken stock even though no prices came back.
    fn compensates_own_failure(&self, error: &StepError) -> bool {
        error.is_ambiguous()
    }
}

struct CreateOrder {
    client: RequestReplyClient,
    route: Route,
    delete: Route,
}

#[async_trait]
impl SagaStep<CheckoutContext> for CreateOrder {
    fn name(&self) -> &'static str {
        STEP_CREATE_ORDER
    }

    async fn execute(&self, ctx: &mut CheckoutContext) -> std::result::Result<(), StepError> {
        let new_order = ctx.new_order()?;
        let created: OrderCreated = self
            .client
            .call(&self.route, &new_order)
            .await?;
        tracing::info!(order_id = %created.order_id, "Order created");
        ctx.order = Some(created);
        Ok(())
    }

    async fn compensate(&self, ctx: &CheckoutContext) -> std::result::Result<(), StepError> {
        // An order lost to a timeout is removed by the reconciliation sweep.
        let Some(order) = &ctx.order else {
            return Ok(());
        };
        let _: OrderDeleted = self
            .client
            .call(
                &self.delete,
                &OrderDeleteRequest {
                    order_id: order.order_id,
                },
            )
            .await?;
        Ok(())
    }
}

struct OpenPaymentSession {
    client: RequestReplyClient,
    gateway: Arc<dyn PaymentGateway>,
    route: Route,
}

#[async_trait]
impl SagaStep<CheckoutContext> for OpenPaymentSession {
    fn name(&self) -> &'static str {
        STEP_OPEN_PAYMENT_SESSION
    }

    async fn execute(&self, ctx: &mut CheckoutContext) -> std::result::Result<(), StepError> {
        let order = ctx.order.as_ref().ok_or(StepError::MissingData("order"))?;
        let session = open_and_attach(
            &self.client,
            self.gateway.as_ref(),
            &self.route,
            PaymentRequest {
                order_id: order.order_id,
                total_price: order.total_price,
                payment_method: ctx.request.payment_method,
            },
        )
        .await?;
        ctx.session = Some(session);
        Ok(())
    }
}

struct ClearCart {
    client: RequestReplyClient,
    route: Route,
    policy: RetryPolicy,
}

#[async_trait]
impl SagaStep<CheckoutContext> for ClearCart {
    fn name(&self) -> &'static str {
        STEP_CLEAR_CART
    }

    async fn execute(&self, ctx: &mut CheckoutContext) -> std::result::Result<(), StepError> {
        let request = CartRequest {
            user_id: ctx.request.user_id.clone(),
        };
        let cleared: std::result::Result<CartCleared, RpcError> =
            retry_with_backoff(&self.policy, RpcError::is_retryable, || {
                self.client.call(&self.route, &request)
            })
            .await;
        if let Err(e) = cleared {
            tracing::warn!(user_id = %request.user_id, error = %e, "Cart left blocked after checkout");
            metrics::counter!("checkout_cart_clear_failures_total").increment(1);
        }
        Ok(())
    }
}

/// Opens a provider session for an order and stores it on the order.
async fn open_and_attach(
    client: &RequestReplyClient,
    gateway: &dyn PaymentGateway,
    route: &Route,
    request: PaymentRequest,
) -> std::result::Result<PaymentSession, StepError> {
    let session = gateway.open_session(&request).await?;
    let _: SessionAttached = client
        .call(
            route,
            &SessionRequest {
                order_id: request.order_id,
                session_id: session.session_id.clone(),
            },
        )
        .await?;
    tracing::info!(order_id = %request.order_id, session_id = %session.session_id, "Payment session attached");
    Ok(session)
}

/// Runs checkouts and repayments on behalf of the payment service.
pub struct Checkout {
    client: RequestReplyClient,
    gateway: Arc<dyn PaymentGateway>,
    session_route: Route,
    info_route: Route,
    saga: Saga<CheckoutContext>,
}

impl Checkout {
    pub fn new(
        client: RequestReplyClient,
        gateway: Arc<dyn PaymentGateway>,
        config: CheckoutConfig,
    ) -> Self {
        let timeout = config.request_timeout;
        let session_route = routes::ORDER_SESSION.with_timeout(config.session_timeout);
        let saga = Saga::new("checkout")
            .compensation_policy(config.compensation_policy)
            .step(BlockCart {
                client: client.clone(),
                route: routes::CART_PRODUCT_BLOCK.with_timeout(timeout),
            })
            .step(PriceProducts {
                client: client.clone(),
                route: routes::PRODUCTS_TOTAL_PRICE.with_timeout(config.pricing_timeout),
                unlock: routes::ORDER_PRODUCT_UNLOCK.with_timeout(timeout),
            })
            .step(CreateOrder {
                client: client.clone(),
                route: routes::ORDER_CREATE.with_timeout(timeout),
                delete: routes::ORDER_DELETE.with_timeout(timeout),
            })
            .step(OpenPaymentSession {
                client: client.clone(),
                gateway: gateway.clone(),
                route: session_route,
            })
            .step(ClearCart {
                client: client.clone(),
                route: routes::CART_CLEAR.with_timeout(timeout),
                policy: config.cart_clear_policy,
            });

        Self {
            client,
            gateway,
            session_route,
            info_route: routes::ORDER_INFO.with_timeout(timeout),
            saga,
        }
    }

    pub fn saga(&self) -> &Saga<CheckoutContext> {
        &self.saga
    }

    /// Turns the user's cart into an unpaid order with an open payment session.
    ///
    /// On failure every completed step is undone; use
    /// [`SagaError::user_message`] for what to show the customer.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        let mut ctx = CheckoutContext::new(request);
        let outcome = self.saga.run(&mut ctx).await;
        metrics::counter!(
            "checkouts_total",
            "outcome" => if outcome.is_ok() { "completed" } else { "failed" }
        )
        .increment(1);
        outcome?;

        ctx.receipt().map_err(|reason| SagaError::StepFailed {
            step: STEP_CLEAR_CART,
            reason,
        })
    }

    /// Opens a new payment session for an unpaid order.
    #[tracing::instrument(skip(self))]
    pub async fn repay(&self, order_id: OrderId, user_id: UserId) -> Result<CheckoutReceipt> {
        let info: RepaymentInfo = self
            .client
            .call(&self.info_route, &OrderInfoRequest { order_id, user_id })
            .await?;

        let session = open_and_attach(
            &self.client,
            self.gateway.as_ref(),
            &self.session_route,
            PaymentRequest {
                order_id: info.order_id,
                total_price: info.total_price,
                payment_method: info.payment_method,
            },
        )
        .await
        .map_err(|reason| SagaError::StepFailed {
            step: STEP_OPEN_PAYMENT_SESSION,
            reason,
        })?;

        Ok(CheckoutReceipt {
            order_id: info.order_id,
            session_id: session.session_id,
            payment_url: session.url,
            total_price: info.total_price,
        })
    }
}
