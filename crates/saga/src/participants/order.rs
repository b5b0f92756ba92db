//! Order service responders and the payment confirmation consumer.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{HandlerError, Message, MessageBus, MessageHandler, Subscription, topics};
use common::SessionId;
use domain::{NewOrder, OrderError, OrderRepository, OrderService, RepaymentInfo};
use rpc::{Rejection, RequestHandler, routes, serve};

use super::reject;
use crate::messages::{
    OrderCreated, OrderDeleteRequest, OrderDeleted, OrderInfoRequest, SessionAttached,
    SessionRequest,
};

/// Persists a checked-out order in `CREATED`.
pub struct CreateOrderHandler<R: OrderRepository> {
    orders: Arc<OrderService<R>>,
}

#[async_trait]
impl<R: OrderRepository + 'static> RequestHandler for CreateOrderHandler<R> {
    type Request = NewOrder;
    type Response = OrderCreated;

    async fn handle(&self, request: NewOrder) -> Result<OrderCreated, Rejection> {
        let order = self.orders.create(request).await.map_err(reject)?;
        Ok(OrderCreated {
            order_id: order.id(),
            total_price: order.total_price(),
        })
    }
}

/// Records the payment session opened for an order.
pub struct AttachSessionHandler<R: OrderRepository> {
    orders: Arc<OrderService<R>>,
}

#[async_trait]
impl<R: OrderRepository + 'static> RequestHandler for AttachSessionHandler<R> {
    type Request = SessionRequest;
    type Response = SessionAttached;

    async fn handle(&self, request: SessionRequest) -> Result<SessionAttached, Rejection> {
        self.orders
            .attach_session(request.order_id, request.session_id.clone())
            .await
            .map_err(reject)?;
        Ok(SessionAttached {
            order_id: request.order_id,
            session_id: request.session_id,
        })
    }
}

/// Answers repayment lookups for the order's owner.
pub struct OrderInfoHandler<R: OrderRepository> {
    orders: Arc<OrderService<R>>,
}

#[async_trait]
impl<R: OrderRepository + 'static> RequestHandler for OrderInfoHandler<R> {
    type Request = OrderInfoRequest;
    type Response = RepaymentInfo;

    async fn handle(&self, request: OrderInfoRequest) -> Result<RepaymentInfo, Rejection> {
        self.orders
            .repayment_info(request.order_id, &request.user_id)
            .await
            .map_err(reject)
    }
}

/// Deletes an unpaid order. Deleting a missing order succeeds.
pub struct DeleteOrderHandler<R: OrderRepository> {
    orders: Arc<OrderService<R>>,
}

#[async_trait]
impl<R: OrderRepository + 'static> RequestHandler for DeleteOrderHandler<R> {
    type Request = OrderDeleteRequest;
    type Response = OrderDeleted;

    async fn handle(&self, request: OrderDeleteRequest) -> Result<OrderDeleted, Rejection> {
        let existed = match self.orders.delete(request.order_id).await {
            Ok(_) => true,
            Err(OrderError::NotFound(_)) => false,
            Err(e) => return Err(reject(e)),
        };
        Ok(OrderDeleted {
            order_id: request.order_id,
            existed,
        })
    }
}

/// Applies `order-paid` events: the payload is the paid session id.
///
/// Unknown sessions and repeated confirmations are acknowledged without
/// effect, so redelivery never moves an order twice.
pub struct OrderPaidConsumer<R: OrderRepository> {
    orders: Arc<OrderService<R>>,
}

impl<R: OrderRepository> OrderPaidConsumer<R> {
    pub fn new(orders: Arc<OrderService<R>>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl<R: OrderRepository + 'static> MessageHandler for OrderPaidConsumer<R> {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let session_id: SessionId = match message.decode() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(message_id = %message.id, error = %e, "Discarding malformed order-paid event");
                return Ok(());
            }
        };

        match self.orders.mark_paid_by_session(&session_id).await {
            Ok(Some(order)) => {
                metrics::counter!("orders_paid_total").increment(1);
                tracing::info!(order_id = %order.id(), %session_id, "Payment applied");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "Payment confirmation not applicable");
            }
        }
        Ok(())
    }
}

/// Serves every order route and consumes `order-paid`.
pub async fn serve_orders<R: OrderRepository + 'static>(
    bus: Arc<dyn MessageBus>,
    orders: Arc<OrderService<R>>,
) -> bus::Result<Vec<Subscription>> {
    Ok(vec![
        serve(
            bus.clone(),
            routes::ORDER_CREATE,
            Arc::new(CreateOrderHandler {
                orders: orders.clone(),
            }),
        )
        .await?,
        serve(
            bus.clone(),
            routes::ORDER_SESSION,
            Arc::new(AttachSessionHandler {
                orders: orders.clone(),
            }),
        )
        .await?,
        serve(
            bus.clone(),
            routes::ORDER_INFO,
            Arc::new(OrderInfoHandler {
                orders: orders.clone(),
            }),
        )
        .await?,
        serve(
            bus.clone(),
            routes::ORDER_DELETE,
            Arc::new(DeleteOrderHandler {
                orders: orders.clone(),
            }),
        )
        .await?,
        bus.subscribe(topics::ORDER_PAID, Arc::new(OrderPaidConsumer::new(orders)))
            .await?,
    ])
}
