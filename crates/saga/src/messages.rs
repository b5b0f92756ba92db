//! Request and reply bodies exchanged between the shop services.
//!
//! Every body is flattened into the request/reply envelope next to
//! `correlationId`, so field names here are the wire names in camelCase.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, ReservationId, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Asks the cart owner to set or clear the order-processing lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartBlockRequest {
    pub user_id: UserId,
    pub is_order_processing: bool,
}

/// Identifies whose cart a request is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCleared {
    pub user_id: UserId,
}

/// Asks the catalog to take stock for a reservation and price it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRequest {
    pub reservation_id: ReservationId,
    pub products: BTreeMap<ProductId, u32>,
}

/// Asks the catalog to give reserved stock back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequest {
    pub reservation_id: ReservationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReleased {
    pub reservation_id: ReservationId,
    /// False when the reservation had already been released.
    pub restored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub total_price: Money,
}

/// Attaches a payment session to an unpaid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub order_id: OrderId,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAttached {
    pub order_id: OrderId,
    pub session_id: SessionId,
}

/// Asks for what is needed to pay an unpaid order again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfoRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDeleteRequest {
    pub order_id: OrderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDeleted {
    pub order_id: OrderId,
    /// False when there was nothing left to delete.
    pub existed: bool,
}

/// Published on `order-delivered` once an order reaches the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDelivered {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_price: Money,
    pub delivery_date: Option<DateTime<Utc>>,
}

/// Account event published by the auth service on
/// `user-registration-events` and `user-password-reset-events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDataOperationEvent {
    pub email: String,
    pub activation_code: String,
    pub expires_at: DateTime<Utc>,
    pub event_time: DateTime<Utc>,
}
