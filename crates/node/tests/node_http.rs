//! Integration tests for the node's HTTP surface and wiring.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Money, ProductId, UserId};
use domain::{FixedProgression, OrderStatus, PaymentMethod, Product};
use metrics_exporter_prometheus::PrometheusHandle;
use node::{Config, Node};
use outbox::{InMemoryOutboxStore, OutboxStore};
use saga::CheckoutRequest;
use tokio::sync::watch;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn test_config() -> Config {
    Config {
        rpc_timeout: Duration::from_secs(2),
        outbox_sweep_interval: Duration::from_millis(20),
        reconcile_interval: Duration::from_secs(60),
        ..Config::default()
    }
}

async fn setup() -> (axum::Router, Node<InMemoryOutboxStore>) {
    let outbox = Arc::new(InMemoryOutboxStore::new());
    let node = Node::start(test_config(), outbox, Arc::new(FixedProgression::Hold))
        .await
        .unwrap();
    let app = node::create_app(node.state(), get_metrics_handle());
    (app, node)
}

fn webhook(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/payment")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _node) = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pendingRequests"], 0);
    assert_eq!(json["unsentOutbox"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _node) = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_completed_session_is_recorded() {
    let (app, node) = setup().await;

    let response = app
        .oneshot(webhook(serde_json::json!({
            "type": "checkout.session.completed",
            "sessionId": "cs_test_1",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(node.outbox.unsent_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_other_provider_events_are_ignored() {
    let (app, node) = setup().await;

    let response = app
        .oneshot(webhook(serde_json::json!({
            "type": "checkout.session.expired",
            "sessionId": "cs_test_2",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(node.outbox.unsent_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_webhook_is_rejected() {
    let (app, _node) = setup().await;

    let response = app
        .oneshot(webhook(serde_json::json!({ "type": "checkout.session.completed" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_catalog_is_seeded_from_config() {
    let config = Config {
        catalog_path: Some(
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/catalog.json"),
        ),
        ..test_config()
    };
    let node = Node::start(
        config,
        Arc::new(InMemoryOutboxStore::new()),
        Arc::new(FixedProgression::Hold),
    )
    .await
    .unwrap();

    assert_eq!(node.catalog.amount_left(&ProductId::new("A")), Some(10));
    assert_eq!(node.catalog.amount_left(&ProductId::new("B")), Some(3));

    let user = UserId::new("seeded");
    node.carts.add_product(&user, ProductId::new("B"), 2).unwrap();
    let receipt = node
        .checkout
        .checkout(CheckoutRequest {
            user_id: user,
            shipping_address: "1 Dock Road".into(),
            payment_method: PaymentMethod::Card,
        })
        .await
        .unwrap();
    assert_eq!(receipt.total_price, Money::from_dollars(10));
    assert_eq!(node.catalog.amount_left(&ProductId::new("B")), Some(1));
    node.stop().await;
}

#[tokio::test]
async fn test_missing_catalog_stops_start() {
    let config = Config {
        catalog_path: Some("/nonexistent/catalog.json".into()),
        ..test_config()
    };
    let started = Node::start(
        config,
        Arc::new(InMemoryOutboxStore::new()),
        Arc::new(FixedProgression::Hold),
    )
    .await;

    assert!(matches!(started, Err(node::NodeError::Catalog { .. })));
}

#[tokio::test]
async fn test_checkout_paid_through_webhook() {
    let (app, node) = setup().await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = node.spawn_workers(shutdown_rx);

    node.catalog
        .upsert(Product::new("A", "Water bottle", Money::from_dollars(10), 5));
    let user = UserId::new("alice");
    node.carts
        .add_product(&user, ProductId::new("A"), 2)
        .unwrap();

    let receipt = node
        .checkout
        .checkout(CheckoutRequest {
            user_id: user,
            shipping_address: "12 Market Square".into(),
            payment_method: PaymentMethod::Card,
        })
        .await
        .unwrap();
    assert_eq!(receipt.total_price, Money::from_dollars(20));

    let response = app
        .oneshot(webhook(serde_json::json!({
            "type": "checkout.session.completed",
            "sessionId": receipt.session_id,
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let status = node.orders.get(receipt.order_id).await.unwrap().status();
            if status == OrderStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    for worker in workers {
        worker.await.unwrap();
    }
    node.stop().await;
}
