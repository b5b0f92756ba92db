//! Wiring of every participant on one in-process bus.

use std::sync::Arc;

use bus::{InMemoryBus, MessageBus, Subscription};
use domain::{CartStore, Catalog, InMemoryOrderRepository, OrderService, StatusProgression};
use outbox::{OutboxPublisher, OutboxStore};
use rpc::{RequestReplyClient, routes};
use saga::{
    Checkout, InMemoryPaymentGateway, NotificationService, PaymentWebhook, Reconciler,
    serve_cart, serve_catalog, serve_notifications, serve_orders,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::NodeError;
use crate::mailer::LogMailer;
use crate::seed::seed_catalog;
use crate::AppState;

type Orders = OrderService<InMemoryOrderRepository>;

/// A running shop: cart, catalog, order, payment and notification services
/// answering on a shared bus.
///
/// The HTTP surface only carries the provider callback; storefronts embed the
/// node and start checkouts through [`Node::checkout`].
pub struct Node<S: OutboxStore> {
    pub bus: Arc<InMemoryBus>,
    pub client: RequestReplyClient,
    pub carts: CartStore,
    pub catalog: Catalog,
    pub orders: Arc<Orders>,
    pub checkout: Checkout,
    pub reconciler: Arc<Reconciler<InMemoryOrderRepository>>,
    pub outbox: Arc<S>,
    config: Config,
    subscriptions: Vec<Subscription>,
}

impl<S: OutboxStore + 'static> Node<S> {
    /// Subscribes every participant and the reply listeners.
    ///
    /// Background workers are started separately with [`Node::spawn_workers`].
    #[tracing::instrument(skip_all)]
    pub async fn start(
        config: Config,
        outbox: Arc<S>,
        progression: Arc<dyn StatusProgression>,
    ) -> Result<Self, NodeError> {
        let bus = Arc::new(InMemoryBus::new());
        let shared: Arc<dyn MessageBus> = bus.clone();

        let carts = CartStore::new();
        let catalog = Catalog::new();
        if let Some(path) = &config.catalog_path {
            seed_catalog(&catalog, path).await?;
        }
        let orders = Arc::new(OrderService::new(InMemoryOrderRepository::new()));
        let notifications = Arc::new(NotificationService::new(LogMailer, &config.frontend_url));

        let mut subscriptions = Vec::new();
        subscriptions.extend(serve_cart(shared.clone(), carts.clone()).await?);
        subscriptions.extend(serve_catalog(shared.clone(), catalog.clone()).await?);
        subscriptions.extend(serve_orders(shared.clone(), orders.clone()).await?);
        subscriptions.extend(serve_notifications(shared.clone(), notifications).await?);

        let client = RequestReplyClient::new(shared.clone());
        for route in routes::ALL {
            client.listen(route.response).await?;
        }

        let gateway = InMemoryPaymentGateway::new(format!("{}checkout/", config.frontend_url));
        let checkout = Checkout::new(client.clone(), Arc::new(gateway), config.checkout());
        let reconciler = Arc::new(Reconciler::new(
            orders.clone(),
            client.clone(),
            shared,
            progression,
            config.reconcile(),
        ));

        tracing::info!(subscriptions = subscriptions.len(), "Shop participants started");
        Ok(Self {
            bus,
            client,
            carts,
            catalog,
            orders,
            checkout,
            reconciler,
            outbox,
            config,
            subscriptions,
        })
    }

    /// State for the HTTP handlers.
    pub fn state(&self) -> Arc<AppState<S>> {
        Arc::new(AppState {
            webhook: PaymentWebhook::new(self.outbox.clone()),
            outbox: self.outbox.clone(),
            registry: self.client.registry().clone(),
        })
    }

    /// Starts the outbox publisher and the order reconciliation.
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let publisher = OutboxPublisher::new(self.outbox.clone(), self.bus.clone(), self.config.outbox());
        vec![
            publisher.spawn(shutdown.clone()),
            self.reconciler.clone().spawn(shutdown),
        ]
    }

    /// Cancels every subscription and fails outstanding requests.
    pub async fn stop(self) {
        for subscription in self.subscriptions {
            subscription.cancel();
        }
        self.client.shutdown().await;
        tracing::info!("Shop participants stopped");
    }
}
