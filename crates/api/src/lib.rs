//! HTTP API for placing orders and inspecting their purchase sagas.
//!
//! Provides REST endpoints for order management and saga status,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::InMemoryEventPublisher;
use ledger::{OrderRepository, SagaLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    InMemoryInventoryService, InMemoryNotificationService, InMemoryPaymentService,
    InMemoryShippingService, SagaConfig, SagaOrchestrator,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Backing store the API can run on.
pub trait Storage: SagaLedger + OrderRepository + Clone + 'static {}

impl<T> Storage for T where T: SagaLedger + OrderRepository + Clone + 'static {}

/// Orchestrator wired to the in-memory step services.
pub type Orchestrator<L> = SagaOrchestrator<
    L,
    InMemoryInventoryService,
    InMemoryPaymentService,
    InMemoryNotificationService,
    InMemoryShippingService,
>;

/// Shared application state accessible from all handlers.
pub struct AppState<L: Storage> {
    pub ledger: L,
    pub orchestrator: Orchestrator<L>,
    pub publisher: InMemoryEventPublisher,
    pub inventory: InMemoryInventoryService,
    pub payment: InMemoryPaymentService,
    pub notification: InMemoryNotificationService,
    pub shipping: InMemoryShippingService,
}

/// Creates the application state around a ledger, with in-memory services.
pub fn create_state<L: Storage>(ledger: L, saga_config: SagaConfig) -> Arc<AppState<L>> {
    let inventory = InMemoryInventoryService::new();
    let payment = InMemoryPaymentService::new();
    let notification = InMemoryNotificationService::new();
    let shipping = InMemoryShippingService::new();

    let orchestrator = SagaOrchestrator::new(
        ledger.clone(),
        inventory.clone(),
        payment.clone(),
        notification.clone(),
        shipping.clone(),
    )
    .with_config(saga_config);

    Arc::new(AppState {
        ledger,
        orchestrator,
        publisher: InMemoryEventPublisher::new(),
        inventory,
        payment,
        notification,
        shipping,
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L: Storage>(state: Arc<AppState<L>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route(
            "/orders",
            post(routes::orders::create::<L>).get(routes::orders::list::<L>),
        )
        .route("/orders/{id}", get(routes::orders::get::<L>))
        .route("/orders/{id}/status", put(routes::orders::update_status::<L>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<L>))
        .route("/orders/{id}/saga", get(routes::orders::saga_status::<L>))
        .route("/users/{id}/orders", get(routes::orders::list_for_user::<L>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
