//! Order endpoints and the purchase saga trigger.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use domain::{
    CancelOrder, EventPublisher, InMemoryEventPublisher, Money, Order, OrderEvent, OrderItem,
    OrderStatus, PlaceOrder, ShippingAddress, UpdateOrderStatus,
};
use ledger::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, OrderPage, OrderQuery, SagaState, SagaStep};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::{AppState, Storage};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub shipping_address: AddressRequest,
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct AddressRequest {
    pub street: String,
    pub city: String,
    pub country: String,
    pub zip_code: String,
    pub phone_number: String,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    #[serde(default)]
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl CreateOrderRequest {
    fn into_command(self) -> Result<PlaceOrder, ApiError> {
        // A blank user id is left to validation so it is reported with the
        // other input errors.
        let user_id = if self.user_id.trim().is_empty() {
            UserId::from_uuid(uuid::Uuid::nil())
        } else {
            self.user_id
                .trim()
                .parse()
                .map_err(|e| ApiError::BadRequest(format!("Invalid user_id: {e}")))?
        };

        let address = self.shipping_address;
        let shipping_address = ShippingAddress::new(address.street, address.city, address.country)
            .with_zip_code(address.zip_code)
            .with_phone_number(address.phone_number);

        let items = self
            .items
            .into_iter()
            .map(|item| {
                OrderItem::new(
                    item.product_id,
                    item.product_name,
                    item.quantity,
                    Money::from_cents(item.unit_price_cents),
                )
            })
            .collect();

        Ok(PlaceOrder::new(user_id, shipping_address, items))
    }
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: String,
}

/// Query string of the list endpoints. Out-of-range values fall back to the
/// defaults.
#[derive(Deserialize, Default)]
pub struct ListParams {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListParams {
    fn apply(self, query: OrderQuery) -> Result<OrderQuery, ApiError> {
        let mut query = query.page(
            self.page.filter(|p| *p > 0).unwrap_or(1),
            self.page_size
                .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
                .unwrap_or(DEFAULT_PAGE_SIZE),
        );
        if let Some(status) = self.status.as_deref().filter(|s| !s.is_empty()) {
            query = query.status(status.parse::<OrderStatus>()?);
        }
        Ok(query)
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub total_cents: i64,
    pub total: String,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().to_string(),
            status: order.status().to_string(),
            total_cents: order.total_amount().cents(),
            total: order.total_amount().to_string(),
            shipping_address: order.shipping_address().clone(),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    product_name: item.product_name.clone(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                    subtotal_cents: item.subtotal().cents(),
                })
                .collect(),
            created_at: order.created_at(),
            completed_at: order.completed_at(),
        }
    }
}

#[derive(Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl From<OrderPage> for OrderListResponse {
    fn from(page: OrderPage) -> Self {
        Self {
            orders: page.orders.iter().map(OrderResponse::from).collect(),
            total: page.total,
            page: page.page,
            page_size: page.page_size,
            total_pages: page.total_pages(),
        }
    }
}

#[derive(Serialize)]
pub struct SagaSummary {
    pub saga_id: String,
    pub status: String,
    pub failure_reason: Option<String>,
}

impl From<&SagaState> for SagaSummary {
    fn from(saga: &SagaState) -> Self {
        Self {
            saga_id: saga.saga_id.to_string(),
            status: saga.status.to_string(),
            failure_reason: saga.failure_reason.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct CreateOrderResponse {
    pub order: OrderResponse,
    pub saga: SagaSummary,
}

#[derive(Serialize)]
pub struct SagaResponse {
    pub saga_id: String,
    pub order_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub reservation_id: Option<String>,
    pub payment_id: Option<String>,
    pub notification_id: Option<String>,
    pub shipment_id: Option<String>,
    pub steps: Vec<SagaStepResponse>,
}

#[derive(Serialize)]
pub struct SagaStepResponse {
    pub sequence: i32,
    pub step_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub request: Option<serde_json::Value>,
    pub response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

impl From<&SagaStep> for SagaStepResponse {
    fn from(step: &SagaStep) -> Self {
        Self {
            sequence: step.sequence,
            step_name: step.step_name.to_string(),
            status: step.status.to_string(),
            started_at: step.started_at,
            completed_at: step.completed_at,
            request: step.request.clone(),
            response: step.response.clone(),
            error_message: step.error_message.clone(),
            retry_count: step.retry_count,
        }
    }
}

impl From<SagaState> for SagaResponse {
    fn from(saga: SagaState) -> Self {
        Self {
            saga_id: saga.saga_id.to_string(),
            order_id: saga.order_id.to_string(),
            status: saga.status.to_string(),
            started_at: saga.started_at,
            completed_at: saga.completed_at,
            steps: saga.steps.iter().map(SagaStepResponse::from).collect(),
            failure_reason: saga.failure_reason,
            reservation_id: saga.reservation_id,
            payment_id: saga.payment_id,
            notification_id: saga.notification_id,
            shipment_id: saga.shipment_id,
        }
    }
}

// -- Handlers --

/// POST /orders: place an order and run its purchase saga.
///
/// Answers 201 whether the saga completed or was compensated; the saga
/// summary tells which.
#[tracing::instrument(skip(state, req))]
pub async fn create<L: Storage>(
    State(state): State<Arc<AppState<L>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let mut order = Order::place(req.into_command()?)?;
    state.ledger.insert_order(&order).await?;
    metrics::counter!("orders_created_total").increment(1);
    tracing::info!(order_id = %order.id(), total = %order.total_amount(), "order created");
    publish(&state.publisher, OrderEvent::order_created(&order)).await;

    let saga = state.orchestrator.execute_saga(&mut order).await?;

    match order.status() {
        OrderStatus::Completed => {
            publish(&state.publisher, OrderEvent::order_completed(&order)).await;
        }
        OrderStatus::Cancelled => {
            let reason = state
                .orchestrator
                .config()
                .compensation_reason(saga.failure_reason.as_deref().unwrap_or_default())
                .to_string();
            publish(&state.publisher, OrderEvent::order_cancelled(&order, reason)).await;
        }
        _ => {}
    }

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order: OrderResponse::from(&order),
            saga: SagaSummary::from(&saga),
        }),
    ))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<L: Storage>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = load_order(&state, &id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders: newest first, optionally filtered by status.
#[tracing::instrument(skip(state, params))]
pub async fn list<L: Storage>(
    State(state): State<Arc<AppState<L>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<OrderListResponse>, ApiError> {
    let query = params.apply(OrderQuery::new())?;
    let page = state.ledger.list_orders(&query).await?;
    Ok(Json(OrderListResponse::from(page)))
}

/// GET /users/{id}/orders
#[tracing::instrument(skip(state, params))]
pub async fn list_for_user<L: Storage>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<OrderListResponse>, ApiError> {
    let user_id: UserId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    let query = params.apply(OrderQuery::for_user(user_id))?;
    let page = state.ledger.list_orders(&query).await?;
    Ok(Json(OrderListResponse::from(page)))
}

/// PUT /orders/{id}/status
#[tracing::instrument(skip(state, req))]
pub async fn update_status<L: Storage>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let cmd = UpdateOrderStatus {
        status: req.status.parse()?,
    };
    cmd.validate()?;

    let mut order = load_order(&state, &id).await?;
    let previous = order.set_status(cmd.status, Utc::now())?;
    state.ledger.update_order(&order).await?;
    tracing::info!(order_id = %order.id(), %previous, status = %cmd.status, "order status updated");

    if cmd.status == OrderStatus::Completed {
        publish(&state.publisher, OrderEvent::order_completed(&order)).await;
    }
    publish(&state.publisher, OrderEvent::status_changed(&order, previous)).await;

    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel<L: Storage>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let cmd = CancelOrder::new(req.reason.trim());
    cmd.validate()?;

    let mut order = load_order(&state, &id).await?;
    order.cancel()?;
    state.ledger.update_order(&order).await?;
    tracing::info!(order_id = %order.id(), reason = %cmd.reason, "order cancelled");
    publish(&state.publisher, OrderEvent::order_cancelled(&order, cmd.reason)).await;

    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/{id}/saga: latest saga of the order with its steps.
#[tracing::instrument(skip(state))]
pub async fn saga_status<L: Storage>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let saga = state
        .orchestrator
        .saga_for_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No saga found for order {id}")))?;
    Ok(Json(SagaResponse::from(saga)))
}

async fn load_order<L: Storage>(state: &AppState<L>, id: &str) -> Result<Order, ApiError> {
    let order_id = parse_order_id(id)?;
    state
        .ledger
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))
}

async fn publish(publisher: &InMemoryEventPublisher, event: OrderEvent) {
    let event_type = event.event_type();
    if let Err(e) = publisher.publish(event).await {
        tracing::warn!(event_type, error = %e, "failed to publish order event");
    }
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
