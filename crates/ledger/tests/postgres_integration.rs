//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p ledger --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{OrderId, UserId};
use domain::{Money, Order, OrderItem, OrderStatus, PlaceOrder, ShippingAddress};
use ledger::{
    LedgerError, OrderQuery, OrderRepository, PostgresLedger, SagaLedger, SagaState, SagaStatus,
    SagaStep, StepName, StepStatus,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_orders_and_sagas.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh ledger with its own pool and cleared tables
async fn get_test_ledger() -> PostgresLedger {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE saga_steps, saga_states, order_items, orders")
        .execute(&pool)
        .await
        .unwrap();

    PostgresLedger::new(pool)
}

fn test_order(user_id: UserId) -> Order {
    Order::place(PlaceOrder::new(
        user_id,
        ShippingAddress::new("123 Main St", "Springfield", "USA")
            .with_zip_code("12345")
            .with_phone_number("555-0100"),
        vec![
            OrderItem::new("SKU-001", "Laptop", 1, Money::from_cents(129_999)),
            OrderItem::new("SKU-002", "Mouse", 2, Money::from_cents(9_999)),
        ],
    ))
    .unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn order_round_trips_with_items_in_order() {
    let ledger = get_test_ledger().await;
    let order = test_order(UserId::new());
    ledger.insert_order(&order).await.unwrap();

    let loaded = ledger.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(loaded.total_amount().cents(), 149_997);
    assert_eq!(loaded.items(), order.items());
    assert_eq!(loaded.shipping_address(), order.shipping_address());
    assert_eq!(loaded.status(), OrderStatus::Pending);

    assert!(ledger.get_order(OrderId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn saga_steps_persist_and_load_by_sequence() {
    let ledger = get_test_ledger().await;
    let order = test_order(UserId::new());
    ledger.insert_order(&order).await.unwrap();

    let saga = SagaState::start(order.id());
    ledger.create_saga(&saga).await.unwrap();

    let step = SagaStep::begin(
        saga.saga_id,
        StepName::ReserveStock,
        1,
        Some(serde_json::json!({"product_id": "SKU-001", "quantity": 1})),
    );
    ledger.append_step(&step).await.unwrap();
    ledger
        .update_step(&step.clone().complete(Some(serde_json::json!("RES-0001"))))
        .await
        .unwrap();

    let payment = SagaStep::begin(saga.saga_id, StepName::ProcessPayment, 2, None);
    ledger.append_step(&payment).await.unwrap();

    let dup = SagaStep::begin(saga.saga_id, StepName::ProcessPayment, 2, None);
    assert!(matches!(
        ledger.append_step(&dup).await,
        Err(LedgerError::InvalidValue(_))
    ));

    let loaded = ledger.find_saga_by_order(order.id()).await.unwrap().unwrap();
    assert_eq!(loaded.saga_id, saga.saga_id);
    assert_eq!(loaded.steps.len(), 2);
    assert_eq!(loaded.steps[0].status, StepStatus::Completed);
    assert_eq!(loaded.steps[0].response, Some(serde_json::json!("RES-0001")));
    assert_eq!(loaded.steps[1].step_name, StepName::ProcessPayment);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn finalize_writes_saga_and_order_then_rejects_writes() {
    let ledger = get_test_ledger().await;
    let mut order = test_order(UserId::new());
    ledger.insert_order(&order).await.unwrap();

    let saga = SagaState::start(order.id());
    ledger.create_saga(&saga).await.unwrap();
    let saga = saga.advance(SagaStatus::InProgress).unwrap();
    ledger.update_saga(&saga).await.unwrap();

    let saga = saga
        .advance(SagaStatus::Compensating)
        .unwrap()
        .with_failure_reason("Payment processing failed")
        .advance(SagaStatus::Compensated)
        .unwrap();
    order.cancel().unwrap();
    ledger.finalize(&saga, &order).await.unwrap();

    let stored = ledger.find_saga(saga.saga_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SagaStatus::Compensated);
    assert_eq!(
        stored.failure_reason.as_deref(),
        Some("Payment processing failed")
    );
    assert!(stored.completed_at.is_some());
    assert_eq!(
        ledger.get_order(order.id()).await.unwrap().unwrap().status(),
        OrderStatus::Cancelled
    );

    assert!(matches!(
        ledger.update_saga(&stored).await,
        Err(LedgerError::SagaTerminal { .. })
    ));
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn saga_for_unknown_order_is_rejected() {
    let ledger = get_test_ledger().await;
    let saga = SagaState::start(OrderId::new());
    assert!(matches!(
        ledger.create_saga(&saga).await,
        Err(LedgerError::OrderNotFound(_))
    ));
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn one_active_saga_per_order() {
    let ledger = get_test_ledger().await;
    let mut order = test_order(UserId::new());
    ledger.insert_order(&order).await.unwrap();

    let first = SagaState::start(order.id());
    ledger.create_saga(&first).await.unwrap();

    let second = SagaState::start(order.id());
    match ledger.create_saga(&second).await {
        Err(LedgerError::SagaActive { order_id, saga_id }) => {
            assert_eq!(order_id, order.id());
            assert_eq!(saga_id, first.saga_id);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let first = first
        .advance(SagaStatus::InProgress)
        .unwrap()
        .advance(SagaStatus::Completed)
        .unwrap();
    order.complete(Utc::now()).unwrap();
    ledger.finalize(&first, &order).await.unwrap();

    ledger.create_saga(&second).await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn incomplete_sagas_and_order_pages() {
    let ledger = get_test_ledger().await;
    let user = UserId::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let order = test_order(user);
        ledger.insert_order(&order).await.unwrap();
        ledger
            .create_saga(&SagaState::start(order.id()))
            .await
            .unwrap();
        ids.push(order.id());
    }

    let mut done = ledger.get_order(ids[0]).await.unwrap().unwrap();
    done.complete(Utc::now()).unwrap();
    ledger.update_order(&done).await.unwrap();

    let incomplete = ledger
        .find_sagas_by_status(&SagaStatus::INCOMPLETE)
        .await
        .unwrap();
    assert_eq!(incomplete.len(), 3);

    let page = ledger
        .list_orders(&OrderQuery::for_user(user).page(1, 2))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.orders.len(), 2);
    assert_eq!(page.orders[0].items().len(), 2);

    let completed = ledger
        .list_orders(&OrderQuery::new().status(OrderStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.total, 1);
    assert_eq!(completed.orders[0].id(), ids[0]);
}
