//! Integration tests for the purchase saga orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, SagaId, UserId};
use domain::{Money, Order, OrderItem, OrderRecord, OrderStatus, PlaceOrder, ShippingAddress};
use ledger::{
    Handle, InMemoryLedger, LedgerError, OrderRepository, SagaLedger, SagaState, SagaStatus,
    SagaStep, StepName, StepStatus,
};
use saga::{
    InMemoryInventoryService, InMemoryNotificationService, InMemoryPaymentService,
    InMemoryShippingService, SagaConfig, SagaError, SagaOrchestrator,
};

type TestOrchestrator = SagaOrchestrator<
    InMemoryLedger,
    InMemoryInventoryService,
    InMemoryPaymentService,
    InMemoryNotificationService,
    InMemoryShippingService,
>;

struct TestHarness {
    orchestrator: TestOrchestrator,
    ledger: InMemoryLedger,
    inventory: InMemoryInventoryService,
    payment: InMemoryPaymentService,
    notification: InMemoryNotificationService,
    shipping: InMemoryShippingService,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(SagaConfig::default())
    }

    fn with_config(config: SagaConfig) -> Self {
        let ledger = InMemoryLedger::new();
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
        .with_config(config);

        Self {
            orchestrator,
            ledger,
            inventory,
            payment,
            notification,
            shipping,
        }
    }

    /// Laptop x1 at 1299.99 and Mouse x2 at 99.99, total 1499.97.
    async fn place_order(&self) -> Order {
        let order = Order::place(PlaceOrder::new(
            UserId::new(),
            ShippingAddress::new("123 Main St", "Springfield", "USA").with_zip_code("12345"),
            vec![
                OrderItem::new("SKU-001", "Laptop", 1, Money::from_cents(129_999)),
                OrderItem::new("SKU-002", "Mouse", 2, Money::from_cents(9_999)),
            ],
        ))
        .unwrap();
        self.ledger.insert_order(&order).await.unwrap();
        order
    }

    async fn stored_order(&self, order: &Order) -> Order {
        self.ledger.get_order(order.id()).await.unwrap().unwrap()
    }
}

fn step_names(saga: &SagaState) -> Vec<StepName> {
    saga.steps.iter().map(|s| s.step_name).collect()
}

fn step_status(saga: &SagaState, name: StepName) -> StepStatus {
    saga.last_step(name).unwrap().status
}

/// A handle is set exactly when the step that produces it completed.
fn assert_handles_match_steps(saga: &SagaState) {
    for (name, handle) in [
        (StepName::ReserveStock, Handle::Reservation),
        (StepName::ProcessPayment, Handle::Payment),
        (StepName::SendNotification, Handle::Notification),
        (StepName::CreateShipment, Handle::Shipment),
    ] {
        let completed = saga
            .last_step(name)
            .is_some_and(|s| s.status == StepStatus::Completed);
        assert_eq!(
            saga.handle(handle).is_some(),
            completed,
            "handle for {name} does not match its step"
        );
    }
}

fn assert_sequences_and_timestamps(saga: &SagaState) {
    for (index, step) in saga.steps.iter().enumerate() {
        assert_eq!(step.sequence, index as i32 + 1);
        assert_eq!(step.retry_count, 0);
        assert!(step.started_at >= saga.started_at);
        let completed_at = step.completed_at.expect("settled step");
        assert!(completed_at >= step.started_at);
    }
    if let Some(completed_at) = saga.completed_at {
        assert!(completed_at >= saga.started_at);
    }
}

#[tokio::test]
async fn test_happy_path_completes_order() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    assert_eq!(order.total_amount().cents(), 149_997);

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Completed);
    assert!(saga.failure_reason.is_none());
    assert_eq!(
        step_names(&saga),
        vec![
            StepName::ReserveStock,
            StepName::ProcessPayment,
            StepName::ConfirmReservation,
            StepName::SendNotification,
            StepName::CreateShipment,
        ]
    );
    assert!(saga.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(saga.reservation_id.as_deref(), Some("RES-0001"));
    assert_eq!(saga.payment_id.as_deref(), Some("PAY-0001"));
    assert_eq!(saga.notification_id.as_deref(), Some("NOTIF-0001"));
    assert_eq!(saga.shipment_id.as_deref(), Some("SHIP-0001"));
    assert_handles_match_steps(&saga);
    assert_sequences_and_timestamps(&saga);

    assert_eq!(order.status(), OrderStatus::Completed);
    assert!(order.completed_at().is_some());
    assert_eq!(h.stored_order(&order).await, order);

    let stored = h.orchestrator.get_saga(saga.saga_id).await.unwrap().unwrap();
    assert_eq!(stored, saga);

    assert!(h.inventory.is_confirmed("RES-0001"));
    assert_eq!(h.inventory.reserved_lines("RES-0001"), 2);
    assert_eq!(h.payment.payment_count(), 1);
    assert_eq!(h.notification.sent_count(), 1);
    assert_eq!(h.shipping.shipment_count(), 1);
}

#[tokio::test]
async fn test_payment_decline_releases_stock_only() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.payment.set_fail_on_charge(true);

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    assert_eq!(saga.failure_reason.as_deref(), Some("Payment processing failed"));
    assert_eq!(
        step_names(&saga),
        vec![
            StepName::ReserveStock,
            StepName::ProcessPayment,
            StepName::ReleaseStock,
        ]
    );
    let payment_step = saga.last_step(StepName::ProcessPayment).unwrap();
    assert_eq!(payment_step.status, StepStatus::Failed);
    assert_eq!(
        payment_step.error_message.as_deref(),
        Some("rejected by payment service: Payment declined")
    );
    assert_eq!(step_status(&saga, StepName::ReleaseStock), StepStatus::Completed);
    assert!(saga.payment_id.is_none());
    assert_handles_match_steps(&saga);
    assert_sequences_and_timestamps(&saga);

    assert_eq!(h.inventory.released_reservations(), vec!["RES-0001"]);
    assert!(h.payment.refunds().is_empty());
    assert!(h.shipping.cancelled_shipments().is_empty());

    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.stored_order(&order).await.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_shipment_failure_still_completes() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.shipping.set_fail_on_create(true);

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Completed);
    let shipment_step = saga.last_step(StepName::CreateShipment).unwrap();
    assert_eq!(shipment_step.sequence, 5);
    assert_eq!(shipment_step.status, StepStatus::Failed);
    assert_eq!(
        shipment_step.error_message.as_deref(),
        Some("rejected by shipping service: No carrier available")
    );
    assert!(saga.shipment_id.is_none());
    assert_handles_match_steps(&saga);
    assert_eq!(order.status(), OrderStatus::Completed);
    assert!(h.inventory.released_reservations().is_empty());
    assert!(h.payment.refunds().is_empty());
}

#[tokio::test]
async fn test_notification_failure_does_not_change_outcome() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.notification.set_unavailable(true);

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Completed);
    assert_eq!(step_status(&saga, StepName::SendNotification), StepStatus::Failed);
    assert_eq!(
        saga.last_step(StepName::SendNotification)
            .unwrap()
            .error_message
            .as_deref(),
        Some("notification service unavailable")
    );
    assert!(saga.notification_id.is_none());
    assert_eq!(saga.shipment_id.as_deref(), Some("SHIP-0001"));
    assert_handles_match_steps(&saga);
    assert_eq!(order.status(), OrderStatus::Completed);
}

#[tokio::test]
async fn test_confirm_failure_refunds_then_releases() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.inventory.set_fail_on_confirm(true);

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    assert_eq!(saga.failure_reason.as_deref(), Some("Stock confirmation failed"));
    assert_eq!(
        step_names(&saga),
        vec![
            StepName::ReserveStock,
            StepName::ProcessPayment,
            StepName::ConfirmReservation,
            StepName::RefundPayment,
            StepName::ReleaseStock,
        ]
    );
    assert_eq!(
        h.payment.refunds(),
        vec![("PAY-0001".to_string(), Money::from_cents(149_997))]
    );
    assert_eq!(h.inventory.released_reservations(), vec!["RES-0001"]);
    assert_eq!(h.notification.sent_count(), 0);
    assert_eq!(h.shipping.shipment_count(), 0);
    assert_sequences_and_timestamps(&saga);
    assert_eq!(order.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_reserve_failure_compensates_nothing() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.inventory.set_fail_on_reserve(true);

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    assert_eq!(saga.failure_reason.as_deref(), Some("Stock reservation failed"));
    assert_eq!(step_names(&saga), vec![StepName::ReserveStock]);
    assert!(h.inventory.released_reservations().is_empty());
    assert_eq!(h.payment.payment_count(), 0);
    assert_handles_match_steps(&saga);
    assert_eq!(order.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_partial_reservation_is_released() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.inventory.set_stock("SKU-002", 1);

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    assert!(saga.reservation_id.is_none());
    let reserve = saga.last_step(StepName::ReserveStock).unwrap();
    assert_eq!(reserve.status, StepStatus::Failed);
    assert_eq!(
        reserve.error_message.as_deref(),
        Some(
            "Item 2: rejected by inventory service: \
             Insufficient stock for product SKU-002: requested 2, available 1"
        )
    );
    assert_eq!(
        reserve.response.as_ref().unwrap()["partial_reservation"],
        "RES-0001"
    );
    assert_eq!(
        step_names(&saga),
        vec![StepName::ReserveStock, StepName::ReleaseStock]
    );
    assert_eq!(h.inventory.released_reservations(), vec!["RES-0001"]);
    assert_eq!(h.inventory.reservation_count(), 0);
    assert_handles_match_steps(&saga);
}

#[tokio::test]
async fn test_transport_failure_is_a_step_failure() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.payment.set_unavailable(true);

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    assert_eq!(
        saga.last_step(StepName::ProcessPayment)
            .unwrap()
            .error_message
            .as_deref(),
        Some("payment service unavailable")
    );
    assert_eq!(h.inventory.released_reservations(), vec!["RES-0001"]);
}

#[tokio::test]
async fn test_completion_write_failure_compensates_everything() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.ledger
        .fail_saga_writes_with_status(Some(SagaStatus::Completed))
        .await;

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    assert!(
        saga.failure_reason
            .as_deref()
            .unwrap()
            .starts_with("Unexpected error:")
    );
    let compensation: Vec<_> = saga
        .steps
        .iter()
        .filter(|s| s.step_name.is_compensation())
        .map(|s| (s.step_name, s.sequence))
        .collect();
    assert_eq!(
        compensation,
        vec![
            (StepName::CancelShipment, 6),
            (StepName::RefundPayment, 7),
            (StepName::ReleaseStock, 8),
        ]
    );
    assert_eq!(h.shipping.cancelled_shipments(), vec!["SHIP-0001"]);
    assert_eq!(h.payment.payment_count(), 0);
    assert_eq!(h.inventory.reservation_count(), 0);
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.stored_order(&order).await.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_step_append_failure_is_an_unexpected_error() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.ledger
        .fail_step_appends_for(Some(StepName::SendNotification))
        .await;

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    let reason = saga.failure_reason.as_deref().unwrap();
    assert!(reason.starts_with("Unexpected error:"));
    assert!(reason.contains("SendNotification"));
    assert_eq!(h.notification.sent_count(), 0);
    assert_eq!(h.payment.refunds().len(), 1);
    assert_eq!(h.inventory.released_reservations(), vec!["RES-0001"]);
    assert_eq!(order.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_ledger_failure_during_compensation_marks_failed() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.payment.set_fail_on_charge(true);
    h.ledger
        .fail_saga_writes_with_status(Some(SagaStatus::Compensating))
        .await;

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Failed);
    let reason = saga.failure_reason.as_deref().unwrap();
    assert!(reason.starts_with("Payment processing failed; compensation failed:"));
    // Compensating calls still ran.
    assert_eq!(h.inventory.released_reservations(), vec!["RES-0001"]);

    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(h.stored_order(&order).await.status(), OrderStatus::Pending);
    let stored = h.orchestrator.saga_for_order(order.id()).await.unwrap().unwrap();
    assert_eq!(stored.status, SagaStatus::Failed);

    // A failed saga is left for an operator; no automatic second run.
    h.payment.set_fail_on_charge(false);
    h.ledger.fail_saga_writes_with_status(None).await;
    match h.orchestrator.execute_saga(&mut order).await {
        Err(SagaError::SagaNeedsAttention { order_id, saga_id }) => {
            assert_eq!(order_id, order.id());
            assert_eq!(saga_id, saga.saga_id);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(h.ledger.saga_count().await, 1);
    assert_eq!(h.payment.payment_count(), 0);
}

#[tokio::test]
async fn test_start_write_failure_compensates() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.ledger
        .fail_saga_writes_with_status(Some(SagaStatus::InProgress))
        .await;

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    assert!(
        saga.failure_reason
            .as_deref()
            .unwrap()
            .starts_with("Unexpected error:")
    );
    assert!(saga.steps.is_empty());
    assert_eq!(h.inventory.reservation_count(), 0);
    assert_eq!(h.payment.payment_count(), 0);

    let stored = h.orchestrator.get_saga(saga.saga_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SagaStatus::Compensated);
    assert!(h.orchestrator.incomplete_sagas().await.unwrap().is_empty());
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.stored_order(&order).await.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_rejected_refund_still_releases_stock() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.inventory.set_fail_on_confirm(true);
    h.payment.set_fail_on_refund(true);

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    assert_eq!(saga.failure_reason.as_deref(), Some("Stock confirmation failed"));
    assert_eq!(
        step_names(&saga),
        vec![
            StepName::ReserveStock,
            StepName::ProcessPayment,
            StepName::ConfirmReservation,
            StepName::RefundPayment,
            StepName::ReleaseStock,
        ]
    );
    assert_eq!(step_status(&saga, StepName::RefundPayment), StepStatus::Failed);
    assert_eq!(step_status(&saga, StepName::ReleaseStock), StepStatus::Completed);
    assert!(
        saga.last_step(StepName::RefundPayment)
            .unwrap()
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("rejected by payment service:")
    );
    assert_sequences_and_timestamps(&saga);

    assert!(h.payment.refunds().is_empty());
    assert_eq!(h.inventory.released_reservations(), vec!["RES-0001"]);
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.stored_order(&order).await.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_every_compensation_call_runs_when_all_are_rejected() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    h.ledger
        .fail_saga_writes_with_status(Some(SagaStatus::Completed))
        .await;
    h.shipping.set_fail_on_cancel(true);
    h.payment.set_fail_on_refund(true);
    h.inventory.set_fail_on_release(true);

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    let compensation: Vec<_> = saga
        .steps
        .iter()
        .filter(|s| s.step_name.is_compensation())
        .map(|s| (s.step_name, s.status))
        .collect();
    assert_eq!(
        compensation,
        vec![
            (StepName::CancelShipment, StepStatus::Failed),
            (StepName::RefundPayment, StepStatus::Failed),
            (StepName::ReleaseStock, StepStatus::Failed),
        ]
    );
    assert_eq!(order.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_terminal_saga_is_immutable() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    let err = h.ledger.update_saga(&saga).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::SagaTerminal {
            status: SagaStatus::Completed,
            ..
        }
    ));

    let again = h.orchestrator.execute_saga(&mut order).await;
    assert!(matches!(again, Err(SagaError::OrderNotReady(_))));
    assert_eq!(h.ledger.saga_count().await, 1);
}

#[tokio::test]
async fn test_active_saga_blocks_second_run() {
    let h = TestHarness::new();
    let mut order = h.place_order().await;
    let leftover = SagaState::start(order.id());
    h.ledger.create_saga(&leftover).await.unwrap();

    let result = h.orchestrator.execute_saga(&mut order).await;
    match result {
        Err(SagaError::SagaAlreadyActive { order_id, saga_id }) => {
            assert_eq!(order_id, order.id());
            assert_eq!(saga_id, leftover.saga_id);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let incomplete = h.orchestrator.incomplete_sagas().await.unwrap();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].saga_id, leftover.saga_id);
    assert_eq!(h.payment.payment_count(), 0);
}

#[tokio::test]
async fn test_preconditions_are_checked_before_any_record() {
    let h = TestHarness::new();

    let mut processing = h.place_order().await;
    processing
        .set_status(OrderStatus::Processing, chrono::Utc::now())
        .unwrap();
    let result = h.orchestrator.execute_saga(&mut processing).await;
    assert!(matches!(result, Err(SagaError::OrderNotReady(_))));

    let placed = h.place_order().await;
    let mut empty = Order::from(OrderRecord {
        id: placed.id(),
        user_id: placed.user_id(),
        status: OrderStatus::Pending,
        total_amount: Money::zero(),
        shipping_address: placed.shipping_address().clone(),
        created_at: placed.created_at(),
        completed_at: None,
        items: vec![],
    });
    let result = h.orchestrator.execute_saga(&mut empty).await;
    assert!(matches!(result, Err(SagaError::OrderNotReady(msg)) if msg == "Order has no items"));

    assert_eq!(h.ledger.saga_count().await, 0);
    assert_eq!(h.inventory.reservation_count(), 0);
}

#[tokio::test]
async fn test_requests_use_config_values() {
    let h = TestHarness::with_config(SagaConfig {
        payment_method: "PayPal".to_string(),
        currency: "EUR".to_string(),
        ..SagaConfig::default()
    });
    let mut order = h.place_order().await;

    let saga = h.orchestrator.execute_saga(&mut order).await.unwrap();

    let request = saga
        .last_step(StepName::ProcessPayment)
        .unwrap()
        .request
        .clone()
        .unwrap();
    assert_eq!(request["method"], "PayPal");
    assert_eq!(request["currency"], "EUR");
    assert_eq!(request["amount"], 149_997);

    let sent = h.notification.sent();
    assert_eq!(sent[0].email_to, "customer@email.com");
    assert_eq!(sent[0].template, "OrderConfirmation");
    assert_eq!(sent[0].subject, format!("Order #{} Confirmed", order.id()));
    assert_eq!(
        sent[0].body,
        "Your order for $1499.97 has been confirmed and will be shipped soon."
    );

    let shipment = saga
        .last_step(StepName::CreateShipment)
        .unwrap()
        .request
        .clone()
        .unwrap();
    assert_eq!(shipment["method"], "Standard");
    assert_eq!(shipment["zip_code"], "12345");
}

#[tokio::test]
async fn test_concurrent_sagas_are_independent() {
    let h = Arc::new(TestHarness::new());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            let mut order = h.place_order().await;
            h.orchestrator.execute_saga(&mut order).await.unwrap()
        }));
    }

    let mut payment_ids = Vec::new();
    for handle in handles {
        let saga = handle.await.unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
        payment_ids.push(saga.payment_id.unwrap());
    }
    payment_ids.sort();
    payment_ids.dedup();
    assert_eq!(payment_ids.len(), 8);
    assert_eq!(h.inventory.reservation_count(), 8);
    assert!(h.orchestrator.incomplete_sagas().await.unwrap().is_empty());
}

/// Ledger that yields to the scheduler before every call, so two runs on
/// one task interleave between their reads and writes.
struct YieldingLedger(InMemoryLedger);

#[async_trait]
impl SagaLedger for YieldingLedger {
    async fn create_saga(&self, saga: &SagaState) -> ledger::Result<()> {
        tokio::task::yield_now().await;
        self.0.create_saga(saga).await
    }

    async fn append_step(&self, step: &SagaStep) -> ledger::Result<()> {
        tokio::task::yield_now().await;
        self.0.append_step(step).await
    }

    async fn update_saga(&self, saga: &SagaState) -> ledger::Result<()> {
        tokio::task::yield_now().await;
        self.0.update_saga(saga).await
    }

    async fn update_step(&self, step: &SagaStep) -> ledger::Result<()> {
        tokio::task::yield_now().await;
        self.0.update_step(step).await
    }

    async fn finalize(&self, saga: &SagaState, order: &Order) -> ledger::Result<()> {
        tokio::task::yield_now().await;
        self.0.finalize(saga, order).await
    }

    async fn find_saga(&self, saga_id: SagaId) -> ledger::Result<Option<SagaState>> {
        tokio::task::yield_now().await;
        self.0.find_saga(saga_id).await
    }

    async fn find_saga_by_order(&self, order_id: OrderId) -> ledger::Result<Option<SagaState>> {
        tokio::task::yield_now().await;
        self.0.find_saga_by_order(order_id).await
    }

    async fn find_sagas_by_status(
        &self,
        statuses: &[SagaStatus],
    ) -> ledger::Result<Vec<SagaState>> {
        tokio::task::yield_now().await;
        self.0.find_sagas_by_status(statuses).await
    }
}

#[tokio::test]
async fn test_racing_runs_for_one_order_start_one_saga() {
    let h = TestHarness::new();
    let order = h.place_order().await;
    let orchestrator = SagaOrchestrator::new(
        YieldingLedger(h.ledger.clone()),
        h.inventory.clone(),
        h.payment.clone(),
        h.notification.clone(),
        h.shipping.clone(),
    );

    let mut first = order.clone();
    let mut second = order.clone();
    let (a, b) = tokio::join!(
        orchestrator.execute_saga(&mut first),
        orchestrator.execute_saga(&mut second)
    );

    let (winner, loser) = match (a, b) {
        (Ok(saga), Err(err)) | (Err(err), Ok(saga)) => (saga, err),
        other => panic!("expected exactly one run to start: {other:?}"),
    };
    assert_eq!(winner.status, SagaStatus::Completed);
    match loser {
        SagaError::SagaAlreadyActive { order_id, saga_id } => {
            assert_eq!(order_id, order.id());
            assert_eq!(saga_id, winner.saga_id);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(h.ledger.saga_count().await, 1);
    assert_eq!(h.payment.payment_count(), 1);
    assert_eq!(h.inventory.reservation_count(), 1);
}
