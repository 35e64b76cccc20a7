//! Purchase saga orchestrator.

use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use common::{OrderId, SagaId};
use domain::Order;
use ledger::{SagaLedger, SagaState, SagaStatus, SagaStep, StepName};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::SagaConfig;
use crate::error::{AdapterError, Result, SagaError};
use crate::services::{
    CancelShipmentRequest, CreateShipmentRequest, InventoryService, NotificationService,
    PaymentService, ProcessPaymentRequest, RefundPaymentRequest, ReserveStockRequest,
    SendNotificationRequest, ShippingService, StepReply,
};
use crate::steps::ForwardStep;

/// A ledger or state machine failure in the middle of a run.
struct Interrupted {
    saga: SagaState,
    error: SagaError,
    /// Reservation made by a step that did not complete.
    orphan: Option<String>,
}

impl Interrupted {
    fn new(saga: SagaState, error: impl Into<SagaError>) -> Self {
        Self {
            saga,
            error: error.into(),
            orphan: None,
        }
    }

    fn with_orphan(mut self, orphan: Option<String>) -> Self {
        self.orphan = orphan;
        self
    }
}

/// How one forward step ended.
enum StepOutcome {
    Succeeded(SagaState),
    Failed {
        saga: SagaState,
        error: String,
        orphan: Option<String>,
    },
}

/// How the forward phase ended.
enum Forward {
    Completed(SagaState),
    Aborted {
        saga: SagaState,
        reason: String,
        orphan: Option<String>,
    },
}

/// Drives the purchase saga for one order at a time.
///
/// Forward steps run in the fixed order of [`ForwardStep::ALL`]. A critical
/// failure, or any failure of the orchestrator itself, triggers compensation
/// of the completed work in reverse order. Every step is recorded in the
/// ledger before its service is called and settled right after.
pub struct SagaOrchestrator<L, I, P, N, Sh>
where
    L: SagaLedger,
    I: InventoryService,
    P: PaymentService,
    N: NotificationService,
    Sh: ShippingService,
{
    ledger: L,
    inventory: I,
    payment: P,
    notification: N,
    shipping: Sh,
    config: SagaConfig,
}

impl<L, I, P, N, Sh> SagaOrchestrator<L, I, P, N, Sh>
where
    L: SagaLedger,
    I: InventoryService,
    P: PaymentService,
    N: NotificationService,
    Sh: ShippingService,
{
    /// Creates an orchestrator with the default request values.
    pub fn new(ledger: L, inventory: I, payment: P, notification: N, shipping: Sh) -> Self {
        Self {
            ledger,
            inventory,
            payment,
            notification,
            shipping,
            config: SagaConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SagaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Runs the purchase saga for a persisted `Pending` order.
    ///
    /// Returns the terminal saga. On `Completed` the order is completed, on
    /// `Compensated` it is cancelled, on `Failed` it is left as it was. The
    /// order is only changed after the ledger accepted the final state.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    pub async fn execute_saga(&self, order: &mut Order) -> Result<SagaState> {
        if !order.status().can_start_saga() {
            return Err(SagaError::OrderNotReady(format!(
                "Order is in {} status, expected Pending",
                order.status()
            )));
        }
        if !order.has_items() {
            return Err(SagaError::OrderNotReady("Order has no items".to_string()));
        }
        if let Some(existing) = self.ledger.find_saga_by_order(order.id()).await? {
            let (order_id, saga_id) = (order.id(), existing.saga_id);
            match existing.status {
                SagaStatus::Failed => {
                    return Err(SagaError::SagaNeedsAttention { order_id, saga_id });
                }
                status if !status.is_terminal() => {
                    return Err(SagaError::SagaAlreadyActive { order_id, saga_id });
                }
                _ => {}
            }
        }

        // The ledger refuses a second non-terminal saga for the order, so a
        // concurrent run that passed the check above stops here.
        let saga = SagaState::start(order.id());
        self.ledger.create_saga(&saga).await?;

        metrics::counter!("saga_executions_total").increment(1);
        let started = Instant::now();

        let saga = saga.advance(SagaStatus::InProgress)?;
        let saga = match self.ledger.update_saga(&saga).await {
            Ok(()) => {
                tracing::info!(saga_id = %saga.saga_id, "saga started");
                match self.run_forward(saga, order).await {
                    Forward::Completed(saga) => self.complete(saga, order).await,
                    Forward::Aborted {
                        saga,
                        reason,
                        orphan,
                    } => self.compensate(saga, order, reason, orphan).await,
                }
            }
            Err(e) => {
                let error = SagaError::from(e);
                tracing::error!(saga_id = %saga.saga_id, %error, "failed to record saga start");
                self.compensate(saga, order, format!("Unexpected error: {error}"), None)
                    .await
            }
        };

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        tracing::info!(saga_id = %saga.saga_id, status = %saga.status, duration, "saga finished");
        Ok(saga)
    }

    /// Loads a saga with its steps.
    pub async fn get_saga(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        Ok(self.ledger.find_saga(saga_id).await?)
    }

    /// Loads the most recent saga of an order.
    pub async fn saga_for_order(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        Ok(self.ledger.find_saga_by_order(order_id).await?)
    }

    /// Lists sagas a stopped process left in a non-terminal status.
    pub async fn incomplete_sagas(&self) -> Result<Vec<SagaState>> {
        Ok(self
            .ledger
            .find_sagas_by_status(&SagaStatus::INCOMPLETE)
            .await?)
    }

    async fn run_forward(&self, mut saga: SagaState, order: &Order) -> Forward {
        for step in ForwardStep::ALL {
            tracing::info!(step = %step.name(), "saga step started");
            match self.run_step(step, saga, order).await {
                Ok(StepOutcome::Succeeded(next)) => saga = next,
                Ok(StepOutcome::Failed {
                    saga: next,
                    error,
                    orphan,
                }) => {
                    metrics::counter!("saga_step_failures_total", "step" => step.name().as_str())
                        .increment(1);
                    match step.abort_reason() {
                        Some(reason) => {
                            tracing::warn!(step = %step.name(), %error, "critical saga step failed");
                            return Forward::Aborted {
                                saga: next,
                                reason: reason.to_string(),
                                orphan,
                            };
                        }
                        None => {
                            tracing::warn!(step = %step.name(), %error, "saga step failed, continuing");
                            saga = next;
                        }
                    }
                }
                Err(Interrupted {
                    saga,
                    error,
                    orphan,
                }) => {
                    tracing::error!(step = %step.name(), %error, "saga interrupted");
                    return Forward::Aborted {
                        saga,
                        reason: format!("Unexpected error: {error}"),
                        orphan,
                    };
                }
            }
        }
        Forward::Completed(saga)
    }

    async fn run_step(
        &self,
        step: ForwardStep,
        saga: SagaState,
        order: &Order,
    ) -> std::result::Result<StepOutcome, Interrupted> {
        match step {
            ForwardStep::ReserveStock => self.reserve_stock(saga, order).await,
            ForwardStep::ProcessPayment => {
                let request = ProcessPaymentRequest {
                    order_id: order.id(),
                    user_id: order.user_id(),
                    amount: order.total_amount(),
                    method: self.config.payment_method.clone(),
                    currency: self.config.currency.clone(),
                };
                self.call(step, saga, &request, self.payment.process_payment(&request))
                    .await
            }
            ForwardStep::ConfirmReservation => {
                let Some(reservation_id) = saga.reservation_id.clone() else {
                    let (saga, row) = self
                        .begin(saga, step.name(), &json!({ "reservation_id": null }))
                        .await?;
                    let error = "No reservation to confirm".to_string();
                    let saga = self.fail(saga, row, &error, None).await?;
                    return Ok(StepOutcome::Failed {
                        saga,
                        error,
                        orphan: None,
                    });
                };
                let request = json!({ "reservation_id": &reservation_id });
                self.call(
                    step,
                    saga,
                    &request,
                    self.inventory.confirm_reservation(&reservation_id),
                )
                .await
            }
            ForwardStep::SendNotification => {
                let request = self.notification_request(order);
                self.call(
                    step,
                    saga,
                    &request,
                    self.notification.send_notification(&request),
                )
                .await
            }
            ForwardStep::CreateShipment => {
                let request = self.shipment_request(order);
                self.call(step, saga, &request, self.shipping.create_shipment(&request))
                    .await
            }
        }
    }

    /// Reserves every order line under one step row, stopping at the first
    /// failed line.
    async fn reserve_stock(
        &self,
        saga: SagaState,
        order: &Order,
    ) -> std::result::Result<StepOutcome, Interrupted> {
        let step = ForwardStep::ReserveStock;
        let requests: Vec<ReserveStockRequest> = order
            .items()
            .iter()
            .map(|item| ReserveStockRequest {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                order_id: order.id(),
            })
            .collect();
        let (saga, row) = self.begin(saga, step.name(), &requests).await?;

        let mut reservation_id = None;
        let mut failure = None;
        for (index, request) in requests.iter().enumerate() {
            match interpret(
                step.service(),
                self.inventory.reserve_stock(request).await,
                true,
            ) {
                Ok(reply) => reservation_id = reply.resource_id,
                Err(error) => {
                    failure = Some(format!("Item {}: {error}", index + 1));
                    break;
                }
            }
        }

        match failure {
            None => {
                let response = json!({
                    "resource_id": &reservation_id,
                    "lines": requests.len(),
                });
                self.succeed(saga, row, reservation_id, response)
                    .await
                    .map(StepOutcome::Succeeded)
            }
            // Lines reserved before the failure stay off the saga and are
            // released through the orphan id.
            Some(error) => {
                let response = reservation_id
                    .as_ref()
                    .map(|id| json!({ "partial_reservation": id }));
                match self.fail(saga, row, &error, response).await {
                    Ok(saga) => Ok(StepOutcome::Failed {
                        saga,
                        error,
                        orphan: reservation_id,
                    }),
                    Err(interrupted) => Err(interrupted.with_orphan(reservation_id)),
                }
            }
        }
    }

    /// Records a step row, awaits the service call and settles the row.
    async fn call<T, F>(
        &self,
        step: ForwardStep,
        saga: SagaState,
        request: &T,
        call: F,
    ) -> std::result::Result<StepOutcome, Interrupted>
    where
        T: Serialize + Sync,
        F: Future<Output = std::result::Result<StepReply, AdapterError>> + Send,
    {
        let (saga, row) = self.begin(saga, step.name(), request).await?;
        let needs_id = step.name().produces().is_some();
        match interpret(step.service(), call.await, needs_id) {
            Ok(reply) => {
                let response = reply_json(&reply);
                self.succeed(saga, row, reply.resource_id, response)
                    .await
                    .map(StepOutcome::Succeeded)
            }
            Err(error) => {
                let saga = self.fail(saga, row, &error, None).await?;
                Ok(StepOutcome::Failed {
                    saga,
                    error,
                    orphan: None,
                })
            }
        }
    }

    /// Appends an `InProgress` row with the next sequence number.
    async fn begin<T: Serialize>(
        &self,
        saga: SagaState,
        name: StepName,
        request: &T,
    ) -> std::result::Result<(SagaState, SagaStep), Interrupted> {
        let request = match serde_json::to_value(request) {
            Ok(request) => request,
            Err(e) => return Err(Interrupted::new(saga, e)),
        };
        let row = SagaStep::begin(saga.saga_id, name, saga.next_sequence(), Some(request));
        if let Err(e) = self.ledger.append_step(&row).await {
            return Err(Interrupted::new(saga, e));
        }
        Ok((saga.with_step(row.clone()), row))
    }

    async fn succeed(
        &self,
        saga: SagaState,
        row: SagaStep,
        resource_id: Option<String>,
        response: Value,
    ) -> std::result::Result<SagaState, Interrupted> {
        let handle = row.step_name.produces();
        // The handle goes on the snapshot before any write so that an
        // interrupted step is still compensated.
        let saga = match (handle, resource_id) {
            (Some(handle), Some(id)) => saga.with_handle(handle, id),
            _ => saga,
        };

        let row = row.complete(Some(response));
        if let Err(e) = self.ledger.update_step(&row).await {
            return Err(Interrupted::new(saga, e));
        }
        let saga = saga.with_step(row);

        if handle.is_some()
            && let Err(e) = self.ledger.update_saga(&saga).await
        {
            return Err(Interrupted::new(saga, e));
        }
        Ok(saga)
    }

    async fn fail(
        &self,
        saga: SagaState,
        row: SagaStep,
        error: &str,
        response: Option<Value>,
    ) -> std::result::Result<SagaState, Interrupted> {
        let row = row.fail(error, response);
        if let Err(e) = self.ledger.update_step(&row).await {
            return Err(Interrupted::new(saga, e));
        }
        Ok(saga.with_step(row))
    }

    async fn complete(&self, saga: SagaState, order: &mut Order) -> SagaState {
        match self.finish_completed(&saga, order).await {
            Ok((completed, finished)) => {
                *order = finished;
                metrics::counter!("saga_completed_total").increment(1);
                tracing::info!(saga_id = %completed.saga_id, "saga completed");
                completed
            }
            Err(error) => {
                tracing::error!(saga_id = %saga.saga_id, %error, "failed to complete saga");
                self.compensate(saga, order, format!("Unexpected error: {error}"), None)
                    .await
            }
        }
    }

    async fn finish_completed(&self, saga: &SagaState, order: &Order) -> Result<(SagaState, Order)> {
        let completed = saga.clone().advance(SagaStatus::Completed)?;
        let mut finished = order.clone();
        finished.complete(completed.completed_at.unwrap_or_else(Utc::now))?;
        self.ledger.finalize(&completed, &finished).await?;
        Ok((completed, finished))
    }

    /// Undoes completed work in reverse order: shipment, payment, then stock.
    ///
    /// Each compensating call runs even if an earlier one failed. Rejected
    /// calls are logged and do not change the outcome; a ledger failure makes
    /// the saga `Failed` and leaves the order untouched.
    #[tracing::instrument(skip(self, saga, order, orphan), fields(saga_id = %saga.saga_id))]
    async fn compensate(
        &self,
        saga: SagaState,
        order: &mut Order,
        reason: String,
        orphan: Option<String>,
    ) -> SagaState {
        tracing::warn!(%reason, "compensating saga");
        let mut ledger_failure: Option<String> = None;

        let mut saga = match saga.clone().advance(SagaStatus::Compensating) {
            Ok(next) => next.with_failure_reason(reason.clone()),
            Err(e) => return self.mark_failed(saga, &reason, &e.to_string()).await,
        };
        if let Err(e) = self.ledger.update_saga(&saga).await {
            tracing::error!(error = %e, "failed to record compensation start");
            ledger_failure.get_or_insert(e.to_string());
        }

        let call_reason = self.config.compensation_reason(&reason).to_string();

        if let Some(shipment_id) = saga.shipment_id.clone() {
            let request = CancelShipmentRequest {
                shipment_id,
                reason: call_reason.clone(),
            };
            saga = self
                .compensate_step(
                    saga,
                    StepName::CancelShipment,
                    "shipping service",
                    &request,
                    self.shipping.cancel_shipment(&request),
                    &mut ledger_failure,
                )
                .await;
        }

        if let Some(payment_id) = saga.payment_id.clone() {
            let request = RefundPaymentRequest {
                payment_id,
                reason: call_reason.clone(),
                amount: order.total_amount(),
            };
            saga = self
                .compensate_step(
                    saga,
                    StepName::RefundPayment,
                    "payment service",
                    &request,
                    self.payment.refund_payment(&request),
                    &mut ledger_failure,
                )
                .await;
        }

        if let Some(reservation_id) = saga.reservation_id.clone().or(orphan) {
            let request = json!({ "reservation_id": &reservation_id, "reason": &call_reason });
            saga = self
                .compensate_step(
                    saga,
                    StepName::ReleaseStock,
                    "inventory service",
                    &request,
                    self.inventory
                        .release_reservation(&reservation_id, &call_reason),
                    &mut ledger_failure,
                )
                .await;
        }

        if let Some(error) = ledger_failure {
            return self.mark_failed(saga, &reason, &error).await;
        }

        let compensating = saga.clone();
        match self.finish_compensated(saga, order).await {
            Ok((compensated, cancelled)) => {
                *order = cancelled;
                metrics::counter!("saga_compensated_total").increment(1);
                tracing::warn!(%reason, "saga compensated, order cancelled");
                compensated
            }
            Err(error) => {
                self.mark_failed(compensating, &reason, &error.to_string())
                    .await
            }
        }
    }

    /// Runs one compensating call under its own audit row.
    async fn compensate_step<T, F>(
        &self,
        saga: SagaState,
        name: StepName,
        service: &str,
        request: &T,
        call: F,
        ledger_failure: &mut Option<String>,
    ) -> SagaState
    where
        T: Serialize + Sync,
        F: Future<Output = std::result::Result<StepReply, AdapterError>> + Send,
    {
        let (saga, row) = match self.begin(saga, name, request).await {
            Ok((saga, row)) => (saga, Some(row)),
            Err(Interrupted { saga, error, .. }) => {
                tracing::error!(step = %name, %error, "failed to record compensation step");
                ledger_failure.get_or_insert(error.to_string());
                (saga, None)
            }
        };

        let result = interpret(service, call.await, false);
        match &result {
            Ok(_) => tracing::info!(step = %name, "compensation step completed"),
            Err(error) => {
                metrics::counter!("saga_compensation_failures_total", "step" => name.as_str())
                    .increment(1);
                tracing::warn!(step = %name, %error, "compensation step failed");
            }
        }

        let Some(row) = row else {
            return saga;
        };
        let settled = match result {
            Ok(reply) => self.succeed(saga, row, None, reply_json(&reply)).await,
            Err(error) => self.fail(saga, row, &error, None).await,
        };
        match settled {
            Ok(saga) => saga,
            Err(Interrupted { saga, error, .. }) => {
                tracing::error!(step = %name, %error, "failed to settle compensation step");
                ledger_failure.get_or_insert(error.to_string());
                saga
            }
        }
    }

    async fn finish_compensated(&self, saga: SagaState, order: &Order) -> Result<(SagaState, Order)> {
        let compensated = saga.advance(SagaStatus::Compensated)?;
        let mut cancelled = order.clone();
        cancelled.cancel()?;
        self.ledger.finalize(&compensated, &cancelled).await?;
        Ok((compensated, cancelled))
    }

    /// Moves a compensating saga to `Failed` for operators. The write is
    /// best effort.
    async fn mark_failed(&self, saga: SagaState, reason: &str, error: &str) -> SagaState {
        metrics::counter!("saga_failed_total").increment(1);
        let failed = match saga.clone().advance(SagaStatus::Failed) {
            Ok(failed) => failed.with_failure_reason(format!("{reason}; compensation failed: {error}")),
            Err(e) => {
                tracing::error!(saga_id = %saga.saga_id, error = %e, "cannot mark saga failed");
                return saga;
            }
        };
        if let Err(e) = self.ledger.update_saga(&failed).await {
            tracing::error!(saga_id = %failed.saga_id, error = %e, "failed to record saga failure");
        }
        tracing::error!(
            saga_id = %failed.saga_id,
            reason = failed.failure_reason.as_deref().unwrap_or_default(),
            "saga failed, needs operator attention"
        );
        failed
    }

    fn notification_request(&self, order: &Order) -> SendNotificationRequest {
        SendNotificationRequest {
            user_id: order.user_id(),
            order_id: order.id(),
            email_to: self.config.notification_email.clone(),
            subject: format!("Order #{} Confirmed", order.id()),
            body: format!(
                "Your order for {} has been confirmed and will be shipped soon.",
                order.total_amount()
            ),
            template: self.config.notification_template.clone(),
        }
    }

    fn shipment_request(&self, order: &Order) -> CreateShipmentRequest {
        let address = order.shipping_address();
        CreateShipmentRequest {
            order_id: order.id(),
            user_id: order.user_id(),
            street: address.street.clone(),
            city: address.city.clone(),
            country: address.country.clone(),
            zip_code: address.zip_code.clone(),
            phone_number: address.phone_number.clone(),
            method: self.config.shipping_method.clone(),
        }
    }
}

/// Turns a service answer into the reply to record, or a failure message.
fn interpret(
    service: &str,
    reply: std::result::Result<StepReply, AdapterError>,
    needs_id: bool,
) -> std::result::Result<StepReply, String> {
    match reply {
        Ok(reply) if !reply.success => Err(format!("rejected by {service}: {}", reply.message)),
        Ok(reply) if needs_id && reply.resource_id.is_none() => {
            Err(format!("{service} returned no resource id"))
        }
        Ok(reply) => Ok(reply),
        Err(e) => Err(e.to_string()),
    }
}

fn reply_json(reply: &StepReply) -> Value {
    json!({
        "resource_id": &reply.resource_id,
        "message": &reply.message,
    })
}
