use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, SagaId};
use domain::Order;
use tokio::sync::RwLock;

use crate::{
    LedgerError, Result, SagaState, SagaStatus, SagaStep, StepName,
    store::{OrderPage, OrderQuery, OrderRepository, SagaLedger},
};

#[derive(Default)]
struct Tables {
    /// Saga headers; the `steps` field is always empty here.
    sagas: HashMap<SagaId, SagaState>,
    steps: HashMap<SagaId, Vec<SagaStep>>,
    sagas_by_order: HashMap<OrderId, Vec<SagaId>>,
    orders: HashMap<OrderId, Order>,
}

impl Tables {
    fn ensure_writable(&self, saga_id: SagaId) -> Result<()> {
        let saga = self
            .sagas
            .get(&saga_id)
            .ok_or(LedgerError::SagaNotFound(saga_id))?;
        if saga.status.is_terminal() {
            return Err(LedgerError::SagaTerminal {
                saga_id,
                status: saga.status,
            });
        }
        Ok(())
    }

    fn active_saga(&self, order_id: OrderId) -> Option<SagaId> {
        self.sagas_by_order
            .get(&order_id)?
            .iter()
            .find(|id| self.sagas.get(id).is_some_and(|s| !s.status.is_terminal()))
            .copied()
    }

    fn assemble(&self, saga_id: SagaId) -> Option<SagaState> {
        let mut saga = self.sagas.get(&saga_id)?.clone();
        let mut steps = self.steps.get(&saga_id).cloned().unwrap_or_default();
        steps.sort_by_key(|s| s.sequence);
        saga.steps = steps;
        Some(saga)
    }

    fn store_header(&mut self, saga: &SagaState) {
        let mut header = saga.clone();
        header.steps.clear();
        self.sagas.insert(saga.saga_id, header);
    }
}

#[derive(Default)]
struct Faults {
    saga_status: Option<SagaStatus>,
    step_append: Option<StepName>,
}

/// In-memory ledger and order repository for testing and local runs.
///
/// Provides the same interface as the PostgreSQL implementation, plus
/// switches that make selected writes fail.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<RwLock<Faults>>,
}

impl InMemoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `update_saga` and `finalize` fail for sagas carrying `status`.
    pub async fn fail_saga_writes_with_status(&self, status: Option<SagaStatus>) {
        self.faults.write().await.saga_status = status;
    }

    /// Makes `append_step` fail for rows of the named step.
    pub async fn fail_step_appends_for(&self, step: Option<StepName>) {
        self.faults.write().await.step_append = step;
    }

    /// Returns the number of sagas stored.
    pub async fn saga_count(&self) -> usize {
        self.tables.read().await.sagas.len()
    }

    async fn check_saga_fault(&self, saga: &SagaState) -> Result<()> {
        if self.faults.read().await.saga_status == Some(saga.status) {
            return Err(LedgerError::Unavailable(format!(
                "write of {} saga {} rejected",
                saga.status, saga.saga_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SagaLedger for InMemoryLedger {
    async fn create_saga(&self, saga: &SagaState) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.sagas.contains_key(&saga.saga_id) {
            return Err(LedgerError::InvalidValue(format!(
                "saga {} already exists",
                saga.saga_id
            )));
        }
        if !tables.orders.contains_key(&saga.order_id) {
            return Err(LedgerError::OrderNotFound(saga.order_id));
        }
        if let Some(active) = tables.active_saga(saga.order_id) {
            return Err(LedgerError::SagaActive {
                order_id: saga.order_id,
                saga_id: active,
            });
        }
        tables.store_header(saga);
        tables
            .sagas_by_order
            .entry(saga.order_id)
            .or_default()
            .push(saga.saga_id);
        Ok(())
    }

    async fn append_step(&self, step: &SagaStep) -> Result<()> {
        if self.faults.read().await.step_append == Some(step.step_name) {
            return Err(LedgerError::Unavailable(format!(
                "append of {} step rejected",
                step.step_name
            )));
        }

        let mut tables = self.tables.write().await;
        tables.ensure_writable(step.saga_id)?;
        let rows = tables.steps.entry(step.saga_id).or_default();
        if rows.iter().any(|s| s.sequence == step.sequence) {
            return Err(LedgerError::InvalidValue(format!(
                "sequence {} already used in saga {}",
                step.sequence, step.saga_id
            )));
        }
        rows.push(step.clone());
        Ok(())
    }

    async fn update_saga(&self, saga: &SagaState) -> Result<()> {
        self.check_saga_fault(saga).await?;

        let mut tables = self.tables.write().await;
        tables.ensure_writable(saga.saga_id)?;
        tables.store_header(saga);
        Ok(())
    }

    async fn update_step(&self, step: &SagaStep) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.ensure_writable(step.saga_id)?;
        let row = tables
            .steps
            .get_mut(&step.saga_id)
            .and_then(|rows| rows.iter_mut().find(|s| s.step_id == step.step_id))
            .ok_or(LedgerError::StepNotFound(step.step_id))?;
        *row = step.clone();
        Ok(())
    }

    async fn finalize(&self, saga: &SagaState, order: &Order) -> Result<()> {
        if !saga.status.is_terminal() {
            return Err(LedgerError::InvalidValue(format!(
                "cannot finalize saga {} in {} status",
                saga.saga_id, saga.status
            )));
        }
        self.check_saga_fault(saga).await?;

        let mut tables = self.tables.write().await;
        tables.ensure_writable(saga.saga_id)?;
        if !tables.orders.contains_key(&order.id()) {
            return Err(LedgerError::OrderNotFound(order.id()));
        }
        tables.store_header(saga);
        tables.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn find_saga(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        Ok(self.tables.read().await.assemble(saga_id))
    }

    async fn find_saga_by_order(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sagas_by_order
            .get(&order_id)
            .and_then(|ids| ids.last())
            .and_then(|id| tables.assemble(*id)))
    }

    async fn find_sagas_by_status(&self, statuses: &[SagaStatus]) -> Result<Vec<SagaState>> {
        let tables = self.tables.read().await;
        let mut sagas: Vec<_> = tables
            .sagas
            .values()
            .filter(|s| statuses.contains(&s.status))
            .filter_map(|s| tables.assemble(s.saga_id))
            .collect();
        sagas.sort_by_key(|s| s.started_at);
        Ok(sagas)
    }
}

#[async_trait]
impl OrderRepository for InMemoryLedger {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&order.id()) {
            return Err(LedgerError::InvalidValue(format!(
                "order {} already exists",
                order.id()
            )));
        }
        tables.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .orders
            .get_mut(&order.id())
            .ok_or(LedgerError::OrderNotFound(order.id()))?;
        *stored = order.clone();
        Ok(())
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage> {
        let query = query.normalized();
        let tables = self.tables.read().await;
        let mut matching: Vec<_> = tables
            .orders
            .values()
            .filter(|o| query.matches(o))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        let total = matching.len() as u64;
        let orders = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size as usize)
            .collect();

        Ok(OrderPage {
            orders,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }
}
