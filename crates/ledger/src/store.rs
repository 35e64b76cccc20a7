use async_trait::async_trait;
use common::{OrderId, SagaId, UserId};
use domain::{Order, OrderStatus};

use crate::{Result, SagaState, SagaStatus, SagaStep};

/// Default number of orders per page.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Durable record of saga and step state.
///
/// Every write completes before the orchestrator moves on. Writes that touch
/// a saga whose stored status is terminal fail with `SagaTerminal`.
#[async_trait]
pub trait SagaLedger: Send + Sync {
    /// Persists a new saga header. Steps on the value are ignored.
    ///
    /// Fails with `SagaActive` while the order has a saga in a non-terminal
    /// status; the check and the insert are one atomic write.
    async fn create_saga(&self, saga: &SagaState) -> Result<()>;

    /// Persists a new step row.
    async fn append_step(&self, step: &SagaStep) -> Result<()>;

    /// Overwrites the saga header: status, reason, handles, `completed_at`.
    async fn update_saga(&self, saga: &SagaState) -> Result<()>;

    /// Overwrites an existing step row.
    async fn update_step(&self, step: &SagaStep) -> Result<()>;

    /// Atomically writes a terminal saga header together with the order row.
    async fn finalize(&self, saga: &SagaState, order: &Order) -> Result<()>;

    /// Loads a saga with its steps ordered by sequence.
    async fn find_saga(&self, saga_id: SagaId) -> Result<Option<SagaState>>;

    /// Loads the most recently started saga for an order.
    async fn find_saga_by_order(&self, order_id: OrderId) -> Result<Option<SagaState>>;

    /// Loads every saga currently in one of the given statuses, oldest first.
    async fn find_sagas_by_status(&self, statuses: &[SagaStatus]) -> Result<Vec<SagaState>>;
}

/// Storage of order rows.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Writes the order's status and `completed_at`. Items and totals never change.
    async fn update_order(&self, order: &Order) -> Result<()>;

    /// Lists orders newest first.
    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage>;
}

/// Filter and pagination for listing orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub user_id: Option<UserId>,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            status: None,
            user_id: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl OrderQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a single user's orders.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Clamps page to at least 1 and page size to `1..=MAX_PAGE_SIZE`.
    pub fn normalized(&self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
            ..self.clone()
        }
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// Returns true if the order passes the filters.
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| order.status() == s)
            && self.user_id.is_none_or(|u| order.user_id() == u)
    }
}

/// One page of orders plus the total number of matches.
#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl OrderPage {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query() {
        let q = OrderQuery::new();
        assert_eq!(q.page, 1);
        assert_eq!(q.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(q.offset(), 0);
    }

    #[test]
    fn test_normalized_clamps() {
        let q = OrderQuery::new().page(0, 500).normalized();
        assert_eq!(q.page, 1);
        assert_eq!(q.page_size, MAX_PAGE_SIZE);

        let q = OrderQuery::new().page(3, 0).normalized();
        assert_eq!(q.page_size, 1);
        assert_eq!(q.offset(), 2);
    }

    #[test]
    fn test_total_pages() {
        let page = OrderPage {
            orders: vec![],
            total: 21,
            page: 1,
            page_size: 10,
        };
        assert_eq!(page.total_pages(), 3);
    }
}
