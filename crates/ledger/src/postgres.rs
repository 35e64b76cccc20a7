use std::collections::HashMap;

use async_trait::async_trait;
use common::{OrderId, SagaId, StepId, UserId};
use domain::{Money, Order, OrderItem, OrderRecord, OrderStatus, ShippingAddress};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LedgerError, Result, SagaState, SagaStatus, SagaStep,
    store::{OrderPage, OrderQuery, OrderRepository, SagaLedger},
};

const SAGA_COLUMNS: &str = "id, order_id, status, started_at, completed_at, failure_reason, \
     reservation_id, payment_id, notification_id, shipment_id";

const STEP_COLUMNS: &str = "id, saga_id, step_name, sequence, status, started_at, completed_at, \
     request, response, error_message, retry_count";

const ORDER_COLUMNS: &str = "id, user_id, status, total_amount_cents, street, city, country, \
     zip_code, phone_number, created_at, completed_at";

/// Partial unique index allowing one non-terminal saga per order.
const ACTIVE_SAGA_INDEX: &str = "idx_saga_states_one_active_per_order";

/// PostgreSQL-backed saga ledger and order repository.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to the given database URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Locks the saga row for the rest of the transaction and rejects terminal sagas.
    async fn lock_writable(tx: &mut Transaction<'_, Postgres>, saga_id: SagaId) -> Result<()> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM saga_states WHERE id = $1 FOR UPDATE")
                .bind(saga_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;

        let status: SagaStatus = status.ok_or(LedgerError::SagaNotFound(saga_id))?.parse()?;
        if status.is_terminal() {
            return Err(LedgerError::SagaTerminal { saga_id, status });
        }
        Ok(())
    }

    async fn write_saga_header(tx: &mut Transaction<'_, Postgres>, saga: &SagaState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE saga_states
            SET status = $2, completed_at = $3, failure_reason = $4,
                reservation_id = $5, payment_id = $6, notification_id = $7, shipment_id = $8
            WHERE id = $1
            "#,
        )
        .bind(saga.saga_id.as_uuid())
        .bind(saga.status.as_str())
        .bind(saga.completed_at)
        .bind(&saga.failure_reason)
        .bind(&saga.reservation_id)
        .bind(&saga.payment_id)
        .bind(&saga.notification_id)
        .bind(&saga.shipment_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn active_saga(&self, order_id: OrderId) -> Result<Option<SagaId>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM saga_states \
             WHERE order_id = $1 AND status IN ('Started', 'InProgress', 'Compensating')",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.map(SagaId::from_uuid))
    }

    fn row_to_saga(row: &PgRow) -> Result<SagaState> {
        Ok(SagaState {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            status: row.try_get::<String, _>("status")?.parse()?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            failure_reason: row.try_get("failure_reason")?,
            reservation_id: row.try_get("reservation_id")?,
            payment_id: row.try_get("payment_id")?,
            notification_id: row.try_get("notification_id")?,
            shipment_id: row.try_get("shipment_id")?,
            steps: Vec::new(),
        })
    }

    fn row_to_step(row: &PgRow) -> Result<SagaStep> {
        Ok(SagaStep {
            step_id: StepId::from_uuid(row.try_get::<Uuid, _>("id")?),
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            step_name: row.try_get::<String, _>("step_name")?.parse()?,
            sequence: row.try_get("sequence")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            request: row.try_get("request")?,
            response: row.try_get("response")?,
            error_message: row.try_get("error_message")?,
            retry_count: row.try_get("retry_count")?,
        })
    }

    async fn load_steps(&self, saga: SagaState) -> Result<SagaState> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM saga_steps WHERE saga_id = $1 ORDER BY sequence ASC"
        ))
        .bind(saga.saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let steps = rows.iter().map(Self::row_to_step).collect::<Result<_>>()?;
        Ok(SagaState { steps, ..saga })
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let status: OrderStatus = row
            .try_get::<String, _>("status")?
            .parse()
            .map_err(|e: domain::OrderError| LedgerError::InvalidValue(e.to_string()))?;

        Ok(Order::from(OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            status,
            total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
            shipping_address: ShippingAddress {
                street: row.try_get("street")?,
                city: row.try_get("city")?,
                country: row.try_get("country")?,
                zip_code: row.try_get("zip_code")?,
                phone_number: row.try_get("phone_number")?,
            },
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
            items,
        }))
    }

    /// Loads the lines of the given orders, keyed by order id, in line order.
    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let quantity: i32 = row.try_get("quantity")?;
            let quantity = u32::try_from(quantity)
                .map_err(|_| LedgerError::InvalidValue(format!("negative quantity {quantity}")))?;
            items
                .entry(row.try_get::<Uuid, _>("order_id")?)
                .or_default()
                .push(OrderItem::new(
                    row.try_get::<String, _>("product_id")?,
                    row.try_get::<String, _>("product_name")?,
                    quantity,
                    Money::from_cents(row.try_get("unit_price_cents")?),
                ));
        }
        Ok(items)
    }

    async fn rows_to_orders(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.load_items(&ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(&id).unwrap_or_default()))
            .collect()
    }
}

#[async_trait]
impl SagaLedger for PostgresLedger {
    async fn create_saga(&self, saga: &SagaState) -> Result<()> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO saga_states ({SAGA_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(saga.saga_id.as_uuid())
        .bind(saga.order_id.as_uuid())
        .bind(saga.status.as_str())
        .bind(saga.started_at)
        .bind(saga.completed_at)
        .bind(&saga.failure_reason)
        .bind(&saga.reservation_id)
        .bind(&saga.payment_id)
        .bind(&saga.notification_id)
        .bind(&saga.shipment_id)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_foreign_key_violation() => {
                Err(LedgerError::OrderNotFound(saga.order_id))
            }
            Err(sqlx::Error::Database(ref db_err))
                if db_err.constraint() == Some(ACTIVE_SAGA_INDEX) =>
            {
                match self.active_saga(saga.order_id).await? {
                    Some(active) => Err(LedgerError::SagaActive {
                        order_id: saga.order_id,
                        saga_id: active,
                    }),
                    // The blocking saga finished between the insert and the lookup.
                    None => Err(LedgerError::Unavailable(format!(
                        "saga insert for order {} conflicted, retry",
                        saga.order_id
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_step(&self, step: &SagaStep) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_writable(&mut tx, step.saga_id).await?;

        sqlx::query(&format!(
            "INSERT INTO saga_steps ({STEP_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(step.step_id.as_uuid())
        .bind(step.saga_id.as_uuid())
        .bind(step.step_name.as_str())
        .bind(step.sequence)
        .bind(step.status.as_str())
        .bind(step.started_at)
        .bind(step.completed_at)
        .bind(&step.request)
        .bind(&step.response)
        .bind(&step.error_message)
        .bind(step.retry_count)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_saga_step_sequence")
            {
                return LedgerError::InvalidValue(format!(
                    "sequence {} already used in saga {}",
                    step.sequence, step.saga_id
                ));
            }
            LedgerError::Database(e)
        })?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_saga(&self, saga: &SagaState) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_writable(&mut tx, saga.saga_id).await?;
        Self::write_saga_header(&mut tx, saga).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_step(&self, step: &SagaStep) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_writable(&mut tx, step.saga_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE saga_steps
            SET status = $2, completed_at = $3, response = $4, error_message = $5, retry_count = $6
            WHERE id = $1
            "#,
        )
        .bind(step.step_id.as_uuid())
        .bind(step.status.as_str())
        .bind(step.completed_at)
        .bind(&step.response)
        .bind(&step.error_message)
        .bind(step.retry_count)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::StepNotFound(step.step_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn finalize(&self, saga: &SagaState, order: &Order) -> Result<()> {
        if !saga.status.is_terminal() {
            return Err(LedgerError::InvalidValue(format!(
                "cannot finalize saga {} in {} status",
                saga.saga_id, saga.status
            )));
        }

        let mut tx = self.pool.begin().await?;
        Self::lock_writable(&mut tx, saga.saga_id).await?;
        Self::write_saga_header(&mut tx, saga).await?;

        let result = sqlx::query("UPDATE orders SET status = $2, completed_at = $3 WHERE id = $1")
            .bind(order.id().as_uuid())
            .bind(order.status().as_str())
            .bind(order.completed_at())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::OrderNotFound(order.id()));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_saga(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        let row = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM saga_states WHERE id = $1"
        ))
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_steps(Self::row_to_saga(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn find_saga_by_order(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        let row = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM saga_states WHERE order_id = $1 \
             ORDER BY started_at DESC LIMIT 1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_steps(Self::row_to_saga(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn find_sagas_by_status(&self, statuses: &[SagaStatus]) -> Result<Vec<SagaState>> {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM saga_states WHERE status = ANY($1) ORDER BY started_at ASC"
        ))
        .bind(names)
        .fetch_all(&self.pool)
        .await?;

        let mut sagas = Vec::with_capacity(rows.len());
        for row in &rows {
            sagas.push(self.load_steps(Self::row_to_saga(row)?).await?);
        }
        Ok(sagas)
    }
}

#[async_trait]
impl OrderRepository for PostgresLedger {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let address = order.shipping_address();

        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.total_amount().cents())
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.country)
        .bind(&address.zip_code)
        .bind(&address.phone_number)
        .bind(order.created_at())
        .bind(order.completed_at())
        .execute(&mut *tx)
        .await?;

        for (line_no, item) in order.items().iter().enumerate() {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                LedgerError::InvalidValue(format!("quantity {} out of range", item.quantity))
            })?;
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line_no, product_id, product_name, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(line_no as i32 + 1)
            .bind(item.product_id.as_str())
            .bind(&item.product_name)
            .bind(quantity)
            .bind(item.unit_price.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.rows_to_orders(vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2, completed_at = $3 WHERE id = $1")
            .bind(order.id().as_uuid())
            .bind(order.status().as_str())
            .bind(order.completed_at())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::OrderNotFound(order.id()));
        }
        Ok(())
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage> {
        let query = query.normalized();

        // Build dynamic filter
        let mut filter = String::from(" WHERE 1=1");
        let mut param_count = 0;
        if query.status.is_some() {
            param_count += 1;
            filter.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.user_id.is_some() {
            param_count += 1;
            filter.push_str(&format!(" AND user_id = ${param_count}"));
        }

        let count_sql = format!("SELECT COUNT(*) FROM orders{filter}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(status) = query.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(user_id) = query.user_id {
            count_query = count_query.bind(user_id.as_uuid());
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let page_sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders{filter} ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        );
        let mut page_query = sqlx::query(&page_sql);
        if let Some(status) = query.status {
            page_query = page_query.bind(status.as_str());
        }
        if let Some(user_id) = query.user_id {
            page_query = page_query.bind(user_id.as_uuid());
        }
        let rows = page_query
            .bind(i64::from(query.page_size))
            .bind(query.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(OrderPage {
            orders: self.rows_to_orders(rows).await?,
            total: total.max(0) as u64,
            page: query.page,
            page_size: query.page_size,
        })
    }
}
