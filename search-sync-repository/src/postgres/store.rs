//! PostgreSQL implementation of the queue store and the source store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::decode::ColumnPlan;
use super::sql::{
    fetch_rows_statement, CLAIM_BATCH, DELETE_ENTRIES, DESCRIBE_COLUMNS, QUEUE_BREAKDOWN, QUEUE_EXISTS,
    QUEUE_TOTALS,
};
use crate::config::PostgresConfig;
use crate::errors::StoreError;
use crate::interfaces::{ClaimedBatch, QueueStore, SourceStore};
use crate::types::{FetchRequest, QueueBreakdown, QueueStats};
use search_sync_shared::{Operation, QueueEntry, SourceRow};

/// Alias of the record id column appended to every source read.
const RECORD_ID_ALIAS: &str = "__sync_record_id";

/// Key column types whose values can be compared after casting the text ids.
const CASTABLE_KEY_TYPES: &[&str] = &["int2", "int4", "int8", "numeric", "uuid", "text", "varchar"];

/// PostgreSQL-backed store for the change queue and the synchronized rows.
///
/// Queue claims hold a transaction for the lifetime of the batch: entries are
/// read with `FOR UPDATE SKIP LOCKED` and deleted in the same transaction on
/// commit, so concurrent consumers never share an entry.
pub struct PostgresStore {
    pool: PgPool,
    timeout: Duration,
    columns: RwLock<HashMap<String, Arc<Vec<ColumnPlan>>>>,
}

impl PostgresStore {
    /// Connect a pool using the given settings.
    ///
    /// # Returns
    ///
    /// * `Ok(PostgresStore)` - A store with a live pool
    /// * `Err(StoreError)` - If no connection could be established
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.dbname);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.timeout)
            .idle_timeout(Some(Duration::from_secs(300)))
            .connect_with(options)
            .await?;

        info!(
            host = %config.host,
            port = config.port,
            dbname = %config.dbname,
            "Connected to PostgreSQL"
        );

        Ok(Self::from_pool(pool, config.timeout))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self {
            pool,
            timeout,
            columns: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Check that the database answers a trivial query.
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        let one: i32 = bounded(
            self.timeout,
            "health check",
            sqlx::query_scalar("SELECT 1").fetch_one(&self.pool),
        )
        .await?;
        Ok(one == 1)
    }

    /// Columns of a table or view with their decode plans, cached per source.
    pub(crate) async fn column_plans(
        &self,
        source_name: &str,
    ) -> Result<Arc<Vec<ColumnPlan>>, StoreError> {
        if let Some(plans) = self.columns.read().await.get(source_name) {
            return Ok(Arc::clone(plans));
        }

        let rows = bounded(
            self.timeout,
            "describe columns",
            sqlx::query(DESCRIBE_COLUMNS)
                .bind(source_name)
                .fetch_all(&self.pool),
        )
        .await?;

        if rows.is_empty() {
            return Err(StoreError::missing_object(format!(
                "relation '{}' does not exist or has no columns",
                source_name
            )));
        }

        let plans = rows
            .iter()
            .map(|row| {
                let name: String = row.try_get("column_name")?;
                let udt_name: String = row.try_get("udt_name")?;
                Ok(ColumnPlan::from_udt(name, udt_name))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        debug!(source = %source_name, columns = plans.len(), "Described source columns");

        let plans = Arc::new(plans);
        self.columns
            .write()
            .await
            .insert(source_name.to_string(), Arc::clone(&plans));
        Ok(plans)
    }
}

/// Run `fut`, failing with a timeout error once `timeout` elapses.
pub(crate) async fn bounded<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::timeout(format!(
            "{} did not complete within {:?}",
            what, timeout
        ))),
    }
}

fn parse_operation(raw: &str, sequence: i64) -> Operation {
    raw.parse().unwrap_or_else(|e| {
        warn!(sequence, error = %e, "Treating unrecognized queue operation as UPDATE");
        Operation::Update
    })
}

#[async_trait]
impl QueueStore for PostgresStore {
    #[instrument(skip(self, request), fields(sources = request.source_names.len(), limit = request.limit))]
    async fn claim_batch(
        &self,
        request: &FetchRequest,
    ) -> Result<Box<dyn ClaimedBatch>, StoreError> {
        let mut tx = bounded(self.timeout, "begin transaction", self.pool.begin()).await?;

        let statement_timeout = format!(
            "SET LOCAL statement_timeout = {}",
            self.timeout.as_millis().max(1)
        );
        bounded(
            self.timeout,
            "set statement timeout",
            sqlx::query(&statement_timeout).execute(&mut *tx),
        )
        .await?;

        let limit = i64::try_from(request.limit).unwrap_or(i64::MAX);
        let rows = bounded(
            self.timeout,
            "claim batch",
            sqlx::query(CLAIM_BATCH)
                .bind(&request.source_names)
                .bind(request.after_sequence.unwrap_or(0))
                .bind(limit)
                .fetch_all(&mut *tx),
        )
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let sequence: i64 = row.try_get("id")?;
            let raw_operation: String = row.try_get("operation_type")?;
            entries.push(QueueEntry {
                sequence,
                record_id: row.try_get("record_id")?,
                source_name: row.try_get("table_name")?,
                operation: parse_operation(&raw_operation, sequence),
                enqueued_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            });
        }

        debug!(claimed = entries.len(), "Claimed queue entries");

        Ok(Box::new(PostgresClaimedBatch {
            tx,
            entries,
            timeout: self.timeout,
        }))
    }

    async fn queue_exists(&self) -> Result<bool, StoreError> {
        bounded(
            self.timeout,
            "queue existence check",
            sqlx::query_scalar(QUEUE_EXISTS).fetch_one(&self.pool),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn stats(&self, source_names: &[String]) -> Result<QueueStats, StoreError> {
        let totals = bounded(
            self.timeout,
            "queue totals",
            sqlx::query(QUEUE_TOTALS)
                .bind(source_names)
                .fetch_one(&self.pool),
        )
        .await?;

        let rows = bounded(
            self.timeout,
            "queue breakdown",
            sqlx::query(QUEUE_BREAKDOWN)
                .bind(source_names)
                .fetch_all(&self.pool),
        )
        .await?;

        let mut breakdown = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_operation: String = row.try_get("operation_type")?;
            breakdown.push(QueueBreakdown {
                source_name: row.try_get("table_name")?,
                operation: parse_operation(&raw_operation, 0),
                count: row.try_get("count")?,
            });
        }

        Ok(QueueStats {
            total: totals.try_get("total")?,
            oldest: totals.try_get("oldest")?,
            newest: totals.try_get("newest")?,
            breakdown,
        })
    }
}

/// Entries claimed inside an open transaction.
struct PostgresClaimedBatch {
    tx: Transaction<'static, Postgres>,
    entries: Vec<QueueEntry>,
    timeout: Duration,
}

#[async_trait]
impl ClaimedBatch for PostgresClaimedBatch {
    fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    async fn commit(self: Box<Self>, sequences: &[i64]) -> Result<u64, StoreError> {
        let PostgresClaimedBatch {
            mut tx, timeout, ..
        } = *self;

        let mut removed = 0;
        if !sequences.is_empty() {
            let result = bounded(
                timeout,
                "delete committed entries",
                sqlx::query(DELETE_ENTRIES)
                    .bind(sequences.to_vec())
                    .execute(&mut *tx),
            )
            .await?;
            removed = result.rows_affected();
        }

        bounded(timeout, "commit", tx.commit()).await?;

        debug!(removed, "Committed queue batch");
        Ok(removed)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresClaimedBatch { tx, timeout, .. } = *self;
        bounded(timeout, "rollback", tx.rollback()).await
    }
}

#[async_trait]
impl SourceStore for PostgresStore {
    #[instrument(skip(self, record_ids), fields(records = record_ids.len()))]
    async fn fetch_rows(
        &self,
        source_name: &str,
        primary_key: &str,
        record_ids: &[String],
    ) -> Result<HashMap<String, SourceRow>, StoreError> {
        if record_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let plans = self.column_plans(source_name).await?;
        let key_plan = plans
            .iter()
            .find(|plan| plan.name == primary_key)
            .ok_or_else(|| {
                StoreError::missing_object(format!(
                    "key column '{}' not found on '{}'",
                    primary_key, source_name
                ))
            })?;

        let select_list = plans
            .iter()
            .map(ColumnPlan::select_expr)
            .collect::<Vec<_>>()
            .join(", ");
        let key_cast = CASTABLE_KEY_TYPES
            .contains(&key_plan.udt_name.as_str())
            .then_some(key_plan.udt_name.as_str());
        let query = fetch_rows_statement(&select_list, source_name, primary_key, key_cast, RECORD_ID_ALIAS);

        let rows = bounded(
            self.timeout,
            "fetch source rows",
            sqlx::query(&query).bind(record_ids).fetch_all(&self.pool),
        )
        .await?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            let record_id: String = row.try_get(RECORD_ID_ALIAS)?;
            let mut source_row = SourceRow::new();
            for (index, plan) in plans.iter().enumerate() {
                source_row.insert(plan.name.clone(), plan.decode(&row, index)?);
            }
            found.insert(record_id, source_row);
        }

        debug!(
            source = %source_name,
            requested = record_ids.len(),
            found = found.len(),
            "Fetched source rows"
        );
        Ok(found)
    }
}
