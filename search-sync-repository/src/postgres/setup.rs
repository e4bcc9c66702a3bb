//! Change capture provisioning: queue table, capture functions, triggers,
//! and backfill of existing rows.

use std::time::Duration;

use sqlx::Row;
use tracing::{debug, info, instrument};

use super::sql::{
    backfill_statement, quote_ident, quote_literal, CAPTURE_FUNCTION, CREATE_QUEUE_TABLE,
    CREATE_QUEUE_UNIQUE_INDEX, NAMED_CAPTURE_FUNCTION, QUEUE_TABLE, RELATION_KIND, TRIGGER_EXISTS,
};
use super::store::{bounded, PostgresStore};
use crate::errors::StoreError;
use crate::types::RelationKind;
use search_sync_shared::TableConfig;

/// What a capture setup run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSetupReport {
    /// Triggers created by this run, by name.
    pub triggers_created: Vec<String>,
    /// Triggers that were already installed.
    pub triggers_existing: Vec<String>,
}

/// A backfill copies a whole relation, so it gets this many request timeouts.
const BACKFILL_TIMEOUT_FACTOR: u32 = 30;

fn backfill_timeout(request_timeout: Duration) -> Duration {
    request_timeout.saturating_mul(BACKFILL_TIMEOUT_FACTOR)
}

impl PostgresStore {
    /// Whether `name` is a table or a view in the current schema.
    pub async fn relation_kind(&self, name: &str) -> Result<Option<RelationKind>, StoreError> {
        let kind: Option<String> = bounded(
            self.timeout(),
            "relation lookup",
            sqlx::query_scalar(RELATION_KIND)
                .bind(name)
                .fetch_optional(self.pool()),
        )
        .await?;

        Ok(kind.map(|kind| {
            if kind == "VIEW" {
                RelationKind::View
            } else {
                RelationKind::Table
            }
        }))
    }

    /// Install the queue, the capture functions and one trigger per table.
    ///
    /// Views are captured through a trigger on their reference table that
    /// records the view name as the source. Everything runs in one
    /// transaction and existing objects are left untouched, so the call can
    /// be repeated.
    #[instrument(skip(self, tables), fields(tables = tables.len()))]
    pub async fn setup_capture(
        &self,
        tables: &[TableConfig],
    ) -> Result<CaptureSetupReport, StoreError> {
        for table in tables {
            self.validate_relation(table).await?;
        }

        let timeout = self.timeout();
        let mut tx = bounded(timeout, "begin transaction", self.pool().begin()).await?;

        for statement in [
            CREATE_QUEUE_TABLE,
            CREATE_QUEUE_UNIQUE_INDEX,
            CAPTURE_FUNCTION,
            NAMED_CAPTURE_FUNCTION,
        ] {
            bounded(
                timeout,
                "create capture objects",
                sqlx::raw_sql(statement).execute(&mut *tx),
            )
            .await?;
        }
        debug!(queue = QUEUE_TABLE, "Queue table and capture functions ready");

        let mut report = CaptureSetupReport::default();
        for table in tables {
            let trigger_name = table.trigger_name();
            let trigger_table = table.trigger_table();

            let exists: bool = bounded(
                timeout,
                "trigger lookup",
                sqlx::query_scalar(TRIGGER_EXISTS)
                    .bind(&trigger_name)
                    .bind(quote_ident(trigger_table))
                    .fetch_one(&mut *tx),
            )
            .await?;

            if exists {
                debug!(trigger = %trigger_name, "Trigger already installed");
                report.triggers_existing.push(trigger_name);
                continue;
            }

            let statement = trigger_statement(table);
            bounded(
                timeout,
                "create trigger",
                sqlx::raw_sql(&statement).execute(&mut *tx),
            )
            .await?;

            info!(
                trigger = %trigger_name,
                table = %trigger_table,
                source = %table.source_name,
                "Created capture trigger"
            );
            report.triggers_created.push(trigger_name);
        }

        bounded(timeout, "commit", tx.commit()).await?;
        Ok(report)
    }

    /// Enqueue an `INSERT` entry for every existing row of `table`.
    ///
    /// Records that already have a pending entry keep it. The copy may take
    /// `BACKFILL_TIMEOUT_FACTOR` request timeouts.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Number of entries enqueued
    /// * `Err(StoreError)` - If the relation could not be read
    #[instrument(skip(self, table), fields(source = %table.source_name))]
    pub async fn backfill(&self, table: &TableConfig) -> Result<u64, StoreError> {
        let statement = backfill_statement(&table.source_name, &table.primary_key);
        let timeout = backfill_timeout(self.timeout());

        let mut tx = bounded(self.timeout(), "begin transaction", self.pool().begin()).await?;
        let result = bounded(
            timeout,
            "backfill",
            sqlx::query(&statement).bind(&table.source_name).execute(&mut *tx),
        )
        .await?;
        bounded(self.timeout(), "commit backfill", tx.commit()).await?;

        info!(enqueued = result.rows_affected(), "Backfilled queue");
        Ok(result.rows_affected())
    }

    /// Whether the capture trigger for `table` is installed.
    pub async fn trigger_installed(&self, table: &TableConfig) -> Result<bool, StoreError> {
        if self.relation_kind(table.trigger_table()).await?.is_none() {
            return Ok(false);
        }

        bounded(
            self.timeout(),
            "trigger lookup",
            sqlx::query_scalar(TRIGGER_EXISTS)
                .bind(table.trigger_name())
                .bind(quote_ident(table.trigger_table()))
                .fetch_one(self.pool()),
        )
        .await
    }

    /// Number of rows currently in a table or view.
    pub async fn row_count(&self, source_name: &str) -> Result<i64, StoreError> {
        let statement = format!("SELECT COUNT(*) AS count FROM {}", quote_ident(source_name));
        let row = bounded(
            self.timeout(),
            "row count",
            sqlx::query(&statement).fetch_one(self.pool()),
        )
        .await?;
        Ok(row.try_get("count")?)
    }

    async fn validate_relation(&self, table: &TableConfig) -> Result<(), StoreError> {
        let kind = self.relation_kind(&table.source_name).await?.ok_or_else(|| {
            StoreError::missing_object(format!(
                "table or view '{}' does not exist",
                table.source_name
            ))
        })?;

        if kind == RelationKind::View {
            let reference = table.reference_table.as_deref().ok_or_else(|| {
                StoreError::query(format!(
                    "'{}' is a view; set reference_table to the table whose changes it follows",
                    table.source_name
                ))
            })?;

            if self.relation_kind(reference).await? != Some(RelationKind::Table) {
                return Err(StoreError::missing_object(format!(
                    "reference table '{}' for view '{}' does not exist",
                    reference, table.source_name
                )));
            }
        }

        Ok(())
    }
}

/// `CREATE TRIGGER` statement capturing changes for `table`.
pub(crate) fn trigger_statement(table: &TableConfig) -> String {
    let arguments = if table.is_view_backed() {
        format!(
            "log_changes_for_typesense_with_name({}, {})",
            quote_literal(&table.source_name),
            quote_literal(&table.primary_key)
        )
    } else {
        format!(
            "log_changes_for_typesense({})",
            quote_literal(&table.primary_key)
        )
    };

    format!(
        "CREATE TRIGGER {} AFTER INSERT OR UPDATE OR DELETE ON {} FOR EACH ROW EXECUTE FUNCTION {}",
        quote_ident(&table.trigger_name()),
        quote_ident(table.trigger_table()),
        arguments
    )
}
