//! `status`: read-only report on stores, queue and collections.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::Dependencies;
use crate::SyncError;
use search_sync_repository::{
    CollectionAdmin, QueueStats, QueueStore, RelationKind, SearchIndexProvider, QUEUE_TABLE,
};
use search_sync_shared::TableConfig;

/// State of one configured table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableStatus {
    pub source_name: String,
    pub collection_name: String,
    pub relation: Option<RelationKind>,
    pub row_count: Option<i64>,
    pub trigger_installed: bool,
    /// Field and document counts when the collection exists.
    pub collection: Option<(usize, u64)>,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub database_healthy: bool,
    pub index_healthy: bool,
    pub queue_exists: bool,
    pub queue: QueueStats,
    pub tables: Vec<TableStatus>,
}

/// Gather the report. Connectivity problems are part of the report, not errors.
pub async fn collect_status(
    deps: &Dependencies,
    tables: &[TableConfig],
) -> Result<StatusReport, SyncError> {
    let database_healthy = deps.store.health_check().await.unwrap_or_else(|e| {
        warn!(error = %e, "PostgreSQL health check failed");
        false
    });
    let index_healthy = deps.index.health_check().await.unwrap_or_else(|e| {
        warn!(error = %e, "Typesense health check failed");
        false
    });

    let mut report = StatusReport {
        database_healthy,
        index_healthy,
        queue_exists: false,
        queue: QueueStats::default(),
        tables: Vec::with_capacity(tables.len()),
    };

    if database_healthy {
        report.queue_exists = deps.store.queue_exists().await?;
        if report.queue_exists {
            let names: Vec<String> = tables.iter().map(|t| t.source_name.clone()).collect();
            report.queue = deps.store.stats(&names).await?;
        }
    }

    for table in tables {
        let mut status = TableStatus {
            source_name: table.source_name.clone(),
            collection_name: table.collection_name.clone(),
            relation: None,
            row_count: None,
            trigger_installed: false,
            collection: None,
        };

        if database_healthy {
            status.relation = deps.store.relation_kind(&table.source_name).await?;
            if status.relation.is_some() {
                status.row_count = Some(deps.store.row_count(&table.source_name).await?);
                status.trigger_installed = deps.store.trigger_installed(table).await?;
            }
        }

        if index_healthy {
            status.collection = deps
                .index
                .retrieve_collection(&table.collection_name)
                .await?
                .map(|info| (info.fields.len(), info.num_documents));
        }

        report.tables.push(status);
    }

    Ok(report)
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}

/// Human-readable rendering of a [`StatusReport`].
pub fn render(report: &StatusReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Connections");
    let _ = writeln!(out, "  postgres:  {}", if report.database_healthy { "ok" } else { "unreachable" });
    let _ = writeln!(out, "  typesense: {}", if report.index_healthy { "ok" } else { "unreachable" });

    let _ = writeln!(out, "Queue ({})", QUEUE_TABLE);
    if !report.queue_exists {
        let _ = writeln!(out, "  not created, run setup");
    } else {
        let _ = writeln!(out, "  pending: {}", report.queue.total);
        let _ = writeln!(out, "  oldest:  {}", timestamp(report.queue.oldest));
        let _ = writeln!(out, "  newest:  {}", timestamp(report.queue.newest));
        for entry in &report.queue.breakdown {
            let _ = writeln!(
                out,
                "  {} {}: {}",
                entry.source_name,
                entry.operation.as_str(),
                entry.count
            );
        }
    }

    let _ = writeln!(out, "Tables");
    for table in &report.tables {
        let source = match (table.relation, table.row_count) {
            (Some(RelationKind::View), Some(rows)) => format!("view, {} rows", rows),
            (Some(_), Some(rows)) => format!("{} rows", rows),
            (Some(RelationKind::View), None) => "view".to_string(),
            (Some(_), None) => "table".to_string(),
            (None, _) => "missing".to_string(),
        };
        let collection = match table.collection {
            Some((fields, documents)) => format!("{} fields, {} documents", fields, documents),
            None => "missing".to_string(),
        };
        let _ = writeln!(
            out,
            "  {} -> {}\n    source: {}\n    trigger: {}\n    collection: {}",
            table.source_name,
            table.collection_name,
            source,
            yes_no(table.trigger_installed),
            collection
        );
    }

    out
}
