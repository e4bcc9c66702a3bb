//! `setup`: change capture, collections and optional queue backfill.

use tracing::{error, info, instrument, warn};

use crate::config::Dependencies;
use crate::SyncError;
use search_sync_repository::{build_collection_schema, schema_differences, CollectionAdmin};
use search_sync_shared::TableConfig;

/// Flags of the `setup` command.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupOptions {
    /// Drop and recreate collections that already exist.
    pub recreate: bool,
    /// Enqueue every existing row after setup.
    pub backfill_queue: bool,
}

/// What happened to one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionOutcome {
    Created,
    Recreated,
    /// Left in place; holds the differences from the configured schema.
    Existing(Vec<String>),
}

/// Result of a `setup` run.
#[derive(Debug, Default)]
pub struct SetupReport {
    pub triggers_created: Vec<String>,
    pub triggers_existing: Vec<String>,
    pub collections: Vec<(String, CollectionOutcome)>,
    pub backfilled: Vec<(String, u64)>,
    pub backfill_failures: Vec<(String, String)>,
}

/// Install change capture, then create collections, then backfill if asked.
///
/// A backfill failure for one table is reported and the next table is
/// still backfilled.
#[instrument(skip(deps, tables), fields(tables = tables.len()))]
pub async fn run_setup(
    deps: &Dependencies,
    tables: &[TableConfig],
    options: SetupOptions,
) -> Result<SetupReport, SyncError> {
    let capture = deps.store.setup_capture(tables).await?;
    info!(
        created = capture.triggers_created.len(),
        existing = capture.triggers_existing.len(),
        "Change capture installed"
    );

    let mut report = SetupReport {
        triggers_created: capture.triggers_created,
        triggers_existing: capture.triggers_existing,
        ..SetupReport::default()
    };

    deps.verify_index().await?;
    for table in tables {
        let outcome = ensure_collection(deps.index.as_ref(), table, options.recreate).await?;
        report.collections.push((table.collection_name.clone(), outcome));
    }

    if options.backfill_queue {
        for table in tables {
            match deps.store.backfill(table).await {
                Ok(enqueued) => report.backfilled.push((table.source_name.clone(), enqueued)),
                Err(e) => {
                    error!(source_name = %table.source_name, error = %e, "Backfill failed");
                    report
                        .backfill_failures
                        .push((table.source_name.clone(), e.to_string()));
                }
            }
        }
    }

    Ok(report)
}

/// Make sure the collection for `table` exists.
pub async fn ensure_collection(
    admin: &dyn CollectionAdmin,
    table: &TableConfig,
    recreate: bool,
) -> Result<CollectionOutcome, SyncError> {
    let schema = build_collection_schema(table);
    let name = &table.collection_name;

    match admin.retrieve_collection(name).await? {
        Some(_) if recreate => {
            admin.delete_collection(name).await?;
            admin.create_collection(&schema).await?;
            info!(collection = %name, "Recreated collection");
            Ok(CollectionOutcome::Recreated)
        }
        Some(existing) => {
            let differences = schema_differences(&existing, &schema);
            for difference in &differences {
                warn!(collection = %name, difference = %difference, "Collection differs from configuration");
            }
            Ok(CollectionOutcome::Existing(differences))
        }
        None => {
            admin.create_collection(&schema).await?;
            info!(collection = %name, "Created collection");
            Ok(CollectionOutcome::Created)
        }
    }
}
