//! `sync`: drain the queue into the index.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::config::Dependencies;
use crate::SyncError;
use search_sync_pipeline::{BatchCoordinator, CoordinatorConfig, SyncReport, WriterConfig};
use search_sync_shared::TableConfig;

/// Flags of the `sync` command.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Queue entries claimed per batch.
    pub batch_size: usize,
    /// Retries of a failed batch before giving up.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further one.
    pub retry_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Delay before retry number `attempt` (starting at 1).
pub fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    initial.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

/// Sync the selected tables until the queue past the cursor is empty.
///
/// Stops early, without error, on Ctrl-C. Entries of an interrupted batch
/// stay queued.
pub async fn run_sync(
    deps: &Dependencies,
    tables: &[TableConfig],
    options: SyncOptions,
) -> Result<SyncReport, SyncError> {
    let config = CoordinatorConfig {
        batch_size: options.batch_size,
        writer: WriterConfig::default(),
    };
    let mut coordinator = deps.coordinator(tables, config)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    sync_until_empty(&mut coordinator, options, shutdown).await
}

/// Run coordinator cycles until a fetch comes back empty or `shutdown` resolves.
///
/// A batch-wide failure is retried up to `options.max_retries` times with
/// backoff. Any committed batch resets the retry count.
#[instrument(skip_all, fields(batch_size = options.batch_size))]
pub async fn sync_until_empty(
    coordinator: &mut BatchCoordinator,
    options: SyncOptions,
    shutdown: impl Future<Output = ()>,
) -> Result<SyncReport, SyncError> {
    tokio::pin!(shutdown);
    let mut report = SyncReport::default();
    let mut failures = 0u32;

    loop {
        let outcome = tokio::select! {
            outcome = coordinator.run_cycle() => outcome,
            _ = &mut shutdown => {
                warn!(batches = report.batches, "Interrupted, uncommitted entries stay queued");
                return Ok(report);
            }
        };

        match outcome {
            Ok(cycle) if cycle.fetched == 0 => {
                info!(
                    batches = report.batches,
                    fetched = report.fetched,
                    upserted = report.upserted,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    committed = report.committed,
                    "Queue drained"
                );
                return Ok(report);
            }
            Ok(cycle) => {
                failures = 0;
                report.record(&cycle);
            }
            Err(e) if failures < options.max_retries => {
                failures += 1;
                let delay = backoff_delay(options.retry_delay, failures);
                warn!(
                    attempt = failures,
                    max_retries = options.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Batch failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut shutdown => {
                        warn!("Interrupted while waiting to retry");
                        return Ok(report);
                    }
                }
            }
            Err(e) => {
                error!(
                    attempts = failures + 1,
                    error = %e,
                    "Batch failed after all retries"
                );
                return Err(e.into());
            }
        }
    }
}
