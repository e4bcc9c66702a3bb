//! The commands run by the `search-sync` binary.

pub mod setup;
pub mod status;
pub mod sync;

pub use setup::{ensure_collection, run_setup, CollectionOutcome, SetupOptions, SetupReport};
pub use status::{collect_status, render, StatusReport, TableStatus};
pub use sync::{backoff_delay, run_sync, sync_until_empty, SyncOptions};
