//! PostgreSQL implementation of the queue store and the source store.
//!
//! Change capture is trigger based: every configured table (or the reference
//! table of a view) carries a row trigger that upserts an entry into the
//! queue table. Consumers claim entries with `FOR UPDATE SKIP LOCKED` inside a
//! transaction that stays open for the whole batch.

mod decode;
mod setup;
mod sql;
mod store;

pub use setup::CaptureSetupReport;
pub use sql::{is_plain_identifier, QUEUE_TABLE};
pub use store::PostgresStore;
