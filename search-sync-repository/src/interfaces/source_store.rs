//! Source store trait definition.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::StoreError;
use search_sync_shared::SourceRow;

/// Read access to the synchronized tables and views.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Read the current state of the given records.
    ///
    /// # Arguments
    ///
    /// * `source_name` - Table or view to read from
    /// * `primary_key` - Column whose text form is the record id
    /// * `record_ids` - Records to read
    ///
    /// # Returns
    ///
    /// * `Ok(HashMap)` - Rows keyed by record id; records that no longer
    ///   exist are simply absent
    /// * `Err(StoreError)` - If the read failed
    async fn fetch_rows(
        &self,
        source_name: &str,
        primary_key: &str,
        record_ids: &[String],
    ) -> Result<HashMap<String, SourceRow>, StoreError>;
}
