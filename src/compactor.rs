use tracing::info;

use crate::store::{InMemoryStore, StoreResult};

/// Compacts when the journal holds at least `threshold` appends since the
/// last compaction. Returns whether it did.
pub async fn compact_if_needed(store: &InMemoryStore, threshold: u64) -> StoreResult<bool> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    store.compact().await?;
    metrics::counter!(crate::observability::JOURNAL_COMPACTIONS_TOTAL).increment(1);
    info!(appends, "journal compacted");
    Ok(true)
}
