use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::{StoreError, WalReservationStore};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the log once it has grown by `threshold`
/// appends since the last compaction.
pub async fn run_compactor(store: Arc<WalReservationStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            warn!("compaction failed: {e}");
        }
    }
}

/// Compact when due. Returns the number of records kept, or `None` if the
/// log was below the threshold.
pub async fn compact_if_needed(
    store: &WalReservationStore,
    threshold: u64,
) -> Result<Option<usize>, StoreError> {
    let appends = store.appends_since_compact().await?;
    if appends < threshold {
        return Ok(None);
    }
    let kept = store.compact().await?;
    info!("compacted log: {appends} appends down to {kept} reservations");
    Ok(Some(kept))
}
