use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;

// Standing subscription to the poll change feed. Each notification only
// drops cached data for the changed poll and the cached listing; readers
// refetch on their next access.
pub async fn cache_invalidation_task(state: Arc<AppState>) {
    info!("Starting poll change listener for cache invalidation...");
    let mut changes = state.db.subscribe();

    loop {
        match changes.recv().await {
            Ok(change) => {
                debug!("invalidating cached poll {} ({:?})", change.poll_id, change.kind);
                state.cache.invalidate(change.poll_id);
                state.cache.invalidate_listing();
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("missed {} poll change notifications, flushing cache", missed);
                state.cache.clear();
            }
            Err(RecvError::Closed) => break,
        }
    }

    info!("Poll change feed closed, cache invalidation stopped");
}
