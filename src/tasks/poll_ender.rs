use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use log::{error, info};
use tokio::time::interval;

use crate::state::AppState;

const CHECK_INTERVAL_SECONDS: u64 = 60; // Check every 60 seconds

// Periodic sweep that closes polls whose end time has passed. Closing goes
// through the same conditional update as early termination, so a sweep and a
// last-second vote can never both win.
pub async fn check_expired_polls_task(state: Arc<AppState>) {
    info!("Starting background task to check for expired polls...");
    let mut interval = interval(StdDuration::from_secs(CHECK_INTERVAL_SECONDS));

    loop {
        interval.tick().await;
        let now = Utc::now();

        match state.db.get_expired_polls(now).await {
            Ok(expired_polls) => {
                if expired_polls.is_empty() {
                    continue;
                }
                info!("Found {} expired poll(s).", expired_polls.len());
                for poll_id in expired_polls {
                    match state.db.close_poll(poll_id).await {
                        Ok(true) => info!("Closed expired poll {}", poll_id),
                        // Someone else closed it between the query and the update.
                        Ok(false) => {}
                        Err(e) => error!("Error closing expired poll {}: {}", poll_id, e),
                    }
                }
            }
            Err(e) => {
                error!("Failed to query for expired polls: {}", e);
            }
        }
    }
}
