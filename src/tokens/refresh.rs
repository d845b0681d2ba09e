//! Background refresh daemon for the app credential.
//!
//! Wakes every `interval`, and refreshes the active token when it is within
//! `window` of expiry, so guest requests rarely pay for a refresh inline.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::manager::AppTokenManager;
use crate::error::TokenError;

/// Start the refresh daemon loop. Never returns.
pub async fn refresh_daemon(manager: Arc<AppTokenManager>, interval: Duration, window: chrono::Duration) {
    info!(
        "App token refresh daemon started (interval: {}s, window: {}m)",
        interval.as_secs(),
        window.num_minutes()
    );

    loop {
        tokio::time::sleep(interval).await;
        refresh_cycle(&manager, window).await;
    }
}

async fn refresh_cycle(manager: &AppTokenManager, window: chrono::Duration) {
    match manager.refresh_if_expiring(window).await {
        Ok(Some(result)) => info!(
            "Proactively refreshed app token {} (expires in {}s)",
            result.token_id, result.expires_in
        ),
        Ok(None) => debug!("App token fresh or not configured, nothing to refresh"),
        Err(TokenError::RefreshFailed(reason)) => {
            error!("Proactive app token refresh failed: {reason}")
        }
        Err(e) => error!("Refresh cycle error: {e}"),
    }
}
