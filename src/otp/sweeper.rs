use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::otp::services::OtpService;

/// Periodically drop credentials whose window has passed.
pub fn spawn_sweeper(service: Arc<OtpService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.purge_expired().await {
                Ok(0) => {}
                Ok(n) => debug!(removed = n, "purged expired otps"),
                Err(e) => error!(error = %e, "otp sweep failed"),
            }
        }
    })
}
