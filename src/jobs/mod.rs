use crate::metrics;
use std::{sync::Arc, time::Instant};
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

const REVOCATION_CLEANUP_INTERVAL_SECS: u64 = 3600;
const HEALTH_CHECK_INTERVAL_SECS: u64 = 300;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::revocation_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Purge refresh token revocations past their token expiry (runs every hour)
    async fn revocation_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(REVOCATION_CLEANUP_INTERVAL_SECS));

        loop {
            interval.tick().await;
            let started = Instant::now();

            match tasks::cleanup_expired_revocations(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!(count, "Purged expired refresh token revocations");
                    }
                    metrics::record_background_job(
                        "revocation_cleanup",
                        "success",
                        started.elapsed().as_secs_f64(),
                    );
                }
                Err(e) => {
                    error!("Failed to purge expired revocations: {}", e);
                    metrics::record_background_job(
                        "revocation_cleanup",
                        "failure",
                        started.elapsed().as_secs_f64(),
                    );
                }
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));

        loop {
            interval.tick().await;
            let started = Instant::now();

            let status = match tasks::health_check(&scheduler.context).await {
                Ok(_) => "success",
                Err(e) => {
                    error!("Health check failed: {}", e);
                    "failure"
                }
            };
            metrics::record_background_job("health_check", status, started.elapsed().as_secs_f64());
        }
    }
}
