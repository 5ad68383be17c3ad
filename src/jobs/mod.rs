use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

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

        tokio::spawn(Self::stale_score_refresh_job(Arc::clone(&self)));
        tokio::spawn(Self::overdue_alert_escalation_job(Arc::clone(&self)));
        tokio::spawn(Self::alert_fanout_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));
        tokio::spawn(Self::uptime_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Refresh scores whose latest calculation has gone stale
    async fn stale_score_refresh_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(
            scheduler.context.config.jobs.interval_secs,
        ));

        loop {
            interval.tick().await;
            info!("Running stale score refresh");
            let started = Instant::now();

            match tasks::refresh_stale_scores(&scheduler.context).await {
                Ok(count) => {
                    crate::metrics::record_background_job(
                        "stale_score_refresh",
                        "success",
                        started.elapsed().as_secs_f64(),
                    );
                    if count > 0 {
                        info!("Refreshed {} stale scores", count);
                    }
                }
                Err(e) => {
                    crate::metrics::record_background_job(
                        "stale_score_refresh",
                        "failure",
                        started.elapsed().as_secs_f64(),
                    );
                    error!("Failed to refresh stale scores: {}", e);
                }
            }
        }
    }

    /// Escalate alerts past their SLA deadline (runs every 15 minutes)
    async fn overdue_alert_escalation_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(900));

        loop {
            interval.tick().await;
            info!("Running overdue alert escalation");
            let started = Instant::now();

            match tasks::escalate_overdue_alerts(&scheduler.context).await {
                Ok(count) => {
                    crate::metrics::record_background_job(
                        "overdue_alert_escalation",
                        "success",
                        started.elapsed().as_secs_f64(),
                    );
                    if count > 0 {
                        info!("Escalated {} overdue alerts", count);
                    }
                }
                Err(e) => {
                    crate::metrics::record_background_job(
                        "overdue_alert_escalation",
                        "failure",
                        started.elapsed().as_secs_f64(),
                    );
                    error!("Failed to escalate overdue alerts: {}", e);
                }
            }
        }
    }

    /// Fan open alerts out to matching subscriptions (runs every minute)
    async fn alert_fanout_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;
            let started = Instant::now();

            match tasks::fan_out_open_alerts(&scheduler.context).await {
                Ok(sent) => {
                    crate::metrics::record_background_job(
                        "alert_fanout",
                        "success",
                        started.elapsed().as_secs_f64(),
                    );
                    if sent > 0 {
                        info!("Delivered {} alert notifications", sent);
                    }
                }
                Err(e) => {
                    crate::metrics::record_background_job(
                        "alert_fanout",
                        "failure",
                        started.elapsed().as_secs_f64(),
                    );
                    error!("Alert fan-out failed: {}", e);
                }
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            match tasks::health_check(&scheduler.context).await {
                Ok(_) => {
                    // Silent success - health is good
                }
                Err(e) => error!("Health check failed: {}", e),
            }
        }
    }

    /// Keep the uptime gauge current (runs every minute)
    async fn uptime_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;
            crate::metrics::UPTIME_SECONDS.set(scheduler.context.started.elapsed().as_secs_f64());
        }
    }
}
