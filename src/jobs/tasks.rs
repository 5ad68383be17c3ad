/// Background task implementations
use crate::batch::{CancelHandle, Cohort, RecalcOptions};
use crate::{alerting::AlertStatus, context::AppContext, error::EngineResult};

/// Upper bound on users re-scored per sweep. Whatever remains is picked
/// up by the next run once the freshest users drop out of the stale set.
const MAX_REFRESH_PER_SWEEP: usize = 500;

/// Recompute scores whose latest row is older than the configured age
pub async fn refresh_stale_scores(ctx: &AppContext) -> EngineResult<usize> {
    let mut user_ids = ctx
        .scores
        .users_with_stale_scores(ctx.config.jobs.stale_after_hours)
        .await?;
    if user_ids.is_empty() {
        return Ok(0);
    }
    user_ids.truncate(MAX_REFRESH_PER_SWEEP);

    let options = RecalcOptions {
        batch_size: ctx.config.batch.batch_size,
        concurrency: ctx.config.batch.concurrency,
        dry_run: false,
        user_timeout_secs: ctx.config.batch.user_timeout_secs,
    };
    let summary = ctx
        .orchestrator
        .run(Cohort::Users(user_ids.clone()), options, CancelHandle::new())
        .await?;

    for user_id in &user_ids {
        ctx.invalidate_score_cache(user_id).await;
    }

    if summary.failed > 0 {
        tracing::warn!(
            failed = summary.failed,
            "Some stale score refreshes failed"
        );
    }
    Ok(summary.succeeded)
}

/// Bump the priority of unresolved alerts that blew their SLA deadline
pub async fn escalate_overdue_alerts(ctx: &AppContext) -> EngineResult<u64> {
    let overdue = ctx.alerts.overdue().await?;
    let mut escalated = 0;

    for alert in overdue {
        if alert.priority.next_level().is_none() {
            tracing::warn!(
                alert_id = %alert.id,
                user_id = %alert.user_id,
                "Critical alert past its SLA deadline"
            );
            continue;
        }
        match ctx.alerts.escalate(&alert.id).await {
            Ok(_) => escalated += 1,
            Err(e) => tracing::warn!(alert_id = %alert.id, "Failed to escalate alert: {}", e),
        }
    }

    Ok(escalated)
}

/// Deliver open alerts to matching subscriptions. Claimed deliveries are
/// skipped, so re-sweeping the same alerts is cheap and safe.
pub async fn fan_out_open_alerts(ctx: &AppContext) -> EngineResult<usize> {
    let open = ctx
        .alerts
        .list(Some(AlertStatus::Open), None, None, 200)
        .await?;

    let mut sent = 0;
    for alert in open {
        let summary = ctx.alert_router.fan_out(&alert).await?;
        sent += summary.sent;
    }
    Ok(sent)
}

/// Health check - verify all systems are operational
pub async fn health_check(ctx: &AppContext) -> EngineResult<()> {
    // Check database connectivity
    crate::db::test_connection(&ctx.db).await?;

    // Check cache connectivity when enabled
    if let Some(cache) = &ctx.cache {
        cache.ping().await?;
    }

    Ok(())
}
