/// Batch recalculation
///
/// Recomputes scores for a cohort of users in sequential batches. Within
/// a batch a fixed number of workers pull user ids from a shared queue,
/// so concurrency never exceeds the configured bound. Per-user failures
/// are counted and capped in the report without stopping the run; a
/// cancel flag is honored between batches. Dry runs use the scorer's
/// preview path and write nothing at all.
use crate::enforcement::EnforcementEngine;
use crate::error::{EngineError, EngineResult};
use crate::scoring::{ScoreStore, Scorer};
use crate::signals::SignalStore;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Most failures kept in a run report.
const FAILURE_REPORT_CAP: usize = 50;

/// Which users to recalculate.
#[derive(Debug, Clone)]
pub enum Cohort {
    /// Everyone with recorded signals or scores.
    All,
    /// Users whose latest score is at or above the floor.
    MinScore(f64),
    /// Users whose latest score is older than the given age.
    Stale { hours: i64 },
    /// An explicit list.
    Users(Vec<String>),
}

impl Cohort {
    pub async fn resolve(
        &self,
        signals: &SignalStore,
        scores: &ScoreStore,
    ) -> EngineResult<Vec<String>> {
        match self {
            Cohort::All => {
                let mut ids = signals.distinct_user_ids().await?;
                ids.extend(scores.users_with_min_score(0.0).await?);
                ids.sort();
                ids.dedup();
                Ok(ids)
            }
            Cohort::MinScore(min) => scores.users_with_min_score(*min).await,
            Cohort::Stale { hours } => scores.users_with_stale_scores(*hours).await,
            Cohort::Users(ids) => Ok(ids.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecalcOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    pub dry_run: bool,
    pub user_timeout_secs: u64,
}

impl Default for RecalcOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 5,
            dry_run: false,
            user_timeout_secs: 30,
        }
    }
}

impl RecalcOptions {
    pub fn validate(&self) -> EngineResult<()> {
        if self.batch_size == 0 {
            return Err(EngineError::Validation(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(EngineError::Validation(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.user_timeout_secs == 0 {
            return Err(EngineError::Validation(
                "user_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cooperative cancellation, checked between batches.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecalcFailure {
    pub user_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecalcSummary {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Mean absolute score change across successful recalculations.
    pub mean_abs_delta: f64,
    pub elapsed_ms: u64,
    pub cancelled: bool,
    pub dry_run: bool,
    /// First failures encountered, capped; the failed count is exact.
    pub failures: Vec<RecalcFailure>,
}

#[derive(Clone)]
pub struct RecalcOrchestrator {
    scorer: Scorer,
    engine: EnforcementEngine,
    signals: SignalStore,
    scores: ScoreStore,
}

impl RecalcOrchestrator {
    pub fn new(
        scorer: Scorer,
        engine: EnforcementEngine,
        signals: SignalStore,
        scores: ScoreStore,
    ) -> Self {
        Self {
            scorer,
            engine,
            signals,
            scores,
        }
    }

    pub async fn run(
        &self,
        cohort: Cohort,
        options: RecalcOptions,
        cancel: CancelHandle,
    ) -> EngineResult<RecalcSummary> {
        options.validate()?;
        let started = Instant::now();

        let user_ids = cohort.resolve(&self.signals, &self.scores).await?;
        let total = user_ids.len();
        tracing::info!(
            total,
            batch_size = options.batch_size,
            concurrency = options.concurrency,
            dry_run = options.dry_run,
            "Starting recalculation run"
        );

        let processed = Arc::new(AtomicUsize::new(0));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let delta_sum = Arc::new(Mutex::new(0.0_f64));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut cancelled = false;

        for batch in user_ids.chunks(options.batch_size) {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let queue: Arc<Mutex<VecDeque<String>>> =
                Arc::new(Mutex::new(batch.iter().cloned().collect()));
            let mut tasks = JoinSet::new();

            for _ in 0..options.concurrency.min(batch.len()) {
                let queue = queue.clone();
                let scorer = self.scorer.clone();
                let engine = self.engine.clone();
                let processed = processed.clone();
                let succeeded = succeeded.clone();
                let failed = failed.clone();
                let delta_sum = delta_sum.clone();
                let failures = failures.clone();
                let dry_run = options.dry_run;
                let timeout = Duration::from_secs(options.user_timeout_secs);

                tasks.spawn(async move {
                    loop {
                        let user_id = { queue.lock().await.pop_front() };
                        let Some(user_id) = user_id else { break };

                        let result = tokio::time::timeout(
                            timeout,
                            recalc_one(&scorer, &engine, &user_id, dry_run),
                        )
                        .await;
                        processed.fetch_add(1, Ordering::SeqCst);

                        match result {
                            Ok(Ok(delta)) => {
                                succeeded.fetch_add(1, Ordering::SeqCst);
                                *delta_sum.lock().await += delta.abs();
                            }
                            Ok(Err(e)) => {
                                record_failure(&failures, &failed, &user_id, e.to_string()).await;
                            }
                            Err(_) => {
                                record_failure(
                                    &failures,
                                    &failed,
                                    &user_id,
                                    format!("timed out after {}s", timeout.as_secs()),
                                )
                                .await;
                            }
                        }
                    }
                });
            }

            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    tracing::warn!("Recalculation worker panicked: {}", e);
                }
            }
        }

        let succeeded_count = succeeded.load(Ordering::SeqCst);
        let failed_count = failed.load(Ordering::SeqCst);
        let mean_abs_delta = if succeeded_count > 0 {
            *delta_sum.lock().await / succeeded_count as f64
        } else {
            0.0
        };

        let summary = RecalcSummary {
            total,
            processed: processed.load(Ordering::SeqCst),
            succeeded: succeeded_count,
            failed: failed_count,
            mean_abs_delta,
            elapsed_ms: started.elapsed().as_millis() as u64,
            cancelled,
            dry_run: options.dry_run,
            failures: failures.lock().await.clone(),
        };

        crate::metrics::record_recalc_run(summary.succeeded, summary.failed);
        tracing::info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            mean_abs_delta = summary.mean_abs_delta,
            elapsed_ms = summary.elapsed_ms,
            cancelled = summary.cancelled,
            "Recalculation run finished"
        );
        Ok(summary)
    }
}

async fn recalc_one(
    scorer: &Scorer,
    engine: &EnforcementEngine,
    user_id: &str,
    dry_run: bool,
) -> EngineResult<f64> {
    if dry_run {
        let outcome = scorer.preview(user_id).await?;
        Ok(outcome.delta)
    } else {
        let outcome = scorer.compute(user_id).await?;
        engine.evaluate(&outcome).await?;
        Ok(outcome.delta)
    }
}

async fn record_failure(
    failures: &Arc<Mutex<Vec<RecalcFailure>>>,
    failed: &Arc<AtomicUsize>,
    user_id: &str,
    error: String,
) {
    failed.fetch_add(1, Ordering::SeqCst);
    tracing::warn!(user_id = %user_id, error = %error, "Recalculation failed for user");

    let mut failures = failures.lock().await;
    if failures.len() < FAILURE_REPORT_CAP {
        failures.push(RecalcFailure {
            user_id: user_id.to_string(),
            error,
        });
    }
}
