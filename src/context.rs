/// Application context and dependency injection
use crate::{
    alerting::notifier::{AlertRouter, ChatChannel, DashboardChannel, EmailChannel, NotifyChannel},
    alerting::subscriptions::SubscriptionStore,
    alerting::AlertStore,
    appeals::AppealManager,
    audit::AuditStore,
    batch::RecalcOrchestrator,
    cache::{categories, CacheClient},
    config::EngineConfig,
    db,
    enforcement::{ActionStore, EnforcementEngine},
    error::EngineResult,
    graph::GraphStore,
    rate_limit::RateLimiter,
    scoring::{RiskScore, ScoreStore, Scorer},
    signals::SignalStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<EngineConfig>,
    pub db: SqlitePool,
    pub signals: SignalStore,
    pub graph: GraphStore,
    pub scores: ScoreStore,
    pub alerts: AlertStore,
    pub subscriptions: SubscriptionStore,
    pub actions: ActionStore,
    pub appeals: AppealManager,
    pub audit: AuditStore,
    pub scorer: Scorer,
    pub enforcement: EnforcementEngine,
    pub orchestrator: RecalcOrchestrator,
    pub alert_router: Arc<AlertRouter>,
    pub rate_limiter: Arc<RateLimiter>,
    // Optional Redis cache for hot score reads
    pub cache: Option<CacheClient>,
    pub started: Instant,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: EngineConfig) -> EngineResult<Self> {
        // Validate configuration
        config.validate()?;

        // Initialize engine database
        let pool = db::create_pool(
            &config.database.engine_db,
            db::DatabaseOptions {
                max_connections: config.database.max_connections,
                enable_wal: true,
            },
        )
        .await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        // Initialize stores
        let signals = SignalStore::new(pool.clone());
        let graph = GraphStore::new(pool.clone());
        let scores = ScoreStore::new(pool.clone());
        let alerts = AlertStore::new(pool.clone(), config.alerting.clone());
        let subscriptions = SubscriptionStore::new(pool.clone());
        let actions = ActionStore::new(pool.clone());
        let appeals = AppealManager::new(pool.clone(), actions.clone());
        let audit = AuditStore::new(pool.clone());

        // Scoring and enforcement pipeline
        let scorer = Scorer::new(
            signals.clone(),
            graph.clone(),
            scores.clone(),
            alerts.clone(),
            config.scoring.clone(),
        );
        let enforcement = EnforcementEngine::new(
            pool.clone(),
            actions.clone(),
            alerts.clone(),
            signals.clone(),
            config.enforcement.clone(),
        );
        let orchestrator = RecalcOrchestrator::new(
            scorer.clone(),
            enforcement.clone(),
            signals.clone(),
            scores.clone(),
        );

        // Alert fan-out channels
        let email_channel = EmailChannel::new(
            config.notifier.email.as_ref().map(|e| e.smtp_url.as_str()),
            config
                .notifier
                .email
                .as_ref()
                .map(|e| e.from_address.as_str()),
        )?;
        let chat_channel = ChatChannel::new(config.notifier.chat_webhook_url.clone());
        let channels: Vec<Arc<dyn NotifyChannel>> = vec![
            Arc::new(DashboardChannel),
            Arc::new(email_channel),
            Arc::new(chat_channel),
        ];
        let alert_router = Arc::new(AlertRouter::new(
            pool.clone(),
            subscriptions.clone(),
            channels,
        ));

        // Initialize rate limiter
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        // Optional Redis cache
        let cache = if config.cache.enabled {
            tracing::info!("Score cache enabled at {}", config.cache.redis_url);
            Some(CacheClient::new(config.cache.clone()).await?)
        } else {
            tracing::info!("Score cache disabled");
            None
        };

        Ok(Self {
            config: Arc::new(config),
            db: pool,
            signals,
            graph,
            scores,
            alerts,
            subscriptions,
            actions,
            appeals,
            audit,
            scorer,
            enforcement,
            orchestrator,
            alert_router,
            rate_limiter,
            cache,
            started: Instant::now(),
        })
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }

    /// Latest score for a user, read through the cache when enabled.
    pub async fn latest_score(&self, user_id: &str) -> EngineResult<Option<RiskScore>> {
        if let Some(cache) = &self.cache {
            match cache
                .get::<RiskScore>(categories::LATEST_SCORE, user_id)
                .await
            {
                Ok(Some(score)) => {
                    crate::metrics::record_cache_access("latest_score", true);
                    return Ok(Some(score));
                }
                Ok(None) => crate::metrics::record_cache_access("latest_score", false),
                Err(e) => tracing::warn!("Score cache read failed: {}", e),
            }
        }

        let score = self.scores.latest(user_id).await?;
        if let (Some(cache), Some(score)) = (&self.cache, &score) {
            if let Err(e) = cache
                .set(categories::LATEST_SCORE, user_id, score, None)
                .await
            {
                tracing::warn!("Score cache write failed: {}", e);
            }
        }
        Ok(score)
    }

    /// Drop a user's cached score after a recompute.
    pub async fn invalidate_score_cache(&self, user_id: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(categories::LATEST_SCORE, user_id).await {
                tracing::warn!("Score cache invalidation failed: {}", e);
            }
        }
    }
}
