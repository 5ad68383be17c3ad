/// Configuration management for the Breakwater risk engine
use crate::alerting::AlertPolicy;
use crate::enforcement::EnforcementPolicy;
use crate::error::{EngineError, EngineResult};
use crate::scoring::ScoringPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub scoring: ScoringPolicy,
    pub enforcement: EnforcementPolicy,
    pub alerting: AlertPolicy,
    pub batch: BatchConfig,
    pub notifier: NotifierConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub data_directory: PathBuf,
    pub engine_db: PathBuf,
    pub max_connections: u32,
}

/// Batch recalculation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub user_timeout_secs: u64,
}

/// Outbound notification channels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub email: Option<EmailConfig>,
    pub chat_webhook_url: Option<String>,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Redis-backed score cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub redis_url: String,
    pub key_prefix: String,
    pub ttl_seconds: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests per second for signal and graph ingestion
    pub ingest_rps: u32,
    /// Requests per second for score and alert reads
    pub read_rps: u32,
    /// Requests per second for enforcement, appeal, and batch operations
    pub ops_rps: u32,
    pub burst_size: u32,
}

/// Background job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Scores older than this are refreshed by the maintenance job.
    pub stale_after_hours: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> EngineResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("BW_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("BW_PORT")
            .unwrap_or_else(|_| "8480".to_string())
            .parse()
            .map_err(|_| EngineError::Validation("Invalid port number".to_string()))?;
        let version = env::var("BW_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("BW_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let engine_db = env::var("BW_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("breakwater.sqlite"));
        let max_connections = env::var("BW_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let mut scoring = ScoringPolicy::default();
        if let Ok(v) = env::var("BW_SCORING_DECAY_HALF_LIFE_DAYS") {
            scoring.decay_half_life_days = v.parse().unwrap_or(scoring.decay_half_life_days);
        }
        if let Ok(v) = env::var("BW_SCORING_SIGNAL_WINDOW_DAYS") {
            scoring.signal_window_days = v.parse().unwrap_or(scoring.signal_window_days);
        }
        if let Ok(v) = env::var("BW_SCORING_TREND_EPSILON") {
            scoring.trend_epsilon = v.parse().unwrap_or(scoring.trend_epsilon);
        }
        if let Ok(v) = env::var("BW_SCORING_MIN_EDGE_STRENGTH") {
            scoring.min_edge_strength = v.parse().unwrap_or(scoring.min_edge_strength);
        }

        let mut enforcement = EnforcementPolicy::default();
        if let Ok(v) = env::var("BW_ENFORCEMENT_RESTRICTION_HOURS") {
            enforcement.restriction_hours = v.parse().unwrap_or(enforcement.restriction_hours);
        }
        if let Ok(v) = env::var("BW_ENFORCEMENT_EVASION_RESTRICTION_HOURS") {
            enforcement.evasion_restriction_hours =
                v.parse().unwrap_or(enforcement.evasion_restriction_hours);
        }

        let mut alerting = AlertPolicy::default();
        if let Ok(v) = env::var("BW_ALERT_CRITICAL_THRESHOLD") {
            alerting.critical_score_threshold =
                v.parse().unwrap_or(alerting.critical_score_threshold);
        }
        if let Ok(v) = env::var("BW_ALERT_HIGH_THRESHOLD") {
            alerting.high_score_threshold = v.parse().unwrap_or(alerting.high_score_threshold);
        }
        if let Ok(v) = env::var("BW_ALERT_DEDUP_WINDOW_HOURS") {
            alerting.dedup_window_hours = v.parse().unwrap_or(alerting.dedup_window_hours);
        }

        let batch_size = env::var("BW_BATCH_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50);
        let batch_concurrency = env::var("BW_BATCH_CONCURRENCY")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);
        let user_timeout_secs = env::var("BW_BATCH_USER_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let email = if let Ok(smtp_url) = env::var("BW_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("BW_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("alerts@{}", hostname)),
            })
        } else {
            None
        };
        let chat_webhook_url = env::var("BW_CHAT_WEBHOOK_URL").ok();

        let cache_enabled = env::var("BW_CACHE_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let redis_url =
            env::var("BW_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let cache_key_prefix =
            env::var("BW_CACHE_KEY_PREFIX").unwrap_or_else(|_| "breakwater:".to_string());
        let cache_ttl_seconds = env::var("BW_CACHE_TTL_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let rate_limit_enabled = env::var("BW_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let ingest_rps = env::var("BW_RATE_LIMIT_INGEST_RPS")
            .unwrap_or_else(|_| "200".to_string())
            .parse()
            .unwrap_or(200);
        let read_rps = env::var("BW_RATE_LIMIT_READ_RPS")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .unwrap_or(100);
        let ops_rps = env::var("BW_RATE_LIMIT_OPS_RPS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);
        let burst_size = env::var("BW_RATE_LIMIT_BURST_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50);

        let jobs_enabled = env::var("BW_JOBS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let jobs_interval_secs = env::var("BW_JOBS_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);
        let stale_after_hours = env::var("BW_JOBS_STALE_AFTER_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(EngineConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            database: DatabaseConfig {
                data_directory,
                engine_db,
                max_connections,
            },
            scoring,
            enforcement,
            alerting,
            batch: BatchConfig {
                batch_size,
                concurrency: batch_concurrency,
                user_timeout_secs,
            },
            notifier: NotifierConfig {
                email,
                chat_webhook_url,
            },
            cache: CacheConfig {
                enabled: cache_enabled,
                redis_url,
                key_prefix: cache_key_prefix,
                ttl_seconds: cache_ttl_seconds,
            },
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
                ingest_rps,
                read_rps,
                ops_rps,
                burst_size,
            },
            jobs: JobsConfig {
                enabled: jobs_enabled,
                interval_secs: jobs_interval_secs,
                stale_after_hours,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        if self.service.hostname.is_empty() {
            return Err(EngineError::Validation(
                "Hostname cannot be empty".to_string(),
            ));
        }

        self.scoring.validate()?;
        self.enforcement.validate()?;
        self.alerting.validate()?;

        if self.batch.batch_size == 0 {
            return Err(EngineError::Validation(
                "Batch size must be at least 1".to_string(),
            ));
        }
        if self.batch.concurrency == 0 {
            return Err(EngineError::Validation(
                "Batch concurrency must be at least 1".to_string(),
            ));
        }

        if self.cache.enabled && self.cache.ttl_seconds == 0 {
            return Err(EngineError::Validation(
                "Cache TTL must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }
}
