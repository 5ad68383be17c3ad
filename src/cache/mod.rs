/// Redis-based caching layer for the Breakwater risk engine
///
/// Caches hot read paths, primarily the latest risk score per user,
/// which marketplace callers poll far more often than scores change.
/// The cache is optional; when disabled every read falls through to
/// SQLite.
use crate::config::CacheConfig;
use crate::error::{EngineError, EngineResult};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, warn};

/// Redis cache client
#[derive(Clone)]
pub struct CacheClient {
    connection: ConnectionManager,
    config: CacheConfig,
}

impl CacheClient {
    /// Create a new cache client
    pub async fn new(config: CacheConfig) -> EngineResult<Self> {
        if !config.enabled {
            return Err(EngineError::Internal(
                "Cache is disabled, cannot create client".to_string(),
            ));
        }

        info!("Connecting to Redis at {}", config.redis_url);

        let client = Client::open(config.redis_url.as_str()).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            EngineError::Internal(format!("Redis client creation failed: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            EngineError::Internal(format!("Redis connection failed: {}", e))
        })?;

        info!("Redis connection established");

        Ok(Self { connection, config })
    }

    /// Build a cache key with prefix
    fn build_key(&self, category: &str, key: &str) -> String {
        format!("{}{}{}", self.config.key_prefix, category, key)
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(
        &self,
        category: &str,
        key: &str,
    ) -> EngineResult<Option<T>> {
        let cache_key = self.build_key(category, key);

        let mut conn = self.connection.clone();
        let result: Option<String> = conn.get(&cache_key).await.map_err(|e| {
            warn!("Redis GET failed for {}: {}", cache_key, e);
            EngineError::Internal(format!("Cache get failed: {}", e))
        })?;

        match result {
            Some(json) => {
                debug!("Cache HIT: {}", cache_key);
                match serde_json::from_str(&json) {
                    Ok(value) => Ok(Some(value)),
                    Err(e) => {
                        warn!("Failed to deserialize cached value: {}", e);
                        // Delete corrupted cache entry
                        let _ = self.delete(category, key).await;
                        Ok(None)
                    }
                }
            }
            None => {
                debug!("Cache MISS: {}", cache_key);
                Ok(None)
            }
        }
    }

    /// Set a value in cache with TTL
    pub async fn set<T: Serialize>(
        &self,
        category: &str,
        key: &str,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> EngineResult<()> {
        let cache_key = self.build_key(category, key);
        let ttl = ttl_secs.unwrap_or(self.config.ttl_seconds);

        let json = serde_json::to_string(value).map_err(|e| {
            error!("Failed to serialize value for cache: {}", e);
            EngineError::Internal(format!("Cache serialization failed: {}", e))
        })?;

        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(&cache_key, json, ttl).await.map_err(|e| {
            warn!("Redis SET failed for {}: {}", cache_key, e);
            EngineError::Internal(format!("Cache set failed: {}", e))
        })?;

        debug!("Cache SET: {} (TTL: {}s)", cache_key, ttl);
        Ok(())
    }

    /// Delete a value from cache
    pub async fn delete(&self, category: &str, key: &str) -> EngineResult<()> {
        let cache_key = self.build_key(category, key);

        debug!("Cache DELETE: {}", cache_key);

        let mut conn = self.connection.clone();
        conn.del::<_, ()>(&cache_key).await.map_err(|e| {
            warn!("Redis DELETE failed for {}: {}", cache_key, e);
            EngineError::Internal(format!("Cache delete failed: {}", e))
        })?;

        Ok(())
    }

    /// Ping Redis to check connection
    pub async fn ping(&self) -> EngineResult<()> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis PING failed: {}", e);
                EngineError::Internal(format!("Cache ping failed: {}", e))
            })?;

        if pong != "PONG" {
            return Err(EngineError::Internal(
                "Unexpected Redis PING response".to_string(),
            ));
        }

        Ok(())
    }

    /// Get cache statistics
    pub async fn stats(&self) -> EngineResult<CacheStats> {
        let mut conn = self.connection.clone();

        let info: String = redis::cmd("INFO")
            .arg("stats")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis INFO failed: {}", e);
                EngineError::Internal(format!("Cache stats failed: {}", e))
            })?;

        let mut hits = 0;
        let mut misses = 0;

        for line in info.lines() {
            if line.starts_with("keyspace_hits:") {
                hits = line.split(':').nth(1).unwrap_or("0").parse().unwrap_or(0);
            } else if line.starts_with("keyspace_misses:") {
                misses = line.split(':').nth(1).unwrap_or("0").parse().unwrap_or(0);
            }
        }

        Ok(CacheStats {
            hits,
            misses,
            hit_rate: if hits + misses > 0 {
                hits as f64 / (hits + misses) as f64
            } else {
                0.0
            },
        })
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Cache category constants
pub mod categories {
    pub const LATEST_SCORE: &str = "score:latest:";
}
