pub mod assets;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod proxy;
pub mod server;

pub use assets::{AssetCache, AssetError};
pub use cache::{CacheBackend, CacheKeyer, LoadRequest, ResponseCache, ResponseCacheLayer};
pub use config::{AppConfig, CacheConfig, ConfigError, ProxyConfig, RedisConfig, ServerConfig};
pub use error::{ProxyError, StatusError};
pub use observability::init_tracing;
pub use proxy::{Modifier, ReverseProxy, StreamRelay};
pub use server::{GatehouseServer, ServerBuilder, build_app};

/// Create a cache backend based on configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: Returns local-only cache (moka)
/// - **Redis enabled**: Attempts to connect to Redis, falls back to local on failure
///
/// ## Graceful Degradation
///
/// If Redis connection fails, the system automatically falls back to local-only mode.
/// This allows the gateway to start and run even if Redis is unavailable.
pub async fn create_cache_backend(config: &CacheConfig) -> CacheBackend {
    use std::time::Duration;

    let redis = &config.redis;
    if !redis.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return CacheBackend::new_local(config);
    }

    tracing::info!(url = %redis.url, "Connecting to Redis");

    // Create Redis pool configuration
    let mut redis_config = deadpool_redis::Config::from_url(&redis.url);
    let timeout = Duration::from_millis(redis.timeout_ms);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(redis.pool_size));
    pool_config.max_size = redis.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    // Create pool
    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return CacheBackend::new_local(config);
        }
    };

    // Test connection
    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis, sharing cache loads across instances");
            CacheBackend::new_redis(pool, config)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            CacheBackend::new_local(config)
        }
    }
}
