//! Cache backend with a local tier and an optional Redis peer tier.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use deadpool_redis::Pool;
use moka::future::Cache;
use redis::AsyncCommands;

use crate::config::CacheConfig;

const VALUE_PREFIX: &str = "gatehouse:cache:";
const LOCK_PREFIX: &str = "gatehouse:lock:";

/// Deletes the lock only if it still holds our token.
const RELEASE_LOCK: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

type LocalTier = Cache<String, Bytes>;

/// Timing of the cluster-wide load protocol.
#[derive(Debug, Clone)]
pub struct PeerSettings {
    ttl: Duration,
    lock_ttl: Duration,
    poll_interval: Duration,
}

/// Cache backend: a byte-bounded local tier, optionally coordinated with
/// peer instances through Redis.
///
/// ## Load Coalescing
///
/// - **Local**: concurrent callers for a key in this process share one load
/// - **Redis**: additionally, one process in the cluster holds a load lock
///   for the key while the others poll for the value it publishes
///
/// Failed loads are never stored in either tier.
#[derive(Clone)]
pub enum CacheBackend {
    /// Single-instance: local tier only
    Local(LocalTier),

    /// Multi-instance: Redis + local tier
    Redis {
        redis: Pool,
        local: LocalTier,
        settings: Arc<PeerSettings>,
    },
}

impl std::fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(local) => f
                .debug_struct("Local")
                .field("entries", &local.entry_count())
                .finish(),
            Self::Redis { local, .. } => f
                .debug_struct("Redis")
                .field("entries", &local.entry_count())
                .finish(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum PeerError {
    #[error("redis pool: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

enum PeerLookup {
    Hit(Bytes),
    Locked(String),
    Busy,
}

impl CacheBackend {
    /// Create a new local-only cache backend.
    pub fn new_local(config: &CacheConfig) -> Self {
        CacheBackend::Local(local_tier(config))
    }

    /// Create a new Redis-backed cache backend.
    pub fn new_redis(redis_pool: Pool, config: &CacheConfig) -> Self {
        CacheBackend::Redis {
            redis: redis_pool,
            local: local_tier(config),
            settings: Arc::new(PeerSettings {
                ttl: config.ttl,
                lock_ttl: config.redis.lock_ttl,
                poll_interval: config.redis.poll_interval,
            }),
        }
    }

    /// Returns the value for `key`, running `load` at most once across all
    /// concurrent callers when it is missing.
    ///
    /// Every caller waiting on the same load receives the same outcome. An
    /// error is shared with those callers and then forgotten.
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, load: F) -> Result<Bytes, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
        E: Send + Sync + 'static,
    {
        let entry = match self {
            CacheBackend::Local(local) => {
                local
                    .entry(key.to_string())
                    .or_try_insert_with(load())
                    .await?
            }
            CacheBackend::Redis {
                redis,
                local,
                settings,
            } => {
                local
                    .entry(key.to_string())
                    .or_try_insert_with(load_via_peers(redis, settings, key, load))
                    .await?
            }
        };

        if entry.is_fresh() {
            tracing::debug!(key = %key, size = entry.value().len(), "cache loaded");
        } else {
            tracing::debug!(key = %key, "cache hit");
        }
        Ok(entry.into_value())
    }
}

fn local_tier(config: &CacheConfig) -> LocalTier {
    Cache::builder()
        .max_capacity(config.max_bytes)
        .weigher(|key: &String, value: &Bytes| -> u32 {
            (key.len() + value.len()).try_into().unwrap_or(u32::MAX)
        })
        .time_to_live(config.ttl)
        .build()
}

/// Loads through the peer tier. Redis failures fall back to a local load.
async fn load_via_peers<F, Fut, E>(
    pool: &Pool,
    settings: &PeerSettings,
    key: &str,
    load: F,
) -> Result<Bytes, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Bytes, E>>,
{
    let value_key = format!("{VALUE_PREFIX}{key}");
    let lock_key = format!("{LOCK_PREFIX}{key}");

    let lock_token = match lookup_or_lock(pool, settings, &value_key, &lock_key).await {
        Ok(PeerLookup::Hit(bytes)) => {
            tracing::debug!(key = %key, "cache hit (peer)");
            return Ok(bytes);
        }
        Ok(PeerLookup::Locked(token)) => Some(token),
        Ok(PeerLookup::Busy) => {
            tracing::warn!(key = %key, "peer load did not finish in time, loading locally");
            None
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Redis unavailable, loading locally");
            None
        }
    };

    let result = load().await;

    if let Some(token) = lock_token {
        if let Ok(bytes) = &result {
            if let Err(e) = publish(pool, &value_key, bytes, settings.ttl).await {
                tracing::warn!(key = %key, error = %e, "Redis SET error");
            }
        }
        if let Err(e) = release(pool, &lock_key, &token).await {
            tracing::warn!(key = %key, error = %e, "Redis lock release error");
        }
    }

    result
}

/// Polls for a value published by a peer until it appears or this instance
/// takes the load lock.
async fn lookup_or_lock(
    pool: &Pool,
    settings: &PeerSettings,
    value_key: &str,
    lock_key: &str,
) -> Result<PeerLookup, PeerError> {
    let token = uuid::Uuid::new_v4().to_string();
    let lock_ms = u64::try_from(settings.lock_ttl.as_millis()).unwrap_or(u64::MAX);
    let started = Instant::now();

    loop {
        let mut conn = pool.get().await?;

        let value: Option<Vec<u8>> = conn.get(value_key).await?;
        if let Some(value) = value {
            return Ok(PeerLookup::Hit(Bytes::from(value)));
        }

        let acquired: Option<String> = redis::cmd("SET")
            .arg(lock_key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(lock_ms)
            .query_async(&mut conn)
            .await?;
        if acquired.is_some() {
            return Ok(PeerLookup::Locked(token));
        }

        if started.elapsed() >= settings.lock_ttl {
            return Ok(PeerLookup::Busy);
        }
        drop(conn);
        tokio::time::sleep(settings.poll_interval).await;
    }
}

async fn publish(pool: &Pool, value_key: &str, value: &Bytes, ttl: Duration) -> Result<(), PeerError> {
    let mut conn = pool.get().await?;
    let _: () = conn
        .set_ex(value_key, value.as_ref(), ttl.as_secs().max(1))
        .await?;
    Ok(())
}

async fn release(pool: &Pool, lock_key: &str, token: &str) -> Result<(), PeerError> {
    let mut conn = pool.get().await?;
    let _: i64 = redis::Script::new(RELEASE_LOCK)
        .key(lock_key)
        .arg(token)
        .invoke_async(&mut conn)
        .await?;
    Ok(())
}
