use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Derives time-bucketed cache keys.
///
/// Keys have the form `"[<bucket>]<url>"` where `bucket` is the current unix
/// time in seconds truncated down to a multiple of the TTL, so every entry
/// goes stale at the next bucket boundary.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyer {
    ttl_secs: u64,
}

impl CacheKeyer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_secs: ttl.as_secs().max(1),
        }
    }

    pub fn key(&self, url: &str) -> String {
        self.key_at(SystemTime::now(), url)
    }

    pub fn key_at(&self, now: SystemTime, url: &str) -> String {
        let secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let bucket = secs - secs % self.ttl_secs;
        format!("[{bucket}]{url}")
    }
}
