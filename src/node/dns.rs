//! DNS caching for the outbound dial path.
//!
//! Every backend client shares one [`CachingResolver`], plugged in through
//! reqwest's `Resolve` hook. Lookups hit a TTL-bounded map first; a miss
//! resolves through the system resolver and schedules its own eviction.
//! Failed resolutions are never cached, so the next dial retries.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type SharedCache = Arc<RwLock<HashMap<String, Vec<SocketAddr>>>>;

/// Host → resolved addresses, shared across all backend clients.
#[derive(Debug)]
pub struct CachingResolver {
    ttl: Duration,
    cache: SharedCache,
}

impl CachingResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[cfg(test)]
    fn cached(&self, host: &str) -> Option<Vec<SocketAddr>> {
        self.cache
            .read()
            .expect("dns cache lock poisoned")
            .get(host)
            .cloned()
    }
}

impl Resolve for CachingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        let ttl = self.ttl;
        let cache = Arc::clone(&self.cache);

        Box::pin(async move {
            let addrs = lookup_cached(&cache, ttl, host).await?;
            let iter: Addrs = Box::new(addrs.into_iter());
            Ok(iter)
        })
    }
}

/// Resolve `host`, consulting and populating the shared cache.
async fn lookup_cached(
    cache: &SharedCache,
    ttl: Duration,
    host: String,
) -> Result<Vec<SocketAddr>, BoxError> {
    if let Some(addrs) = cache
        .read()
        .expect("dns cache lock poisoned")
        .get(&host)
        .cloned()
    {
        return Ok(addrs);
    }

    // The port is supplied by the connector; resolve with a dummy.
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await
        .map_err(|e| -> BoxError { Box::new(e) })?
        .collect();

    if resolved.is_empty() {
        return Err(format!("DNS returned no addresses for {host}").into());
    }

    cache
        .write()
        .expect("dns cache lock poisoned")
        .insert(host.clone(), resolved.clone());

    // Best-effort eviction; a lookup racing the eviction window just
    // re-resolves.
    let evict_cache = Arc::clone(cache);
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        evict_cache
            .write()
            .expect("dns cache lock poisoned")
            .remove(&host);
    });

    Ok(resolved)
}
