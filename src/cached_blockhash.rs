//! On-demand blockhash cache with a 15 s TTL (§3, §4.1).
//!
//! Unlike a background-refresher model, this is pull-based: a reader takes
//! the read lock, and only escalates to a write lock and an RPC round trip
//! once the cached value is missing or stale. Concurrent readers during a
//! refresh simply queue behind the writer rather than issuing duplicate
//! fetches, since the writer re-checks freshness after acquiring the lock.

use anyhow::Result;
use solana_sdk::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const TTL: Duration = Duration::from_secs(15);

#[derive(Clone, Copy)]
struct Cached {
    hash: Hash,
    fetched_at: Instant,
}

pub type SharedCachedBlockhash = Arc<RwLock<Option<Cached>>>;

pub fn new_shared() -> SharedCachedBlockhash {
    Arc::new(RwLock::new(None))
}

/// Returns the cached blockhash if it is younger than the TTL, otherwise
/// fetches a fresh one through `client` and replaces the cache.
pub async fn get_blockhash(
    cache: &SharedCachedBlockhash,
    client: &crate::rpc_client::SolanaRpcClient,
) -> Result<Hash> {
    {
        let guard = cache.read().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < TTL {
                return Ok(cached.hash);
            }
        }
    }

    let mut guard = cache.write().await;
    // Someone else may have refreshed it while we waited for the write lock.
    if let Some(cached) = guard.as_ref() {
        if cached.fetched_at.elapsed() < TTL {
            return Ok(cached.hash);
        }
    }

    let hash = client.fetch_latest_blockhash().await?;
    *guard = Some(Cached {
        hash,
        fetched_at: Instant::now(),
    });
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_starts_empty() {
        let cache = new_shared();
        assert!(cache.try_read().unwrap().is_none());
    }
}
