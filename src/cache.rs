//! In-memory, per-endpoint cache for scraped pages.
//!
//! Expiry is checked lazily on read. Each endpoint keeps its entry behind a
//! short-lived `RwLock` and has a separate async refresh lock, held across
//! the upstream fetch, so concurrent misses on the same endpoint share a
//! single fetch while readers of the stored entry never wait on it.

use std::future::Future;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::models::Endpoint;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

struct CacheEntry<T> {
    timestamp: Instant,
    fetched_at: DateTime<Utc>,
    time_to_live: Duration,
    data: T,
}

impl<T: Clone> CacheEntry<T> {
    fn new(data: T, time_to_live: Duration) -> Self {
        Self {
            timestamp: Instant::now(),
            fetched_at: Utc::now(),
            time_to_live,
            data,
        }
    }

    fn is_fresh(&self) -> bool {
        self.timestamp.elapsed() < self.time_to_live
    }
}

struct Slot<T> {
    entry: RwLock<Option<CacheEntry<T>>>,
    refresh: Mutex<()>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            entry: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }
}

pub struct PageCache<T> {
    ttl: Duration,
    overview: Slot<T>,
    statistics: Slot<T>,
}

impl<T: Clone> PageCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            overview: Slot::new(),
            statistics: Slot::new(),
        }
    }

    fn slot(&self, endpoint: Endpoint) -> &Slot<T> {
        match endpoint {
            Endpoint::Overview => &self.overview,
            Endpoint::Statistics => &self.statistics,
        }
    }

    fn fresh_entry(&self, endpoint: Endpoint) -> Option<(T, DateTime<Utc>)> {
        self.slot(endpoint)
            .entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|entry| entry.is_fresh())
            .map(|entry| (entry.data.clone(), entry.fetched_at))
    }

    /// Cached data if present and younger than the TTL.
    pub fn get(&self, endpoint: Endpoint) -> Option<T> {
        self.fresh_entry(endpoint).map(|(data, _)| data)
    }

    /// Replaces the entry wholesale and restarts its TTL.
    pub fn put(&self, endpoint: Endpoint, data: T) {
        let entry = CacheEntry::new(data, self.ttl);
        *self
            .slot(endpoint)
            .entry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(entry);
    }

    /// Time since the entry was stored, fresh or not. Never waits on a refresh.
    pub fn age(&self, endpoint: Endpoint) -> Option<Duration> {
        self.slot(endpoint)
            .entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|entry| entry.timestamp.elapsed())
    }

    /// Returns the cached value, or runs `refresh` and stores its result.
    ///
    /// Errors from `refresh` are passed through and never stored.
    pub async fn get_or_refresh<F, Fut, E>(&self, endpoint: Endpoint, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _guard = self.slot(endpoint).refresh.lock().await;

        if let Some((data, fetched_at)) = self.fresh_entry(endpoint) {
            tracing::debug!(%endpoint, %fetched_at, "Cache hit");
            return Ok(data);
        }

        tracing::debug!(%endpoint, "Cache miss");
        let data = refresh().await?;
        self.put(endpoint, data.clone());
        Ok(data)
    }
}

impl<T: Clone> Default for PageCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
