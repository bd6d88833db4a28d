//! Cache layer that resolves requests against the store and the network.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::{open_bucket, CacheStore};
use super::traits::{CacheKey, Served};
use crate::fallback::OfflineFallbacks;
use crate::net::{Network, Request};

/// Runs the fetch strategies.
///
/// Network failures never escape a strategy: they turn into a cached or
/// synthesized response. Storage failures are propagated.
pub struct CacheLayer<S: CacheStore> {
  store: Arc<S>,
  network: Arc<dyn Network>,
  static_cache: String,
  dynamic_cache: String,
  fallbacks: OfflineFallbacks,
}

impl<S: CacheStore> CacheLayer<S> {
  pub fn new(
    store: Arc<S>,
    network: Arc<dyn Network>,
    static_cache: String,
    dynamic_cache: String,
    fallbacks: OfflineFallbacks,
  ) -> Self {
    Self {
      store,
      network,
      static_cache,
      dynamic_cache,
      fallbacks,
    }
  }

  /// Cache-first, for static assets.
  ///
  /// 1. Hit in the static generation - return it, no network call
  /// 2. Miss - fetch, store a copy if 2xx
  /// 3. Network failure - offline page for navigations, 503 otherwise
  pub async fn cache_first(&self, request: &Request) -> Result<Served> {
    let key = CacheKey::from(request);
    let bucket = open_bucket(self.store.as_ref(), &self.static_cache)?;

    if let Some(entry) = bucket.lookup(&key)? {
      debug!(%key, "serving from cache");
      return Ok(Served::from_cache(entry.response));
    }

    debug!(%key, "cache miss, fetching from network");
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          bucket.put(&key, &response)?;
        }
        Ok(Served::from_network(response))
      }
      Err(e) => {
        warn!(%key, error = %e, "cache-first fetch failed, serving offline fallback");
        let response = if request.is_navigation() {
          self.fallbacks.document()
        } else {
          self.fallbacks.unavailable()
        };
        Ok(Served::fallback(response))
      }
    }
  }

  /// Network-first, for feed data.
  ///
  /// 1. Fetch - store a copy in the dynamic generation if 2xx
  /// 2. Network failure - stale copy from the dynamic generation
  /// 3. Nothing cached - offline arrivals placeholder
  pub async fn network_first(&self, request: &Request) -> Result<Served> {
    let key = CacheKey::from(request);
    let bucket = open_bucket(self.store.as_ref(), &self.dynamic_cache)?;

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          bucket.put(&key, &response)?;
        }
        Ok(Served::from_network(response))
      }
      Err(e) => {
        info!(%key, error = %e, "network failed, trying cache");
        if let Some(entry) = bucket.lookup(&key)? {
          info!(%key, stored_at = %entry.stored_at, "serving stale data from cache");
          return Ok(Served::stale(entry.response));
        }

        warn!(%key, "no cached data available, serving offline placeholder");
        Ok(Served::fallback(self.fallbacks.api_payload(Utc::now())?))
      }
    }
  }

  /// Everything unclassified: network, then any generation, then fail.
  pub async fn network_then_any_cache(&self, request: &Request) -> Result<Served> {
    let key = CacheKey::from(request);

    match self.network.fetch(request).await {
      Ok(response) => Ok(Served::from_network(response)),
      Err(e) => match self.store.lookup_any(&key)? {
        Some(entry) => {
          debug!(%key, "network failed, serving from cache");
          Ok(Served::stale(entry.response))
        }
        None => Err(eyre!("{} failed and nothing is cached: {}", key, e)),
      },
    }
  }
}
