//! Core types for the cache store: keys, generations and served results.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::net::{Request, Response};

/// Request identity used as the cache key: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
  pub method: String,
  pub url: Url,
}

impl CacheKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.to_ascii_uppercase(),
      url,
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new("GET", url)
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl From<&Request> for CacheKey {
  fn from(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
  /// Immutable app shell, cache-first
  Static,
  /// Feed responses, network-first
  Dynamic,
}

impl GenerationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      GenerationKind::Static => "static",
      GenerationKind::Dynamic => "dynamic",
    }
  }
}

/// One named cache bucket: `{prefix}-{kind}-{version}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
  pub prefix: String,
  pub kind: GenerationKind,
  pub version: String,
}

impl CacheGeneration {
  pub fn new(prefix: &str, kind: GenerationKind, version: &str) -> Self {
    Self {
      prefix: prefix.to_string(),
      kind,
      version: version.to_string(),
    }
  }

  pub fn name(&self) -> String {
    format!("{}-{}-{}", self.prefix, self.kind.as_str(), self.version)
  }

  /// Parse a bucket name owned by this prefix. Names outside the
  /// `{prefix}-static-` / `{prefix}-dynamic-` pattern yield `None`.
  pub fn parse(prefix: &str, name: &str) -> Option<Self> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
    [GenerationKind::Static, GenerationKind::Dynamic]
      .into_iter()
      .find_map(|kind| {
        rest
          .strip_prefix(kind.as_str())
          .and_then(|r| r.strip_prefix('-'))
          .map(|version| Self::new(prefix, kind, version))
      })
  }
}

/// A stored response and when it was written.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Fresh data from network
  Network,
  /// Stored response, no network call made
  Cache,
  /// Network failed, serving a previously stored response
  CacheStale,
  /// Network failed and nothing was cached, synthesized placeholder
  Fallback,
}

impl fmt::Display for ServedFrom {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ServedFrom::Network => write!(f, "network"),
      ServedFrom::Cache => write!(f, "cache"),
      ServedFrom::CacheStale => write!(f, "stale cache"),
      ServedFrom::Fallback => write!(f, "offline fallback"),
    }
  }
}

/// Response plus its origin. Callers of the intercept only see `response`.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ServedFrom,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Network,
    }
  }

  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Cache,
    }
  }

  pub fn stale(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::CacheStale,
    }
  }

  pub fn fallback(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Fallback,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_ignores_fragment_and_method_case() {
    let a = CacheKey::new("get", &Url::parse("http://localhost:8080/index.html#top").unwrap());
    let b = CacheKey::get(&Url::parse("http://localhost:8080/index.html").unwrap());
    assert_eq!(a, b);
    assert_eq!(a.cache_hash(), b.cache_hash());
    assert_eq!(a.cache_hash().len(), 64);
  }

  #[test]
  fn test_key_distinguishes_method() {
    let url = Url::parse("http://localhost:8080/index.html").unwrap();
    assert_ne!(
      CacheKey::new("GET", &url).cache_hash(),
      CacheKey::new("HEAD", &url).cache_hash()
    );
  }

  #[test]
  fn test_generation_name_round_trip() {
    let generation = CacheGeneration::new("route80", GenerationKind::Dynamic, "v1.2");
    assert_eq!(generation.name(), "route80-dynamic-v1.2");
    assert_eq!(
      CacheGeneration::parse("route80", "route80-dynamic-v1.2"),
      Some(generation)
    );
  }

  #[test]
  fn test_parse_rejects_foreign_names() {
    assert_eq!(CacheGeneration::parse("route80", "route80-pwa-v1.2"), None);
    assert_eq!(CacheGeneration::parse("route80", "other-static-v1"), None);
    assert_eq!(CacheGeneration::parse("route80", "route80static-v1"), None);
    assert_eq!(CacheGeneration::parse("route80", "route80-staticv1"), None);
  }
}
