//! Cache keys and sources.
//!
//! Grounded on the reference crate's `Key`/`RemoteKey` (`src/image/cache/mod.rs`),
//! generalized from "URL or local file" to the spec's `Network`/`Provider` sources.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Caller-supplied identifier for a resource, typically a URL string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<Url> for CacheKey {
    fn from(url: Url) -> Self {
        Self(url.into())
    }
}

/// A provider-backed source: an opaque key plus a caller-supplied provider identifier.
/// Providers are an external collaborator (spec §1 scope); the core only needs a stable
/// string to key on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProviderId(pub String);

/// A provider-backed fetch (spec §3's `Provider(cache_key, provider)` source). The
/// platform-specific provider implementation is an external collaborator (spec §1
/// scope); the core only needs a blocking `fetch` to get bytes out of it.
pub trait DataProvider: Send + Sync {
    fn fetch(&self, provider: &ProviderId) -> anyhow::Result<Vec<u8>>;
}

/// A tagged retrieval source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Network { url: Url, cache_key: CacheKey },
    Provider {
        cache_key: CacheKey,
        provider: ProviderId,
    },
}

impl Source {
    pub fn cache_key(&self) -> &CacheKey {
        match self {
            Self::Network { cache_key, .. } => cache_key,
            Self::Provider { cache_key, .. } => cache_key,
        }
    }

    pub fn network(url: Url) -> Self {
        let cache_key = CacheKey::from(url.clone());
        Self::Network { url, cache_key }
    }
}

/// The effective cache key: `key` if the processor identifier is empty, else
/// `key@processor_identifier` (spec §3).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct EffectiveKey(String);

impl EffectiveKey {
    pub fn compute(cache_key: &CacheKey, processor_identifier: &str) -> Self {
        if processor_identifier.is_empty() {
            Self(cache_key.as_str().to_owned())
        } else {
            Self(format!("{}@{}", cache_key.as_str(), processor_identifier))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_key_without_processor_is_bare_key() {
        let key = CacheKey::new("https://example.com/a.png");
        let effective = EffectiveKey::compute(&key, "");
        assert_eq!(effective.as_str(), "https://example.com/a.png");
    }

    #[test]
    fn effective_key_scopes_by_processor() {
        let key = CacheKey::new("https://example.com/a.png");
        let p1 = EffectiveKey::compute(&key, "resize(100)");
        let p2 = EffectiveKey::compute(&key, "resize(200)");
        assert_ne!(p1, p2);
        assert_eq!(p1.as_str(), "https://example.com/a.png@resize(100)");
    }
}
