//! Platform key set fetching and caching.
//!
//! Keys are cached process-wide by key id. A lookup for an id that is not cached
//! (or whose entry outlived the optional TTL) triggers exactly one refresh of the
//! whole set before the lookup fails.

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Rejection;

/// A JSON Web Key as published by the platform (RFC 7517 subset).
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

impl Jwk {
    fn is_rsa_signing_key(&self) -> bool {
        self.kty == "RSA" && self.key_use.as_deref().map_or(true, |u| u == "sig")
    }

    fn decoding_key(&self) -> Result<DecodingKey, String> {
        let n = self.n.as_deref().ok_or("missing modulus (n)")?;
        let e = self.e.as_deref().ok_or("missing exponent (e)")?;
        DecodingKey::from_rsa_components(n, e).map_err(|err| err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

#[derive(Clone)]
struct CachedKey {
    key: DecodingKey,
    fetched_at: Instant,
}

/// Key set endpoint client with a shared by-kid cache.
#[derive(Clone)]
pub struct KeySetClient {
    url: String,
    http_client: reqwest::Client,
    ttl: Option<Duration>,
    cache: Arc<RwLock<HashMap<String, CachedKey>>>,
}

impl KeySetClient {
    /// `ttl` of `None` keeps keys until an unknown key id forces a refresh.
    pub fn new(url: impl Into<String>, http_client: reqwest::Client, ttl: Option<Duration>) -> Self {
        Self {
            url: url.into(),
            http_client,
            ttl,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn key_for(&self, kid: &str) -> Result<DecodingKey, Rejection> {
        if let Some(key) = self.cached(kid, true).await {
            return Ok(key);
        }

        debug!(kid = %kid, "key id not cached, refreshing key set");
        self.refresh().await?;

        // just fetched, so the TTL does not apply to this lookup
        self.cached(kid, false)
            .await
            .ok_or_else(|| Rejection::UnknownKeyId(kid.to_string()))
    }

    async fn cached(&self, kid: &str, enforce_ttl: bool) -> Option<DecodingKey> {
        let cache = self.cache.read().await;
        let entry = cache.get(kid)?;
        if let (true, Some(ttl)) = (enforce_ttl, self.ttl) {
            if entry.fetched_at.elapsed() > ttl {
                return None;
            }
        }
        Some(entry.key.clone())
    }

    /// Fetch the key set and replace the cache contents. Returns the number of usable keys.
    pub async fn refresh(&self) -> Result<usize, Rejection> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Rejection::KeySetUnavailable(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Rejection::KeySetUnavailable(format!(
                "key set endpoint returned {}",
                response.status()
            )));
        }

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| Rejection::KeySetUnavailable(format!("invalid key set JSON: {e}")))?;

        let fetched_at = Instant::now();
        let mut fresh = HashMap::new();
        for jwk in set.keys.iter().filter(|k| k.is_rsa_signing_key()) {
            let Some(kid) = jwk.kid.as_deref() else {
                debug!("skipping key without kid");
                continue;
            };
            match jwk.decoding_key() {
                Ok(key) => {
                    fresh.insert(kid.to_string(), CachedKey { key, fetched_at });
                }
                Err(reason) => warn!(kid = %kid, reason = %reason, "skipping unusable key"),
            }
        }

        let count = fresh.len();
        *self.cache.write().await = fresh;
        info!(url = %self.url, key_count = count, "platform key set refreshed");
        Ok(count)
    }

    pub async fn cached_key_count(&self) -> usize {
        self.cache.read().await.len()
    }
}

impl fmt::Debug for KeySetClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySetClient")
            .field("url", &self.url)
            .field("ttl", &self.ttl)
            .finish()
    }
}
