use std::sync::Arc;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

use crate::error::Rejection;

/// Remembers (tenant, nonce) pairs for the freshness window.
///
/// Only consulted when `signature.reject_replayed_nonces` is enabled; by default a
/// fresh signature may be presented more than once.
#[derive(Debug, Clone)]
pub struct NonceGuard {
    ttl: Duration,
    inner: Arc<Mutex<HashMap<String, Instant>>>,
}

impl NonceGuard {
    pub fn new_ttl(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn check_and_store(&self, tenant_id: &str, nonce: &str) -> Result<(), Rejection> {
        let now = Instant::now();
        let key = format!("{tenant_id}:{nonce}");
        let mut map = self.inner.lock().await;
        // purge expired
        let ttl = self.ttl;
        map.retain(|_, &mut t| now.duration_since(t) < ttl);
        if map.contains_key(&key) {
            return Err(Rejection::ReplayDetected);
        }
        map.insert(key, now);
        Ok(())
    }
}
