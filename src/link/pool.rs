use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use super::transport::LinkTransport;
use crate::core::{Endpoint, Result};

/// Registry of pooled transports, keyed by `host:port`.
///
/// Shared by reference among opted-in connection managers so two managers
/// targeting the same endpoint reuse one physical socket. Ownership policy is
/// shared-refcounted: the pool holds one `Arc` per key and each manager holds
/// its own clone, so removing an entry never tears the socket down under a
/// manager that is still using it; the socket closes when the last reference
/// drops.
#[derive(Default)]
pub struct TransportPool {
    inner: Mutex<HashMap<String, Arc<LinkTransport>>>,
}

impl TransportPool {
    /// Creates an empty pool
    pub fn new() -> Self {
        TransportPool {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pooled transport for the endpoint, opening one if absent.
    ///
    /// The lock is held across the open so concurrent acquires for one
    /// endpoint cannot race two sockets into existence.
    pub async fn acquire(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Arc<LinkTransport>> {
        let mut pool = self.inner.lock().await;
        let key = endpoint.pool_key();
        if let Some(existing) = pool.get(&key) {
            if !existing.is_closed() {
                debug!(key = %key, "reusing pooled transport");
                return Ok(Arc::clone(existing));
            }
            // A closed entry is stale; replace it
            pool.remove(&key);
        }

        let transport = Arc::new(LinkTransport::open(endpoint, timeout).await?);
        pool.insert(key.clone(), Arc::clone(&transport));
        debug!(key = %key, "opened pooled transport");
        Ok(transport)
    }

    /// Removes the entry for `key` without closing it; returns whether an
    /// entry was present. Managers still holding the transport keep using it.
    pub async fn release(&self, key: &str) -> bool {
        self.inner.lock().await.remove(key).is_some()
    }

    /// Closes and removes every pooled transport. Test teardown only; this is
    /// the one path that closes sockets other managers may still reference.
    pub async fn release_all(&self) {
        let mut pool = self.inner.lock().await;
        for (key, transport) in pool.drain() {
            debug!(key = %key, "closing pooled transport");
            transport.close();
        }
    }

    /// Number of pooled transports
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the pool holds no transports
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
