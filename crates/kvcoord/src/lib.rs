mod lease;
mod lock;
mod options;
mod watch;

use std::collections::BTreeMap;
use std::time::Duration;

pub use kvcoord_core::{
    Error, EventType, Gateway, Header, KeepAliveResponse, KeyValue, LeaseId, LeaseInfo,
    MemoryStore, Result, StoreGateway, WatchEvent,
};
pub use lease::LeaseManager;
pub use lock::{LockCoordinator, LockError, LockState, UnLock};
pub use options::{Options, Scenario};
pub use watch::WatchTranslator;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Used when a connection check is given no timeout.
const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordination client over a [`StoreGateway`].
#[derive(Clone)]
pub struct Client {
    gateway: Gateway,
    leases: LeaseManager,
    locks: LockCoordinator,
    watches: WatchTranslator,
}

/// Log a store error before handing it back.
fn logged(error: Error) -> Error {
    warn!(%error, "Store request failed");
    error
}

impl Client {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            leases: LeaseManager::new(gateway.clone()),
            locks: LockCoordinator::new(gateway.clone()),
            watches: WatchTranslator::new(gateway.clone()),
            gateway,
        }
    }

    /// The underlying store.
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    pub fn watches(&self) -> &WatchTranslator {
        &self.watches
    }

    /// Make one round trip to the store, failing with [`Error::Timeout`] if it takes longer
    /// than `timeout` (10s when zero).
    pub async fn check_connection(&self, timeout: Duration) -> Result<Header> {
        let timeout = if timeout.is_zero() {
            DEFAULT_CHECK_TIMEOUT
        } else {
            timeout
        };
        match tokio::time::timeout(timeout, self.gateway.status()).await {
            Ok(result) => result.map_err(logged),
            Err(_) => {
                warn!(?timeout, "Connection check timed out");
                Err(Error::Timeout(timeout))
            }
        }
    }

    /// Close the underlying store connection.
    pub async fn close(&self) -> Result<()> {
        debug!("Closing client");
        self.gateway.close().await.map_err(logged)
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<Header> {
        self.gateway.put(key, value, None).await.map_err(logged)
    }

    pub async fn put_with_lease(&self, key: &str, value: &str, lease: LeaseId) -> Result<Header> {
        self.gateway
            .put(key, value, Some(lease))
            .await
            .map_err(logged)
    }

    /// Store `data` encoded as json.
    pub async fn put_json<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> Result<Header> {
        let value = serde_json::to_string(data)?;
        self.put(key, &value).await
    }

    pub async fn put_json_with_lease<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        lease: LeaseId,
    ) -> Result<Header> {
        let value = serde_json::to_string(data)?;
        self.put_with_lease(key, &value, lease).await
    }

    /// Get the current state of `key`. A missing key is returned as a [`KeyValue`] that
    /// doesn't [exist](KeyValue::exists).
    pub async fn get(&self, key: &str) -> Result<(Header, KeyValue)> {
        let (header, kv) = self.gateway.get(key).await.map_err(logged)?;
        Ok((header, kv.unwrap_or_else(|| KeyValue::absent(key))))
    }

    pub async fn get_prefix(&self, prefix: &str) -> Result<(Header, BTreeMap<String, KeyValue>)> {
        self.gateway.get_prefix(prefix).await.map_err(logged)
    }

    /// Whether `key` currently has a value. Store errors count as missing.
    pub async fn exists(&self, key: &str) -> bool {
        match self.gateway.get(key).await {
            Ok((_, kv)) => kv.map_or(false, |kv| kv.exists()),
            Err(error) => {
                warn!(key, %error, "Failed to check key existence");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<Header> {
        self.gateway.delete(key).await.map_err(logged)
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<Header> {
        self.gateway.delete_prefix(prefix).await.map_err(logged)
    }

    pub async fn watch<F>(
        &self,
        cancel: CancellationToken,
        key: &str,
        handler: F,
    ) -> Result<JoinHandle<()>>
    where
        F: FnMut(WatchEvent) + Send + 'static,
    {
        self.watches.watch(cancel, key, handler).await
    }

    pub async fn watch_prefix<F>(
        &self,
        cancel: CancellationToken,
        prefix: &str,
        handler: F,
    ) -> Result<JoinHandle<()>>
    where
        F: FnMut(WatchEvent) + Send + 'static,
    {
        self.watches.watch_prefix(cancel, prefix, handler).await
    }

    pub async fn lease_grant(&self, ttl: i64, keys: &[&str]) -> Result<LeaseId> {
        self.leases.grant(ttl, keys).await
    }

    pub async fn lease_keep_alive(&self, cancel: CancellationToken, lease: LeaseId) -> Result<()> {
        self.leases.keep_alive(cancel, lease).await
    }

    pub async fn lease_keep_alive_once(&self, lease: LeaseId) -> Result<KeepAliveResponse> {
        self.leases.keep_alive_once(lease).await
    }

    pub async fn lease_revoke(&self, lease: LeaseId) -> Result<Header> {
        self.leases.revoke(lease).await
    }

    pub async fn lease_info(&self, lease: LeaseId) -> Result<LeaseInfo> {
        self.leases.info(lease).await
    }

    pub async fn lock(&self, key: &str, ttl: i64) -> std::result::Result<UnLock, LockError> {
        debug!(key, ttl, "Locking");
        self.locks.lock(key, ttl).await
    }
}
