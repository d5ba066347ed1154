use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::{
    Header, KeepAliveResponse, KeyRange, KeyValue, LeaseId, LeaseInfo, Result, WatchResponse,
};

/// Renewal acknowledgements for a single lease. The stream ends when the lease is lost.
pub type KeepAliveStream = Pin<Box<dyn Stream<Item = KeepAliveResponse> + Send + 'static>>;

/// Batches of change events in revision order. The stream ends when the watch is cancelled
/// or the store drops the subscription.
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchResponse> + Send + 'static>>;

pub type Gateway = Arc<dyn StoreGateway>;

/// The operations a coordination client needs from the replicated store.
///
/// Single key operations are expected to be linearizable and watches to deliver events in
/// revision order.
#[tonic::async_trait]
pub trait StoreGateway: Send + Sync + 'static {
    /// Round trip to the store without touching any keys.
    async fn status(&self) -> Result<Header>;

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<Header>;

    /// Get a single key, `None` if it doesn't exist.
    async fn get(&self, key: &str) -> Result<(Header, Option<KeyValue>)>;

    async fn get_prefix(&self, prefix: &str) -> Result<(Header, BTreeMap<String, KeyValue>)>;

    async fn delete(&self, key: &str) -> Result<Header>;

    async fn delete_prefix(&self, prefix: &str) -> Result<Header>;

    async fn grant_lease(&self, ttl: i64) -> Result<(Header, LeaseId)>;

    /// Open a renewal stream for the lease, renewing it until `cancel` fires or the lease
    /// is gone.
    async fn keep_alive_stream(
        &self,
        lease: LeaseId,
        cancel: CancellationToken,
    ) -> Result<KeepAliveStream>;

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<KeepAliveResponse>;

    /// Revoke the lease, deleting every key attached to it.
    async fn revoke_lease(&self, lease: LeaseId) -> Result<Header>;

    async fn lease_time_to_live(&self, lease: LeaseId) -> Result<LeaseInfo>;

    async fn watch(&self, range: KeyRange, cancel: CancellationToken) -> Result<WatchStream>;

    /// Release the connection. Open watches end and later calls fail.
    async fn close(&self) -> Result<()>;
}
