use futures::StreamExt;
use kvcoord_core::{
    Error, Gateway, Header, KeepAliveResponse, LeaseId, LeaseInfo, Result, StoreGateway,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Grants, renews and revokes leases on behalf of the client.
#[derive(Clone)]
pub struct LeaseManager {
    gateway: Gateway,
}

impl LeaseManager {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Grant a lease of `ttl` seconds and attach it to the given existing keys.
    ///
    /// Attaching reads each key and writes its value back with the lease, which is not
    /// atomic: a concurrent write between the two can be overwritten. Keys that are missing
    /// or fail to be rewritten are skipped.
    pub async fn grant(&self, ttl: i64, keys: &[&str]) -> Result<LeaseId> {
        if ttl <= 0 {
            return Err(Error::InvalidTtl(ttl));
        }
        let (_, lease) = self.gateway.grant_lease(ttl).await.map_err(|error| {
            warn!(%error, ttl, "Failed to grant lease");
            error
        })?;

        for key in keys {
            let kv = match self.gateway.get(key).await {
                Ok((_, Some(kv))) => kv,
                Ok((_, None)) => {
                    debug!(key, lease_id=%lease, "Skipping missing key for lease");
                    continue;
                }
                Err(error) => {
                    warn!(key, %error, "Failed to read key to attach lease");
                    continue;
                }
            };
            if let Err(error) = self.gateway.put(key, &kv.value, Some(lease)).await {
                warn!(key, lease_id=%lease, %error, "Failed to attach lease to key");
            }
        }

        debug!(lease_id=%lease, ttl, "Granted lease");
        Ok(lease)
    }

    /// Keep the lease alive in the background until `cancel` fires or the store stops
    /// acknowledging renewals. Returns once the renewal stream is open.
    pub async fn keep_alive(&self, cancel: CancellationToken, lease: LeaseId) -> Result<()> {
        let mut acks = self
            .gateway
            .keep_alive_stream(lease, cancel.clone())
            .await
            .map_err(|error| {
                warn!(lease_id=%lease, %error, "Failed to start lease keep alive");
                error
            })?;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    ack = acks.next() => match ack {
                        Some(ack) => debug!(lease_id=%ack.id, ttl=ack.ttl, "Renewed lease"),
                        None => {
                            debug!(lease_id=%lease, "Lease keep alive ended");
                            break;
                        }
                    },
                }
            }
            debug!(lease_id=%lease, "Closing lease keep alive loop");
        });
        Ok(())
    }

    /// Renew the lease a single time.
    pub async fn keep_alive_once(&self, lease: LeaseId) -> Result<KeepAliveResponse> {
        self.gateway.keep_alive_once(lease).await.map_err(|error| {
            warn!(lease_id=%lease, %error, "Failed to renew lease");
            error
        })
    }

    /// Expire the lease now, deleting all keys attached to it.
    pub async fn revoke(&self, lease: LeaseId) -> Result<Header> {
        self.gateway.revoke_lease(lease).await.map_err(|error| {
            warn!(lease_id=%lease, %error, "Failed to revoke lease");
            error
        })
    }

    pub async fn info(&self, lease: LeaseId) -> Result<LeaseInfo> {
        self.gateway
            .lease_time_to_live(lease)
            .await
            .map_err(|error| {
                warn!(lease_id=%lease, %error, "Failed to get lease info");
                error
            })
    }
}
