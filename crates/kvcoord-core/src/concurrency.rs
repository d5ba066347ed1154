//! Sessions and distributed mutexes built from the primitives of any [`StoreGateway`].
//!
//! A session is a lease kept alive in the background until its token is cancelled. A mutex
//! is a queue of keys under `{name}/`, one per session, each attached to its session's
//! lease. The key with the lowest create revision holds the lock; every other contender
//! watches only the key directly ahead of it, so the lock is handed over in arrival order.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    gateway::{Gateway, StoreGateway},
    Error, EventType, KeyRange, LeaseId, Result,
};

/// An ephemeral identity backed by a lease.
#[derive(Clone)]
pub struct Session {
    gateway: Gateway,
    lease: LeaseId,
    ttl: i64,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("lease", &self.lease)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Session {
    /// Grant a lease with the given ttl and keep it alive until `cancel` fires.
    pub async fn new(gateway: Gateway, ttl: i64, cancel: CancellationToken) -> Result<Self> {
        if ttl <= 0 {
            return Err(Error::InvalidTtl(ttl));
        }
        let (_, lease) = gateway.grant_lease(ttl).await?;
        let mut acks = match gateway.keep_alive_stream(lease, cancel.clone()).await {
            Ok(acks) => acks,
            Err(error) => {
                if let Err(error) = gateway.revoke_lease(lease).await {
                    debug!(lease_id=%lease, %error, "Failed to revoke lease of failed session");
                }
                return Err(error);
            }
        };

        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    ack = acks.next() => match ack {
                        Some(ack) => debug!(lease_id=%ack.id, ttl=ack.ttl, "Renewed session lease"),
                        None => {
                            warn!(lease_id=%lease, "Session keep alive closed, lease lost");
                            token.cancel();
                            break;
                        }
                    },
                }
            }
            debug!(lease_id=%lease, "Closing session keep alive loop");
        });

        debug!(lease_id=%lease, ttl, "Created session");
        Ok(Self {
            gateway,
            lease,
            ttl,
            cancel,
        })
    }

    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    /// Fires when the session is closed or its lease is lost.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn new_mutex(&self, name: impl Into<String>) -> Mutex {
        Mutex::new(self.clone(), name.into())
    }

    /// Stop renewing the lease. Keys attached to it expire once the ttl passes.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// A named distributed mutex owned by a [`Session`].
pub struct Mutex {
    session: Session,
    prefix: String,
    key: String,
    /// Create revision of our queue key while we are queued or holding the lock.
    revision: i64,
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("key", &self.key)
            .field("revision", &self.revision)
            .finish()
    }
}

impl Mutex {
    fn new(session: Session, name: String) -> Self {
        let prefix = format!("{}/", name);
        let key = format!("{}{:x}", prefix, session.lease);
        Self {
            session,
            prefix,
            key,
            revision: 0,
        }
    }

    /// The queue key this mutex writes, `{name}/{lease_id:x}`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.revision > 0
    }

    /// Wait until the lock is ours, `cancel` fires or the session ends.
    ///
    /// On failure the queue key is removed so later contenders don't wait on it.
    pub async fn lock(&mut self, cancel: &CancellationToken) -> Result<()> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = self.session.cancel.cancelled() => Err(Error::SessionExpired(self.session.lease)),
            result = self.acquire() => result,
        };
        match result {
            Ok(revision) => {
                self.revision = revision;
                debug!(key=%self.key, revision, "Acquired mutex");
                Ok(())
            }
            Err(error) => {
                if let Err(error) = self.session.gateway.delete(&self.key).await {
                    debug!(key=%self.key, %error, "Failed to remove queue key");
                }
                Err(error)
            }
        }
    }

    pub async fn unlock(&mut self) -> Result<()> {
        self.session.gateway.delete(&self.key).await?;
        self.revision = 0;
        debug!(key=%self.key, "Released mutex");
        Ok(())
    }

    /// Enqueue our key and wait for everything ahead of it to go.
    async fn acquire(&self) -> Result<i64> {
        let gateway = &self.session.gateway;
        let revision = match gateway.get(&self.key).await? {
            (_, Some(kv)) => kv.create_revision,
            (_, None) => {
                gateway
                    .put(&self.key, "", Some(self.session.lease))
                    .await?
                    .revision
            }
        };

        loop {
            let (_, waiters) = gateway.get_prefix(&self.prefix).await?;
            if !waiters.contains_key(&self.key) {
                return Err(Error::SessionExpired(self.session.lease));
            }
            let predecessor = waiters
                .values()
                .filter(|kv| kv.create_revision < revision)
                .max_by_key(|kv| kv.create_revision);
            match predecessor {
                None => return Ok(revision),
                Some(kv) => {
                    debug!(key=%self.key, waiting_on=%kv.key, "Waiting for mutex");
                    wait_for_delete(gateway.as_ref(), &kv.key, kv.create_revision).await?;
                }
            }
        }
    }
}

/// Wait until the key created at `create_revision` is deleted.
async fn wait_for_delete(
    gateway: &dyn StoreGateway,
    key: &str,
    create_revision: i64,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let mut stream = gateway
        .watch(KeyRange::Key(key.to_owned()), cancel)
        .await?;

    // it may have gone before the watch started
    match gateway.get(key).await? {
        (_, Some(kv)) if kv.create_revision == create_revision => {}
        _ => return Ok(()),
    }

    while let Some(response) = stream.next().await {
        if response
            .events
            .iter()
            .any(|event| event.typ == EventType::Delete)
        {
            return Ok(());
        }
    }
    Err(Error::Unavailable(format!("watch on {} closed", key)))
}
