use std::fmt::Display;

use kvcoord_core::{Error, Gateway, LeaseId, Mutex, Session};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where a lock attempt ended up.
///
/// An attempt passes through establishing its session and contending for the mutex before
/// it returns. Those steps are only logged; an [`UnLock`] is handed out once the attempt has
/// reached one of these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Held,
    Released,
    Failed,
}

impl Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockState::Held => write!(f, "held"),
            LockState::Released => write!(f, "released"),
            LockState::Failed => write!(f, "failed"),
        }
    }
}

/// Releases one lock acquisition.
///
/// Calling [`UnLock::unlock`] more than once is a no-op. Dropping it without unlocking stops
/// the session keep alive, so the lock is freed once the session ttl lapses.
#[derive(Debug)]
pub struct UnLock {
    mutex: Option<Mutex>,
    lease: Option<LeaseId>,
    cancel: CancellationToken,
    state: LockState,
}

impl UnLock {
    fn held(mutex: Mutex, lease: LeaseId, cancel: CancellationToken) -> Self {
        Self {
            mutex: Some(mutex),
            lease: Some(lease),
            cancel,
            state: LockState::Held,
        }
    }

    /// Only tears down the partial session of a failed attempt.
    fn failed(lease: Option<LeaseId>, cancel: CancellationToken) -> Self {
        Self {
            mutex: None,
            lease,
            cancel,
            state: LockState::Failed,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// The lease of the session behind this attempt, if one was granted.
    pub fn lease(&self) -> Option<LeaseId> {
        self.lease
    }

    /// The queue key holding the lock, while held.
    pub fn key(&self) -> Option<&str> {
        self.mutex.as_ref().map(|mutex| mutex.key())
    }

    pub async fn unlock(&mut self) {
        if let Some(mut mutex) = self.mutex.take() {
            // the session lease expiring releases the lock anyway
            if let Err(error) = mutex.unlock().await {
                debug!(key = mutex.key(), %error, "Ignoring failed unlock");
            }
            self.state = LockState::Released;
        }
        self.cancel.cancel();
    }
}

impl Drop for UnLock {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A failed lock attempt. `unlock` cleans up whatever the attempt created.
#[derive(Debug, thiserror::Error)]
#[error("failed to lock {key}: {source}")]
pub struct LockError {
    pub key: String,
    #[source]
    pub source: Error,
    pub unlock: UnLock,
}

impl LockError {
    pub fn into_parts(self) -> (Error, UnLock) {
        (self.source, self.unlock)
    }
}

/// Distributed mutual exclusion over session scoped mutexes.
#[derive(Clone)]
pub struct LockCoordinator {
    gateway: Gateway,
}

impl LockCoordinator {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Block until the lock named `key` is held by a new session with the given ttl.
    pub async fn lock(&self, key: &str, ttl: i64) -> Result<UnLock, LockError> {
        self.lock_with_cancel(key, ttl, &CancellationToken::new())
            .await
    }

    /// Like [`LockCoordinator::lock`], giving up with [`Error::Cancelled`] once `cancel`
    /// fires.
    pub async fn lock_with_cancel(
        &self,
        key: &str,
        ttl: i64,
        cancel: &CancellationToken,
    ) -> Result<UnLock, LockError> {
        let cancel = cancel.child_token();
        let fail = |source: Error, lease: Option<LeaseId>, cancel: CancellationToken| {
            warn!(key, error=%source, "Failed to lock");
            LockError {
                key: key.to_owned(),
                source,
                unlock: UnLock::failed(lease, cancel),
            }
        };

        debug!(key, ttl, "Establishing lock session");
        let session = match Session::new(self.gateway.clone(), ttl, cancel.clone()).await {
            Ok(session) => session,
            Err(error) => return Err(fail(error, None, cancel)),
        };

        debug!(key, lease_id=%session.lease(), "Contending for lock");
        let mut mutex = session.new_mutex(key);
        if let Err(error) = mutex.lock(&cancel).await {
            return Err(fail(error, Some(session.lease()), cancel));
        }

        debug!(key, lease_id=%session.lease(), "Holding lock");
        Ok(UnLock::held(mutex, session.lease(), cancel))
    }
}
