use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    gateway::{KeepAliveStream, StoreGateway, WatchStream},
    Error, Event, EventType, Header, KeepAliveResponse, KeyRange, KeyValue, LeaseId, LeaseInfo,
    Result, WatchResponse,
};


/// Buffer of unread keepalive acknowledgements before new ones get dropped.
const KEEP_ALIVE_BUFFER: usize = 16;

/// Longest lease ttl accepted, in seconds.
pub const MAX_LEASE_TTL: i64 = 9_000_000_000;

/// A single node, in-process store with the semantics of the replicated one.
///
/// Every call is applied under one lock so operations are linearizable, watches see batches
/// in revision order and leases expire on the tokio clock.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    cluster_id: u64,
    member_id: u64,
    state: Mutex<State>,
}

struct State {
    revision: i64,
    kvs: BTreeMap<String, KeyValue>,
    leases: HashMap<LeaseId, Lease>,
    watches: HashMap<u64, Watch>,
    max_watch_id: u64,
    rng: StdRng,
    closed: bool,
}

struct Lease {
    granted_ttl: i64,
    deadline: Instant,
    keys: BTreeSet<String>,
}

struct Watch {
    range: KeyRange,
    sender: mpsc::UnboundedSender<WatchResponse>,
    cancel: CancellationToken,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl MemoryStore {
    pub fn new(cluster_id: u64, member_id: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                cluster_id,
                member_id,
                state: Mutex::new(State {
                    revision: 1,
                    kvs: BTreeMap::new(),
                    leases: HashMap::new(),
                    watches: HashMap::new(),
                    max_watch_id: 0,
                    rng: StdRng::from_entropy(),
                    closed: false,
                }),
            }),
        }
    }

    /// Stop serving requests. Later calls fail with [`Error::Unavailable`] and open watches
    /// are closed.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        for (_, watch) in state.watches.drain() {
            watch.cancel.cancel();
        }
        info!("Closed memory store");
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn header(&self, revision: i64) -> Header {
        Header {
            cluster_id: self.inner.cluster_id,
            member_id: self.inner.member_id,
            revision,
            raft_term: 1,
        }
    }

    /// Revoke the lease once its deadline passes without a refresh.
    fn spawn_reaper(&self, lease: LeaseId, deadline: Instant) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut deadline = deadline;
            loop {
                tokio::time::sleep_until(deadline).await;
                match store.expire(lease) {
                    Some(next) => deadline = next,
                    None => break,
                }
            }
            debug!(lease_id=%lease, "Closing lease expiry loop");
        });
    }

    /// Returns the next deadline to check, or `None` once the lease is gone.
    fn expire(&self, lease: LeaseId) -> Option<Instant> {
        let mut state = self.state();
        if state.closed {
            return None;
        }
        let deadline = state.leases.get(&lease)?.deadline;
        if Instant::now() < deadline {
            return Some(deadline);
        }
        info!(lease_id=%lease, "Removing lease due to timeout");
        let header = self.header(state.revision);
        state.revoke(lease, header);
        None
    }

    fn renew(&self, lease: LeaseId) -> Result<KeepAliveResponse> {
        let mut state = self.state();
        state.check_open()?;
        let revision = state.revision;
        let entry = state
            .leases
            .get_mut(&lease)
            .ok_or(Error::LeaseNotFound(lease))?;
        entry.deadline = deadline_after(entry.granted_ttl)?;
        Ok(KeepAliveResponse {
            header: self.header(revision),
            id: lease,
            ttl: entry.granted_ttl,
        })
    }
}

fn ttl_duration(ttl: i64) -> Duration {
    Duration::from_secs(ttl.max(0) as u64)
}

fn deadline_after(ttl: i64) -> Result<Instant> {
    if ttl > MAX_LEASE_TTL {
        return Err(Error::TtlTooLarge(ttl));
    }
    Instant::now()
        .checked_add(ttl_duration(ttl))
        .ok_or(Error::TtlTooLarge(ttl))
}

impl State {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Unavailable("store is closed".to_owned()))
        } else {
            Ok(())
        }
    }

    /// Send each watch the events in its range as a single batch.
    fn notify(&mut self, header: Header, events: &[Event]) {
        self.watches.retain(|id, watch| {
            let matching: Vec<Event> = events
                .iter()
                .filter(|event| watch.range.contains(&event.kv.key))
                .cloned()
                .collect();
            if matching.is_empty() {
                return true;
            }
            let response = WatchResponse {
                header: header.clone(),
                events: matching,
            };
            if watch.sender.send(response).is_err() {
                debug!(watch_id = id, "Dropping watch with closed receiver");
                return false;
            }
            true
        });
    }

    fn put(&mut self, header: Header, key: &str, value: &str, lease: Option<LeaseId>) -> Result<Header> {
        let lease = lease.filter(|lease| !lease.is_none());
        if let Some(lease) = lease {
            if !self.leases.contains_key(&lease) {
                return Err(Error::LeaseNotFound(lease));
            }
        }

        self.revision += 1;
        let revision = self.revision;
        let prev_kv = self.kvs.get(key).cloned();
        let kv = KeyValue {
            key: key.to_owned(),
            value: value.to_owned(),
            create_revision: prev_kv.as_ref().map_or(revision, |p| p.create_revision),
            mod_revision: revision,
            version: prev_kv.as_ref().map_or(1, |p| p.version + 1),
            lease,
        };

        if let Some(old) = prev_kv.as_ref().and_then(|p| p.lease) {
            if Some(old) != lease {
                if let Some(entry) = self.leases.get_mut(&old) {
                    entry.keys.remove(key);
                }
            }
        }
        if let Some(lease) = lease {
            if let Some(entry) = self.leases.get_mut(&lease) {
                entry.keys.insert(key.to_owned());
            }
        }
        self.kvs.insert(key.to_owned(), kv.clone());

        let header = Header { revision, ..header };
        self.notify(
            header.clone(),
            &[Event {
                typ: EventType::Put,
                kv,
                prev_kv,
            }],
        );
        Ok(header)
    }

    /// Delete the given keys at a single revision. Nothing changes if none of them exist.
    fn delete_keys(&mut self, header: Header, keys: Vec<String>) -> Header {
        let existing: Vec<KeyValue> = keys
            .iter()
            .filter_map(|key| self.kvs.remove(key))
            .collect();
        if existing.is_empty() {
            return Header {
                revision: self.revision,
                ..header
            };
        }

        self.revision += 1;
        let revision = self.revision;
        let mut events = Vec::with_capacity(existing.len());
        for prev in existing {
            if let Some(lease) = prev.lease {
                if let Some(entry) = self.leases.get_mut(&lease) {
                    entry.keys.remove(&prev.key);
                }
            }
            events.push(Event {
                typ: EventType::Delete,
                kv: KeyValue {
                    key: prev.key.clone(),
                    mod_revision: revision,
                    ..Default::default()
                },
                prev_kv: Some(prev),
            });
        }

        let header = Header { revision, ..header };
        self.notify(header.clone(), &events);
        header
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.kvs
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn revoke(&mut self, lease: LeaseId, header: Header) -> Option<Header> {
        let entry = self.leases.remove(&lease)?;
        Some(self.delete_keys(header, entry.keys.into_iter().collect()))
    }
}

#[tonic::async_trait]
impl StoreGateway for MemoryStore {
    async fn status(&self) -> Result<Header> {
        let state = self.state();
        state.check_open()?;
        Ok(self.header(state.revision))
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<Header> {
        let mut state = self.state();
        state.check_open()?;
        let header = self.header(state.revision);
        let header = state.put(header, key, value, lease)?;
        debug!(key, revision = header.revision, ?lease, "Put key");
        Ok(header)
    }

    async fn get(&self, key: &str) -> Result<(Header, Option<KeyValue>)> {
        let state = self.state();
        state.check_open()?;
        Ok((self.header(state.revision), state.kvs.get(key).cloned()))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<(Header, BTreeMap<String, KeyValue>)> {
        let state = self.state();
        state.check_open()?;
        let kvs = state
            .kvs
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, kv)| (key.clone(), kv.clone()))
            .collect();
        Ok((self.header(state.revision), kvs))
    }

    async fn delete(&self, key: &str) -> Result<Header> {
        let mut state = self.state();
        state.check_open()?;
        let header = self.header(state.revision);
        let header = state.delete_keys(header, vec![key.to_owned()]);
        debug!(key, revision = header.revision, "Deleted key");
        Ok(header)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<Header> {
        let mut state = self.state();
        state.check_open()?;
        let header = self.header(state.revision);
        let keys = state.keys_with_prefix(prefix);
        let header = state.delete_keys(header, keys);
        debug!(prefix, revision = header.revision, "Deleted prefix");
        Ok(header)
    }

    async fn grant_lease(&self, ttl: i64) -> Result<(Header, LeaseId)> {
        if ttl <= 0 {
            return Err(Error::InvalidTtl(ttl));
        }
        let deadline = deadline_after(ttl)?;
        let (header, lease) = {
            let mut state = self.state();
            state.check_open()?;
            let lease = loop {
                let candidate = LeaseId(state.rng.gen_range(1..i64::MAX));
                if !state.leases.contains_key(&candidate) {
                    break candidate;
                }
            };
            state.leases.insert(
                lease,
                Lease {
                    granted_ttl: ttl,
                    deadline,
                    keys: BTreeSet::new(),
                },
            );
            (self.header(state.revision), lease)
        };
        debug!(lease_id=%lease, ttl, "Granted lease");
        self.spawn_reaper(lease, deadline);
        Ok((header, lease))
    }

    async fn keep_alive_stream(
        &self,
        lease: LeaseId,
        cancel: CancellationToken,
    ) -> Result<KeepAliveStream> {
        let ttl = {
            let state = self.state();
            state.check_open()?;
            state
                .leases
                .get(&lease)
                .ok_or(Error::LeaseNotFound(lease))?
                .granted_ttl
        };

        let (sender, receiver) = mpsc::channel(KEEP_ALIVE_BUFFER);
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl_duration(ttl) / 3);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sender.closed() => break,
                    _ = interval.tick() => {
                        let response = match store.renew(lease) {
                            Ok(response) => response,
                            Err(error) => {
                                debug!(lease_id=%lease, %error, "Stopping keep alive");
                                break;
                            }
                        };
                        if let Err(mpsc::error::TrySendError::Closed(_)) = sender.try_send(response) {
                            break;
                        }
                    }
                }
            }
            debug!(lease_id=%lease, "Closing lease keep alive stream");
        });

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<KeepAliveResponse> {
        self.renew(lease)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<Header> {
        let mut state = self.state();
        state.check_open()?;
        let header = self.header(state.revision);
        let header = state
            .revoke(lease, header)
            .ok_or(Error::LeaseNotFound(lease))?;
        debug!(lease_id=%lease, revision = header.revision, "Revoked lease");
        Ok(header)
    }

    async fn lease_time_to_live(&self, lease: LeaseId) -> Result<LeaseInfo> {
        let state = self.state();
        state.check_open()?;
        let header = self.header(state.revision);
        let info = match state.leases.get(&lease) {
            Some(entry) => {
                let remaining = entry.deadline.saturating_duration_since(Instant::now());
                LeaseInfo {
                    header,
                    id: lease,
                    ttl: remaining.as_secs_f64().ceil() as i64,
                    granted_ttl: entry.granted_ttl,
                    keys: entry.keys.iter().cloned().collect(),
                }
            }
            None => LeaseInfo {
                header,
                id: lease,
                ttl: -1,
                granted_ttl: 0,
                keys: Vec::new(),
            },
        };
        Ok(info)
    }

    async fn watch(&self, range: KeyRange, cancel: CancellationToken) -> Result<WatchStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = cancel.child_token();
        let watch_id = {
            let mut state = self.state();
            state.check_open()?;
            state.max_watch_id += 1;
            let watch_id = state.max_watch_id;
            state.watches.insert(
                watch_id,
                Watch {
                    range: range.clone(),
                    sender: sender.clone(),
                    cancel: cancel.clone(),
                },
            );
            watch_id
        };
        debug!(watch_id, %range, "Created watch");

        let store = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                _ = sender.closed() => {},
            }
            store.state().watches.remove(&watch_id);
            debug!(watch_id, "Removed watch");
        });

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn close(&self) -> Result<()> {
        MemoryStore::close(self);
        Ok(())
    }
}
