use std::fmt::Display;

/// Identifier of a lease held by the store. Zero means "no lease".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LeaseId(pub i64);

impl LeaseId {
    pub const NONE: LeaseId = LeaseId(0);

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::LowerHex for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<i64> for LeaseId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Metadata attached to every store response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Header {
    pub cluster_id: u64,
    pub member_id: u64,
    /// Store revision at the time the request was applied.
    pub revision: i64,
    pub raft_term: u64,
}

impl Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cluster_id:{} member_id:{} revision:{} raft_term:{}",
            self.cluster_id, self.member_id, self.revision, self.raft_term
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Revision of the write that created the key. Never changes afterwards.
    pub create_revision: i64,
    /// Revision of the last write to the key.
    pub mod_revision: i64,
    /// Number of writes since creation, starting at 1.
    pub version: i64,
    pub lease: Option<LeaseId>,
}

impl KeyValue {
    /// The state of a key that has never been written, or has been deleted.
    pub fn absent(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn exists(&self) -> bool {
        self.version > 0 && self.create_revision > 0 && self.mod_revision > 0
    }
}

/// A single lease renewal acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveResponse {
    pub header: Header,
    pub id: LeaseId,
    /// TTL the lease was renewed to, in seconds.
    pub ttl: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    pub header: Header,
    pub id: LeaseId,
    /// Remaining ttl in seconds, -1 for an expired or unknown lease.
    pub ttl: i64,
    /// The ttl the lease was granted with, in seconds.
    pub granted_ttl: i64,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Put,
    Delete,
}

impl Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Put => write!(f, "PUT"),
            EventType::Delete => write!(f, "DELETE"),
        }
    }
}

/// A raw change event as produced by the store.
///
/// For deletes `kv` is the tombstone: only `key` and `mod_revision` (the revision of the
/// delete) are set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    pub typ: EventType,
    pub kv: KeyValue,
    pub prev_kv: Option<KeyValue>,
}

/// One batch of events applied at a single revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResponse {
    pub header: Header,
    pub events: Vec<Event>,
}

/// The keys a watch is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyRange {
    Key(String),
    Prefix(String),
}

impl KeyRange {
    pub fn contains(&self, key: &str) -> bool {
        match self {
            KeyRange::Key(k) => k == key,
            KeyRange::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

impl Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyRange::Key(key) => write!(f, "{}", key),
            KeyRange::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}
