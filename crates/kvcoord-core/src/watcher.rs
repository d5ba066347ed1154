use crate::req_resp::{Event, EventType, Header, KeyValue};

/// A change observed on a watched key, with the header of the batch it arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchEvent {
    pub typ: EventType,
    pub kv: KeyValue,
    pub prev_kv: Option<KeyValue>,
    pub header: Header,
}

impl WatchEvent {
    pub fn new(header: Header, event: Event) -> Self {
        let Event { typ, kv, prev_kv } = event;
        Self {
            typ,
            kv,
            prev_kv,
            header,
        }
    }

    pub fn key(&self) -> &str {
        &self.kv.key
    }

    /// The first write of the key in its current lineage.
    pub fn is_create(&self) -> bool {
        self.typ == EventType::Put && self.kv.create_revision == self.kv.mod_revision
    }

    /// A write to a key that already existed.
    pub fn is_modify(&self) -> bool {
        self.typ == EventType::Put && self.kv.create_revision != self.kv.mod_revision
    }

    pub fn is_delete(&self) -> bool {
        self.typ == EventType::Delete
    }
}
