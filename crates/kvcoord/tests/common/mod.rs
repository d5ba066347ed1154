use std::sync::Arc;

use kvcoord::{Client, MemoryStore};

/// A client over a fresh in-memory store, with the store kept for inspection.
#[allow(dead_code)]
pub fn client() -> (Client, MemoryStore) {
    let store = MemoryStore::default();
    (Client::new(Arc::new(store.clone())), store)
}
