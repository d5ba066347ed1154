pub mod concurrency;
mod error;
pub mod gateway;
mod memory;
mod req_resp;
mod watcher;

pub use concurrency::{Mutex, Session};
pub use error::{Error, Result};
pub use gateway::{Gateway, KeepAliveStream, StoreGateway, WatchStream};
pub use memory::{MemoryStore, MAX_LEASE_TTL};
pub use req_resp::{
    Event, EventType, Header, KeepAliveResponse, KeyRange, KeyValue, LeaseId, LeaseInfo,
    WatchResponse,
};
pub use watcher::WatchEvent;
