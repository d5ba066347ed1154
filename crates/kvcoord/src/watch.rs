use futures::StreamExt;
use kvcoord_core::{Gateway, KeyRange, Result, StoreGateway, WatchEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Turns store change batches into [`WatchEvent`]s for a handler.
#[derive(Clone)]
pub struct WatchTranslator {
    gateway: Gateway,
}

impl WatchTranslator {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Call `handler` for every change to `key` until `cancel` fires.
    pub async fn watch<F>(
        &self,
        cancel: CancellationToken,
        key: &str,
        handler: F,
    ) -> Result<JoinHandle<()>>
    where
        F: FnMut(WatchEvent) + Send + 'static,
    {
        self.subscribe(KeyRange::Key(key.to_owned()), cancel, handler)
            .await
    }

    /// Call `handler` for every change to a key starting with `prefix` until `cancel` fires.
    pub async fn watch_prefix<F>(
        &self,
        cancel: CancellationToken,
        prefix: &str,
        handler: F,
    ) -> Result<JoinHandle<()>>
    where
        F: FnMut(WatchEvent) + Send + 'static,
    {
        self.subscribe(KeyRange::Prefix(prefix.to_owned()), cancel, handler)
            .await
    }

    /// Spawn the dispatch loop for one subscription.
    ///
    /// Events are handed to the handler one at a time in the order the store sent them, so a
    /// slow handler holds back later events of this subscription only. The loop ends with the
    /// stream and does not resubscribe.
    async fn subscribe<F>(
        &self,
        range: KeyRange,
        cancel: CancellationToken,
        mut handler: F,
    ) -> Result<JoinHandle<()>>
    where
        F: FnMut(WatchEvent) + Send + 'static,
    {
        let mut stream = self
            .gateway
            .watch(range.clone(), cancel)
            .await
            .map_err(|error| {
                warn!(%range, %error, "Failed to create watch");
                error
            })?;
        debug!(%range, "Created watch");

        Ok(tokio::spawn(async move {
            while let Some(response) = stream.next().await {
                for event in response.events {
                    let event = WatchEvent::new(response.header.clone(), event);
                    debug!(%range, typ=%event.typ, key=event.key(), revision=event.kv.mod_revision, "Dispatching watch event");
                    handler(event);
                }
            }
            debug!(%range, "Watch stream closed");
        }))
    }
}
