use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kvcoord::{Client, MemoryStore, Options, Scenario};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(!options.no_colour))
        .with(if let Some(log_filter) = &options.log_filter {
            EnvFilter::new(log_filter)
        } else {
            EnvFilter::from_default_env()
        })
        .init();

    let store = MemoryStore::new(options.cluster_id, options.member_id);
    let client = Client::new(Arc::new(store));

    let header = client
        .check_connection(options.dial_timeout())
        .await
        .context("store failed the connection check")?;
    info!(%header, "Connected");

    match options.scenario {
        Scenario::Lease { key, ttl } => lease(&client, &key, ttl).await?,
        Scenario::Lock { key, ttl, hold_ms } => {
            lock(&client, &key, ttl, Duration::from_millis(hold_ms)).await?
        }
        Scenario::Watch { prefix, keys } => watch(&client, &prefix, keys).await?,
    }

    client.close().await?;
    Ok(())
}

async fn lease(client: &Client, key: &str, ttl: i64) -> anyhow::Result<()> {
    let ttl_duration = Duration::from_secs(ttl.max(0) as u64);

    let lease = client.lease_grant(ttl, &[]).await?;
    client.put_with_lease(key, "1", lease).await?;
    let exists = client.exists(key).await;
    info!(key, lease_id=%lease, exists, "Attached lease without keep alive");
    sleep(ttl_duration * 5 / 2).await;
    let exists = client.exists(key).await;
    info!(key, exists, "Waited past the ttl");

    let lease = client.lease_grant(ttl, &[]).await?;
    client.put_with_lease(key, "1", lease).await?;
    let cancel = CancellationToken::new();
    client.lease_keep_alive(cancel.clone(), lease).await?;
    sleep(ttl_duration * 5 / 2).await;
    let info = client.lease_info(lease).await?;
    let exists = client.exists(key).await;
    info!(key, exists, remaining_ttl = info.ttl, keys = ?info.keys, "Kept lease alive past the ttl");

    cancel.cancel();
    sleep(ttl_duration + Duration::from_millis(100)).await;
    let exists = client.exists(key).await;
    info!(key, exists, "Cancelled keep alive");
    Ok(())
}

async fn lock(client: &Client, key: &str, ttl: i64, hold: Duration) -> anyhow::Result<()> {
    let mut first = client.lock(key, ttl).await?;
    info!(key, state=%first.state(), "First contender locked");

    let releaser = tokio::spawn(async move {
        sleep(hold).await;
        first.unlock().await;
        info!(state=%first.state(), "First contender unlocked");
    });

    let mut second = client.lock(key, ttl).await?;
    info!(key, state=%second.state(), "Second contender locked");
    releaser.await?;

    second.unlock().await;
    // a second unlock does nothing
    second.unlock().await;
    info!(key, state=%second.state(), "Second contender unlocked");
    Ok(())
}

async fn watch(client: &Client, prefix: &str, keys: u32) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let handle = client
        .watch_prefix(cancel.clone(), prefix, |event| {
            info!(
                key = event.key(),
                typ = %event.typ,
                value = %event.kv.value,
                create = event.is_create(),
                modify = event.is_modify(),
                delete = event.is_delete(),
                revision = event.header.revision,
                "Watch event"
            );
        })
        .await?;

    for i in 0..keys {
        let key = format!("{}{}", prefix, i);
        client.put(&key, "created").await?;
        client.put(&key, "modified").await?;
    }
    client.delete_prefix(prefix).await?;

    sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    handle.await?;
    Ok(())
}
