mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::client;
use kvcoord::{Error, LockState};
use pretty_assertions::assert_eq;
use test_log::test;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

#[test(tokio::test(start_paused = true))]
async fn second_locker_waits_for_unlock() {
    let (client, _) = client();
    let result = Arc::new(AtomicUsize::new(0));

    let mut unlock1 = client.lock("/lock/1", 1).await.unwrap();
    assert_eq!(unlock1.state(), LockState::Held);

    let released = result.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(3000)).await;
        released.fetch_add(1, Ordering::SeqCst);
        unlock1.unlock().await;
    });
    result.fetch_add(1, Ordering::SeqCst);

    let start = Instant::now();
    let mut unlock2 = client.lock("/lock/1", 3).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(3000));
    assert_eq!(result.load(Ordering::SeqCst), 2);

    unlock2.unlock().await;
    assert_eq!(unlock2.state(), LockState::Released);
}

#[test(tokio::test(start_paused = true))]
async fn holders_never_overlap() {
    let (client, _) = client();
    let holders = Arc::new(AtomicUsize::new(0));
    let acquisitions = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let client = client.clone();
        let holders = holders.clone();
        let acquisitions = acquisitions.clone();
        handles.push(tokio::spawn(async move {
            let mut unlock = client.lock("/lock/shared", 5).await.unwrap();
            assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
            acquisitions.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(50)).await;
            assert_eq!(holders.fetch_sub(1, Ordering::SeqCst), 1);
            unlock.unlock().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(acquisitions.load(Ordering::SeqCst), 5);
}

#[test(tokio::test)]
async fn unlock_twice_is_harmless() {
    let (client, _) = client();
    let mut unlock = client.lock("/lock/twice", 5).await.unwrap();
    let key = unlock.key().unwrap().to_owned();
    assert!(client.exists(&key).await);

    unlock.unlock().await;
    assert!(!client.exists(&key).await);
    unlock.unlock().await;
    assert_eq!(unlock.state(), LockState::Released);
    assert_eq!(unlock.key(), None);

    // the lock is free again
    let mut again = client.lock("/lock/twice", 5).await.unwrap();
    again.unlock().await;
}

#[test(tokio::test(start_paused = true))]
async fn abandoned_lock_frees_after_ttl() {
    let (client, _) = client();
    let unlock = client.lock("/lock/abandoned", 1).await.unwrap();
    // dropping stops the session keep alive without deleting the key
    drop(unlock);

    let start = Instant::now();
    let mut unlock = client.lock("/lock/abandoned", 1).await.unwrap();
    assert!(start.elapsed() <= Duration::from_millis(1100));
    unlock.unlock().await;
}

#[test(tokio::test(start_paused = true))]
async fn cancelled_lock_returns_usable_unlock() {
    let (client, _) = client();
    let mut holder = client.lock("/lock/c", 5).await.unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });
    let error = client
        .locks()
        .lock_with_cancel("/lock/c", 5, &cancel)
        .await
        .unwrap_err();
    assert_eq!(error.key, "/lock/c");
    let (error, mut unlock) = error.into_parts();
    assert!(matches!(error, Error::Cancelled));
    assert_eq!(unlock.state(), LockState::Failed);
    unlock.unlock().await;
    unlock.unlock().await;
    assert_eq!(unlock.state(), LockState::Failed);

    // only the holder is queued
    let (_, queue) = client.get_prefix("/lock/c/").await.unwrap();
    assert_eq!(queue.len(), 1);
    holder.unlock().await;
}

#[test(tokio::test)]
async fn failed_session_is_reported() {
    let (client, store) = client();
    let error = client.lock("/lock/bad", 0).await.unwrap_err();
    assert!(matches!(error.source, Error::InvalidTtl(0)));
    assert_eq!(error.unlock.lease(), None);

    let error = client.lock("/lock/bad", i64::MAX).await.unwrap_err();
    assert!(matches!(error.source, Error::TtlTooLarge(i64::MAX)));

    store.close();
    let (error, mut unlock) = client.lock("/lock/closed", 5).await.unwrap_err().into_parts();
    assert!(matches!(error, Error::Unavailable(_)));
    unlock.unlock().await;
    assert_eq!(unlock.state(), LockState::Failed);
}

#[test(tokio::test(start_paused = true))]
async fn failed_lock_session_stops_on_unlock() {
    let (client, _) = client();
    let mut holder = client.lock("/lock/f", 1).await.unwrap();
    let holder_key = holder.key().unwrap().to_owned();

    let contender = client.clone();
    let waiter = tokio::spawn(async move { contender.lock("/lock/f", 1).await });
    sleep(Duration::from_millis(100)).await;

    // drop the waiter's queue key out from under it
    let (_, queue) = client.get_prefix("/lock/f/").await.unwrap();
    let waiter_key = queue
        .keys()
        .find(|key| **key != holder_key)
        .unwrap()
        .clone();
    client.delete(&waiter_key).await.unwrap();
    holder.unlock().await;

    let (error, mut unlock) = waiter.await.unwrap().unwrap_err().into_parts();
    assert!(matches!(error, Error::SessionExpired(_)));
    assert_eq!(unlock.state(), LockState::Failed);
    let lease = unlock.lease().unwrap();

    // the session outlives the failed attempt until it is unlocked
    sleep(Duration::from_millis(2500)).await;
    assert!(client.lease_info(lease).await.unwrap().ttl > 0);

    unlock.unlock().await;
    sleep(Duration::from_millis(1100)).await;
    assert_eq!(client.lease_info(lease).await.unwrap().ttl, -1);
}
