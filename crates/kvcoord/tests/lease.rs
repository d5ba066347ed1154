mod common;

use std::time::Duration;

use common::client;
use kvcoord::{Error, LeaseId};
use pretty_assertions::assert_eq;
use test_log::test;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[test(tokio::test(start_paused = true))]
async fn lease_expires_without_keep_alive() {
    let (client, _) = client();
    client.put_json("/test/lease3", &[3]).await.unwrap();

    let lease = client.lease_grant(1, &["/test/lease3"]).await.unwrap();
    client.put_with_lease("/test/lease1", "1", lease).await.unwrap();
    client
        .put_json_with_lease("/test/lease2", &[2], lease)
        .await
        .unwrap();

    let info = client.lease_info(lease).await.unwrap();
    assert_eq!(info.granted_ttl, 1);
    assert_eq!(
        info.keys,
        vec!["/test/lease1", "/test/lease2", "/test/lease3"]
    );

    assert!(client.exists("/test/lease1").await);
    assert!(client.exists("/test/lease2").await);
    assert!(client.exists("/test/lease3").await);
    sleep(Duration::from_millis(2500)).await;
    assert!(!client.exists("/test/lease1").await);
    assert!(!client.exists("/test/lease2").await);
    assert!(!client.exists("/test/lease3").await);
}

#[test(tokio::test(start_paused = true))]
async fn keep_alive_until_cancelled() {
    let (client, _) = client();
    let lease = client.lease_grant(1, &[]).await.unwrap();
    client.put_with_lease("/t/a", "1", lease).await.unwrap();

    let cancel = CancellationToken::new();
    client.lease_keep_alive(cancel.clone(), lease).await.unwrap();
    sleep(Duration::from_millis(2500)).await;
    assert!(client.exists("/t/a").await);

    cancel.cancel();
    sleep(Duration::from_millis(1100)).await;
    assert!(!client.exists("/t/a").await);
}

#[test(tokio::test(start_paused = true))]
async fn revoke_while_kept_alive() {
    let (client, _) = client();
    let lease = client.lease_grant(1, &[]).await.unwrap();
    client.put_with_lease("/test/lease4", "1", lease).await.unwrap();
    let cancel = CancellationToken::new();
    client.lease_keep_alive(cancel.clone(), lease).await.unwrap();
    sleep(Duration::from_millis(2500)).await;
    assert!(client.exists("/test/lease4").await);

    client.lease_revoke(lease).await.unwrap();
    assert!(!client.exists("/test/lease4").await);
    cancel.cancel();

    // revoking twice is an error
    assert!(matches!(
        client.lease_revoke(lease).await.unwrap_err(),
        Error::LeaseNotFound(id) if id == lease
    ));
}

#[test(tokio::test(start_paused = true))]
async fn keep_alive_once_extends_lease() {
    let (client, _) = client();
    let lease = client.lease_grant(1, &[]).await.unwrap();
    client.put_with_lease("/test/lease5", "1", lease).await.unwrap();
    for _ in 0..3 {
        sleep(Duration::from_millis(900)).await;
        let ack = client.lease_keep_alive_once(lease).await.unwrap();
        assert_eq!(ack.id, lease);
        assert_eq!(ack.ttl, 1);
    }
    assert!(client.exists("/test/lease5").await);

    sleep(Duration::from_millis(2500)).await;
    assert!(!client.exists("/test/lease5").await);
    assert!(matches!(
        client.lease_keep_alive_once(lease).await.unwrap_err(),
        Error::LeaseNotFound(_)
    ));
}

#[test(tokio::test)]
async fn grant_skips_missing_keys() {
    let (client, _) = client();
    client.put("/present", "kept value").await.unwrap();

    let lease = client
        .lease_grant(30, &["/missing", "/present"])
        .await
        .unwrap();
    let info = client.lease_info(lease).await.unwrap();
    assert_eq!(info.keys, vec!["/present"]);

    let (_, kv) = client.get("/present").await.unwrap();
    assert_eq!(kv.value, "kept value");
    assert_eq!(kv.lease, Some(lease));
    assert!(!client.exists("/missing").await);
}

#[test(tokio::test)]
async fn grant_rejects_bad_ttl() {
    let (client, _) = client();
    assert!(matches!(
        client.lease_grant(0, &[]).await.unwrap_err(),
        Error::InvalidTtl(0)
    ));
    assert!(matches!(
        client.lease_grant(-5, &[]).await.unwrap_err(),
        Error::InvalidTtl(-5)
    ));
    assert!(matches!(
        client.lease_grant(i64::MAX, &[]).await.unwrap_err(),
        Error::TtlTooLarge(i64::MAX)
    ));
}

#[test(tokio::test)]
async fn keep_alive_unknown_lease() {
    let (client, _) = client();
    let error = client
        .lease_keep_alive(CancellationToken::new(), LeaseId(99))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::LeaseNotFound(LeaseId(99))));

    let info = client.lease_info(LeaseId(99)).await.unwrap();
    assert_eq!(info.ttl, -1);
    assert!(info.keys.is_empty());
}

#[test(tokio::test(start_paused = true))]
async fn keep_alive_stops_when_store_closes() {
    let (client, store) = client();
    let lease = client.lease_grant(5, &[]).await.unwrap();
    client
        .lease_keep_alive(CancellationToken::new(), lease)
        .await
        .unwrap();
    store.close();
    sleep(Duration::from_secs(10)).await;
    assert!(matches!(
        client.lease_info(lease).await.unwrap_err(),
        Error::Unavailable(_)
    ));
}
