use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::future::join_all;
use notification_relay::clients::IdempotencyStore;
use notification_relay::clients::memory::InMemoryIdempotencyStore;
use notification_relay::models::status::{IdempotencyRecord, IdempotencyStatus};

const TTL: Duration = Duration::from_secs(3600);

fn pending(correlation_id: &str) -> IdempotencyRecord {
    IdempotencyRecord::pending(correlation_id.to_string())
}

/// Test: the first claim on a key wins, repeat claims lose until the key is
/// released, after which it can be claimed again.
#[tokio::test]
async fn test_claim_is_exclusive_until_release() -> Result<()> {
    let store = InMemoryIdempotencyStore::new();

    assert!(
        store.claim("key-1", &pending("corr-a"), TTL).await?,
        "First claim should win"
    );
    assert!(
        !store.claim("key-1", &pending("corr-b"), TTL).await?,
        "Second claim on a held key should lose"
    );

    store.release("key-1").await?;

    assert!(
        store.claim("key-1", &pending("corr-c"), TTL).await?,
        "Released key should be claimable again"
    );

    Ok(())
}

/// Test: a losing claim never overwrites the winner's record.
#[tokio::test]
async fn test_losing_claim_does_not_overwrite_record() -> Result<()> {
    let store = InMemoryIdempotencyStore::new();

    store.claim("key-1", &pending("corr-winner"), TTL).await?;
    store.claim("key-1", &pending("corr-loser"), TTL).await?;

    let record = store.get("key-1").await?.expect("Record should exist");
    assert_eq!(record.correlation_id, "corr-winner");

    Ok(())
}

/// Test: concurrent claims on one key admit exactly one winner.
#[tokio::test]
async fn test_concurrent_claims_admit_exactly_one() -> Result<()> {
    let store = Arc::new(InMemoryIdempotencyStore::new());

    let claims = (0..20).map(|i| {
        let store = store.clone();
        async move {
            store
                .claim("key-1", &pending(&format!("corr-{i}")), TTL)
                .await
        }
    });
    let results = join_all(claims).await;

    let winners = results
        .into_iter()
        .collect::<Result<Vec<bool>>>()?
        .into_iter()
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1, "Exactly one concurrent claim should win");

    Ok(())
}

/// Test: completing a record flips its status and preserves the correlation
/// id for later duplicate lookups.
#[tokio::test]
async fn test_mark_completed_preserves_record() -> Result<()> {
    let store = InMemoryIdempotencyStore::new();

    store.claim("key-1", &pending("corr-a"), TTL).await?;
    store.mark_completed("key-1").await?;

    let record = store
        .get("key-1")
        .await?
        .expect("Record should survive completion");
    assert_eq!(record.status, IdempotencyStatus::Completed);
    assert_eq!(record.correlation_id, "corr-a");

    Ok(())
}

/// Test: a claim vanishes when its TTL elapses and the key is claimable
/// again afterwards.
#[tokio::test]
async fn test_expired_claim_can_be_retaken() -> Result<()> {
    let store = InMemoryIdempotencyStore::new();
    let short_ttl = Duration::from_millis(50);

    store.claim("key-1", &pending("corr-a"), short_ttl).await?;
    assert!(store.get("key-1").await?.is_some());

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(
        store.get("key-1").await?.is_none(),
        "Expired record should be gone"
    );
    assert!(
        store.claim("key-1", &pending("corr-b"), short_ttl).await?,
        "Expired key should be claimable again"
    );

    Ok(())
}

/// Test: completing an already expired key is a no-op rather than an error
/// and does not resurrect the record. A resurrected record would answer
/// Duplicate forever and never leave the store.
#[tokio::test]
async fn test_mark_completed_after_expiry_is_noop() -> Result<()> {
    let store = InMemoryIdempotencyStore::new();

    store
        .claim("key-1", &pending("corr-a"), Duration::from_millis(50))
        .await?;
    tokio::time::sleep(Duration::from_millis(80)).await;

    store.mark_completed("key-1").await?;
    assert!(
        store.get("key-1").await?.is_none(),
        "Completion must not resurrect an expired record"
    );
    assert!(
        store.claim("key-1", &pending("corr-b"), TTL).await?,
        "The key should be claimable again once the window has closed"
    );

    Ok(())
}

/// Test: releasing a key that was never claimed succeeds quietly.
#[tokio::test]
async fn test_release_unknown_key_is_noop() -> Result<()> {
    let store = InMemoryIdempotencyStore::new();
    store.release("never-claimed").await?;
    Ok(())
}
