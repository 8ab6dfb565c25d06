//! Store and cache behaviour against a real Redis.
//!
//! - Marked `#[ignore]`; run with `cargo test -- --ignored` after exporting
//!   `MOTORWAY_TEST_REDIS_URL` (for example `redis://127.0.0.1:6379/15`).
//! - Every test flushes the selected database, so point it at a scratch one.

use std::{sync::Arc, time::Duration};

use motorway::cache::{DistributedLock, EntityCache, EntityFields};
use motorway::catalog::{CatalogDocument, InMemoryCatalog};
use motorway::search::{SearchConfig, SearchIndex, SearchOutcome, SearchSource};
use motorway::store::{KvStore, RedisStore, WriteBatch};
use serde_json::json;
use serial_test::serial;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

async fn connect() -> TestResult<Arc<RedisStore>> {
    let url = std::env::var("MOTORWAY_TEST_REDIS_URL")?;
    let store = RedisStore::connect(&url, 4, Duration::from_secs(2)).await?;
    store.flush_db().await?;
    Ok(Arc::new(store))
}

#[tokio::test]
#[ignore]
#[serial]
async fn live_lock_is_exclusive_and_expires() -> TestResult<()> {
    let store = connect().await?;
    let first = DistributedLock::new(store.clone());
    let second = DistributedLock::new(store.clone());

    let key = "cache:v2:cars:/api/cars:";
    let expired = first
        .try_acquire(key, Duration::from_secs(1))
        .await?
        .ok_or("first acquire should win")?;
    assert!(second.try_acquire(key, Duration::from_secs(1)).await?.is_none());

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let current = second
        .try_acquire(key, Duration::from_secs(5))
        .await?
        .ok_or("expired lock should be free")?;

    // The expired holder's release must not drop the new holder's lock.
    first.release(&expired).await;
    assert!(first.try_acquire(key, Duration::from_secs(1)).await?.is_none());

    second.release(&current).await;
    assert!(first.try_acquire(key, Duration::from_secs(1)).await?.is_some());
    Ok(())
}

#[tokio::test]
#[ignore]
#[serial]
async fn live_batch_and_scan() -> TestResult<()> {
    let store = connect().await?;
    let mut batch = WriteBatch::new();
    batch
        .set_ex("search:data:m-1", b"{}".to_vec(), Duration::from_secs(60))
        .zadd("search:term:cr", "m-1", 0.0)
        .expire("search:term:cr", Duration::from_secs(60));
    store.execute_batch(batch).await?;

    let keys = store.scan_match("search:*", None).await?;
    assert_eq!(keys.len(), 2);
    assert_eq!(store.zrange_all("search:term:cr").await?, vec!["m-1".to_string()]);
    assert!(store.ttl("search:term:cr").await?.is_some());

    let stats = store.stats().await?;
    assert_eq!(stats.keys, 2);
    Ok(())
}

#[tokio::test]
#[ignore]
#[serial]
async fn live_entity_round_trip() -> TestResult<()> {
    let store = connect().await?;
    let entities = EntityCache::new(store);
    let fields = EntityFields {
        id: "m-1".to_string(),
        name: "Creta".to_string(),
        brand: "Hyundai".to_string(),
        price: Some(1_100_000.0),
        rating: Some(4.5),
        ..Default::default()
    };

    entities
        .cache_entity("m-1", &fields, Duration::from_secs(60))
        .await;
    assert_eq!(entities.get_entity("m-1").await, Some(fields));
    assert_eq!(entities.get_entity("m-2").await, None);
    Ok(())
}

#[tokio::test]
#[ignore]
#[serial]
async fn live_search_shared_between_processes() -> TestResult<()> {
    let store = connect().await?;
    let document: CatalogDocument = serde_json::from_value(json!({
        "brands": [{ "id": "b-1", "name": "Hyundai" }],
        "models": [{ "id": "m-1", "name": "Creta", "brandId": "b-1" }]
    }))?;
    let catalog = Arc::new(InMemoryCatalog::new(document));

    SearchIndex::new(SearchConfig::default(), store.clone(), catalog.clone())
        .build()
        .await?;

    let cold = SearchIndex::new(SearchConfig::default(), store, catalog);
    match cold.query("cre", 10).await {
        SearchOutcome::Hits(results) => {
            assert_eq!(results.source, SearchSource::Redis);
            assert_eq!(results.results[0].slug, "hyundai-creta");
        }
        SearchOutcome::Unavailable => panic!("shared index should answer"),
    }
    Ok(())
}
