// Connection cache behavior: reuse, exclusive construction and invalidation.

mod common;

use common::{CountingFactory, seeded_configs};
use std::sync::Arc;
use stowage_core::{ConnectionParams, StorageId};
use stowage_metadata::StorageConfigRepo;
use stowage_storage::{ConnectionCache, StorageError};
use tokio::time::Duration;

async fn cache_with(factory: Arc<CountingFactory>) -> ConnectionCache {
    let configs = seeded_configs().await;
    ConnectionCache::new(configs, factory)
}

#[tokio::test]
async fn test_get_reuses_handle() {
    let factory = CountingFactory::new();
    let cache = cache_with(factory.clone()).await;

    let first = cache.get(StorageId(1)).await.unwrap();
    let second = cache.get(StorageId(1)).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.connects(), 1);
    assert_eq!(first.key(), "config_1");
    assert_eq!(first.region(), "hel1");
}

#[tokio::test]
async fn test_concurrent_first_callers_build_once() {
    let factory = CountingFactory::with_delay(Duration::from_millis(20));
    let cache = Arc::new(cache_with(factory.clone()).await);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(
            async move { cache.get(StorageId(1)).await.unwrap() },
        ));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert_eq!(factory.connects(), 1);
    assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn test_invalidate_then_get_builds_new_handle() {
    let factory = CountingFactory::new();
    let cache = cache_with(factory.clone()).await;

    let old = cache.get(StorageId(1)).await.unwrap();
    assert!(cache.invalidate(StorageId(1)).await);
    assert!(old.is_closed());

    let new = cache.get(StorageId(1)).await.unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert!(!new.is_closed());
    assert_eq!(factory.connects(), 2);
}

#[tokio::test]
async fn test_invalidate_missing_entry_is_noop() {
    let cache = cache_with(CountingFactory::new()).await;
    assert!(!cache.invalidate(StorageId(99)).await);
}

#[tokio::test]
async fn test_missing_and_inactive_configs_are_rejected_before_construction() {
    let factory = CountingFactory::new();
    let cache = cache_with(factory.clone()).await;

    let err = cache.get(StorageId(99)).await.unwrap_err();
    assert!(matches!(err, StorageError::Config(ref msg) if msg.contains("not found")));

    let err = cache.get(StorageId(2)).await.unwrap_err();
    assert!(matches!(err, StorageError::Config(ref msg) if msg.contains("inactive")));

    assert_eq!(factory.connects(), 0);
    assert_eq!(cache.stats().await.cached_clients, 0);
}

#[tokio::test]
async fn test_params_path_is_keyed_by_fingerprint() {
    let factory = CountingFactory::new();
    let cache = cache_with(factory.clone()).await;

    let params = ConnectionParams::new(Some("http://minio:9000".to_string()))
        .with_credentials("ak", "sk");
    let a = cache.get_for_params(&params).await.unwrap();
    let b = cache.get_for_params(&params.clone()).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let rotated = params.clone().with_credentials("ak", "other-secret");
    let c = cache.get_for_params(&rotated).await.unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(factory.connects(), 2);

    // Parameter handles never collide with id handles.
    let by_id = cache.get(StorageId(1)).await.unwrap();
    assert!(!Arc::ptr_eq(&a, &by_id));
}

#[tokio::test]
async fn test_params_path_rejects_partial_credentials() {
    let cache = cache_with(CountingFactory::new()).await;
    let mut params = ConnectionParams::default();
    params.access_key = Some("ak".to_string());
    let err = cache.get_for_params(&params).await.unwrap_err();
    assert!(matches!(err, StorageError::Config(_)));
}

#[tokio::test]
async fn test_stats_and_clear() {
    let cache = cache_with(CountingFactory::new()).await;
    let params = ConnectionParams::new(Some("http://minio:9000".to_string()));
    let by_params = cache.get_for_params(&params).await.unwrap();
    let by_id = cache.get(StorageId(1)).await.unwrap();

    let stats = cache.stats().await;
    assert_eq!(stats.cached_clients, 2);
    let mut expected = vec!["config_1".to_string(), by_params.key().to_string()];
    expected.sort();
    assert_eq!(stats.cache_keys, expected);

    assert_eq!(cache.clear().await, 2);
    assert!(by_id.is_closed());
    assert!(by_params.is_closed());
    assert_eq!(cache.stats().await.cached_clients, 0);
}

#[tokio::test]
async fn test_config_update_then_invalidate_uses_new_params() {
    let configs = seeded_configs().await;
    let cache = ConnectionCache::new(configs.clone(), CountingFactory::new());

    let old = cache.get(StorageId(1)).await.unwrap();
    assert_eq!(old.region(), "hel1");

    let mut record = configs.get_storage_config(StorageId(1)).await.unwrap().unwrap();
    record.params = ConnectionParams::new(Some("http://minio:9000".to_string()))
        .with_region("eu-west-1");
    configs.upsert_storage_config(record).await.unwrap();
    cache.invalidate(StorageId(1)).await;

    let new = cache.get(StorageId(1)).await.unwrap();
    assert_eq!(new.region(), "eu-west-1");
}

#[tokio::test]
async fn test_handle_test_connection_reports_bucket_count() {
    let cache = cache_with(CountingFactory::new()).await;
    let handle = cache.get(StorageId(1)).await.unwrap();
    handle.create_bucket("a").await.unwrap();
    assert_eq!(handle.test_connection().await, Ok(1));
}
