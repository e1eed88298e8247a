// Pagination through the listing extension trait.

use futures::{StreamExt, TryStreamExt};
use stowage_storage::{ListingPage, MemoryObjectClient, ObjectClientListExt};

#[tokio::test]
async fn test_each_key_appears_once_across_pages() {
    let client = MemoryObjectClient::new();
    client.seed("bucket", "data/", 2500, 4).await;

    let pages: Vec<ListingPage> = client
        .list_pages("bucket", None, 1000)
        .try_collect()
        .await
        .unwrap();

    let mut keys: Vec<String> = pages
        .iter()
        .flat_map(|p| p.entries.iter().map(|e| e.key.clone()))
        .collect();
    assert_eq!(pages.len(), 3);
    assert_eq!(keys.len(), 2500);
    keys.dedup();
    assert_eq!(keys.len(), 2500);
    assert!(pages.last().unwrap().next_token.is_none());
}

#[tokio::test]
async fn test_stream_drop_stops_pagination() {
    let client = MemoryObjectClient::new();
    client.seed("bucket", "", 1000, 0).await;

    let mut stream = client.list_pages("bucket", None, 100);
    for _ in 0..2 {
        stream.next().await.unwrap().unwrap();
    }
    drop(stream);

    assert_eq!(client.list_calls(), 2);
}

#[tokio::test]
async fn test_missing_bucket_surfaces_error() {
    let client = MemoryObjectClient::new();
    let mut stream = client.list_pages("absent", None, 100);
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, stowage_storage::StorageError::NotFound(_)));
}

#[tokio::test]
async fn test_empty_prefix_listing_yields_one_empty_page() {
    let client = MemoryObjectClient::new();
    client.seed("bucket", "a/", 3, 0).await;

    let pages: Vec<ListingPage> = client
        .list_pages("bucket", Some("b/"), 100)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(pages.len(), 1);
    assert!(pages[0].entries.is_empty());
    assert!(!pages[0].is_truncated);
}
