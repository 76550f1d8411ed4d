//! End-to-end cache facade behaviour over the in-memory backend.

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tollgate_cache::{CacheResult, DistributedCache, KvStore, MemoryStore};
use tollgate_core::CacheConfig;

fn cache() -> (Arc<MemoryStore>, DistributedCache) {
    let store = Arc::new(MemoryStore::new());
    let cache = DistributedCache::from_backend(
        store.clone(),
        CacheConfig::default().with_value_timeout(Duration::from_secs(5)),
    );
    (store, cache)
}

#[tokio::test]
async fn test_put_with_ttl_expires() -> CacheResult<()> {
    let (_, cache) = cache();
    cache
        .put("k", "hello", Some(Duration::from_millis(1000)))
        .await?;
    assert_eq!(cache.get::<String>("k").await?.as_deref(), Some("hello"));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(cache.get::<String>("k").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_put_if_all_absent_never_claims_partially() -> CacheResult<()> {
    let (store, cache) = cache();
    cache.put("a", "taken", None).await?;

    assert!(!cache.put_if_all_absent(&["a", "b"]).await?);
    assert!(!store.exists("b").await?);
    assert_eq!(cache.get::<String>("a").await?.as_deref(), Some("taken"));

    assert!(cache.put_if_all_absent(&["c", "d"]).await?);
    assert_eq!(cache.count_existing_keys(&["c", "d"]).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_put_if_all_absent_single_winner_under_contention() -> CacheResult<()> {
    let (_, cache) = cache();
    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.put_if_all_absent(&["x", "y", "z"]).await
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.map_err(|e| tollgate_core::CacheError::Backend {
            reason: e.to_string(),
        })?? {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u64,
    name: String,
    tags: Vec<String>,
}

/// Non-blank JSON documents: objects and arrays over scalar leaves.
fn arb_json_document() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z0-9 ]{0,12}".prop_map(Value::String),
    ];
    let nested = leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    });
    prop_oneof![
        prop::collection::vec(nested.clone(), 1..4).prop_map(Value::Array),
        prop::collection::btree_map("[a-z]{1,6}", nested, 1..4)
            .prop_map(|m| Value::Object(m.into_iter().collect())),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("test runtime should build")
}

proptest! {
    #[test]
    fn test_put_then_get_returns_the_same_string(value in "[^\\s].{0,40}") {
        let rt = runtime();
        let (_, cache) = cache();
        let read: Option<String> = rt.block_on(async {
            cache.put("s", value.as_str(), None).await?;
            cache.get("s").await
        }).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(read, Some(value));
    }

    #[test]
    fn test_put_then_get_returns_the_same_struct(
        id in any::<u64>(),
        name in "[a-z]{1,12}",
        tags in prop::collection::vec("[a-z]{1,5}", 0..4),
    ) {
        let rt = runtime();
        let (_, cache) = cache();
        let profile = Profile { id, name, tags };
        let read: Option<Profile> = rt.block_on(async {
            cache.put("p", &profile, None).await?;
            cache.get("p").await
        }).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(read, Some(profile));
    }

    #[test]
    fn test_put_then_get_returns_the_same_json(document in arb_json_document()) {
        let rt = runtime();
        let (_, cache) = cache();
        let read: Option<Value> = rt.block_on(async {
            cache.put("j", &document, None).await?;
            cache.get("j").await
        }).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(read, Some(document));
    }

    #[test]
    fn test_put_then_get_returns_the_same_option(value in prop::option::of(any::<u32>())) {
        let rt = runtime();
        let (_, cache) = cache();
        let read: Option<Option<u32>> = rt.block_on(async {
            cache.put("o", &value, None).await?;
            cache.get("o").await
        }).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(read, Some(value));
    }
}
