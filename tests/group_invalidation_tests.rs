//! Integration tests for group-tagged memoization
//!
//! These tests verify:
//! - Cache hits do not recompute
//! - Group isolation and multi-group staleness
//! - Missing markers behave like invalidation
//! - Backend failure policies
//! - Malformed envelope recovery
//! - Concurrent callers

use async_trait::async_trait;
use potatocache::{
    BackendErrorPolicy, CacheBackend, CacheConfig, CacheError, CacheKey, CacheValue, CallError,
    GroupName, Memoizer, MemoryBackend,
};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn setup() -> (Memoizer, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let memoizer = Memoizer::new(backend.clone(), CacheConfig::testing()).unwrap();
    (memoizer, backend)
}

fn groups(names: &[&str]) -> Vec<GroupName> {
    names.iter().map(|g| g.to_string()).collect()
}

#[derive(Debug, Clone)]
struct Author {
    name: String,
}

#[tokio::test]
async fn test_author_comment_scenario() {
    let (memoizer, _) = setup();

    let authors: Arc<Mutex<HashMap<u32, Author>>> = Arc::new(Mutex::new(HashMap::from([
        (1, Author { name: "John".to_string() }),
        (2, Author { name: "Bob".to_string() }),
    ])));
    // comment id -> (text, author id)
    let comments: Arc<HashMap<u32, (&'static str, u32)>> =
        Arc::new(HashMap::from([(1, ("text1", 1)), (2, ("text2", 2))]));

    let author_db = authors.clone();
    let author_details = memoizer
        .cached::<u32>()
        .key("author:1")
        .group("author1")
        .debug(true)
        .build(move |id: u32| {
            let author_db = author_db.clone();
            async move {
                let name = author_db.lock().unwrap()[&id].name.clone();
                Ok::<_, Infallible>(name)
            }
        })
        .unwrap();

    let comment_authors = comments.clone();
    let comment_db = authors.clone();
    let comment_details = memoizer
        .cached::<u32>()
        .arg_key(|id| format!("comment:{}", id))
        .arg_groups(move |id| vec![format!("author{}", comment_authors[id].1)])
        .debug(true)
        .build(move |id: u32| {
            let comment_db = comment_db.clone();
            let (text, author_id) = comments[&id];
            async move {
                let name = comment_db.lock().unwrap()[&author_id].name.clone();
                Ok::<_, Infallible>((text.to_string(), name))
            }
        })
        .unwrap();

    let author_calls = author_details.call_stats().unwrap();
    let comment_calls = comment_details.call_stats().unwrap();

    assert_eq!(author_details.call(1).await.unwrap(), "John");
    assert_eq!(
        comment_details.call(1).await.unwrap(),
        ("text1".to_string(), "John".to_string())
    );
    assert_eq!(
        comment_details.call(2).await.unwrap(),
        ("text2".to_string(), "Bob".to_string())
    );
    assert_eq!(author_calls.call_count() + comment_calls.call_count(), 3);

    // served from cache
    author_details.call(1).await.unwrap();
    comment_details.call(1).await.unwrap();
    comment_details.call(2).await.unwrap();
    assert_eq!(author_calls.call_count() + comment_calls.call_count(), 3);

    // both authors change, only author1 is expired
    for author in authors.lock().unwrap().values_mut() {
        author.name.push('2');
    }
    memoizer.invalidator().invalidate_groups(["author1"]).await.unwrap();

    assert_eq!(author_details.call(1).await.unwrap(), "John2");
    assert_eq!(
        comment_details.call(1).await.unwrap(),
        ("text1".to_string(), "John2".to_string())
    );
    assert_eq!(author_calls.call_count(), 2);
    assert_eq!(comment_calls.call_count(), 3);

    // author2 was not expired, the old value is still served
    assert_eq!(
        comment_details.call(2).await.unwrap(),
        ("text2".to_string(), "Bob".to_string())
    );
    assert_eq!(comment_calls.call_count(), 3);
}

#[tokio::test]
async fn test_idempotent_hit() {
    let (memoizer, _) = setup();
    let calls = AtomicU64::new(0);
    let g = groups(&["g1", "g2"]);

    for _ in 0..5 {
        let value = memoizer
            .memoize("k", &g, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(vec![1, 2, 3])
            })
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_group_isolation() {
    let (memoizer, _) = setup();
    let a_calls = AtomicU64::new(0);
    let b_calls = AtomicU64::new(0);

    let call_a = || async {
        memoizer
            .memoize("a", &groups(&["ga"]), || async {
                a_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>("a".to_string())
            })
            .await
            .unwrap()
    };
    let call_b = || async {
        memoizer
            .memoize("b", &groups(&["gb"]), || async {
                b_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>("b".to_string())
            })
            .await
            .unwrap()
    };

    call_a().await;
    call_b().await;
    memoizer.invalidator().invalidate_groups(["ga"]).await.unwrap();
    call_a().await;
    call_b().await;

    assert_eq!(a_calls.load(Ordering::SeqCst), 2);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalidation_recomputes_exactly_once_with_repeated_group() {
    let (memoizer, _) = setup();
    let calls = AtomicU64::new(0);
    let g = groups(&["g", "g"]);

    let call = || async {
        memoizer
            .memoize("k", &g, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(42u32)
            })
            .await
            .unwrap()
    };

    call().await;
    memoizer.invalidator().invalidate_groups(["g"]).await.unwrap();
    call().await;
    call().await;
    call().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_any_group_invalidation_makes_key_stale() {
    let (memoizer, _) = setup();
    let calls = AtomicU64::new(0);
    let g = groups(&["g1", "g2"]);

    let call = || async {
        memoizer
            .memoize("k", &g, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(1u8)
            })
            .await
            .unwrap()
    };

    call().await;
    memoizer.invalidator().invalidate_groups(["g1"]).await.unwrap();
    call().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    memoizer.invalidator().invalidate_groups(["g2"]).await.unwrap();
    call().await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    call().await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(memoizer.stats().stale, 2);
}

#[tokio::test]
async fn test_dropping_an_invalidated_group_does_not_serve_stale_value() {
    let (memoizer, _) = setup();

    let value = memoizer
        .memoize("post:1", &groups(&["author1"]), || async { Ok::<_, Infallible>("old".to_string()) })
        .await
        .unwrap();
    assert_eq!(value, "old");

    memoizer.invalidator().invalidate_groups(["author1"]).await.unwrap();

    let value = memoizer
        .memoize("post:1", &[], || async { Ok::<_, Infallible>("new".to_string()) })
        .await
        .unwrap();
    assert_eq!(value, "new");

    // now cached under the empty group set
    let value = memoizer
        .memoize("post:1", &[], || async { Ok::<_, Infallible>("newer".to_string()) })
        .await
        .unwrap();
    assert_eq!(value, "new");
}

#[tokio::test]
async fn test_reassigned_comment_follows_its_new_author_group() {
    let (memoizer, _) = setup();

    // comment id -> author id
    let owners: Arc<Mutex<HashMap<u32, u32>>> = Arc::new(Mutex::new(HashMap::from([(1, 1)])));

    let group_owners = owners.clone();
    let comment_details = memoizer
        .cached::<u32>()
        .arg_key(|id| format!("comment:{}", id))
        .arg_groups(move |id| vec![format!("author{}", group_owners.lock().unwrap()[id])])
        .debug(true)
        .build(|id: u32| async move { Ok::<_, Infallible>(format!("text{}", id)) })
        .unwrap();
    let calls = comment_details.call_stats().unwrap();

    comment_details.call(1).await.unwrap();
    comment_details.call(1).await.unwrap();
    assert_eq!(calls.call_count(), 1);

    // moved to author2 while author1 is expired
    owners.lock().unwrap().insert(1, 2);
    memoizer.invalidator().invalidate_groups(["author1"]).await.unwrap();
    comment_details.call(1).await.unwrap();
    assert_eq!(calls.call_count(), 2);

    // author1 no longer owns the comment
    memoizer.invalidator().invalidate_groups(["author1"]).await.unwrap();
    comment_details.call(1).await.unwrap();
    assert_eq!(calls.call_count(), 2);

    memoizer.invalidator().invalidate_groups(["author2"]).await.unwrap();
    comment_details.call(1).await.unwrap();
    assert_eq!(calls.call_count(), 3);
}

#[tokio::test]
async fn test_missing_marker_means_stale() {
    let (memoizer, backend) = setup();
    let calls = AtomicU64::new(0);
    let g = groups(&["author1"]);

    let call = || async {
        memoizer
            .memoize("author:1", &g, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>("John".to_string())
            })
            .await
            .unwrap()
    };

    call().await;
    // simulate the backend evicting the group marker
    let removed = backend.delete_many(&["group:author1".to_string()]).await.unwrap();
    assert_eq!(removed, 1);

    call().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // the newly minted marker was persisted and is now current
    assert!(backend.contains_key("group:author1").await);
    call().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_malformed_envelope_is_overwritten() {
    let (memoizer, backend) = setup();

    backend
        .set_many(
            HashMap::from([("k".to_string(), "{\"not\": \"an envelope\"}".to_string())]),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    let value = memoizer
        .memoize("k", &[], || async { Ok::<_, Infallible>(7u32) })
        .await
        .unwrap();
    assert_eq!(value, 7);
    assert_eq!(memoizer.stats().misses, 1);

    let value = memoizer
        .memoize("k", &[], || async { Ok::<_, Infallible>(8u32) })
        .await
        .unwrap();
    assert_eq!(value, 7);
}

#[tokio::test]
async fn test_changed_value_type_is_treated_as_miss() {
    let (memoizer, _) = setup();

    memoizer
        .memoize("k", &[], || async { Ok::<_, Infallible>("text".to_string()) })
        .await
        .unwrap();

    let value = memoizer
        .memoize("k", &[], || async { Ok::<_, Infallible>(5u32) })
        .await
        .unwrap();
    assert_eq!(value, 5);
}

#[tokio::test]
async fn test_invalidate_keys_forces_recompute() {
    let (memoizer, _) = setup();
    let calls = AtomicU64::new(0);

    let call = || async {
        memoizer
            .memoize("post:1", &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(1u32)
            })
            .await
            .unwrap()
    };

    call().await;
    let event = memoizer.invalidator().invalidate_keys(["post:1"]).await.unwrap();
    assert_eq!(event.removed, Some(1));
    call().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_compute_failure_leaves_groups_lazy() {
    let (memoizer, backend) = setup();

    let err = memoizer
        .memoize("k", &groups(&["fresh_group"]), || async {
            Err::<u32, _>(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Compute(ref e) if e.to_string() == "boom"));
    assert!(!backend.contains_key("group:fresh_group").await);

    let value = memoizer
        .memoize("k", &groups(&["fresh_group"]), || async { Ok::<_, std::io::Error>(3u32) })
        .await
        .unwrap();
    assert_eq!(value, 3);
    assert!(backend.contains_key("group:fresh_group").await);
}

/// Backend double whose reads and writes can be switched off
#[derive(Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get_many(&self, keys: &[CacheKey]) -> potatocache::Result<HashMap<CacheKey, CacheValue>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::BackendError("connection refused".to_string()));
        }
        self.inner.get_many(keys).await
    }

    async fn set_many(&self, entries: HashMap<CacheKey, CacheValue>, ttl: Duration) -> potatocache::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::BackendError("connection refused".to_string()));
        }
        self.inner.set_many(entries, ttl).await
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> potatocache::Result<usize> {
        self.inner.delete_many(keys).await
    }
}

#[tokio::test]
async fn test_backend_failure_propagates_by_default() {
    let backend = Arc::new(FlakyBackend::default());
    backend.fail_reads.store(true, Ordering::SeqCst);
    let memoizer = Memoizer::new(backend.clone(), CacheConfig::testing()).unwrap();
    let calls = AtomicU64::new(0);

    let err = memoizer
        .memoize("k", &groups(&["g"]), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(1u32)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Cache(CacheError::BackendError(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(memoizer.stats().backend_errors, 1);

    let err = memoizer.invalidator().invalidate_groups(["g"]).await;
    assert!(err.is_ok(), "writes still work");

    backend.fail_writes.store(true, Ordering::SeqCst);
    let err = memoizer.invalidator().invalidate_groups(["g"]).await.unwrap_err();
    assert!(err.is_backend_failure());
}

#[tokio::test]
async fn test_backend_failure_recompute_policy() {
    let backend = Arc::new(FlakyBackend::default());
    let config = CacheConfig::builder()
        .on_backend_error(BackendErrorPolicy::Recompute)
        .build();
    let memoizer = Memoizer::new(backend.clone(), config).unwrap();
    let calls = AtomicU64::new(0);

    let call = || async {
        memoizer
            .memoize("k", &groups(&["g"]), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(10u32)
            })
            .await
    };

    // read failure: computed, nothing written
    backend.fail_reads.store(true, Ordering::SeqCst);
    assert_eq!(call().await.unwrap(), 10);
    assert!(backend.inner.is_empty().await);

    // write failure: computed value still returned
    backend.fail_reads.store(false, Ordering::SeqCst);
    backend.fail_writes.store(true, Ordering::SeqCst);
    assert_eq!(call().await.unwrap(), 10);
    assert!(backend.inner.is_empty().await);

    // healthy again: cached after one more computation
    backend.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(call().await.unwrap(), 10);
    assert_eq!(call().await.unwrap(), 10);

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(memoizer.stats().backend_errors, 2);
}

#[tokio::test]
async fn test_concurrent_callers_share_cache() {
    let (memoizer, _) = setup();
    let calls = Arc::new(AtomicU64::new(0));

    // warm the cache, then hammer it
    memoizer
        .memoize("shared", &groups(&["g"]), || async { Ok::<_, Infallible>(1u64) })
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let memoizer = memoizer.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..10 {
                let calls = calls.clone();
                let value = memoizer
                    .memoize("shared", &["g".to_string()], move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, Infallible>(2u64)
                    })
                    .await
                    .unwrap();
                assert_eq!(value, 1);
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(memoizer.stats().hits, 100);
}

#[tokio::test]
async fn test_concurrent_recompute_after_invalidation_converges() {
    let (memoizer, _) = setup();
    let g = groups(&["g"]);

    memoizer
        .memoize("k", &g, || async { Ok::<_, Infallible>(1u32) })
        .await
        .unwrap();
    memoizer.invalidator().invalidate_groups(["g"]).await.unwrap();

    // racing callers may each recompute; every one sees the new value
    let results = futures::future::join_all((0..8).map(|_| {
        memoizer.memoize("k", &g, || async { Ok::<_, Infallible>(2u32) })
    }))
    .await;

    for result in results {
        assert_eq!(result.unwrap(), 2);
    }

    let value = memoizer
        .memoize("k", &g, || async { Ok::<_, Infallible>(3u32) })
        .await
        .unwrap();
    assert_eq!(value, 2);
}

#[test]
fn test_blocking_usage() {
    let (memoizer, _) = setup();

    let value = tokio_test::block_on(memoizer.memoize("k", &[], || async {
        Ok::<_, Infallible>("sync caller".to_string())
    }))
    .unwrap();

    assert_eq!(value, "sync caller");
}
