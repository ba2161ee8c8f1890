//! Integration tests for the Redis store client.
//!
//! These tests use testcontainers to spin up a real Redis instance and are
//! ignored by default. Run them with `cargo test -- --ignored` when Docker is
//! available.

use std::time::Duration;

use murmur_store::prelude::*;
use murmur_store::scripts;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, u16)> = OnceCell::const_new();

async fn redis_port() -> u16 {
    let (_, port) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, port)
        })
        .await;
    *port
}

async fn connect(prefix: &str) -> (RedisStore, KeyNamespace) {
    let port = redis_port().await.to_string();
    let config = StoreConfig::from_vars([
        ("REDIS_HOST", "127.0.0.1"),
        ("REDIS_PORT", port.as_str()),
        ("REDIS_PASSWORD", ""),
        ("REDIS_DB", "0"),
        ("REDIS_KEY_PREFIX", prefix),
        ("REDIS_READY_CHECK", "true"),
        ("REDIS_MAX_RETRIES_PER_REQUEST", "3"),
    ])
    .expect("valid config");
    let store = RedisStore::connect(&config).await.expect("connect");
    (store, KeyNamespace::new(prefix))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_scalar_roundtrip_and_ttl() {
    let (store, keys) = connect("it-scalar").await;
    let key = keys.cache(&["user", "1"]);

    store
        .set(&key, b"payload", Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(store.get(&key).await.unwrap(), Some(b"payload".to_vec()));
    assert!(matches!(store.ttl(&key).await.unwrap(), KeyTtl::Expires(s) if s <= 30));

    assert_eq!(store.delete(&[key.clone()]).await.unwrap(), 1);
    assert_eq!(store.ttl(&key).await.unwrap(), KeyTtl::Missing);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_collections() {
    let (store, keys) = connect("it-collections").await;

    let hash = keys.cache(&["profile"]);
    store.hash_set(&hash, "name", "alice").await.unwrap();
    assert_eq!(
        store.hash_get(&hash, "name").await.unwrap(),
        Some("alice".to_string())
    );

    let list = keys.cache(&["queue"]);
    store
        .list_push(&list, &["a".into(), "b".into()])
        .await
        .unwrap();
    assert_eq!(store.list_pop(&list).await.unwrap(), Some("a".to_string()));

    let zset = keys.cache(&["board"]);
    store.zset_add(&zset, "alice", 2.0).await.unwrap();
    store.zset_add(&zset, "bob", 1.0).await.unwrap();
    assert_eq!(store.zset_rank(&zset, "alice").await.unwrap(), Some(1));
    let range = store.zset_range(&zset, 0, -1).await.unwrap();
    assert_eq!(range[0], ("bob".to_string(), 1.0));

    let stream = keys.cache(&["events"]);
    store
        .stream_add(&stream, &[("kind".into(), "join".into())])
        .await
        .unwrap();
    assert_eq!(store.stream_len(&stream).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_builtin_scripts_match_memory_semantics() {
    let (store, keys) = connect("it-scripts").await;
    let lock = keys.lock(&["job"]);

    assert!(
        store
            .set_if_absent(&lock, b"token-a", Duration::from_secs(5))
            .await
            .unwrap()
    );
    let denied = store
        .run_script(&scripts::COMPARE_AND_DELETE, &[lock.clone()], &["token-b".into()])
        .await
        .unwrap();
    assert_eq!(denied.as_int(), Some(0));
    let released = store
        .run_script(&scripts::COMPARE_AND_DELETE, &[lock.clone()], &["token-a".into()])
        .await
        .unwrap();
    assert_eq!(released.as_int(), Some(1));

    let counter = keys.rate_limit("login", "10.0.0.1");
    for expected in 1..=3 {
        let reply = store
            .run_script(&scripts::FIXED_WINDOW_INCR, &[counter.clone()], &["60".into()])
            .await
            .unwrap();
        assert_eq!(reply.as_array().unwrap()[0].as_int(), Some(expected));
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_tag_sweep_and_escaped_scan() {
    let (store, keys) = connect("it-sweep*").await;
    let tag = keys.tag("feed");
    let (a, b) = (keys.cache(&["a"]), keys.cache(&["b"]));
    for k in [&a, &b] {
        store.set(k, b"v", None).await.unwrap();
        store.set_add(&keys.tag_meta(k), &["feed".into()]).await.unwrap();
        store.set_add(&tag, &[k.clone()]).await.unwrap();
    }

    let matched = store
        .scan_match(&keys.pattern(KeyKind::Cache, "*"), 100)
        .await
        .unwrap();
    assert_eq!(matched, vec![a.clone(), b.clone()]);

    let reply = store
        .run_script(&scripts::TAG_SWEEP, &[tag.clone(), a.clone(), keys.tag_meta(&a)], &[])
        .await
        .unwrap();
    assert_eq!(reply.as_int(), Some(1));
    assert!(!store.exists(&a).await.unwrap());
    assert!(!store.exists(&keys.tag_meta(&a)).await.unwrap());
    assert_eq!(store.set_members(&tag).await.unwrap(), vec![b.clone()]);
    assert!(store.exists(&b).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_disconnect_is_final() {
    let (store, _) = connect("it-disconnect").await;
    assert!(store.is_healthy().await);
    store.disconnect().await;
    assert!(matches!(store.ping().await, Err(StoreError::Unavailable)));
}
