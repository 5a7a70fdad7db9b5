use chrono::{Duration, TimeZone, Utc};
use tresor::cache::{DATASET_MATCHES, DATASET_PRICES, DATASET_TRANSACTIONS, SnapshotCache};
use tresor::config::AppPaths;

#[test]
fn snapshots_expire_after_ttl() {
    let cache = SnapshotCache::open_in_memory().expect("cache");
    let t0 = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
    let ttl = Duration::seconds(300);

    cache
        .put(DATASET_TRANSACTIONS, "from=;to=", "[]", t0)
        .expect("put");

    let hit = cache
        .get(DATASET_TRANSACTIONS, "from=;to=", ttl, t0 + Duration::seconds(299))
        .expect("get")
        .expect("fresh snapshot");
    assert_eq!(hit.payload_json, "[]");
    assert_eq!(hit.fetched_at, t0);

    let miss = cache
        .get(DATASET_TRANSACTIONS, "from=;to=", ttl, t0 + Duration::seconds(301))
        .expect("get");
    assert!(miss.is_none());

    let other_key = cache
        .get(DATASET_TRANSACTIONS, "from=2024-01-01;to=", ttl, t0)
        .expect("get");
    assert!(other_key.is_none());
}

#[test]
fn put_replaces_previous_snapshot() {
    let cache = SnapshotCache::open_in_memory().expect("cache");
    let t0 = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
    let t1 = t0 + Duration::minutes(10);

    cache.put(DATASET_PRICES, "k", "[1]", t0).expect("put");
    cache.put(DATASET_PRICES, "k", "[2]", t1).expect("put");

    let hit = cache
        .get(DATASET_PRICES, "k", Duration::seconds(60), t1)
        .expect("get")
        .expect("snapshot");
    assert_eq!(hit.payload_json, "[2]");
    assert_eq!(cache.list().expect("list").len(), 1);
}

#[test]
fn invalidate_only_touches_one_dataset() {
    let cache = SnapshotCache::open_in_memory().expect("cache");
    let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();

    cache.put(DATASET_MATCHES, "all", "[]", now).expect("put");
    cache.put(DATASET_TRANSACTIONS, "a", "[]", now).expect("put");
    cache.put(DATASET_TRANSACTIONS, "b", "[]", now).expect("put");

    assert_eq!(cache.invalidate(DATASET_MATCHES).expect("invalidate"), 1);
    let left: Vec<(String, String)> = cache
        .list()
        .expect("list")
        .into_iter()
        .map(|(d, k, _)| (d, k))
        .collect();
    assert_eq!(
        left,
        [
            (DATASET_TRANSACTIONS.to_string(), "a".to_string()),
            (DATASET_TRANSACTIONS.to_string(), "b".to_string()),
        ]
    );

    assert_eq!(cache.clear().expect("clear"), 2);
    assert!(cache.list().expect("list").is_empty());
}

#[test]
fn on_disk_cache_survives_reopen() {
    let home = tempfile::tempdir().expect("tempdir");
    let paths = AppPaths {
        config_dir: home.path().join("config"),
        data_dir: home.path().join("data"),
    };
    let now = Utc::now();

    {
        let (cache, path) = SnapshotCache::open(&paths).expect("open");
        assert!(path.ends_with("snapshots.sqlite3"));
        cache.put(DATASET_MATCHES, "all", "[]", now).expect("put");
    }

    let (cache, _) = SnapshotCache::open(&paths).expect("reopen");
    assert!(
        cache
            .get(DATASET_MATCHES, "all", Duration::seconds(60), now)
            .expect("get")
            .is_some()
    );
}
