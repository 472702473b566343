//! Classification behaviour against in-memory backends and a scripted probe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use pxd_detector::{
    cache::{MemoryCache, ProxyCache},
    db::{MemoryRecordStore, RecordStore},
    probe::MockProbe,
    CacheRemoval, DetectError, ProxyDetector, StoreRemoval,
};

const PORTS: [u16; 3] = [1080, 3128, 8080];

struct Harness {
    cache: Arc<MemoryCache>,
    store: Arc<MemoryRecordStore>,
    probe: Arc<MockProbe>,
    detector: ProxyDetector,
}

fn harness(cache: MemoryCache, store: MemoryRecordStore, probe: MockProbe) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,pxd_detector=debug".into()),
        )
        .with_test_writer()
        .try_init();

    let cache = Arc::new(cache);
    let store = Arc::new(store);
    let probe = Arc::new(probe);
    let detector = ProxyDetector::new(cache.clone(), store.clone(), probe.clone(), PORTS.to_vec());

    Harness {
        cache,
        store,
        probe,
        detector,
    }
}

#[tokio::test]
async fn unseen_ip_is_negative_only_after_every_probe_finishes() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new().with_miss_delay(Duration::from_millis(50)),
    );

    let start = Instant::now();
    assert!(!h.detector.classify("203.0.113.5").await.unwrap());

    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(h.probe.started(), PORTS.len() + 1);
    assert_eq!(h.probe.completed(), PORTS.len() + 1);
    assert!(!h.cache.contains("203.0.113.5").await.unwrap());
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn cached_ip_is_positive_without_probing() {
    let h = harness(
        MemoryCache::with_ips(["198.51.100.7"]),
        MemoryRecordStore::with_ips(["198.51.100.7"]),
        MockProbe::new(),
    );

    assert!(h.detector.classify("198.51.100.7").await.unwrap());
    assert!(h.detector.classify("198.51.100.7").await.unwrap());

    assert_eq!(h.probe.started(), 0);
    let record = h.store.get("198.51.100.7").await.unwrap();
    assert_eq!(record.hits, 3);
}

#[tokio::test]
async fn hit_counting_failure_does_not_flip_verdict() {
    let h = harness(
        MemoryCache::with_ips(["198.51.100.7"]),
        MemoryRecordStore::with_ips(["198.51.100.7"]),
        MockProbe::new(),
    );
    h.store.set_unavailable(true);

    assert!(h.detector.classify("198.51.100.7").await.unwrap());
    assert_eq!(h.probe.started(), 0);
}

#[tokio::test]
async fn open_port_is_recorded_and_cached() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new().with_open_port(3128, Duration::ZERO),
    );

    assert!(h.detector.classify("192.0.2.10").await.unwrap());

    assert!(h.cache.contains("192.0.2.10").await.unwrap());
    let record = h.store.get("192.0.2.10").await.unwrap();
    assert_eq!(record.port, Some(3128));
    assert_eq!(record.reason, "Port 3128 is open");
    assert_eq!(record.hits, 1);
}

#[tokio::test]
async fn exit_list_hit_is_recorded_without_port() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new()
            .with_exit_node(Duration::ZERO)
            .with_miss_delay(Duration::from_millis(20)),
    );

    assert!(h.detector.classify("192.0.2.20").await.unwrap());

    let record = h.store.get("192.0.2.20").await.unwrap();
    assert_eq!(record.port, None);
    assert_eq!(record.reason, "Tor Exit Node");
    assert!(h.cache.contains("192.0.2.20").await.unwrap());
}

#[tokio::test]
async fn first_hit_wins_without_waiting_for_slow_misses() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new()
            .with_open_port(1080, Duration::from_millis(10))
            .with_miss_delay(Duration::from_millis(500)),
    );

    let start = Instant::now();
    assert!(h.detector.classify("192.0.2.30").await.unwrap());
    assert!(start.elapsed() < Duration::from_millis(400));
    assert!(h.probe.completed() < PORTS.len() + 1);
}

#[tokio::test]
async fn evidence_write_failures_keep_positive_verdict() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new().with_open_port(8080, Duration::ZERO),
    );
    h.store.set_unavailable(true);

    assert!(h.detector.classify("192.0.2.40").await.unwrap());

    h.store.set_unavailable(false);
    assert!(h.store.get("192.0.2.40").await.is_none());
    assert!(h.cache.contains("192.0.2.40").await.unwrap());
}

#[tokio::test]
async fn repeated_classification_keeps_one_record() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new().with_open_port(8080, Duration::ZERO),
    );

    assert!(h.detector.classify("192.0.2.50").await.unwrap());
    assert!(h.detector.classify("192.0.2.50").await.unwrap());

    assert_eq!(h.store.count().await.unwrap(), 1);
    assert_eq!(h.store.upsert_count(), 1);
    assert_eq!(h.store.get("192.0.2.50").await.unwrap().hits, 2);
}

#[tokio::test]
async fn delete_then_classify_does_not_resurrect() {
    let h = harness(
        MemoryCache::with_ips(["192.0.2.60"]),
        MemoryRecordStore::with_ips(["192.0.2.60"]),
        MockProbe::new(),
    );

    let outcome = h.detector.delete_proxy("192.0.2.60").await;
    assert_eq!(outcome.store, StoreRemoval::Deleted);
    assert_eq!(outcome.cache, CacheRemoval::Removed);

    assert!(!h.detector.classify("192.0.2.60").await.unwrap());
    assert!(h.store.get("192.0.2.60").await.is_none());
    assert!(!h.cache.contains("192.0.2.60").await.unwrap());

    let again = h.detector.delete_proxy("192.0.2.60").await;
    assert_eq!(again.store, StoreRemoval::NotFound);
    assert_eq!(again.cache, CacheRemoval::NotPresent);
}

#[tokio::test]
async fn delete_reports_each_backend_separately() {
    let h = harness(
        MemoryCache::with_ips(["192.0.2.61"]),
        MemoryRecordStore::with_ips(["192.0.2.61"]),
        MockProbe::new(),
    );
    h.store.set_unavailable(true);

    let outcome = h.detector.delete_proxy("192.0.2.61").await;
    assert!(matches!(outcome.store, StoreRemoval::Failed(_)));
    assert_eq!(outcome.cache, CacheRemoval::Removed);
}

#[tokio::test]
async fn concurrent_callers_share_one_probe_set() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new()
            .with_open_port(3128, Duration::from_millis(100))
            .with_miss_delay(Duration::from_millis(100)),
    );

    let verdicts = join_all((0..8).map(|_| h.detector.classify("192.0.2.70"))).await;

    assert!(verdicts.into_iter().all(|v| v.unwrap()));
    assert_eq!(h.probe.port_checks(), PORTS.len());
    assert_eq!(h.probe.exit_checks(), 1);
    assert_eq!(h.store.upsert_count(), 1);
    assert_eq!(h.detector.in_flight(), 0);
}

#[tokio::test]
async fn concurrent_negative_verdict_is_shared() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new().with_miss_delay(Duration::from_millis(50)),
    );

    let verdicts = join_all((0..4).map(|_| h.detector.classify("192.0.2.71"))).await;

    assert!(verdicts.into_iter().all(|v| !v.unwrap()));
    assert_eq!(h.probe.started(), PORTS.len() + 1);
}

#[tokio::test]
async fn cache_failure_is_an_error_not_a_negative() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new().with_open_port(8080, Duration::ZERO),
    );
    h.cache.set_unavailable(true);

    let err = h.detector.classify("192.0.2.80").await.unwrap_err();
    assert!(matches!(err, DetectError::Cache(_)));
    assert_eq!(h.probe.started(), 0);
}

#[tokio::test]
async fn malformed_address_is_negative_without_probing() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new().with_open_port(8080, Duration::ZERO),
    );

    assert!(!h.detector.classify("not-an-ip").await.unwrap());
    assert_eq!(h.probe.started(), 0);
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn backend_counts_reflect_both_sides() {
    let h = harness(
        MemoryCache::with_ips(["192.0.2.1", "192.0.2.2"]),
        MemoryRecordStore::with_ips(["192.0.2.1"]),
        MockProbe::new(),
    );

    let counts = h.detector.check_backends().await.unwrap();
    assert_eq!(counts.cache, 2);
    assert_eq!(counts.store, 1);

    h.cache.set_unavailable(true);
    assert!(h.detector.check_backends().await.is_err());
}

#[tokio::test]
async fn spellings_of_one_address_share_a_record() {
    let h = harness(
        MemoryCache::new(),
        MemoryRecordStore::new(),
        MockProbe::new().with_open_port(8080, Duration::ZERO),
    );

    for ip in [" 192.0.2.10", "192.0.2.10", "2001:DB8::1", "2001:db8::1"] {
        assert!(h.detector.classify(ip).await.unwrap());
    }

    let mut ips = h.store.all_ips().await.unwrap();
    ips.sort();
    assert_eq!(ips, vec!["192.0.2.10", "2001:db8::1"]);
    assert_eq!(h.probe.port_checks(), 2 * PORTS.len());
    assert_eq!(h.store.get("192.0.2.10").await.unwrap().hits, 2);
    assert!(h.cache.contains("2001:db8::1").await.unwrap());
    assert_eq!(h.cache.cardinality().await.unwrap(), 2);

    let outcome = h.detector.delete_proxy("2001:DB8::1").await;
    assert_eq!(outcome.store, StoreRemoval::Deleted);
    assert_eq!(outcome.cache, CacheRemoval::Removed);
}
