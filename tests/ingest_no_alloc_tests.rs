use assert_no_alloc::*;
use pimon::{Registry, RegistryConfig, TelemetryRecord};
use std::net::SocketAddr;

#[cfg(debug_assertions)]
#[global_allocator]
static ALLOC: AllocDisabler = AllocDisabler;

fn warmed_registry() -> (Registry, SocketAddr) {
    let registry = Registry::new(RegistryConfig::default());
    let from = SocketAddr::from(([10, 0, 0, 1], 5000));
    for ts in 0..4 {
        registry
            .ingest(TelemetryRecord::new("pi-a", 1.0, 40.0, 1200.0, 0.0, ts), from)
            .unwrap();
    }
    (registry, from)
}

#[test]
fn test_ingest_known_client_no_alloc() {
    let (registry, from) = warmed_registry();
    let record = TelemetryRecord::new("pi-a", 2.0, 41.0, 1300.0, 0.0, 10);

    assert_no_alloc(|| {
        let _ = registry.ingest(record, from);
    });
}

#[test]
fn test_ingest_datagram_no_alloc() {
    let (registry, from) = warmed_registry();
    let bytes = TelemetryRecord::new("pi-a", 2.0, 41.0, 1300.0, 0.0, 10).encode();

    assert_no_alloc(|| {
        let _ = registry.ingest_datagram(&bytes, from);
        let _ = registry.ingest_datagram(&bytes[..10], from);
    });
}

#[test]
fn test_aggregate_no_alloc() {
    let (registry, from) = warmed_registry();
    let handle = registry
        .ingest(TelemetryRecord::new("pi-a", 2.0, 41.0, 1300.0, 0.0, 10), from)
        .unwrap();

    assert_no_alloc(|| {
        let _ = registry.aggregate(handle);
        let _ = registry.evaluate(20);
    });
}
