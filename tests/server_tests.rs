use pimon::{
    ManualClock, PimonError, Server, ServerConfig, TelemetryRecord, WIRE_RECORD_SIZE,
};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn local_config() -> ServerConfig {
    ServerConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        evaluate_interval: Duration::from_millis(50),
        ..ServerConfig::default()
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_datagram_reaches_registry() {
    let server = Server::start(&local_config()).unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    let record = TelemetryRecord::new("pi-a", 12.0, 41.5, 1200.0, 1800.0, 1_700_000_000);
    client.send_to(&record.encode(), server.local_addr()).unwrap();

    let registry = server.registry();
    assert!(wait_until(|| registry.occupied() == 1));
    let row = registry.snapshot().rows[0].clone();
    assert_eq!(row.client_id.to_string(), "pi-a");
    assert_eq!(row.ip(), "127.0.0.1");
    assert_eq!(row.aggregate.avg_load, 12.0);

    server.shutdown();
}

#[test]
fn test_malformed_datagram_is_ignored() {
    let server = Server::start(&local_config()).unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    let bytes = TelemetryRecord::new("pi-a", 1.0, 1.0, 1.0, 1.0, 1).encode();
    client
        .send_to(&bytes[..WIRE_RECORD_SIZE - 1], server.local_addr())
        .unwrap();

    assert!(wait_until(|| server.listener_counts().malformed == 1));
    assert_eq!(server.registry().occupied(), 0);
    assert!(server.registry().snapshot().is_empty());
}

#[test]
fn test_evaluator_flags_silent_client() {
    let clock = ManualClock::new(1_700_000_000);
    let server = Server::start_with_clock(&local_config(), Arc::new(clock.clone())).unwrap();
    let events = server.registry().subscribe();
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    let record = TelemetryRecord::new("pi-b", 5.0, 40.0, 1000.0, 0.0, 1_700_000_000);
    client.send_to(&record.encode(), server.local_addr()).unwrap();

    let registry = server.registry();
    assert!(wait_until(|| registry.occupied() == 1));
    clock.advance(31);

    let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(event.offline);
    assert_eq!(event.client_id.to_string(), "pi-b");
    assert_eq!(registry.offline_count(), 1);
}

#[test]
fn test_shutdown_is_prompt() {
    let server = Server::start(&local_config()).unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(!server.is_any_worker_finished());

    let start = Instant::now();
    server.shutdown();
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_port_in_use_fails_start() {
    let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
    let config = ServerConfig {
        port: taken.local_addr().unwrap().port(),
        ..local_config()
    };
    match Server::start(&config) {
        Err(PimonError::Bind { .. }) => {}
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("expected bind failure"),
    }
}

#[test]
fn test_invalid_config_rejected() {
    let config = ServerConfig {
        evaluate_interval: Duration::from_secs(60),
        ..local_config()
    };
    assert!(matches!(Server::start(&config), Err(PimonError::Config(_))));
}
