use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use etherparse::PacketBuilder;
use mckeys::config::Config;
use mckeys::engine::CaptureEngine;
use mckeys::models::domain::Frame;
use mckeys::report::Report;
use mckeys::Error;

const SERVER: [u8; 4] = [192, 168, 1, 10];
const CLIENT: [u8; 4] = [192, 168, 1, 20];
const PORT: u16 = 11211;

#[derive(Default)]
struct CountingReport(Arc<AtomicUsize>);

impl Report for CountingReport {
    fn shutdown(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_config(workers: usize) -> Arc<Config> {
    Arc::new(Config {
        interface: "test0".into(),
        workers,
        ..Config::default()
    })
}

fn engine(workers: usize) -> CaptureEngine {
    CaptureEngine::new(test_config(workers), Some(IpAddr::V4(Ipv4Addr::from(SERVER))), |_, _| {
        Ok(Box::new(CountingReport::default()))
    })
    .unwrap()
}

fn tcp_frame(id: u64, from_server: bool, payload: &[u8]) -> Frame {
    let (src, sport, dst, dport) = if from_server {
        (SERVER, PORT, CLIENT, 40_000)
    } else {
        (CLIENT, 40_000, SERVER, PORT)
    };
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
        .ipv4(src, dst, 64)
        .tcp(sport, dport, id as u32, 65535);
    let mut data = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut data, payload).unwrap();
    Frame::new(id, 0, data)
}

fn response(id: u64, key: &str, size: u64) -> Frame {
    let payload = format!("VALUE {} 0 {}\r\n", key, size);
    tcp_frame(id, true, payload.as_bytes())
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_frames_route_to_one_shard() {
    let engine = engine(3);
    for i in 0..20u64 {
        engine.enqueue(response(i * 3 + 1, "k", 1)).unwrap();
    }
    wait_until("processing", || engine.counters().processed() == 20);
    assert_eq!(engine.processed_by_shard(), vec![0, 20, 0]);

    for id in 100..130u64 {
        engine.enqueue(response(id, "k", 1)).unwrap();
    }
    wait_until("processing", || engine.counters().processed() == 50);
    let per_shard = engine.processed_by_shard();
    assert_eq!(per_shard, vec![10, 30, 10]);
    engine.shutdown();
}

#[test]
fn test_every_response_reaches_stats_once() {
    let engine = engine(3);
    let keys = ["alpha", "beta", "gamma", "delta", "epsilon"];

    let mut id = 0u64;
    let mut responses = 0u64;
    for round in 0..200 {
        let key = keys[round % keys.len()];
        engine.enqueue(response(id, key, 64)).unwrap();
        id += 1;
        responses += 1;

        engine
            .enqueue(tcp_frame(id, false, format!("get {}\r\n", key).as_bytes()))
            .unwrap();
        id += 1;

        if round % 4 == 0 {
            // split header and foreign traffic are dropped silently
            engine.enqueue(tcp_frame(id, true, b"VALUE parti")).unwrap();
            id += 1;
            engine.enqueue(Frame::new(id, 0, vec![0u8; 16])).unwrap();
            id += 1;
        }
    }

    wait_until("processing", || engine.counters().processed() == id);
    wait_until("aggregation", || engine.stats().received() == responses);

    assert_eq!(engine.counters().responses(), responses);
    assert_eq!(engine.counters().submitted(), responses);

    let snapshot = engine.stats().snapshot();
    assert_eq!(snapshot.len(), keys.len());
    assert_eq!(snapshot.iter().map(|s| s.count).sum::<u64>(), responses);
    for stat in &snapshot {
        assert_eq!(stat.count, 40, "key {}", stat.key);
        assert_eq!(stat.size, 64);
    }
    engine.shutdown();
}

#[test]
fn test_shutdown_stops_intake() {
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let report_shutdowns = Arc::clone(&shutdowns);
    let engine = CaptureEngine::new(
        test_config(3),
        Some(IpAddr::V4(Ipv4Addr::from(SERVER))),
        move |_, _| Ok(Box::new(CountingReport(report_shutdowns))),
    )
    .unwrap();

    for id in 0..30 {
        engine.enqueue(response(id, "before", 1)).unwrap();
    }
    wait_until("aggregation", || engine.stats().received() == 30);

    engine.shutdown();
    engine.shutdown();
    assert!(engine.is_shutdown());
    assert!(engine.stats().is_shutdown());
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

    assert!(matches!(
        engine.enqueue(response(30, "after", 1)),
        Err(Error::ShutDown)
    ));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.stats().received(), 30);
    assert!(engine.stats().snapshot().iter().all(|s| s.key == "before"));

    drop(engine);
}

#[test]
fn test_drop_without_shutdown_joins_workers() {
    let engine = engine(4);
    for id in 0..8 {
        engine.enqueue(response(id, "k", 1)).unwrap();
    }
    wait_until("processing", || engine.counters().processed() == 8);

    let started = Instant::now();
    drop(engine);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_invalid_config_rejected() {
    let result = CaptureEngine::new(test_config(0), None, |_, _| {
        Ok(Box::new(CountingReport::default()))
    });
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
