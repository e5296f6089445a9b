//! Poll Loop Integration Tests
//!
//! Runs the push loop against a fake Zabbix collector:
//! - One packet per cycle with the whole batch
//! - Config toggles read every cycle
//! - Prompt shutdown while sleeping

use ccentral::clock::{ManualClock, UnixTimestamp};
use ccentral::config::{
    register_exporter_schema, ConfigCache, ZABBIX_ENABLED, ZABBIX_HOST, ZABBIX_INTERVAL,
    ZABBIX_PORT,
};
use ccentral::export::trapper::{decode_frame, encode_frame};
use ccentral::export::{decode_packet, spawn_poll_loop, CycleOutcome, PushExporter, TRAPPER_HOST};
use ccentral::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

struct Fixture {
    store: MemoryStore,
    exporter: PushExporter,
}

fn fixture(clock: &ManualClock) -> Fixture {
    let store = MemoryStore::with_clock(Arc::new(clock.clone()), Duration::from_secs(600));
    let config = Arc::new(ConfigCache::new(
        "ccentral",
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        Duration::from_secs(10),
    ));
    register_exporter_schema(&config);
    let exporter = PushExporter::new(Arc::new(store.clone()), config, Arc::new(clock.clone()));
    Fixture { store, exporter }
}

/// Collector that answers every connection and forwards each frame
async fn spawn_collector() -> (u16, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut received = Vec::new();
            let mut chunk = [0u8; 4096];
            while decode_frame(&received).is_err() {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received.extend_from_slice(&chunk[..n]),
                }
            }
            let reply = encode_frame(br#"{"response":"success","info":"ok"}"#).unwrap();
            let _ = socket.write_all(&reply).await;
            let _ = socket.shutdown().await;
            let _ = tx.send(received);
        }
    });
    (port, rx)
}

fn enable_push(store: &MemoryStore, port: u16) {
    store.set_config_item("ccentral", ZABBIX_ENABLED, "true");
    store.set_config_item("ccentral", ZABBIX_HOST, "127.0.0.1");
    store.set_config_item("ccentral", ZABBIX_PORT, &port.to_string());
    store.set_config_item("ccentral", ZABBIX_INTERVAL, "1");
}

// ============================================================================
// Single Cycles
// ============================================================================

#[tokio::test]
async fn test_cycle_sends_whole_batch() {
    let clock = ManualClock::new(UnixTimestamp::from_secs(1_700_000_000));
    let fx = fixture(&clock);
    let (port, mut frames) = spawn_collector().await;
    enable_push(&fx.store, port);
    fx.store
        .register_instance("web", "i1", r#"{"c_req": [1, 4], "h_lat": [10, 20, 30, 15]}"#);
    fx.store.register_instance("web", "i2", r#"{"c_req": [6]}"#);

    assert_eq!(fx.exporter.run_cycle().await, CycleOutcome::Sent { records: 7 });

    let packet = decode_packet(&frames.recv().await.unwrap()).unwrap();
    assert_eq!(packet.request, "sender data");
    assert_eq!(packet.clock, 1_700_000_000);
    let pairs: Vec<(&str, &str)> = packet
        .data
        .iter()
        .map(|r| (r.key.as_str(), r.value.as_str()))
        .collect();
    // The admin service's own config entry makes it a listed service
    assert_eq!(
        pairs,
        vec![
            ("ccentral.instances", "0"),
            ("web.instances", "2"),
            ("web.c_req", "10"),
            ("web.h_lat.75", "10"),
            ("web.h_lat.95", "20"),
            ("web.h_lat.99", "30"),
            ("web.h_lat.median", "15"),
        ]
    );
    assert!(packet
        .data
        .iter()
        .all(|r| r.host == TRAPPER_HOST && r.clock == 1_700_000_000));
}

#[tokio::test]
async fn test_unreachable_collector_drops_batch() {
    let clock = ManualClock::from_secs(1_000);
    let fx = fixture(&clock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    enable_push(&fx.store, port);

    assert_eq!(
        fx.exporter.run_cycle().await,
        CycleOutcome::SendFailed { records: 1 }
    );
}

#[tokio::test]
async fn test_toggle_is_picked_up_after_refresh() {
    let clock = ManualClock::from_secs(1_000);
    let fx = fixture(&clock);
    let (port, _frames) = spawn_collector().await;

    assert_eq!(fx.exporter.run_cycle().await, CycleOutcome::Disabled);

    enable_push(&fx.store, port);
    // Still cached
    assert_eq!(fx.exporter.run_cycle().await, CycleOutcome::Disabled);

    clock.advance(Duration::from_secs(11));
    assert!(matches!(
        fx.exporter.run_cycle().await,
        CycleOutcome::Sent { .. }
    ));
    assert_eq!(fx.exporter.interval().await, Duration::from_secs(1));
}

#[tokio::test]
async fn test_bad_port_is_misconfigured() {
    let clock = ManualClock::from_secs(1_000);
    let fx = fixture(&clock);
    enable_push(&fx.store, 1);
    fx.store.set_config_item("ccentral", ZABBIX_PORT, "70000");

    assert_eq!(fx.exporter.run_cycle().await, CycleOutcome::Misconfigured);
}

// ============================================================================
// Loop Lifecycle
// ============================================================================

#[tokio::test]
async fn test_loop_pushes_every_interval() {
    let clock = ManualClock::from_secs(1_000);
    let fx = fixture(&clock);
    let (port, mut frames) = spawn_collector().await;
    enable_push(&fx.store, port);
    fx.store.register_instance("web", "i1", r#"{"c_req": [3]}"#);

    let (handle, task) = spawn_poll_loop(fx.exporter);
    for _ in 0..2 {
        let frame = tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .unwrap()
            .unwrap();
        let packet = decode_packet(&frame).unwrap();
        assert!(packet.data.iter().any(|r| r.key == "web.c_req" && r.value == "3"));
    }

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_interrupts_sleep() {
    let clock = ManualClock::from_secs(1_000);
    let fx = fixture(&clock);

    // Disabled, so the loop sits in its default 60s sleep
    let (handle, task) = spawn_poll_loop(fx.exporter);
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
}
