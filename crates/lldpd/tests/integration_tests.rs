//! Integration tests for lldpd
//!
//! Drives the dispatcher through its public handle with the loopback capture
//! backend and a paused clock:
//! - Neighbor learning and TTL age-out
//! - Bulk neighbor query pagination
//! - Periodic transmit and frame cache reuse
//! - Capture and transmit failure recovery

use pretty_assertions::assert_eq;
use sonic_lldpd::ethernet::{build_lldp_frame, EthernetFrame};
use sonic_lldpd::{
    ChassisId, ConfigChange, Dispatcher, EngineSettings, Frame, LldpError, LoopbackProvider,
    MacAddress, OperState, PortId, PortInfo, SessionHandle, Tlv, TlvType, TxTiming,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

const PEER_MAC: MacAddress = MacAddress::new([0x52, 0x54, 0x00, 0xaa, 0xbb, 0xcc]);

/// Test fixture: running dispatcher on a loopback capture backend
struct TestSetup {
    handle: SessionHandle,
    provider: LoopbackProvider,
    dispatcher: JoinHandle<()>,
}

impl TestSetup {
    fn new(interval_secs: u64, hold_multiplier: u64) -> Self {
        let provider = LoopbackProvider::new();
        let settings = EngineSettings {
            timing: TxTiming::new(interval_secs, hold_multiplier).unwrap(),
            ..EngineSettings::default()
        };
        let (dispatcher, handle) = Dispatcher::new(Arc::new(provider.clone()), settings);
        Self {
            handle,
            provider,
            dispatcher: tokio::spawn(dispatcher.run()),
        }
    }

    /// Registers `EthernetN` (N = 4 * (if_index - 1)) and reports it up
    async fn port_up(&self, if_index: i32) {
        self.handle.add_port(port(if_index)).await.unwrap();
        self.handle
            .set_link_state(if_index, OperState::Up)
            .await
            .unwrap();
    }

    async fn shutdown(self) {
        self.handle.shutdown();
        self.dispatcher.await.unwrap();
    }
}

fn port_name(if_index: i32) -> String {
    format!("Ethernet{}", (if_index - 1) * 4)
}

fn port(if_index: i32) -> PortInfo {
    PortInfo::new(
        if_index,
        if_index as u32,
        port_name(if_index),
        MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, if_index as u8]),
    )
}

fn neighbor_packet(ttl_secs: u64) -> Vec<u8> {
    let mut frame = Frame::new(
        ChassisId::mac(PEER_MAC),
        PortId::interface_name("swp7"),
        Duration::from_secs(ttl_secs),
    );
    frame
        .optional
        .push(Tlv::new(TlvType::SystemName, b"spine01".to_vec()));
    build_lldp_frame(PEER_MAC, &frame.marshal().unwrap())
}

/// Lets the capture and dispatcher tasks drain their queues
async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_neighbor_ages_out_after_ttl() {
    let setup = TestSetup::new(2, 3);
    setup.port_up(1).await;

    // Our own advertisement carries interval * multiplier
    settle().await;
    let sent = setup.provider.sent("Ethernet0");
    assert_eq!(sent.len(), 1);
    let own = Frame::unmarshal(EthernetFrame::parse(&sent[0]).unwrap().payload).unwrap();
    assert_eq!(own.ttl_secs(), 6);

    setup.provider.inject("Ethernet0", neighbor_packet(6));
    let learned_at = loop {
        let page = setup.handle.get_neighbors(0, 10).await.unwrap();
        if page.entries[0].peer.is_some() {
            break Instant::now();
        }
        sleep(Duration::from_millis(1)).await;
    };

    let page = setup.handle.get_neighbors(0, 10).await.unwrap();
    let peer = page.entries[0].peer.clone().unwrap();
    assert_eq!(peer.chassis_id, "52:54:00:aa:bb:cc");
    assert_eq!(peer.port_id, "swp7");
    assert_eq!(peer.hold_time_secs, 6);
    assert_eq!(peer.link_info.system_name.as_deref(), Some("spine01"));
    assert_eq!(page.entries[0].local_port, "Ethernet0");
    assert!(page.entries[0].enabled);

    sleep_until(learned_at + Duration::from_millis(5900)).await;
    let page = setup.handle.get_neighbors(0, 10).await.unwrap();
    assert!(page.entries[0].peer.is_some());

    sleep_until(learned_at + Duration::from_millis(6100)).await;
    let page = setup.handle.get_neighbors(0, 10).await.unwrap();
    assert_eq!(page.count, 1);
    assert!(page.entries[0].peer.is_none());

    let counters = setup.handle.port_counters(1).await.unwrap();
    assert_eq!(counters.rx_frames, 1);
    assert_eq!(counters.ageouts, 1);

    setup.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_keeps_neighbor() {
    let setup = TestSetup::new(30, 4);
    setup.port_up(1).await;

    setup.provider.inject("Ethernet0", neighbor_packet(5));
    settle().await;
    let start = Instant::now();

    sleep_until(start + Duration::from_secs(4)).await;
    setup.provider.inject("Ethernet0", neighbor_packet(5));
    settle().await;

    sleep_until(start + Duration::from_secs(7)).await;
    let page = setup.handle.get_neighbors(0, 1).await.unwrap();
    assert!(page.entries[0].peer.is_some());

    sleep_until(start + Duration::from_secs(10)).await;
    let page = setup.handle.get_neighbors(0, 1).await.unwrap();
    assert!(page.entries[0].peer.is_none());

    setup.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bulk_query_pagination() {
    let setup = TestSetup::new(30, 4);
    for if_index in 1..=5 {
        setup.port_up(if_index).await;
    }

    let page = setup.handle.get_neighbors(0, 2).await.unwrap();
    assert_eq!(page.count, 2);
    assert_eq!(page.next_index, 2);
    assert_eq!(page.entries[0].local_port, "Ethernet0");
    assert_eq!(page.entries[1].local_port, "Ethernet4");

    let page = setup.handle.get_neighbors(2, 2).await.unwrap();
    assert_eq!(page.count, 2);
    assert_eq!(page.next_index, 4);
    assert_eq!(page.entries[0].if_index, 3);

    let page = setup.handle.get_neighbors(4, 2).await.unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.next_index, 0);
    assert_eq!(page.entries[0].local_port, "Ethernet16");

    // A port going down leaves the iteration
    setup
        .handle
        .set_link_state(2, OperState::Down)
        .await
        .unwrap();
    let page = setup.handle.get_neighbors(0, 10).await.unwrap();
    let ports: Vec<i32> = page.entries.iter().map(|e| e.if_index).collect();
    assert_eq!(ports, vec![1, 3, 4, 5]);

    setup.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_periodic_transmit_reuses_frame() {
    let setup = TestSetup::new(2, 3);
    let start = Instant::now();
    setup.port_up(1).await;

    // Fast start at t=0, then t=2 and t=4
    sleep_until(start + Duration::from_millis(4500)).await;
    let sent = setup.provider.sent("Ethernet0");
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|frame| *frame == sent[0]));
    assert_eq!(setup.handle.port_counters(1).await.unwrap().tx_frames, 3);

    // Down ports stop transmitting
    setup
        .handle
        .set_link_state(1, OperState::Down)
        .await
        .unwrap();
    sleep_until(start + Duration::from_secs(10)).await;
    assert_eq!(setup.provider.sent("Ethernet0").len(), 3);

    setup.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timing_change_rebuilds_frame() {
    let setup = TestSetup::new(2, 3);
    setup.port_up(1).await;
    settle().await;

    setup
        .handle
        .apply_config(ConfigChange::TxTiming {
            interval_secs: 5,
            hold_multiplier: 2,
        })
        .await
        .unwrap();
    let changed_at = Instant::now();

    sleep_until(changed_at + Duration::from_millis(5500)).await;
    let sent = setup.provider.sent("Ethernet0");
    assert_eq!(sent.len(), 2);
    let frame = Frame::unmarshal(EthernetFrame::parse(&sent[1]).unwrap().payload).unwrap();
    assert_eq!(frame.ttl_secs(), 10);

    setup.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_capture_open_failure_and_retry() {
    let setup = TestSetup::new(30, 4);
    setup.provider.set_fail_open("Ethernet0", true);
    setup.handle.add_port(port(1)).await.unwrap();

    let result = setup.handle.set_link_state(1, OperState::Up).await;
    assert!(matches!(result, Err(LldpError::Capture(_))));
    assert_eq!(setup.handle.get_neighbors(0, 10).await.unwrap().count, 0);

    // No internal retry: the port stays dark until the next UP
    sleep(Duration::from_secs(60)).await;
    assert!(setup.provider.sent("Ethernet0").is_empty());

    setup.provider.set_fail_open("Ethernet0", false);
    setup
        .handle
        .set_link_state(1, OperState::Up)
        .await
        .unwrap();
    assert_eq!(setup.handle.get_neighbors(0, 10).await.unwrap().count, 1);
    assert_eq!(setup.provider.open_count("Ethernet0"), 1);

    setup.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transmit_failure_recovers() {
    let setup = TestSetup::new(2, 3);
    setup.provider.set_fail_write("Ethernet0", true);
    setup.port_up(1).await;
    settle().await;

    let counters = setup.handle.port_counters(1).await.unwrap();
    assert_eq!(counters.tx_failures, 1);
    assert_eq!(counters.tx_frames, 0);

    setup.provider.set_fail_write("Ethernet0", false);
    sleep(Duration::from_secs(2)).await;
    let counters = setup.handle.port_counters(1).await.unwrap();
    assert_eq!(counters.tx_frames, 1);
    assert_eq!(setup.provider.sent("Ethernet0").len(), 1);

    setup.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_are_discarded() {
    let setup = TestSetup::new(30, 4);
    setup.port_up(1).await;

    let mut wrong_destination = neighbor_packet(120);
    wrong_destination[..6].copy_from_slice(&[0xff; 6]);
    let mut truncated = neighbor_packet(120);
    truncated.truncate(24);

    setup.provider.inject("Ethernet0", vec![0u8; 8]);
    setup.provider.inject("Ethernet0", wrong_destination);
    setup.provider.inject("Ethernet0", truncated);
    settle().await;

    let counters = setup.handle.port_counters(1).await.unwrap();
    assert_eq!(counters.rx_discarded, 3);
    assert_eq!(counters.rx_frames, 0);
    let page = setup.handle.get_neighbors(0, 1).await.unwrap();
    assert!(page.entries[0].peer.is_none());

    // A good frame after bad ones is learned normally
    setup.provider.inject("Ethernet0", neighbor_packet(120));
    settle().await;
    let page = setup.handle.get_neighbors(0, 1).await.unwrap();
    assert!(page.entries[0].peer.is_some());

    setup.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remove_port_and_shutdown() {
    let setup = TestSetup::new(30, 4);
    setup.port_up(1).await;
    setup.port_up(2).await;
    setup.provider.inject("Ethernet0", neighbor_packet(120));
    settle().await;

    setup.handle.remove_port(1).await.unwrap();
    assert!(matches!(
        setup.handle.port_counters(1).await,
        Err(LldpError::PortNotFound(1))
    ));
    assert_eq!(setup.handle.get_neighbors(0, 10).await.unwrap().count, 1);

    let handle = setup.handle.clone();
    setup.shutdown().await;
    assert!(matches!(
        handle.get_neighbors(0, 10).await,
        Err(LldpError::ChannelClosed(_))
    ));
}
