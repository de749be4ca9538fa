//! Receive path: per-port neighbor cache with TTL expiry
//!
//! An [`RxEngine`] is either idle (no neighbor) or learned (one neighbor and
//! an armed expiry timer). Expiry timers for every port live in one
//! [`ExpiryTimers`] queue polled by the dispatcher, so a fired timer becomes
//! an event on the dispatch loop rather than a callback touching the cache.

use crate::error::{LldpError, Result};
use crate::ethernet::{EthernetFrame, ETHERTYPE_LLDP};
use crate::frame::{Frame, LinkInfo, MAX_ID_SUBTYPE, MAX_TTL_SECS};
use crate::tlv::lldpdu_len;
use crate::types::{IfIndex, MacAddress};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::time::delay_queue::{DelayQueue, Key};

/// One-shot expiry timers keyed by interface index
#[derive(Debug)]
pub struct ExpiryTimers {
    queue: DelayQueue<IfIndex>,
}

impl Default for ExpiryTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpiryTimers {
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    fn arm(&mut self, if_index: IfIndex, hold: Duration) -> Key {
        self.queue.insert(if_index, hold)
    }

    fn reset(&mut self, key: &Key, hold: Duration) {
        self.queue.reset(key, hold);
    }

    fn cancel(&mut self, key: &Key) {
        self.queue.remove(key);
    }

    /// Polls for the next fired timer. `Ready(None)` when nothing is armed.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<IfIndex>> {
        self.queue
            .poll_expired(cx)
            .map(|expired| expired.map(|e| e.into_inner()))
    }

    /// Waits for the next fired timer
    pub async fn next_expired(&mut self) -> Option<IfIndex> {
        std::future::poll_fn(|cx| self.poll_expired(cx)).await
    }
}

/// Neighbor state of one port
#[derive(Debug, Default)]
pub struct RxEngine {
    last_frame: Option<Frame>,
    last_link_info: Option<LinkInfo>,
    last_source: Option<MacAddress>,
    expiry: Option<Key>,
}

impl RxEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanity checks applied after structural decoding and before storing.
    pub fn verify(frame: &Frame) -> Result<()> {
        let chassis_subtype = frame.chassis_id.subtype.as_u8();
        if chassis_subtype > MAX_ID_SUBTYPE {
            return Err(LldpError::VerificationFailed(format!(
                "chassis-id subtype {} out of range",
                chassis_subtype
            )));
        }
        let port_subtype = frame.port_id.subtype.as_u8();
        if port_subtype > MAX_ID_SUBTYPE {
            return Err(LldpError::VerificationFailed(format!(
                "port-id subtype {} out of range",
                port_subtype
            )));
        }
        if frame.ttl.as_secs() > MAX_TTL_SECS {
            return Err(LldpError::VerificationFailed(format!(
                "TTL {}s out of range",
                frame.ttl.as_secs()
            )));
        }
        Ok(())
    }

    /// Parses a captured packet and stores the neighbor it describes.
    ///
    /// Returns the neighbor's hold time. On error the stored neighbor is
    /// left as it was.
    pub fn process(&mut self, packet: &[u8]) -> Result<Duration> {
        let ethernet = EthernetFrame::parse(packet)?;
        if ethernet.destination != MacAddress::LLDP_MULTICAST {
            return Err(LldpError::InvalidDestination(ethernet.destination.to_string()));
        }
        if ethernet.ethertype != ETHERTYPE_LLDP {
            return Err(LldpError::MissingLayer("lldp"));
        }

        // Drop link-layer padding after the end marker
        let payload = match lldpdu_len(ethernet.payload) {
            Some(len) => &ethernet.payload[..len],
            None => ethernet.payload,
        };

        let frame = Frame::unmarshal(payload)?;
        Self::verify(&frame)?;

        let hold = frame.ttl;
        self.last_link_info = Some(frame.link_info());
        self.last_frame = Some(frame);
        self.last_source = Some(ethernet.source);
        Ok(hold)
    }

    /// Arms the expiry timer, or moves the deadline of the armed one.
    pub fn refresh_expiry(&mut self, timers: &mut ExpiryTimers, if_index: IfIndex, hold: Duration) {
        match &self.expiry {
            Some(key) => timers.reset(key, hold),
            None => self.expiry = Some(timers.arm(if_index, hold)),
        }
    }

    /// Clears the neighbor after its timer fired. The timer is already gone
    /// from the queue.
    pub fn expire(&mut self) -> bool {
        self.expiry = None;
        self.last_link_info = None;
        self.last_source = None;
        self.last_frame.take().is_some()
    }

    /// Disarms the timer without touching the neighbor
    pub fn cancel_expiry(&mut self, timers: &mut ExpiryTimers) {
        if let Some(key) = self.expiry.take() {
            timers.cancel(&key);
        }
    }

    pub fn neighbor(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    pub fn link_info(&self) -> Option<&LinkInfo> {
        self.last_link_info.as_ref()
    }

    pub fn source(&self) -> Option<MacAddress> {
        self.last_source
    }

    pub fn is_learned(&self) -> bool {
        self.last_frame.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethernet::build_lldp_frame;
    use crate::frame::{ChassisId, ChassisIdSubtype, PortId};
    use crate::tlv::{Tlv, TlvType};
    use tokio::time::{timeout, Instant};

    const PEER: MacAddress = MacAddress::new([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);

    fn peer_packet(ttl_secs: u64) -> Vec<u8> {
        let mut frame = Frame::new(
            ChassisId::mac(PEER),
            PortId::interface_name("swp1"),
            Duration::from_secs(ttl_secs),
        );
        frame
            .optional
            .push(Tlv::new(TlvType::SystemName, b"leaf01".to_vec()));
        build_lldp_frame(PEER, &frame.marshal().unwrap())
    }

    #[test]
    fn test_process_stores_neighbor() {
        let mut rx = RxEngine::new();
        let hold = rx.process(&peer_packet(120)).unwrap();

        assert_eq!(hold, Duration::from_secs(120));
        assert!(rx.is_learned());
        assert_eq!(rx.source(), Some(PEER));
        assert_eq!(rx.neighbor().unwrap().port_id.display_id(), "swp1");
        assert_eq!(
            rx.link_info().unwrap().system_name.as_deref(),
            Some("leaf01")
        );
    }

    #[test]
    fn test_process_strips_padding() {
        let mut packet = peer_packet(120);
        packet.resize(packet.len() + 20, 0);

        let mut rx = RxEngine::new();
        assert!(rx.process(&packet).is_ok());
    }

    #[test]
    fn test_process_rejects_wrong_destination() {
        let mut packet = peer_packet(120);
        packet[..6].copy_from_slice(&[0xff; 6]);

        let mut rx = RxEngine::new();
        assert!(matches!(
            rx.process(&packet),
            Err(LldpError::InvalidDestination(_))
        ));
        assert!(!rx.is_learned());
    }

    #[test]
    fn test_process_rejects_foreign_ethertype() {
        let mut packet = peer_packet(120);
        packet[12..14].copy_from_slice(&[0x08, 0x00]);

        let mut rx = RxEngine::new();
        assert!(matches!(
            rx.process(&packet),
            Err(LldpError::MissingLayer("lldp"))
        ));
    }

    #[test]
    fn test_bad_frame_keeps_previous_neighbor() {
        let mut rx = RxEngine::new();
        rx.process(&peer_packet(120)).unwrap();

        let mut truncated = peer_packet(30);
        truncated.truncate(20);
        assert!(rx.process(&truncated).is_err());
        assert_eq!(rx.neighbor().unwrap().ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_verify_rejects_reserved_subtype() {
        let frame = Frame::new(
            ChassisId::new(ChassisIdSubtype::Other(9), vec![1, 2]),
            PortId::interface_name("swp1"),
            Duration::from_secs(10),
        );
        assert!(matches!(
            RxEngine::verify(&frame),
            Err(LldpError::VerificationFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_neighbor_expires_after_ttl() {
        let mut timers = ExpiryTimers::new();
        let mut rx = RxEngine::new();
        let start = Instant::now();

        let hold = rx.process(&peer_packet(5)).unwrap();
        rx.refresh_expiry(&mut timers, 7, hold);
        assert_eq!(timers.len(), 1);

        assert!(timeout(Duration::from_millis(4900), timers.next_expired())
            .await
            .is_err());
        assert!(rx.is_learned());

        assert_eq!(timers.next_expired().await, Some(7));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(rx.expire());
        assert!(!rx.is_learned());
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_moves_deadline() {
        let mut timers = ExpiryTimers::new();
        let mut rx = RxEngine::new();
        let start = Instant::now();

        let hold = rx.process(&peer_packet(5)).unwrap();
        rx.refresh_expiry(&mut timers, 7, hold);

        tokio::time::advance(Duration::from_secs(4)).await;
        let hold = rx.process(&peer_packet(5)).unwrap();
        rx.refresh_expiry(&mut timers, 7, hold);
        assert_eq!(timers.len(), 1);

        // Past the original 5s mark the neighbor is still there
        assert!(timeout(Duration::from_millis(4900), timers.next_expired())
            .await
            .is_err());
        assert!(start.elapsed() > Duration::from_secs(5));
        assert!(rx.is_learned());

        assert_eq!(timers.next_expired().await, Some(7));
        assert!(start.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_expiry() {
        let mut timers = ExpiryTimers::new();
        let mut rx = RxEngine::new();
        let hold = rx.process(&peer_packet(5)).unwrap();
        rx.refresh_expiry(&mut timers, 3, hold);

        rx.cancel_expiry(&mut timers);
        assert!(timers.is_empty());
        assert!(rx.is_learned());
    }
}
