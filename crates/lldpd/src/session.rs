//! Port session registry
//!
//! The [`SessionManager`] owns one [`PortSession`] per registered port and is
//! itself owned by the dispatcher task, so neighbor caches and TX caches are
//! only ever touched from that task. Two fields cross task boundaries and are
//! locked: the operational state (read by the periodic TX task) and the
//! capture slot (read by the capture task to notice teardown).

use crate::capture::{CaptureConfig, CaptureHandle, CaptureProvider};
use crate::config::ConfigChange;
use crate::error::{LldpError, Result};
use crate::ethernet::lldp_filter;
use crate::frame::LinkInfo;
use crate::rx::{ExpiryTimers, RxEngine};
use crate::tx::{TxEngine, TxTiming};
use crate::types::{IfIndex, OperState, PortInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Global LLDP enable
    pub enabled: bool,
    pub timing: TxTiming,
    pub capture: CaptureConfig,
    /// Capacity of the inbound, trigger and command channels
    pub channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timing: TxTiming::default(),
            capture: CaptureConfig::default(),
            channel_capacity: 1024,
        }
    }
}

/// A captured frame on its way to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub if_index: IfIndex,
    pub data: Vec<u8>,
}

/// Per-port frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortCounters {
    pub rx_frames: u64,
    pub rx_discarded: u64,
    pub tx_frames: u64,
    pub tx_failures: u64,
    pub ageouts: u64,
}

/// Neighbor learned on a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub chassis_id: String,
    pub port_id: String,
    pub hold_time_secs: u16,
    pub link_info: LinkInfo,
}

/// One row of the bulk neighbor query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub local_port: String,
    pub if_index: IfIndex,
    pub enabled: bool,
    /// `None` when no neighbor is currently learned
    pub peer: Option<PeerInfo>,
}

/// Result page of the bulk neighbor query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborPage {
    /// Where the next page starts; 0 when iteration is complete
    pub next_index: usize,
    pub count: usize,
    pub entries: Vec<NeighborEntry>,
}

#[derive(Clone)]
struct ActiveCapture {
    generation: u64,
    handle: Arc<dyn CaptureHandle>,
}

type CaptureSlot = Arc<RwLock<Option<ActiveCapture>>>;

/// Live state of one port
pub struct PortSession {
    info: PortInfo,
    enabled: bool,
    oper_state: Arc<RwLock<OperState>>,
    capture: CaptureSlot,
    rx: RxEngine,
    tx: TxEngine,
    counters: PortCounters,
}

impl PortSession {
    fn new(info: PortInfo, timing: TxTiming) -> Self {
        Self {
            info,
            enabled: true,
            oper_state: Arc::new(RwLock::new(OperState::Down)),
            capture: Arc::new(RwLock::new(None)),
            rx: RxEngine::new(),
            tx: TxEngine::new(timing),
            counters: PortCounters::default(),
        }
    }

    pub fn info(&self) -> &PortInfo {
        &self.info
    }

    pub fn oper_state(&self) -> OperState {
        *self.oper_state.read()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.read().is_some()
    }

    pub fn rx(&self) -> &RxEngine {
        &self.rx
    }

    pub fn tx(&self) -> &TxEngine {
        &self.tx
    }

    fn capture_handle(&self) -> Option<Arc<dyn CaptureHandle>> {
        self.capture.read().as_ref().map(|active| active.handle.clone())
    }

    fn neighbor_entry(&self) -> NeighborEntry {
        let peer = self.rx.neighbor().map(|frame| PeerInfo {
            chassis_id: frame.chassis_id.display_id(),
            port_id: frame.port_id.display_id(),
            hold_time_secs: frame.ttl_secs(),
            link_info: self.rx.link_info().cloned().unwrap_or_default(),
        });

        NeighborEntry {
            local_port: self.info.name.clone(),
            if_index: self.info.if_index,
            enabled: self.enabled,
            peer,
        }
    }
}

/// Registry of port sessions
pub struct SessionManager {
    provider: Arc<dyn CaptureProvider>,
    settings: EngineSettings,
    sessions: HashMap<IfIndex, PortSession>,
    /// Ports with an active capture, in the order they came up
    up_ports: Vec<IfIndex>,
    timers: ExpiryTimers,
    inbound: mpsc::Sender<InboundPacket>,
    triggers: mpsc::Sender<IfIndex>,
    exit: broadcast::Sender<()>,
    next_generation: u64,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn CaptureProvider>,
        settings: EngineSettings,
        inbound: mpsc::Sender<InboundPacket>,
        triggers: mpsc::Sender<IfIndex>,
        exit: broadcast::Sender<()>,
    ) -> Self {
        Self {
            provider,
            settings,
            sessions: HashMap::new(),
            up_ports: Vec::new(),
            timers: ExpiryTimers::new(),
            inbound,
            triggers,
            exit,
            next_generation: 0,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn session(&self, if_index: IfIndex) -> Option<&PortSession> {
        self.sessions.get(&if_index)
    }

    pub fn up_ports(&self) -> &[IfIndex] {
        &self.up_ports
    }

    pub fn timers(&self) -> &ExpiryTimers {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut ExpiryTimers {
        &mut self.timers
    }

    /// Registers a port. The session starts operationally down.
    pub fn add_port(&mut self, info: PortInfo) -> Result<()> {
        if self.sessions.contains_key(&info.if_index) {
            return Err(LldpError::Config(format!(
                "port {} (ifindex {}) already registered",
                info.name, info.if_index
            )));
        }
        info!(if_index = info.if_index, port = %info.name, mac = %info.mac, "Port registered");
        let if_index = info.if_index;
        self.sessions
            .insert(if_index, PortSession::new(info, self.settings.timing));
        Ok(())
    }

    /// Stops the port and destroys its session.
    pub fn remove_port(&mut self, if_index: IfIndex) -> Result<()> {
        self.stop(if_index)?;
        if let Some(mut session) = self.sessions.remove(&if_index) {
            session.rx.cancel_expiry(&mut self.timers);
            info!(if_index, port = %session.info.name, "Port removed");
        }
        Ok(())
    }

    pub fn set_oper_state(&mut self, if_index: IfIndex, state: OperState) -> Result<()> {
        let session = self
            .sessions
            .get(&if_index)
            .ok_or(LldpError::PortNotFound(if_index))?;
        *session.oper_state.write() = state;
        Ok(())
    }

    /// Opens the port's capture and spawns its RX and TX tasks.
    ///
    /// Does nothing when the port is not up, is disabled, or is already
    /// capturing. A failed open leaves the port without RX/TX until the next
    /// start.
    pub fn start(&mut self, if_index: IfIndex) -> Result<()> {
        let global_enabled = self.settings.enabled;
        let session = self
            .sessions
            .get_mut(&if_index)
            .ok_or(LldpError::PortNotFound(if_index))?;

        if session.oper_state() != OperState::Up {
            debug!(if_index, "Port not up, not starting");
            return Ok(());
        }
        if !global_enabled || !session.enabled {
            debug!(if_index, "LLDP disabled on port, not starting");
            return Ok(());
        }
        if session.is_capturing() {
            debug!(if_index, "Port already started");
            return Ok(());
        }

        let filter = lldp_filter();
        let handle = self
            .provider
            .open(&session.info.name, &self.settings.capture, &filter)
            .map_err(|e| {
                error!(if_index, port = %session.info.name, error = %e, "Failed to acquire capture");
                e
            })?;

        self.next_generation += 1;
        let generation = self.next_generation;
        *session.capture.write() = Some(ActiveCapture { generation, handle });

        tokio::spawn(run_capture(
            if_index,
            generation,
            session.capture.clone(),
            self.inbound.clone(),
            self.exit.subscribe(),
        ));
        session
            .tx
            .start_periodic(if_index, self.triggers.clone(), session.oper_state.clone());

        if !self.up_ports.contains(&if_index) {
            self.up_ports.push(if_index);
        }
        info!(if_index, port = %session.info.name, "LLDP started");

        // Advertise right away instead of waiting a full interval
        if self.triggers.try_send(if_index).is_err() {
            debug!(if_index, "Trigger queue full, first frame waits for the timer");
        }
        Ok(())
    }

    /// Stops TX, releases the capture and drops the cached frame.
    ///
    /// Stopping a stopped port is a no-op. The learned neighbor is left to
    /// age out.
    pub fn stop(&mut self, if_index: IfIndex) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&if_index)
            .ok_or(LldpError::PortNotFound(if_index))?;

        session.tx.stop_periodic();
        let released = session.capture.write().take();
        if let Some(active) = &released {
            active.handle.close();
        }
        session.tx.invalidate();
        self.up_ports.retain(|i| *i != if_index);

        if released.is_some() {
            info!(if_index, port = %session.info.name, "LLDP stopped");
        }
        Ok(())
    }

    /// Feeds a captured frame to the port's neighbor cache
    pub fn handle_inbound(&mut self, packet: InboundPacket) {
        let Some(session) = self.sessions.get_mut(&packet.if_index) else {
            debug!(if_index = packet.if_index, "Frame for unknown port dropped");
            return;
        };
        if !session.is_capturing() {
            debug!(if_index = packet.if_index, "Frame for stopped port dropped");
            return;
        }

        match session.rx.process(&packet.data) {
            Ok(hold) => {
                session
                    .rx
                    .refresh_expiry(&mut self.timers, packet.if_index, hold);
                session.counters.rx_frames += 1;
                debug!(
                    if_index = packet.if_index,
                    hold_secs = hold.as_secs(),
                    "Neighbor refreshed"
                );
            }
            Err(e) => {
                session.counters.rx_discarded += 1;
                if e.is_malformed_input() {
                    debug!(if_index = packet.if_index, error = %e, "Discarding frame");
                } else {
                    warn!(if_index = packet.if_index, error = %e, "Discarding frame");
                }
            }
        }
    }

    /// Sends this node's frame on the port
    pub async fn handle_transmit(&mut self, if_index: IfIndex) {
        let Some(session) = self.sessions.get_mut(&if_index) else {
            return;
        };
        let Some(handle) = session.capture_handle() else {
            debug!(if_index, "Transmit trigger for stopped port ignored");
            return;
        };

        let mac = session.info.mac;
        let frame = session.tx.send_frame(mac, &session.info.name);
        if frame.is_empty() {
            session.counters.tx_failures += 1;
            return;
        }

        let result = handle.write_packet(&frame).await;

        let Some(session) = self.sessions.get_mut(&if_index) else {
            return;
        };
        match result {
            Ok(()) => session.counters.tx_frames += 1,
            Err(e) => {
                warn!(if_index, port = %session.info.name, error = %e, "Failed to transmit LLDP frame");
                session.tx.invalidate();
                session.counters.tx_failures += 1;
            }
        }
    }

    /// Clears a neighbor whose hold time ran out
    pub fn handle_expiry(&mut self, if_index: IfIndex) {
        if let Some(session) = self.sessions.get_mut(&if_index) {
            if session.rx.expire() {
                session.counters.ageouts += 1;
                info!(if_index, port = %session.info.name, "Neighbor aged out");
            }
        }
    }

    /// Pages through the up ports in the order they came up.
    ///
    /// An empty page, including one asked for with `count == 0`, always
    /// reports `next_index == 0`.
    pub fn get_neighbors(&self, start: usize, count: usize) -> NeighborPage {
        let total = self.up_ports.len();
        if start >= total || count == 0 {
            return NeighborPage::default();
        }

        let end = start.saturating_add(count).min(total);
        let entries: Vec<NeighborEntry> = self.up_ports[start..end]
            .iter()
            .filter_map(|if_index| self.sessions.get(if_index))
            .map(PortSession::neighbor_entry)
            .collect();

        NeighborPage {
            next_index: if end >= total { 0 } else { end },
            count: entries.len(),
            entries,
        }
    }

    pub fn port_counters(&self, if_index: IfIndex) -> Result<PortCounters> {
        self.sessions
            .get(&if_index)
            .map(|session| session.counters)
            .ok_or(LldpError::PortNotFound(if_index))
    }

    pub fn apply_config(&mut self, change: ConfigChange) -> Result<()> {
        info!(?change, "Applying configuration change");
        match change {
            ConfigChange::GlobalEnable(enabled) => {
                self.settings.enabled = enabled;
                let ports: Vec<IfIndex> = self.sessions.keys().copied().collect();
                for if_index in ports {
                    self.restart_or_stop(if_index, enabled);
                }
            }
            ConfigChange::PortEnable { if_index, enabled } => {
                let session = self
                    .sessions
                    .get_mut(&if_index)
                    .ok_or(LldpError::PortNotFound(if_index))?;
                session.enabled = enabled;
                self.restart_or_stop(if_index, enabled);
            }
            ConfigChange::TxTiming {
                interval_secs,
                hold_multiplier,
            } => {
                let timing = TxTiming::new(interval_secs, hold_multiplier)?;
                self.settings.timing = timing;
                for (if_index, session) in self.sessions.iter_mut() {
                    session.tx.set_timing(timing);
                    if session.is_capturing() {
                        session.tx.start_periodic(
                            *if_index,
                            self.triggers.clone(),
                            session.oper_state.clone(),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn restart_or_stop(&mut self, if_index: IfIndex, enabled: bool) {
        let result = if enabled {
            self.start(if_index)
        } else {
            self.stop(if_index)
        };
        if let Err(e) = result {
            warn!(if_index, error = %e, "Port did not follow configuration change");
        }
    }

    /// Stops every port and disarms all expiry timers
    pub fn shutdown(&mut self) {
        let ports: Vec<IfIndex> = self.sessions.keys().copied().collect();
        for if_index in ports {
            let _ = self.stop(if_index);
            if let Some(session) = self.sessions.get_mut(&if_index) {
                session.rx.cancel_expiry(&mut self.timers);
            }
        }
        info!("All ports stopped");
    }
}

fn current_handle(slot: &CaptureSlot, generation: u64) -> Option<Arc<dyn CaptureHandle>> {
    slot.read()
        .as_ref()
        .filter(|active| active.generation == generation)
        .map(|active| active.handle.clone())
}

/// Reads frames from one port's capture until the capture is replaced or
/// released, the dispatcher goes away, or exit is signalled.
async fn run_capture(
    if_index: IfIndex,
    generation: u64,
    slot: CaptureSlot,
    inbound: mpsc::Sender<InboundPacket>,
    mut exit: broadcast::Receiver<()>,
) {
    debug!(if_index, generation, "Capture task started");
    loop {
        match exit.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => {}
            _ => break,
        }
        let Some(handle) = current_handle(&slot, generation) else {
            break;
        };

        match handle.next_packet().await {
            Ok(Some(data)) => {
                if current_handle(&slot, generation).is_none() {
                    break;
                }
                if inbound.send(InboundPacket { if_index, data }).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                if current_handle(&slot, generation).is_some() {
                    warn!(if_index, error = %e, "Capture read failed");
                }
                break;
            }
        }
    }
    debug!(if_index, generation, "Capture task exiting");
}
