//! Transmit path: frame construction, frame cache and periodic trigger

use crate::error::{LldpError, Result};
use crate::ethernet::build_lldp_frame;
use crate::frame::{ChassisId, Frame, PortId, MAX_TTL_SECS};
use crate::types::{IfIndex, MacAddress, OperState};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub const DEFAULT_TX_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_TX_HOLD_MULTIPLIER: u64 = 4;

/// Transmit interval and hold multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxTiming {
    interval_secs: u64,
    hold_multiplier: u64,
}

impl Default for TxTiming {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_TX_INTERVAL_SECS,
            hold_multiplier: DEFAULT_TX_HOLD_MULTIPLIER,
        }
    }
}

impl TxTiming {
    pub fn new(interval_secs: u64, hold_multiplier: u64) -> Result<Self> {
        if interval_secs == 0 {
            return Err(LldpError::Config("tx interval must be non-zero".to_string()));
        }
        if hold_multiplier == 0 {
            return Err(LldpError::Config(
                "tx hold multiplier must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            interval_secs,
            hold_multiplier,
        })
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn hold_multiplier(&self) -> u64 {
        self.hold_multiplier
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Advertised TTL: interval times multiplier, capped at 65535
    pub fn ttl_secs(&self) -> u64 {
        self.interval_secs
            .saturating_mul(self.hold_multiplier)
            .min(MAX_TTL_SECS)
    }
}

/// This node's outgoing frame for one port
#[derive(Debug)]
pub struct TxEngine {
    timing: TxTiming,
    // Present only when it holds the last successfully built frame
    cached_frame: Option<Vec<u8>>,
    builds: u64,
    periodic: Option<JoinHandle<()>>,
}

impl TxEngine {
    pub fn new(timing: TxTiming) -> Self {
        Self {
            timing,
            cached_frame: None,
            builds: 0,
            periodic: None,
        }
    }

    pub fn timing(&self) -> TxTiming {
        self.timing
    }

    /// Builds the link-layer frame and caches it.
    ///
    /// Returns an empty vector when the frame cannot be built; the cache is
    /// cleared in that case.
    pub fn build_frame(&mut self, source: MacAddress, port_name: &str) -> Vec<u8> {
        let frame = Frame::new(
            ChassisId::mac(source),
            PortId::interface_name(port_name),
            Duration::from_secs(self.timing.ttl_secs()),
        );

        match frame.marshal() {
            Ok(lldpdu) => {
                let bytes = build_lldp_frame(source, &lldpdu);
                self.cached_frame = Some(bytes.clone());
                self.builds += 1;
                bytes
            }
            Err(e) => {
                warn!(port = port_name, error = %e, "Failed to build LLDP frame");
                self.cached_frame = None;
                Vec::new()
            }
        }
    }

    /// Cached frame if valid, otherwise a freshly built one
    pub fn send_frame(&mut self, source: MacAddress, port_name: &str) -> Vec<u8> {
        match &self.cached_frame {
            Some(bytes) => bytes.clone(),
            None => self.build_frame(source, port_name),
        }
    }

    pub fn invalidate(&mut self) {
        self.cached_frame = None;
    }

    pub fn use_cached_frame(&self) -> bool {
        self.cached_frame.is_some()
    }

    /// Number of frames built so far
    pub fn build_count(&self) -> u64 {
        self.builds
    }

    /// Applies new timing. The cached frame carries the old TTL, so it is dropped.
    pub fn set_timing(&mut self, timing: TxTiming) {
        self.timing = timing;
        self.invalidate();
    }

    /// Spawns the periodic trigger, replacing a running one.
    ///
    /// Every interval the port's index is sent on `triggers`. Ticks are
    /// skipped while the port is not operationally up.
    pub fn start_periodic(
        &mut self,
        if_index: IfIndex,
        triggers: mpsc::Sender<IfIndex>,
        oper_state: Arc<RwLock<OperState>>,
    ) {
        self.stop_periodic();

        let period = self.timing.interval();
        self.periodic = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !is_up(&oper_state) {
                    debug!(if_index, "Port not up, skipping periodic transmit");
                    continue;
                }
                if triggers.send(if_index).await.is_err() {
                    break;
                }
            }
        }));
    }

    pub fn stop_periodic(&mut self) {
        if let Some(task) = self.periodic.take() {
            task.abort();
        }
    }

    pub fn is_periodic_running(&self) -> bool {
        self.periodic
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for TxEngine {
    fn drop(&mut self) {
        self.stop_periodic();
    }
}

fn is_up(oper_state: &RwLock<OperState>) -> bool {
    *oper_state.read() == OperState::Up
}
