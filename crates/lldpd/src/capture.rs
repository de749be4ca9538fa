//! Capture boundary: live packet handles bound to one interface
//!
//! The engine only sees the [`CaptureProvider`] / [`CaptureHandle`] traits.
//! Live capture through libpcap lives in `pcap_capture` (feature `pcap`);
//! [`LoopbackProvider`] is an in-memory backend used when no capture library
//! is compiled in and by the test suite.

use crate::error::{LldpError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Default snapshot length (maximum bytes per packet)
pub const DEFAULT_SNAPLEN: i32 = 65535;
/// Default read timeout; bounds how long a capture task can miss an exit signal
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Parameters for opening a live capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Maximum bytes to capture per packet
    pub snaplen: i32,
    /// Enable promiscuous mode
    pub promiscuous: bool,
    /// Idle timeout of a single read
    pub read_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            promiscuous: true,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// A live capture bound to a single interface.
///
/// The frame sequence is lazy and not restartable: once closed, a new handle
/// must be opened.
#[async_trait]
pub trait CaptureHandle: Send + Sync {
    /// Waits for the next frame. `Ok(None)` means the read timeout elapsed.
    async fn next_packet(&self) -> Result<Option<Vec<u8>>>;

    /// Writes a complete link-layer frame.
    async fn write_packet(&self, frame: &[u8]) -> Result<()>;

    /// Releases the underlying resource. Later reads and writes fail.
    fn close(&self);
}

/// Opens capture handles on named interfaces
pub trait CaptureProvider: Send + Sync {
    fn open(
        &self,
        interface: &str,
        config: &CaptureConfig,
        filter: &str,
    ) -> Result<Arc<dyn CaptureHandle>>;
}

struct LoopbackLink {
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
    filter: Option<String>,
    opens: usize,
}

impl LoopbackLink {
    fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
            filter: None,
            opens: 0,
        }
    }
}

#[derive(Default)]
struct LoopbackState {
    links: HashMap<String, LoopbackLink>,
    failing_opens: HashSet<String>,
}

/// In-memory capture backend.
///
/// Frames injected for an interface are returned by its handle's reads;
/// frames written through a handle are recorded per interface.
#[derive(Clone, Default)]
pub struct LoopbackProvider {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a frame for the interface. Frames injected before the first
    /// open are delivered once a handle reads.
    pub fn inject(&self, interface: &str, frame: Vec<u8>) {
        let mut state = self.state.lock();
        let link = state
            .links
            .entry(interface.to_string())
            .or_insert_with(LoopbackLink::new);
        let _ = link.inbound_tx.send(frame);
    }

    /// Frames written on the interface so far
    pub fn sent(&self, interface: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .links
            .get(interface)
            .map(|link| link.sent.lock().clone())
            .unwrap_or_default()
    }

    /// Number of successful opens on the interface
    pub fn open_count(&self, interface: &str) -> usize {
        self.state
            .lock()
            .links
            .get(interface)
            .map(|link| link.opens)
            .unwrap_or(0)
    }

    /// Filter applied by the most recent open
    pub fn filter(&self, interface: &str) -> Option<String> {
        self.state
            .lock()
            .links
            .get(interface)
            .and_then(|link| link.filter.clone())
    }

    /// Makes opens on the interface fail until cleared
    pub fn set_fail_open(&self, interface: &str, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing_opens.insert(interface.to_string());
        } else {
            state.failing_opens.remove(interface);
        }
    }

    /// Makes writes on the interface fail until cleared
    pub fn set_fail_write(&self, interface: &str, fail: bool) {
        let mut state = self.state.lock();
        let link = state
            .links
            .entry(interface.to_string())
            .or_insert_with(LoopbackLink::new);
        link.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl CaptureProvider for LoopbackProvider {
    fn open(
        &self,
        interface: &str,
        config: &CaptureConfig,
        filter: &str,
    ) -> Result<Arc<dyn CaptureHandle>> {
        let mut state = self.state.lock();
        if state.failing_opens.contains(interface) {
            return Err(LldpError::Capture(format!(
                "Failed to open device {}",
                interface
            )));
        }

        let link = state
            .links
            .entry(interface.to_string())
            .or_insert_with(LoopbackLink::new);
        link.opens += 1;
        link.filter = Some(filter.to_string());
        debug!(interface, filter, "Opened loopback capture");

        Ok(Arc::new(LoopbackHandle {
            interface: interface.to_string(),
            inbound: link.inbound_rx.clone(),
            sent: link.sent.clone(),
            fail_writes: link.fail_writes.clone(),
            read_timeout: config.read_timeout,
            closed: AtomicBool::new(false),
        }))
    }
}

struct LoopbackHandle {
    interface: String,
    inbound: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
    read_timeout: Duration,
    closed: AtomicBool,
}

impl LoopbackHandle {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LldpError::Capture(format!(
                "capture on {} is closed",
                self.interface
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CaptureHandle for LoopbackHandle {
    async fn next_packet(&self) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let mut inbound = self.inbound.lock().await;
        match tokio::time::timeout(self.read_timeout, inbound.recv()).await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(LldpError::Capture(format!(
                "loopback link {} is gone",
                self.interface
            ))),
            Err(_) => Ok(None),
        }
    }

    async fn write_packet(&self, frame: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LldpError::Capture(format!(
                "write on {} failed",
                self.interface
            )));
        }
        self.sent.lock().push(frame.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
