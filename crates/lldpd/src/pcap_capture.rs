//! Live capture through libpcap
//!
//! Each port gets two pcap handles on the same device: one blocked in reads
//! by the capture task and one used only for `sendpacket`. The two never
//! share a lock, so a transmit never waits out the reader's timeout.

use crate::capture::{CaptureConfig, CaptureHandle, CaptureProvider};
use crate::error::{LldpError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pcap::{Active, Capture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Opens pcap handles on switch interfaces
#[derive(Debug, Clone, Copy, Default)]
pub struct PcapProvider;

impl PcapProvider {
    fn open_device(interface: &str, config: &CaptureConfig) -> Result<Capture<Active>> {
        let timeout_ms = i32::try_from(config.read_timeout.as_millis()).unwrap_or(i32::MAX);

        Capture::from_device(interface)
            .map_err(|e| LldpError::Capture(format!("Failed to open device {}: {}", interface, e)))?
            .snaplen(config.snaplen)
            .promisc(config.promiscuous)
            .timeout(timeout_ms)
            .open()
            .map_err(|e| LldpError::Capture(format!("Failed to open capture on {}: {}", interface, e)))
    }
}

impl CaptureProvider for PcapProvider {
    fn open(
        &self,
        interface: &str,
        config: &CaptureConfig,
        filter: &str,
    ) -> Result<Arc<dyn CaptureHandle>> {
        let mut reader = Self::open_device(interface, config)?;
        reader.filter(filter, true).map_err(|e| {
            LldpError::Capture(format!(
                "Failed to apply filter '{}' on {}: {}",
                filter, interface, e
            ))
        })?;
        let writer = Self::open_device(interface, config)?;

        info!(interface, filter, "Opened pcap capture");

        Ok(Arc::new(PcapHandle {
            interface: interface.to_string(),
            reader: Arc::new(Mutex::new(Some(reader))),
            writer: Arc::new(Mutex::new(Some(writer))),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

type SharedCapture = Arc<Mutex<Option<Capture<Active>>>>;

struct PcapHandle {
    interface: String,
    reader: SharedCapture,
    writer: SharedCapture,
    closed: Arc<AtomicBool>,
}

impl PcapHandle {
    /// Runs `op` on one of the handles in a blocking task, dropping the
    /// handle instead once the capture is closed.
    async fn with_capture<T, F>(&self, slot: &SharedCapture, what: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Capture<Active>, &str) -> Result<T> + Send + 'static,
    {
        let slot = slot.clone();
        let closed = self.closed.clone();
        let interface = self.interface.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock();
            if closed.load(Ordering::SeqCst) {
                guard.take();
            }
            let active = guard
                .as_mut()
                .ok_or_else(|| LldpError::Capture(format!("capture on {} is closed", interface)))?;
            op(active, &interface)
        })
        .await
        .map_err(|e| LldpError::Capture(format!("capture {} panicked: {}", what, e)))?
    }
}

#[async_trait]
impl CaptureHandle for PcapHandle {
    async fn next_packet(&self) -> Result<Option<Vec<u8>>> {
        // pcap reads block for up to the read timeout
        self.with_capture(&self.reader, "reader", |active, interface| {
            match active.next_packet() {
                Ok(packet) => Ok(Some(packet.data.to_vec())),
                Err(pcap::Error::TimeoutExpired) => Ok(None),
                Err(e) => Err(LldpError::Capture(format!(
                    "Failed to read from {}: {}",
                    interface, e
                ))),
            }
        })
        .await
    }

    async fn write_packet(&self, frame: &[u8]) -> Result<()> {
        let frame = frame.to_vec();
        self.with_capture(&self.writer, "writer", move |active, interface| {
            active
                .sendpacket(frame)
                .map_err(|e| LldpError::Capture(format!("Failed to write to {}: {}", interface, e)))
        })
        .await
    }

    fn close(&self) {
        // The writer is released now; the reader is dropped by its next
        // read, which may still be blocked on the read timeout.
        self.closed.store(true, Ordering::SeqCst);
        self.writer.lock().take();
        debug!(interface = %self.interface, "Closing pcap capture");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn detached_handle() -> PcapHandle {
        PcapHandle {
            interface: "Ethernet0".to_string(),
            reader: Arc::new(Mutex::new(None)),
            writer: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn test_write_does_not_wait_for_reader() {
        let handle = detached_handle();

        // Stands in for a read blocked on the pcap timeout
        let _reading = handle.reader.lock();

        let result = tokio::time::timeout(Duration::from_secs(5), handle.write_packet(&[0u8; 14]))
            .await
            .expect("write blocked behind the reader");
        assert!(matches!(result, Err(LldpError::Capture(_))));
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_io() {
        let handle = detached_handle();
        handle.close();

        assert!(handle.write_packet(&[0u8; 14]).await.is_err());
        assert!(handle.next_packet().await.is_err());
    }
}
