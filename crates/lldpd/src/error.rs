//! Error types for lldpd
//!
//! Codec and receive-path errors are local to one frame: the frame is dropped,
//! the port's neighbor cache is untouched and the next frame is handled
//! independently. Runtime errors (capture, channels) are local to one port.

use thiserror::Error;

/// LLDP daemon errors
#[derive(Error, Debug)]
pub enum LldpError {
    /// TLV violates the header layout (type > 127, length mismatch or > 511)
    #[error("Invalid TLV: {0}")]
    InvalidTlv(String),

    /// Input ended before a complete TLV header or value
    #[error("Unexpected end of input: needed {needed} bytes, {available} available")]
    UnexpectedEnd { needed: usize, available: usize },

    /// Frame cannot be marshalled
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Fewer than the four mandatory TLVs were decoded
    #[error("Incomplete frame: {0} TLVs decoded, at least 4 required")]
    IncompleteFrame(usize),

    /// First TLV is not a well-formed chassis-id
    #[error("Invalid chassis-id info: {0}")]
    InvalidChassisIdInfo(String),

    /// Second TLV is not a well-formed port-id
    #[error("Invalid port-id info: {0}")]
    InvalidPortIdInfo(String),

    /// Third TLV is not a two-byte TTL
    #[error("Invalid TTL info: {0}")]
    InvalidTtlInfo(String),

    /// Last TLV is not the empty end-of-frame marker
    #[error("Invalid end-of-frame info: {0}")]
    InvalidEndInfo(String),

    /// Destination MAC is not the LLDP nearest-bridge group address
    #[error("Invalid destination address: {0}")]
    InvalidDestination(String),

    /// Captured packet lacks the Ethernet or LLDP layer
    #[error("Missing protocol layer: {0}")]
    MissingLayer(&'static str),

    /// Frame decoded but failed the receive sanity checks
    #[error("Frame verification failed: {0}")]
    VerificationFailed(String),

    /// Capture handle could not be opened, filtered, read or written
    #[error("Capture error: {0}")]
    Capture(String),

    /// No session is registered for the interface index
    #[error("Port not found: ifindex {0}")]
    PortNotFound(i32),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The dispatcher is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LldpError {
    /// True for errors caused by a malformed or foreign inbound frame.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            LldpError::InvalidTlv(_)
                | LldpError::UnexpectedEnd { .. }
                | LldpError::IncompleteFrame(_)
                | LldpError::InvalidChassisIdInfo(_)
                | LldpError::InvalidPortIdInfo(_)
                | LldpError::InvalidTtlInfo(_)
                | LldpError::InvalidEndInfo(_)
                | LldpError::InvalidDestination(_)
                | LldpError::MissingLayer(_)
                | LldpError::VerificationFailed(_)
        )
    }
}

/// Result type for lldpd operations
pub type Result<T> = std::result::Result<T, LldpError>;
