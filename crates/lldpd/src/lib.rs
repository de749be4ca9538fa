//! LLDP Daemon
//!
//! Link discovery data plane for SONiC switches. For every physical port it
//! captures LLDP frames from directly connected neighbors, keeps the most
//! recent neighbor per port until its TTL runs out, and periodically
//! advertises this switch on the port.
//!
//! A single dispatcher task owns all per-port state. Capture tasks and
//! periodic transmit tasks only feed it through bounded channels.

pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ethernet;
pub mod frame;
pub mod link_state;
#[cfg(feature = "pcap")]
pub mod pcap_capture;
pub mod rx;
pub mod session;
pub mod tlv;
pub mod tx;
pub mod types;

pub use capture::{CaptureConfig, CaptureHandle, CaptureProvider, LoopbackProvider};
pub use config::{ConfigChange, LldpdConfig, PortConfig};
pub use dispatcher::{Dispatcher, SessionHandle};
pub use error::*;
pub use frame::{ChassisId, ChassisIdSubtype, Frame, LinkInfo, PortId, PortIdSubtype};
pub use link_state::{LinkNotification, LinkStateController};
#[cfg(feature = "pcap")]
pub use pcap_capture::PcapProvider;
pub use rx::{ExpiryTimers, RxEngine};
pub use session::{
    EngineSettings, InboundPacket, NeighborEntry, NeighborPage, PeerInfo, PortCounters,
    SessionManager,
};
pub use tlv::{Tlv, TlvType};
pub use tx::{TxEngine, TxTiming};
pub use types::{IfIndex, MacAddress, OperState, PortInfo};
