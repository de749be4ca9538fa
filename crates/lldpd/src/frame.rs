//! LLDPDU model: mandatory chassis-id / port-id / TTL plus opaque optional TLVs
//!
//! The LLDPDU layout is positional. Chassis-id, port-id and TTL must come
//! first in that order and the end marker must close the unit, so decoding
//! validates the fixed prefix and suffix once the TLVs are tokenised.

use crate::error::{LldpError, Result};
use crate::tlv::{Tlv, TlvType, TLV_HEADER_LEN};
use crate::types::MacAddress;
use byteorder::{BigEndian, ByteOrder};
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// Largest TTL that fits the two-byte TTL TLV
pub const MAX_TTL_SECS: u64 = u16::MAX as u64;
/// Largest chassis-id / port-id subtype defined by 802.1AB
pub const MAX_ID_SUBTYPE: u8 = 7;

const TTL_VALUE_LEN: u16 = 2;

/// Chassis-id subtype (802.1AB table 8-2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChassisIdSubtype {
    Reserved,
    ChassisComponent,
    InterfaceAlias,
    PortComponent,
    MacAddress,
    NetworkAddress,
    InterfaceName,
    LocallyAssigned,
    Other(u8),
}

impl ChassisIdSubtype {
    pub fn as_u8(&self) -> u8 {
        match self {
            ChassisIdSubtype::Reserved => 0,
            ChassisIdSubtype::ChassisComponent => 1,
            ChassisIdSubtype::InterfaceAlias => 2,
            ChassisIdSubtype::PortComponent => 3,
            ChassisIdSubtype::MacAddress => 4,
            ChassisIdSubtype::NetworkAddress => 5,
            ChassisIdSubtype::InterfaceName => 6,
            ChassisIdSubtype::LocallyAssigned => 7,
            ChassisIdSubtype::Other(v) => *v,
        }
    }

    fn encoding(&self) -> IdEncoding {
        match self {
            ChassisIdSubtype::MacAddress => IdEncoding::Mac,
            ChassisIdSubtype::NetworkAddress => IdEncoding::Network,
            ChassisIdSubtype::Reserved | ChassisIdSubtype::Other(_) => IdEncoding::Opaque,
            _ => IdEncoding::Text,
        }
    }
}

impl From<u8> for ChassisIdSubtype {
    fn from(v: u8) -> Self {
        match v {
            0 => ChassisIdSubtype::Reserved,
            1 => ChassisIdSubtype::ChassisComponent,
            2 => ChassisIdSubtype::InterfaceAlias,
            3 => ChassisIdSubtype::PortComponent,
            4 => ChassisIdSubtype::MacAddress,
            5 => ChassisIdSubtype::NetworkAddress,
            6 => ChassisIdSubtype::InterfaceName,
            7 => ChassisIdSubtype::LocallyAssigned,
            other => ChassisIdSubtype::Other(other),
        }
    }
}

/// Port-id subtype (802.1AB table 8-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortIdSubtype {
    Reserved,
    InterfaceAlias,
    PortComponent,
    MacAddress,
    NetworkAddress,
    InterfaceName,
    AgentCircuitId,
    LocallyAssigned,
    Other(u8),
}

impl PortIdSubtype {
    pub fn as_u8(&self) -> u8 {
        match self {
            PortIdSubtype::Reserved => 0,
            PortIdSubtype::InterfaceAlias => 1,
            PortIdSubtype::PortComponent => 2,
            PortIdSubtype::MacAddress => 3,
            PortIdSubtype::NetworkAddress => 4,
            PortIdSubtype::InterfaceName => 5,
            PortIdSubtype::AgentCircuitId => 6,
            PortIdSubtype::LocallyAssigned => 7,
            PortIdSubtype::Other(v) => *v,
        }
    }

    fn encoding(&self) -> IdEncoding {
        match self {
            PortIdSubtype::MacAddress => IdEncoding::Mac,
            PortIdSubtype::NetworkAddress => IdEncoding::Network,
            PortIdSubtype::AgentCircuitId | PortIdSubtype::Reserved | PortIdSubtype::Other(_) => {
                IdEncoding::Opaque
            }
            _ => IdEncoding::Text,
        }
    }
}

impl From<u8> for PortIdSubtype {
    fn from(v: u8) -> Self {
        match v {
            0 => PortIdSubtype::Reserved,
            1 => PortIdSubtype::InterfaceAlias,
            2 => PortIdSubtype::PortComponent,
            3 => PortIdSubtype::MacAddress,
            4 => PortIdSubtype::NetworkAddress,
            5 => PortIdSubtype::InterfaceName,
            6 => PortIdSubtype::AgentCircuitId,
            7 => PortIdSubtype::LocallyAssigned,
            other => PortIdSubtype::Other(other),
        }
    }
}

enum IdEncoding {
    Mac,
    Network,
    Text,
    Opaque,
}

fn render_id(encoding: IdEncoding, id: &[u8]) -> String {
    match encoding {
        IdEncoding::Mac => match MacAddress::from_slice(id) {
            Some(mac) => mac.to_string(),
            None => hex(id),
        },
        // First byte is the IANA address family
        IdEncoding::Network => match id.split_first() {
            Some((&1, addr)) if addr.len() == 4 => {
                Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]).to_string()
            }
            Some((&2, addr)) => match <[u8; 16]>::try_from(addr) {
                Ok(octets) => Ipv6Addr::from(octets).to_string(),
                Err(_) => hex(id),
            },
            _ => hex(id),
        },
        IdEncoding::Text => String::from_utf8_lossy(id).into_owned(),
        IdEncoding::Opaque => hex(id),
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Chassis identifier TLV contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChassisId {
    pub subtype: ChassisIdSubtype,
    pub id: Vec<u8>,
}

impl ChassisId {
    pub fn new(subtype: ChassisIdSubtype, id: impl Into<Vec<u8>>) -> Self {
        Self {
            subtype,
            id: id.into(),
        }
    }

    /// Chassis-id keyed on a MAC address
    pub fn mac(mac: MacAddress) -> Self {
        Self::new(ChassisIdSubtype::MacAddress, mac.as_bytes().to_vec())
    }

    /// Human-readable identifier, rendered according to the subtype
    pub fn display_id(&self) -> String {
        render_id(self.subtype.encoding(), &self.id)
    }

    fn to_tlv(&self) -> Tlv {
        let mut value = Vec::with_capacity(1 + self.id.len());
        value.push(self.subtype.as_u8());
        value.extend_from_slice(&self.id);
        Tlv::new(TlvType::ChassisId, value)
    }
}

/// Port identifier TLV contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortId {
    pub subtype: PortIdSubtype,
    pub id: Vec<u8>,
}

impl PortId {
    pub fn new(subtype: PortIdSubtype, id: impl Into<Vec<u8>>) -> Self {
        Self {
            subtype,
            id: id.into(),
        }
    }

    /// Port-id keyed on an interface name
    pub fn interface_name(name: &str) -> Self {
        Self::new(PortIdSubtype::InterfaceName, name.as_bytes().to_vec())
    }

    /// Human-readable identifier, rendered according to the subtype
    pub fn display_id(&self) -> String {
        render_id(self.subtype.encoding(), &self.id)
    }

    fn to_tlv(&self) -> Tlv {
        let mut value = Vec::with_capacity(1 + self.id.len());
        value.push(self.subtype.as_u8());
        value.extend_from_slice(&self.id);
        Tlv::new(TlvType::PortId, value)
    }
}

/// A decoded LLDPDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub chassis_id: ChassisId,
    pub port_id: PortId,
    pub ttl: Duration,
    /// TLVs between TTL and the end marker, in wire order
    pub optional: Vec<Tlv>,
}

impl Frame {
    pub fn new(chassis_id: ChassisId, port_id: PortId, ttl: Duration) -> Self {
        Self {
            chassis_id,
            port_id,
            ttl,
            optional: Vec::new(),
        }
    }

    /// TTL in whole seconds, saturated to the wire maximum
    pub fn ttl_secs(&self) -> u16 {
        u16::try_from(self.ttl.as_secs()).unwrap_or(u16::MAX)
    }

    /// Encodes the LLDPDU (without any link-layer header).
    pub fn marshal(&self) -> Result<Vec<u8>> {
        if self.chassis_id.id.is_empty() {
            return Err(LldpError::InvalidFrame("chassis-id is absent".to_string()));
        }
        if self.port_id.id.is_empty() {
            return Err(LldpError::InvalidFrame("port-id is absent".to_string()));
        }
        if self.ttl.subsec_nanos() != 0 {
            return Err(LldpError::InvalidFrame(format!(
                "TTL {:?} is not a whole number of seconds",
                self.ttl
            )));
        }
        if self.ttl.as_secs() > MAX_TTL_SECS {
            return Err(LldpError::InvalidFrame(format!(
                "TTL {}s exceeds {}s",
                self.ttl.as_secs(),
                MAX_TTL_SECS
            )));
        }

        let mut ttl_value = vec![0u8; usize::from(TTL_VALUE_LEN)];
        BigEndian::write_u16(&mut ttl_value, self.ttl_secs());

        let chassis = self.chassis_id.to_tlv();
        let port = self.port_id.to_tlv();
        let ttl = Tlv::new(TlvType::Ttl, ttl_value);

        let total = chassis.encoded_len()
            + port.encoded_len()
            + ttl.encoded_len()
            + self.optional.iter().map(Tlv::encoded_len).sum::<usize>()
            + TLV_HEADER_LEN;

        let mut buf = Vec::with_capacity(total);
        chassis.encode_into(&mut buf)?;
        port.encode_into(&mut buf)?;
        ttl.encode_into(&mut buf)?;
        for tlv in &self.optional {
            tlv.encode_into(&mut buf)?;
        }
        Tlv::end().encode_into(&mut buf)?;

        debug_assert_eq!(buf.len(), total);
        Ok(buf)
    }

    /// Decodes an LLDPDU that spans the whole of `bytes`.
    pub fn unmarshal(bytes: &[u8]) -> Result<Frame> {
        let mut tlvs = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let (tlv, used) = Tlv::decode(&bytes[offset..])?;
            offset += used;
            tlvs.push(tlv);
        }

        if tlvs.len() < 4 {
            return Err(LldpError::IncompleteFrame(tlvs.len()));
        }

        let chassis = &tlvs[0];
        if chassis.tlv_type != TlvType::ChassisId as u8 {
            return Err(LldpError::InvalidChassisIdInfo(format!(
                "first TLV has type {}",
                chassis.tlv_type
            )));
        }
        if chassis.value.len() < 2 {
            return Err(LldpError::InvalidChassisIdInfo(format!(
                "length {} too short",
                chassis.value.len()
            )));
        }

        let port = &tlvs[1];
        if port.tlv_type != TlvType::PortId as u8 {
            return Err(LldpError::InvalidPortIdInfo(format!(
                "second TLV has type {}",
                port.tlv_type
            )));
        }
        if port.value.len() < 2 {
            return Err(LldpError::InvalidPortIdInfo(format!(
                "length {} too short",
                port.value.len()
            )));
        }

        let ttl = &tlvs[2];
        if ttl.tlv_type != TlvType::Ttl as u8 || ttl.length != TTL_VALUE_LEN {
            return Err(LldpError::InvalidTtlInfo(format!(
                "third TLV has type {} length {}",
                ttl.tlv_type, ttl.length
            )));
        }

        let last = tlvs.len() - 1;
        if !tlvs[last].is_end() {
            return Err(LldpError::InvalidEndInfo(format!(
                "last TLV has type {} length {}",
                tlvs[last].tlv_type, tlvs[last].length
            )));
        }

        let ttl_secs = BigEndian::read_u16(&ttl.value);
        let chassis_id = ChassisId::new(chassis.value[0].into(), chassis.value[1..].to_vec());
        let port_id = PortId::new(port.value[0].into(), port.value[1..].to_vec());

        tlvs.truncate(last);
        let optional = tlvs.split_off(3);

        Ok(Frame {
            chassis_id,
            port_id,
            ttl: Duration::from_secs(u64::from(ttl_secs)),
            optional,
        })
    }

    /// Decodes the well-known optional TLVs
    pub fn link_info(&self) -> LinkInfo {
        LinkInfo::from_tlvs(&self.optional)
    }
}

/// System capabilities TLV contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub system: u16,
    pub enabled: u16,
}

impl Capabilities {
    pub const BRIDGE: u16 = 0x0004;
    pub const ROUTER: u16 = 0x0010;
}

/// Optional-TLV view of a neighbor.
///
/// Malformed optional TLVs are skipped; they never reject the frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInfo {
    pub port_description: Option<String>,
    pub system_name: Option<String>,
    pub system_description: Option<String>,
    pub capabilities: Option<Capabilities>,
    /// TLVs not decoded above
    pub other: Vec<Tlv>,
}

impl LinkInfo {
    pub fn from_tlvs(tlvs: &[Tlv]) -> Self {
        let mut info = LinkInfo::default();
        for tlv in tlvs {
            let text = || String::from_utf8_lossy(&tlv.value).into_owned();
            match tlv.tlv_type {
                t if t == TlvType::PortDescription as u8 => info.port_description = Some(text()),
                t if t == TlvType::SystemName as u8 => info.system_name = Some(text()),
                t if t == TlvType::SystemDescription as u8 => {
                    info.system_description = Some(text())
                }
                t if t == TlvType::SystemCapabilities as u8 => {
                    if tlv.value.len() == 4 {
                        info.capabilities = Some(Capabilities {
                            system: BigEndian::read_u16(&tlv.value[0..2]),
                            enabled: BigEndian::read_u16(&tlv.value[2..4]),
                        });
                    }
                }
                _ => info.other.push(tlv.clone()),
            }
        }
        info
    }

    pub fn is_empty(&self) -> bool {
        *self == LinkInfo::default()
    }
}
