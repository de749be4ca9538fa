//! Ethernet II framing for LLDPDUs

use crate::error::{LldpError, Result};
use crate::types::MacAddress;
use byteorder::{BigEndian, ByteOrder};

/// LLDP EtherType
pub const ETHERTYPE_LLDP: u16 = 0x88cc;
/// 802.1Q VLAN tag EtherType
pub const ETHERTYPE_VLAN: u16 = 0x8100;
/// Destination + source + EtherType
pub const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

/// Capture filter selecting only LLDP frames
pub fn lldp_filter() -> String {
    format!("ether proto 0x{:04x}", ETHERTYPE_LLDP)
}

/// Borrowed view of a captured Ethernet frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetFrame<'a> {
    pub destination: MacAddress,
    pub source: MacAddress,
    pub ethertype: u16,
    pub payload: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    /// Splits a raw frame into header fields and payload.
    ///
    /// A single 802.1Q tag is skipped so the inner EtherType is reported.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < ETHERNET_HEADER_LEN {
            return Err(LldpError::MissingLayer("ethernet"));
        }

        let destination = MacAddress::from_slice(&data[0..6]).ok_or(LldpError::MissingLayer("ethernet"))?;
        let source = MacAddress::from_slice(&data[6..12]).ok_or(LldpError::MissingLayer("ethernet"))?;
        let mut ethertype = BigEndian::read_u16(&data[12..14]);
        let mut offset = ETHERNET_HEADER_LEN;

        if ethertype == ETHERTYPE_VLAN {
            if data.len() < ETHERNET_HEADER_LEN + VLAN_TAG_LEN {
                return Err(LldpError::MissingLayer("vlan"));
            }
            ethertype = BigEndian::read_u16(&data[16..18]);
            offset += VLAN_TAG_LEN;
        }

        Ok(Self {
            destination,
            source,
            ethertype,
            payload: &data[offset..],
        })
    }
}

/// Builds an untagged LLDP frame to the nearest-bridge group address.
pub fn build_lldp_frame(source: MacAddress, lldpdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETHERNET_HEADER_LEN + lldpdu.len());
    frame.extend_from_slice(MacAddress::LLDP_MULTICAST.as_bytes());
    frame.extend_from_slice(source.as_bytes());
    let mut ethertype = [0u8; 2];
    BigEndian::write_u16(&mut ethertype, ETHERTYPE_LLDP);
    frame.extend_from_slice(&ethertype);
    frame.extend_from_slice(lldpdu);
    frame
}
