//! LLDP type-length-value codec
//!
//! Every LLDPDU field is a TLV with a 16-bit big-endian header:
//!
//! ```text
//!  15          9 8                 0
//! +-------------+-------------------+----------------+
//! | type (7 bit)| length (9 bit)    | value (length) |
//! +-------------+-------------------+----------------+
//! ```

use crate::error::{LldpError, Result};
use byteorder::{BigEndian, ByteOrder};

/// Size of the type/length header
pub const TLV_HEADER_LEN: usize = 2;
/// Largest encodable type code
pub const MAX_TLV_TYPE: u8 = 127;
/// Largest encodable value length
pub const MAX_TLV_LENGTH: usize = 511;

const LENGTH_MASK: u16 = 0x01ff;
const TYPE_SHIFT: u16 = 9;

/// Well-known TLV type codes (IEEE 802.1AB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    End = 0,
    ChassisId = 1,
    PortId = 2,
    Ttl = 3,
    PortDescription = 4,
    SystemName = 5,
    SystemDescription = 6,
    SystemCapabilities = 7,
    ManagementAddress = 8,
    OrganizationSpecific = 127,
}

impl From<TlvType> for u8 {
    fn from(t: TlvType) -> u8 {
        t as u8
    }
}

/// A single TLV.
///
/// `length` is carried explicitly so that encode can reject values that do
/// not match their declared length instead of silently fixing them up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tlv_type: u8,
    pub length: u16,
    pub value: Vec<u8>,
}

impl Tlv {
    /// Creates a TLV whose length is taken from `value`.
    pub fn new(tlv_type: impl Into<u8>, value: Vec<u8>) -> Self {
        let length = u16::try_from(value.len()).unwrap_or(u16::MAX);
        Self {
            tlv_type: tlv_type.into(),
            length,
            value,
        }
    }

    /// The end-of-LLDPDU marker (type 0, length 0).
    pub fn end() -> Self {
        Self::new(TlvType::End, Vec::new())
    }

    pub fn is_end(&self) -> bool {
        self.tlv_type == TlvType::End as u8 && self.length == 0
    }

    /// Header plus value length on the wire.
    pub fn encoded_len(&self) -> usize {
        TLV_HEADER_LEN + self.value.len()
    }

    fn check(&self) -> Result<()> {
        if self.tlv_type > MAX_TLV_TYPE {
            return Err(LldpError::InvalidTlv(format!(
                "type {} exceeds {}",
                self.tlv_type, MAX_TLV_TYPE
            )));
        }
        if usize::from(self.length) != self.value.len() {
            return Err(LldpError::InvalidTlv(format!(
                "length {} does not match value of {} bytes",
                self.length,
                self.value.len()
            )));
        }
        if self.value.len() > MAX_TLV_LENGTH {
            return Err(LldpError::InvalidTlv(format!(
                "length {} exceeds {}",
                self.value.len(),
                MAX_TLV_LENGTH
            )));
        }
        Ok(())
    }

    /// Encodes the TLV into a new buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Appends the encoded TLV to `buf`. Nothing is written on error.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.check()?;
        let mut header = [0u8; TLV_HEADER_LEN];
        BigEndian::write_u16(
            &mut header,
            (u16::from(self.tlv_type) << TYPE_SHIFT) | self.length,
        );
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.value);
        Ok(())
    }

    /// Decodes one TLV from the front of `bytes`.
    ///
    /// Returns the TLV and the number of bytes it occupied.
    pub fn decode(bytes: &[u8]) -> Result<(Tlv, usize)> {
        if bytes.len() < TLV_HEADER_LEN {
            return Err(LldpError::UnexpectedEnd {
                needed: TLV_HEADER_LEN,
                available: bytes.len(),
            });
        }

        let header = BigEndian::read_u16(&bytes[..TLV_HEADER_LEN]);
        let tlv_type = (header >> TYPE_SHIFT) as u8;
        let length = header & LENGTH_MASK;

        let total = TLV_HEADER_LEN + usize::from(length);
        if bytes.len() < total {
            return Err(LldpError::UnexpectedEnd {
                needed: total,
                available: bytes.len(),
            });
        }

        let tlv = Tlv {
            tlv_type,
            length,
            value: bytes[TLV_HEADER_LEN..total].to_vec(),
        };
        Ok((tlv, total))
    }
}

/// Length of the LLDPDU prefix up to and including the first end marker.
///
/// Returns `None` when the buffer has no end marker or a TLV is truncated
/// before one is reached. Used to strip Ethernet minimum-size padding.
pub fn lldpdu_len(bytes: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while offset < bytes.len() {
        let (tlv, used) = Tlv::decode(&bytes[offset..]).ok()?;
        offset += used;
        if tlv.is_end() {
            return Some(offset);
        }
    }
    None
}
