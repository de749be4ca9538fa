//! Core types shared by the codec and the port engine

use crate::error::LldpError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable interface index assigned by the device-abstraction service.
pub type IfIndex = i32;

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Nearest-bridge group address every LLDP frame is sent to.
    pub const LLDP_MULTICAST: MacAddress = MacAddress([0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e]);

    /// The zero/null MAC address (00:00:00:00:00:00).
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    /// Creates a new MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Builds a MAC address from a six-byte slice.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; 6]>::try_from(slice).ok().map(MacAddress)
    }

    /// Returns the raw bytes of the MAC address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if the group bit of the first octet is set.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = LldpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains(':') { ':' } else { '-' };

        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(LldpError::Config(format!("invalid MAC address: {}", s)));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| LldpError::Config(format!("invalid MAC address: {}", s)))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = LldpError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

/// Operational state of a port as reported by link notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperState {
    /// Link is down
    #[default]
    Down,
    /// Link is up and operational
    Up,
}

impl OperState {
    /// Convert state to the notification string form
    pub fn as_str(&self) -> &'static str {
        match self {
            OperState::Up => "UP",
            OperState::Down => "DOWN",
        }
    }
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperState {
    type Err = LldpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("up") {
            Ok(OperState::Up)
        } else if s.eq_ignore_ascii_case("down") {
            Ok(OperState::Down)
        } else {
            Err(LldpError::Config(format!("unknown link state: {}", s)))
        }
    }
}

/// Static description of a physical port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Interface index (registry key)
    pub if_index: IfIndex,
    /// Front-panel port number
    pub port_number: u32,
    /// Interface name (e.g., "Ethernet0"), also used as the port-id
    pub name: String,
    /// Port MAC address, used as source address and chassis-id
    pub mac: MacAddress,
}

impl PortInfo {
    pub fn new(if_index: IfIndex, port_number: u32, name: impl Into<String>, mac: MacAddress) -> Self {
        Self {
            if_index,
            port_number,
            name: name.into(),
            mac,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(mac.to_string(), "00:11:22:33:44:55");

        let hyphen: MacAddress = "00-11-22-33-44-55".parse().unwrap();
        assert_eq!(mac, hyphen);
    }

    #[test]
    fn test_mac_invalid() {
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("gg:11:22:33:44:55".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_lldp_multicast() {
        assert!(MacAddress::LLDP_MULTICAST.is_multicast());
        assert_eq!(MacAddress::LLDP_MULTICAST.to_string(), "01:80:c2:00:00:0e");
        assert!(MacAddress::from_slice(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_oper_state_parse() {
        assert_eq!("UP".parse::<OperState>().unwrap(), OperState::Up);
        assert_eq!("down".parse::<OperState>().unwrap(), OperState::Down);
        assert!("flapping".parse::<OperState>().is_err());
        assert_eq!(OperState::default(), OperState::Down);
    }
}
