use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a BLE address was generated, per the Core Spec's address-type rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Public,
    StaticRandom,
    ResolvablePrivate,
    NonResolvablePrivate,
}

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address must have 6 colon-separated octets, got {0}")]
    WrongOctetCount(usize),
    #[error("invalid hex octet {0:?}")]
    InvalidOctet(String),
}

/// A 48-bit device address, canonical form `XX:XX:XX:XX:XX:XX` (upper hex).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 6]);

impl Address {
    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        Address(bytes)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(AddressError::WrongOctetCount(parts.len()));
        }
        let mut out = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            out[i] = u8::from_str_radix(part, 16)
                .map_err(|_| AddressError::InvalidOctet(part.to_string()))?;
        }
        Ok(Address(out))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let addr: Address = "aa:bb:cc:dd:ee:01".parse().unwrap();
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:01");
        assert_eq!(addr, "AA:BB:CC:DD:EE:01".parse().unwrap());
    }

    #[test]
    fn rejects_wrong_octet_count() {
        assert!(matches!(
            "AA:BB:CC".parse::<Address>(),
            Err(AddressError::WrongOctetCount(3))
        ));
    }

    #[test]
    fn serializes_as_canonical_string() {
        let addr: Address = "00:11:22:33:44:55".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"00:11:22:33:44:55\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }
}
