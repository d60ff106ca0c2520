use std::cmp::Ordering;
use std::convert::From;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::*;

/// An [Address] represents an INSTEON device address. These are 3 bytes
/// and are commonly represented as hex numbers separated by '.', e.g.
/// '2b.a1.11'.
///
/// Addresses are totally ordered and hashable so they can key the device
/// registry and the broadcast-suppression cache (spec.md §3). Serializes as
/// its `AA.BB.CC` string form so device database files stay human-readable.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 3]);

impl Address {
    /// Renders the address as a single big-endian integer, e.g. for
    /// admin/CLI paths that accept a decimal device id.
    pub fn as_u32(self) -> u32 {
        (u32::from(self.0[0]) << 16) | (u32::from(self.0[1]) << 8) | u32::from(self.0[2])
    }

    pub fn bytes(self) -> [u8; 3] {
        self.0
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl From<[u8; 3]> for Address {
    fn from(b: [u8; 3]) -> Self {
        Address(b)
    }
}

impl<'a> From<&'a [u8]> for Address {
    fn from(b: &'a [u8]) -> Self {
        assert_eq!(b.len(), 3);

        let mut address = [0u8; 3];
        address.copy_from_slice(b);
        Address(address)
    }
}

impl From<u32> for Address {
    fn from(v: u32) -> Self {
        Address([(v >> 16) as u8, (v >> 8) as u8, v as u8])
    }
}

impl FromStr for Address {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, <Self as FromStr>::Err> {
        let mut buf = [0u8; 3];

        let pieces: Vec<&str> = s.split('.').collect();
        if pieces.len() != 3 {
            return Err(Error::InvalidAddress);
        }

        for (idx, piece) in pieces.iter().enumerate() {
            let b = u8::from_str_radix(piece, 16);
            if b.is_err() {
                return Err(Error::InvalidAddress);
            }

            buf[idx] = b.unwrap();
        }

        Ok(Address(buf))
    }
}

impl From<Address> for [u8; 3] {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl std::convert::TryFrom<String> for Address {
    type Error = Error;
    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Address::from_str(&s)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02x}.{:02x}.{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!(
            Address([0x11, 0x22, 0x33]),
            Address::from_str("11.22.33").unwrap()
        );
    }

    #[test]
    fn parse_no_dots() {
        assert_eq!(Err(Error::InvalidAddress), Address::from_str("112233"));
    }

    #[test]
    fn round_trip_render_parse() {
        for raw in [[0x00, 0x00, 0x00], [0x11, 0x22, 0x33], [0xff, 0xab, 0x01]] {
            let a = Address::from(raw);
            let s = a.to_string();
            assert_eq!(a, Address::from_str(&s).unwrap());
        }
    }

    #[test]
    fn total_order() {
        let a = Address::from([0x11, 0x22, 0x33]);
        let b = Address::from([0x11, 0x22, 0x34]);
        assert!(a < b);
    }

    #[test]
    fn integer_round_trip() {
        let a = Address::from([0x11, 0x22, 0x33]);
        assert_eq!(a, Address::from(a.as_u32()));
    }
}
