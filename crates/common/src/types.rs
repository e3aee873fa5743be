//! Primitive value types shared across the router core.
//!
//! Everything in here is a plain value type: `Clone`/`Copy` where the width
//! allows, serde via hex strings for byte arrays, deterministic `Display`
//! output suitable for logs and error messages.

use hex::{decode as hex_decode, encode as hex_encode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Basis-point denominator: 100% == 10_000 BP.
pub const TOTAL_BASIS_POINTS: u16 = 10_000;

/// Sentinel target-share value meaning "unset — split the remainder equally".
///
/// The sentinel deliberately equals [`TOTAL_BASIS_POINTS`]: a module can never
/// legitimately be configured to take 100% of the pool on its own, so the
/// value is free to carry the "please compute" meaning.
pub const TARGET_SHARE_UNSET: u16 = TOTAL_BASIS_POINTS;

/// 20-byte account/contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(b: [u8; 20]) -> Self {
        Address(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Address::ZERO
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex_encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, HexParseError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex_decode(stripped)?;
        if bytes.len() != 20 {
            return Err(HexParseError::BadLength {
                expected: 20,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Address(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.to_hex()).finish()
    }
}

impl FromStr for Address {
    type Err = HexParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 48-byte validator public key (BLS12-381 G1 point, uncompressed prefix form).
///
/// The router never interprets the key; it only validates the width and
/// forwards the bytes to the withdrawal-request sink and module backends.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 48]);

impl PublicKey {
    pub fn from_bytes(b: [u8; 48]) -> Self {
        PublicKey(b)
    }

    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex_encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, HexParseError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex_decode(stripped)?;
        if bytes.len() != 48 {
            return Err(HexParseError::BadLength {
                expected: 48,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 48];
        arr.copy_from_slice(&bytes);
        Ok(PublicKey(arr))
    }
}

impl fmt::Display for PublicKey {
    // Truncated form for logs: 0x909cca45..d3
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{}..{}",
            hex_encode(&self.0[..4]),
            hex_encode(&self.0[47..])
        )
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_hex()).finish()
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<PublicKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Failure parsing a fixed-width hex value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HexParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    BadLength { expected: usize, actual: usize },
}

/// A narrowing conversion would lose information.
///
/// Every narrowing site in the accounting core goes through the checked
/// helpers below and fails the enclosing operation instead of wrapping.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("value {value} does not fit in a {target_bits}-bit field")]
pub struct CastError {
    pub value: u128,
    pub target_bits: u32,
}

/// Checked narrowing to `u64` (counters and block-distance fields).
pub fn checked_u64(value: u128) -> Result<u64, CastError> {
    u64::try_from(value).map_err(|_| CastError {
        value,
        target_bits: 64,
    })
}
