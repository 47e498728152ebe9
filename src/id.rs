//! Identifiers and the XOR distance metric.
//!
//! Everything in the overlay is addressed in one 256-bit key space:
//! [`NodeId`] for peers, [`ContentId`] for content, and [`Distance`] as the
//! ordering key between any two points. Content addresses are derived from
//! opaque content keys with BLAKE3 via [`derive_content_id`].

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::OverlayError;

/// Width of every identifier in the overlay key space, in bytes.
pub const ID_LEN: usize = 32;

/// A 256-bit peer identifier, the Kademlia key of the overlay.
///
/// Derived from a peer's identity record by the external record layer; this
/// crate treats it as an opaque fixed-width value with a distance metric.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; ID_LEN]);

/// A 256-bit content address, compared against node identifiers and radii
/// with the same XOR metric.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; ID_LEN]);

/// XOR distance between two points of the key space, ordered as a 256-bit
/// big-endian unsigned integer. Also the representation of a node's
/// [data radius](crate::store::RadiusStore).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Distance([u8; ID_LEN]);

/// Derive the content address for an opaque content key.
///
/// The derivation is the single shared key→ID mapping: every component that
/// compares content against node identifiers or radii goes through it.
pub fn derive_content_id(content_key: &[u8]) -> ContentId {
    ContentId(*blake3::hash(content_key).as_bytes())
}

fn xor(a: &[u8; ID_LEN], b: &[u8; ID_LEN]) -> [u8; ID_LEN] {
    let mut out = [0u8; ID_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

fn parse_hex_array(s: &str) -> Result<[u8; ID_LEN], OverlayError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let raw = hex::decode(stripped)
        .map_err(|e| OverlayError::InvalidInput(format!("invalid hex identifier: {e}")))?;
    let bytes: [u8; ID_LEN] = raw.as_slice().try_into().map_err(|_| {
        OverlayError::InvalidInput(format!("identifier must be {ID_LEN} bytes, got {}", raw.len()))
    })?;
    Ok(bytes)
}

impl NodeId {
    /// Wrap raw identifier bytes.
    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// XOR distance to another node.
    pub fn distance(&self, other: &NodeId) -> Distance {
        Distance(xor(&self.0, &other.0))
    }

    /// XOR distance to a content address.
    pub fn distance_to_content(&self, content: &ContentId) -> Distance {
        Distance(xor(&self.0, &content.0))
    }

    /// Log2 distance class to another node: the bit length of the XOR
    /// distance, in `1..=256`. `None` when the identifiers are equal.
    pub fn log2_distance(&self, other: &NodeId) -> Option<u16> {
        self.distance(other).log2()
    }

    /// Parse a hex identifier, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, OverlayError> {
        parse_hex_array(s).map(Self)
    }

    /// `0x`-prefixed lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl ContentId {
    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, OverlayError> {
        parse_hex_array(s).map(Self)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl Distance {
    /// Zero distance: a point compared against itself.
    pub const ZERO: Distance = Distance([0u8; ID_LEN]);

    /// The whole key space. A radius of `MAX` claims responsibility for
    /// every content address.
    pub const MAX: Distance = Distance([0xffu8; ID_LEN]);

    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ID_LEN]
    }

    /// Bit length of the distance viewed as a big-endian integer, in
    /// `1..=256`. `None` for the zero distance.
    pub fn log2(&self) -> Option<u16> {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                let leading = (i as u32) * 8 + byte.leading_zeros();
                return Some((256 - leading) as u16);
            }
        }
        None
    }

    /// The distance divided by two (one-bit right shift). Used by radius
    /// policies to narrow a node's responsibility interval.
    pub fn halved(&self) -> Distance {
        let mut out = [0u8; ID_LEN];
        let mut carry = 0u8;
        for (i, byte) in self.0.iter().enumerate() {
            out[i] = (byte >> 1) | (carry << 7);
            carry = byte & 1;
        }
        Distance(out)
    }

    pub fn from_hex(s: &str) -> Result<Self, OverlayError> {
        parse_hex_array(s).map(Self)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

fn fmt_short(bytes: &[u8; ID_LEN], name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{name}(0x{}…)", hex::encode(&bytes[..4]))
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_short(&self.0, "NodeId", f)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_short(&self.0, "ContentId", f)
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_short(&self.0, "Distance", f)
    }
}

impl From<[u8; ID_LEN]> for NodeId {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<[u8; ID_LEN]> for ContentId {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<[u8; ID_LEN]> for Distance {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }
}

// Identifiers cross serialization boundaries as 0x-prefixed hex strings,
// including as JSON map keys in lookup traces.
macro_rules! hex_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $ty::from_hex(&s).map_err(D::Error::custom)
            }
        }
    };
}

hex_serde!(NodeId);
hex_serde!(ContentId);
hex_serde!(Distance);
