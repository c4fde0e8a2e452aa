//! # dynamo-types: Core types for the Dynamo simulator
//!
//! This crate contains the shared vocabulary of the simulator:
//! - Participant identity ([`NodeId`])
//! - Data model ([`Key`], [`Value`], [`Versioned`])
//! - Causal metadata ([`VectorClock`], [`combine`], [`coalesce`], [`converge`])
//! - Hash-space placement ([`digest128`])

use std::fmt::{self, Debug, Display};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod vclock;

pub use vclock::{ClockError, VectorClock, coalesce, combine, converge};

// ============================================================================
// Identity
// ============================================================================

/// Name of a simulated participant (node or client).
///
/// Names are short strings (`A`, `B`, ..., `AA`, ...) so that event logs
/// and vector clocks stay readable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Data Model
// ============================================================================

/// A key in the replicated store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Position of this key in the 128-bit hash space.
    pub fn digest(&self) -> u128 {
        digest128(self.0.as_bytes())
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An opaque stored value.
///
/// Values are raw bytes; `Display` renders them as (lossy) UTF-8.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Value(Bytes);

impl Value {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

/// A value together with the vector clock it was written under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    pub value: Value,
    pub clock: VectorClock,
}

impl Versioned {
    pub fn new(value: Value, clock: VectorClock) -> Self {
        Self { value, clock }
    }
}

impl Display for Versioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.value, self.clock)
    }
}

// ============================================================================
// Hashing
// ============================================================================

/// Maps arbitrary bytes onto the 128-bit hash space.
///
/// Takes the first 16 bytes of the SHA-256 digest, big-endian. Used for ring
/// point placement and for assigning keys to Merkle leaves, so the two agree
/// on where a key lives.
pub fn digest128(data: &[u8]) -> u128 {
    let digest = Sha256::digest(data);
    let mut head = [0u8; 16];
    head.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest128(b"K1"), digest128(b"K1"));
        assert_ne!(digest128(b"K1"), digest128(b"K2"));
        assert_eq!(Key::from("K1").digest(), digest128(b"K1"));
    }

    #[test]
    fn value_display_is_lossy_utf8() {
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(Value::from("hello").to_string(), "hello");
        assert_eq!(Value::new(vec![0xff, b'a']).to_string(), "\u{fffd}a");
    }

    #[test]
    fn versioned_display_shows_clock() {
        let mut clock = VectorClock::new();
        clock.update(&NodeId::from("A"), 1).unwrap();
        let v = Versioned::new(Value::from(1), clock);
        assert_eq!(v.to_string(), "1@{A:1}");
    }

    #[test]
    fn node_id_survives_json() {
        let id = NodeId::from("AB");
        let json = serde_json::to_string(&id).unwrap();
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert_eq!(back.as_str(), "AB");
    }
}
