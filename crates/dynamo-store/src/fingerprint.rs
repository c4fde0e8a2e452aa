//! Content fingerprints feeding leaf digests.

use dynamo_types::{Value, VectorClock, Versioned};
use sha2::{Digest, Sha256};

/// Feeds a value's content into a leaf digest.
///
/// Implementations must be deterministic and must write enough framing that
/// distinct values cannot produce the same byte stream.
pub trait Fingerprint {
    fn fingerprint(&self, hasher: &mut Sha256);
}

impl Fingerprint for [u8] {
    fn fingerprint(&self, hasher: &mut Sha256) {
        hasher.update((self.len() as u64).to_be_bytes());
        hasher.update(self);
    }
}

impl Fingerprint for Vec<u8> {
    fn fingerprint(&self, hasher: &mut Sha256) {
        self.as_slice().fingerprint(hasher);
    }
}

impl Fingerprint for String {
    fn fingerprint(&self, hasher: &mut Sha256) {
        self.as_bytes().fingerprint(hasher);
    }
}

impl Fingerprint for u64 {
    fn fingerprint(&self, hasher: &mut Sha256) {
        hasher.update(self.to_be_bytes());
    }
}

impl Fingerprint for Value {
    fn fingerprint(&self, hasher: &mut Sha256) {
        self.as_bytes().fingerprint(hasher);
    }
}

impl Fingerprint for VectorClock {
    fn fingerprint(&self, hasher: &mut Sha256) {
        hasher.update((self.len() as u64).to_be_bytes());
        for (node, counter) in self.iter() {
            node.as_str().as_bytes().fingerprint(hasher);
            counter.fingerprint(hasher);
        }
    }
}

impl Fingerprint for Versioned {
    fn fingerprint(&self, hasher: &mut Sha256) {
        self.value.fingerprint(hasher);
        self.clock.fingerprint(hasher);
    }
}

impl<T: Fingerprint> Fingerprint for Option<T> {
    fn fingerprint(&self, hasher: &mut Sha256) {
        match self {
            None => hasher.update([0u8]),
            Some(inner) => {
                hasher.update([1u8]);
                inner.fingerprint(hasher);
            }
        }
    }
}
