//! Cryptographic hash type using Blake3.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte cryptographic hash using Blake3.
///
/// Used for out values (commitments), in values (their preimages) and the
/// per-miner signature seed. All hashing operations are deterministic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Zero hash (all bytes are 0x00).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create hash from bytes using Blake3.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes);
        Self(*hash.as_bytes())
    }

    /// Wrap raw hash bytes without hashing them.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a Hash from a raw byte slice (without hashing).
    ///
    /// Returns `None` if the slice is not exactly 32 bytes long.
    pub fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Create hash from multiple byte slices.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Convert hash to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to bytes array.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Interpret the first 8 bytes as a little-endian `i64`.
    ///
    /// This is the signature-to-integer conversion every node must agree on
    /// when deriving next-round orders.
    pub fn to_i64(&self) -> i64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        i64::from_le_bytes(head)
    }

    /// Byte-wise XOR of two hashes (no hashing).
    pub fn xor(&self, other: &Hash) -> Hash {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Hash(out)
    }

    /// Hash of the XOR of two hashes.
    pub fn xor_and_hash(&self, other: &Hash) -> Hash {
        Hash::from_bytes(self.xor(other).as_bytes())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Hash {
    /// Hash whose first 8 bytes are `value` in little-endian, rest zero.
    ///
    /// Lets tests pick the integer a signature maps to.
    pub fn with_i64_prefix(value: i64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        Self(bytes)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Hash({}..{})", &hex[..8], &hex[56..])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
