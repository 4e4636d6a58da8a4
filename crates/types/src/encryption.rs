//! Pairwise encryption of secret shares between miners.
//!
//! Construction (fixed, every node uses exactly this):
//!
//! 1. Key agreement: X25519-style Diffie-Hellman on the Edwards form of the
//!    miners' Ed25519 keys. The local scalar is the clamped lower half of
//!    `SHA-512(seed)`, i.e. the same scalar the Ed25519 public key commits to,
//!    so `shared = a·(b·B) = b·(a·B)`.
//! 2. Key derivation: HKDF-SHA256 over the compressed shared point with a
//!    fixed salt and info string, yielding a 32-byte key.
//! 3. AEAD: ChaCha20-Poly1305. The 96-bit nonce is the first 12 bytes of
//!    `blake3::keyed_hash(key, plaintext)` (synthetic IV), so encryption is
//!    deterministic and a nonce is only ever repeated for an identical
//!    plaintext.
//!
//! Wire format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//!
//! Only the addressed recipient ever decrypts a piece, so nothing outside
//! this module depends on the exact construction.

use crate::{KeyPair, PublicKey};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::traits::IsIdentity;
use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};

const KDF_SALT: &[u8] = b"dpos-secret-share-encryption/v1";
const KDF_INFO: &[u8] = b"chacha20poly1305 key";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Errors raised while encrypting or decrypting a share.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncryptionError {
    /// The peer's public key is not a valid curve point.
    #[error("invalid peer public key")]
    InvalidPublicKey,

    /// The agreed secret is degenerate (small-order peer key).
    #[error("degenerate shared secret")]
    WeakSharedSecret,

    /// Ciphertext shorter than nonce plus tag.
    #[error("ciphertext too short: {0} bytes")]
    Truncated(usize),

    /// AEAD encryption or authentication failed.
    #[error("AEAD failure")]
    Aead,
}

/// Encrypt `plaintext` from `sender` to `recipient`.
pub fn encrypt_share(
    sender: &KeyPair,
    recipient: &PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let key = derive_key(sender, recipient)?;
    let nonce = synthetic_nonce(&key, plaintext);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| EncryptionError::Aead)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a piece that `sender` encrypted for `recipient`.
pub fn decrypt_share(
    recipient: &KeyPair,
    sender: &PublicKey,
    ciphertext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if ciphertext.len() < NONCE_LEN + TAG_LEN {
        return Err(EncryptionError::Truncated(ciphertext.len()));
    }
    let key = derive_key(recipient, sender)?;
    let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| EncryptionError::Aead)?;

    if synthetic_nonce(&key, &plaintext).as_slice() != nonce {
        return Err(EncryptionError::Aead);
    }
    Ok(plaintext)
}

fn derive_key(own: &KeyPair, peer: &PublicKey) -> Result<[u8; 32], EncryptionError> {
    let point = CompressedEdwardsY(peer.0)
        .decompress()
        .ok_or(EncryptionError::InvalidPublicKey)?;
    if point.is_small_order() {
        return Err(EncryptionError::WeakSharedSecret);
    }

    let expanded = Sha512::digest(own.seed());
    let mut scalar_bytes = [0u8; 32];
    scalar_bytes.copy_from_slice(&expanded[..32]);

    let shared = point.mul_clamped(scalar_bytes);
    if shared.is_identity() {
        return Err(EncryptionError::WeakSharedSecret);
    }

    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), shared.compress().as_bytes());
    let mut key = [0u8; 32];
    hk.expand(KDF_INFO, &mut key)
        .map_err(|_| EncryptionError::Aead)?;
    Ok(key)
}

fn synthetic_nonce(key: &[u8; 32], plaintext: &[u8]) -> [u8; NONCE_LEN] {
    let digest = blake3::keyed_hash(key, plaintext);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest.as_bytes()[..NONCE_LEN]);
    nonce
}
