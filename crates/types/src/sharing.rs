//! Threshold secret sharing.
//!
//! Consensus code only sees the narrow [`ThresholdSharing`] interface, so the
//! field arithmetic behind it can be swapped. The shipped scheme,
//! [`Gf256Sharing`], is Shamir sharing applied independently to every byte of
//! the secret over GF(2^8) (AES polynomial `x^8 + x^4 + x^3 + x + 1`). Secrets
//! of any length round-trip exactly, and share `i` is evaluated at `x = i`.

use rand::RngCore;

/// Largest share index representable in GF(2^8).
pub const MAX_SHARES: u32 = 255;

/// Errors from splitting or reconstructing a secret.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SharingError {
    /// Threshold must be in `1..=total`.
    #[error("invalid threshold {threshold} for {total} shares")]
    InvalidThreshold {
        /// Requested threshold.
        threshold: u32,
        /// Requested number of shares.
        total: u32,
    },

    /// More shares requested than the field supports.
    #[error("too many shares: {0} (max {MAX_SHARES})")]
    TooManyShares(u32),

    /// Fewer shares supplied than the threshold.
    #[error("need {threshold} shares, got {provided}")]
    InsufficientShares {
        /// Required number of shares.
        threshold: u32,
        /// Supplied number of shares.
        provided: usize,
    },

    /// `shares` and `indices` differ in length.
    #[error("{shares} shares but {indices} indices")]
    IndexCountMismatch {
        /// Number of shares.
        shares: usize,
        /// Number of indices.
        indices: usize,
    },

    /// Index zero or beyond [`MAX_SHARES`].
    #[error("share index {0} out of range")]
    IndexOutOfRange(u32),

    /// The same index appears twice.
    #[error("duplicate share index {0}")]
    DuplicateIndex(u32),

    /// Shares of different lengths.
    #[error("share length mismatch")]
    LengthMismatch,
}

/// A `(t, n)` threshold secret sharing scheme.
pub trait ThresholdSharing: Send + Sync {
    /// Split `secret` into `total` shares, any `threshold` of which
    /// reconstruct it. Share `i` (0-based) carries index `i + 1`.
    fn split(
        &self,
        secret: &[u8],
        threshold: u32,
        total: u32,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Vec<u8>>, SharingError>;

    /// Reconstruct a secret from shares and their 1-based indices.
    ///
    /// Uses the first `threshold` shares.
    fn reconstruct(
        &self,
        shares: &[Vec<u8>],
        indices: &[u32],
        threshold: u32,
    ) -> Result<Vec<u8>, SharingError>;
}

/// Byte-wise Shamir sharing over GF(2^8).
#[derive(Debug, Clone, Copy, Default)]
pub struct Gf256Sharing;

impl ThresholdSharing for Gf256Sharing {
    fn split(
        &self,
        secret: &[u8],
        threshold: u32,
        total: u32,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Vec<u8>>, SharingError> {
        if threshold == 0 || threshold > total {
            return Err(SharingError::InvalidThreshold { threshold, total });
        }
        if total > MAX_SHARES {
            return Err(SharingError::TooManyShares(total));
        }

        let mut shares = vec![Vec::with_capacity(secret.len()); total as usize];
        let mut coefficients = vec![0u8; threshold as usize];
        for &byte in secret {
            coefficients[0] = byte;
            rng.fill_bytes(&mut coefficients[1..]);
            for (i, share) in shares.iter_mut().enumerate() {
                share.push(evaluate(&coefficients, (i + 1) as u8));
            }
        }
        Ok(shares)
    }

    fn reconstruct(
        &self,
        shares: &[Vec<u8>],
        indices: &[u32],
        threshold: u32,
    ) -> Result<Vec<u8>, SharingError> {
        if shares.len() != indices.len() {
            return Err(SharingError::IndexCountMismatch {
                shares: shares.len(),
                indices: indices.len(),
            });
        }
        if threshold == 0 || shares.len() < threshold as usize {
            return Err(SharingError::InsufficientShares {
                threshold,
                provided: shares.len(),
            });
        }

        let used = threshold as usize;
        let mut xs = Vec::with_capacity(used);
        for &index in &indices[..used] {
            if index == 0 || index > MAX_SHARES {
                return Err(SharingError::IndexOutOfRange(index));
            }
            let x = index as u8;
            if xs.contains(&x) {
                return Err(SharingError::DuplicateIndex(index));
            }
            xs.push(x);
        }

        let len = shares[0].len();
        if shares[..used].iter().any(|s| s.len() != len) {
            return Err(SharingError::LengthMismatch);
        }

        // Lagrange basis at x = 0: L_i(0) = prod_{j != i} x_j / (x_j - x_i).
        // Subtraction is XOR in characteristic 2.
        let basis: Vec<u8> = (0..used)
            .map(|i| {
                (0..used).filter(|&j| j != i).fold(1u8, |acc, j| {
                    gf_mul(acc, gf_div(xs[j], xs[j] ^ xs[i]))
                })
            })
            .collect();

        let secret = (0..len)
            .map(|pos| {
                (0..used).fold(0u8, |acc, i| acc ^ gf_mul(shares[i][pos], basis[i]))
            })
            .collect();
        Ok(secret)
    }
}

/// Horner evaluation of `coefficients` (constant term first) at `x`.
fn evaluate(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, &c| gf_mul(acc, x) ^ c)
}

static TABLES: ([u8; 512], [u8; 256]) = build_tables();

const fn build_tables() -> ([u8; 512], [u8; 256]) {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    // 3 generates the multiplicative group of GF(2^8) under 0x11b.
    while i < 255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        let mut doubled = x << 1;
        if doubled & 0x100 != 0 {
            doubled ^= 0x11b;
        }
        x ^= doubled;
        i += 1;
    }
    while i < 512 {
        exp[i] = exp[i - 255];
        i += 1;
    }
    (exp, log)
}

fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let (exp, log) = &TABLES;
    exp[log[a as usize] as usize + log[b as usize] as usize]
}

fn gf_div(a: u8, b: u8) -> u8 {
    debug_assert!(b != 0, "division by zero in GF(256)");
    if a == 0 {
        return 0;
    }
    let (exp, log) = &TABLES;
    exp[log[a as usize] as usize + 255 - log[b as usize] as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(7)
    }

    #[test]
    fn test_field_inverse() {
        for a in 1..=255u8 {
            assert_eq!(gf_mul(a, gf_div(1, a)), 1, "inverse of {a}");
        }
        assert_eq!(gf_mul(0x57, 0x83), 0xc1);
    }

    #[test]
    fn test_any_two_of_three_reconstruct() {
        let scheme = Gf256Sharing;
        let shares = scheme.split(b"abc", 2, 3, &mut rng()).unwrap();
        assert_eq!(shares.len(), 3);

        for (a, b) in [(0usize, 1usize), (0, 2), (1, 2), (2, 0)] {
            let picked = vec![shares[a].clone(), shares[b].clone()];
            let indices = [a as u32 + 1, b as u32 + 1];
            assert_eq!(scheme.reconstruct(&picked, &indices, 2).unwrap(), b"abc");
        }
    }

    #[test]
    fn test_below_threshold_does_not_reveal() {
        let scheme = Gf256Sharing;
        let shares = scheme.split(b"abc", 2, 3, &mut rng()).unwrap();

        assert_eq!(
            scheme.reconstruct(&shares[..1], &[1], 2),
            Err(SharingError::InsufficientShares {
                threshold: 2,
                provided: 1
            })
        );
        // Interpolating a single share as if it were enough yields the share
        // itself, not the secret.
        let guess = scheme.reconstruct(&shares[..1], &[1], 1).unwrap();
        assert_ne!(guess, b"abc");
    }

    #[test]
    fn test_hash_sized_secret_with_larger_committee() {
        let scheme = Gf256Sharing;
        let secret = crate::Hash::from_bytes(b"in value");
        let shares = scheme
            .split(secret.as_bytes(), 15, 21, &mut rng())
            .unwrap();

        let indices: Vec<u32> = (7..22).collect();
        let picked: Vec<Vec<u8>> = indices
            .iter()
            .map(|&i| shares[i as usize - 1].clone())
            .collect();
        let recovered = scheme.reconstruct(&picked, &indices, 15).unwrap();
        assert_eq!(recovered, secret.as_bytes());
    }

    #[test]
    fn test_invalid_parameters() {
        let scheme = Gf256Sharing;
        assert!(matches!(
            scheme.split(b"x", 0, 3, &mut rng()),
            Err(SharingError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            scheme.split(b"x", 4, 3, &mut rng()),
            Err(SharingError::InvalidThreshold { .. })
        ));
        assert_eq!(
            scheme.split(b"x", 2, 256, &mut rng()),
            Err(SharingError::TooManyShares(256))
        );

        let shares = scheme.split(b"xy", 2, 3, &mut rng()).unwrap();
        assert_eq!(
            scheme.reconstruct(&shares[..2], &[1, 1], 2),
            Err(SharingError::DuplicateIndex(1))
        );
        assert_eq!(
            scheme.reconstruct(&shares[..2], &[0, 1], 2),
            Err(SharingError::IndexOutOfRange(0))
        );
        assert!(matches!(
            scheme.reconstruct(&shares[..2], &[1], 2),
            Err(SharingError::IndexCountMismatch { .. })
        ));
    }
}
