//! Core types for DPoS round management.
//!
//! This crate provides the value types shared by the consensus core and its
//! host:
//!
//! - [`Round`] / [`MinerInRound`]: the per-round schedule and published data
//! - [`Hash`], [`Timestamp`], [`BlockHeight`]: primitive identifiers
//! - [`KeyPair`] / [`PublicKey`]: miner identities
//! - [`ThresholdSharing`]: threshold secret sharing behind a narrow interface
//! - [`encrypt_share`] / [`decrypt_share`]: pairwise share encryption

mod crypto;
mod election;
pub mod encryption;
mod hash;
mod identifiers;
mod round;
pub mod sharing;
mod update;

pub use crypto::{KeyPair, PublicKey, Signature};
pub use election::{CandidateRecord, ElectionSnapshot};
pub use encryption::{decrypt_share, encrypt_share, EncryptionError};
pub use hash::Hash;
pub use identifiers::{BlockHeight, Timestamp};
pub use round::{MinerInRound, Round};
pub use sharing::{Gf256Sharing, SharingError, ThresholdSharing};
pub use update::{TinyBlockInput, UpdateValueInput};
