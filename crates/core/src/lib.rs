//! Core types for DPoS consensus.
//!
//! This crate defines the boundary between the deterministic consensus core
//! and its host:
//!
//! - [`ChainStateReader`]: read-only access to persisted rounds, terms and
//!   election data, scoped to a single state transition
//! - [`ConsensusBehaviour`]: what a miner should do at a given moment
//! - [`ConsensusCommand`]: when and for how long the mining scheduler should
//!   mine, plus an encoded [`ConsensusHint`]

mod behaviour;
mod command;
mod traits;

pub use behaviour::{ConsensusBehaviour, ConsensusHint, HintError};
pub use command::ConsensusCommand;
pub use traits::ChainStateReader;
