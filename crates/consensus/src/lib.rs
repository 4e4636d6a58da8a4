//! DPoS round management.
//!
//! This crate is the deterministic core of a Delegated-Proof-of-Stake
//! consensus engine. Every function is a pure computation over persisted
//! rounds (read through [`dpos_core::ChainStateReader`]), wall-clock time and
//! explicit inputs, so all nodes derive identical results.
//!
//! # Architecture
//!
//! - [`decide_behaviour`] → what a miner should do now
//! - [`generate_command`] → when to do it, as a [`dpos_core::ConsensusCommand`]
//! - [`apply_normal_consensus_data`] → record a produced slot and resolve
//!   next-round order conflicts
//! - [`share_in_value`] → split, encrypt, decrypt and reveal in values
//! - [`detect_evil_miners`] / [`replace_evil_miners`] → evict miners whose
//!   reveals contradict their commitments
//! - [`generate_next_round`] / [`generate_first_round_of_term`] → schedules
//! - [`calculate_lib_offset`] / [`calculate_lib_height`] → finality estimates
//!
//! [`ConsensusState`] wires these together for one miner. Nothing here does
//! I/O; the host persists every returned round.

mod behaviour;
mod command;
mod config;
mod error;
mod evil;
mod irreversible;
mod round_generation;
mod secret_sharing;
mod state;
mod update;
mod validation;

pub use behaviour::{decide_behaviour, need_to_change_term, BehaviourProvider};
pub use command::{arrange_abnormal_mining_time, generate_command};
pub use config::DposConfig;
pub use error::ConsensusError;
pub use evil::{
    detect_evil_miners, detect_inconsistent_reveals, detect_unavailable_miners, is_evil,
    replace_evil_miners, select_replacements, EvilMiner, EvilReason, MinerReplacement,
    ReplacementOutcome,
};
pub use irreversible::{calculate_lib_height, calculate_lib_offset};
pub use round_generation::{
    generate_first_round_of_term, generate_next_round, next_extra_block_producer_order,
};
pub use secret_sharing::{
    reveal_shared_in_values, share_in_value, threshold_for, SecretSharingOutcome,
};
pub use state::{ConsensusState, ConsensusUpdate, TriggerInformation};
pub use update::{
    apply_normal_consensus_data, apply_tiny_block, apply_tiny_block_input, apply_update_value,
    extract_update_value, record_block_production,
};
pub use validation::{check_time_slots, validate_before_execution, validate_round_id};
