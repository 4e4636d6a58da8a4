//! Timing directives for the mining scheduler.

use dpos_types::Timestamp;

/// When to mine next, and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusCommand {
    /// When mining should start.
    pub arranged_mining_time: Timestamp,

    /// Milliseconds from the request time until `arranged_mining_time`.
    pub ms_until_next_mining: u64,

    /// Deadline after which the mining attempt is pointless.
    pub mining_due_time: Timestamp,

    /// Time budget for producing one block, in milliseconds.
    pub limit_ms_of_mining_block: u64,

    /// Encoded [`crate::ConsensusHint`].
    pub hint: Vec<u8>,
}

impl ConsensusCommand {
    /// Longest wait the scheduler accepts; used for "do nothing".
    pub const MAX_WAIT_MS: u64 = i32::MAX as u64;

    /// A command that effectively never fires.
    pub fn invalid(now: Timestamp) -> Self {
        Self {
            arranged_mining_time: now.add_millis(Self::MAX_WAIT_MS),
            ms_until_next_mining: Self::MAX_WAIT_MS,
            mining_due_time: now.add_millis(Self::MAX_WAIT_MS),
            limit_ms_of_mining_block: 0,
            hint: Vec::new(),
        }
    }

    /// Whether this is the "do nothing" command.
    pub fn is_invalid(&self) -> bool {
        self.ms_until_next_mining >= Self::MAX_WAIT_MS
    }
}
