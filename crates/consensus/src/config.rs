//! Consensus configuration.

use std::time::Duration;

/// Configuration for DPoS round management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DposConfig {
    /// Length of one time slot.
    ///
    /// Rounds carry their own spacing; this value is used when generating the
    /// first round of a term and for rounds with a single miner.
    pub mining_interval: Duration,

    /// Length of a term. A term ends once enough miners have produced blocks
    /// past the end of the current period.
    pub period: Duration,

    /// Missed time slots tolerated before a miner is flagged as unavailable.
    pub tolerable_missed_time_slots: u64,

    /// Blocks a miner may produce inside one time slot (1 = no tiny blocks).
    pub maximum_tiny_blocks: u32,
}

impl Default for DposConfig {
    fn default() -> Self {
        Self {
            mining_interval: Duration::from_millis(4000),
            period: Duration::from_secs(7 * 24 * 60 * 60),
            tolerable_missed_time_slots: 60 * 24 * 3,
            maximum_tiny_blocks: 1,
        }
    }
}

impl DposConfig {
    /// Create a config with a custom slot length.
    pub fn with_mining_interval(mining_interval: Duration) -> Self {
        Self {
            mining_interval,
            ..Default::default()
        }
    }

    /// Set the term length.
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Allow up to `count` blocks per time slot.
    pub fn tiny_blocks(mut self, count: u32) -> Self {
        self.maximum_tiny_blocks = count.max(1);
        self
    }

    /// Set the missed-slot tolerance.
    pub fn tolerable_missed_time_slots(mut self, count: u64) -> Self {
        self.tolerable_missed_time_slots = count;
        self
    }

    /// Blocks allowed per slot, never zero.
    pub fn tiny_block_allowance(&self) -> u32 {
        self.maximum_tiny_blocks.max(1)
    }
}
