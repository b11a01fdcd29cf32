use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Outcome counters of a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub committed_command_count: u64,
    pub affected_data_count: u64,
    pub allow_empty_command_count: u64,
}

impl CommitResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn success(&self) -> bool {
        self.affected_data_count > 0
    }

    /// Success, or nothing that was required to affect data ran.
    pub fn empty_or_success(&self) -> bool {
        self.success()
            || self
                .committed_command_count
                .saturating_sub(self.allow_empty_command_count)
                < 1
    }
}

impl AddAssign for CommitResult {
    fn add_assign(&mut self, other: Self) {
        self.committed_command_count += other.committed_command_count;
        self.affected_data_count += other.affected_data_count;
        self.allow_empty_command_count += other.allow_empty_command_count;
    }
}
