// ============================================================================
// Unit-of-Work State
// ============================================================================
//
// State transitions:
//
//   Active ──commit──> Committing ──> Committed | Failed
//     │                                   │
//     └──rollback──> RolledBack           │
//                                         │
//   any terminal state ──next staged write──> Active (fresh state)
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl UnitId {
    pub fn new() -> Self {
        UnitId(NEXT_UNIT_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uow_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Accepting staged reads and writes.
    Active,

    /// Commands are being resolved and executed.
    Committing,

    /// Last commit succeeded; state has been reset.
    Committed,

    /// Last commit failed; state has been reset.
    Failed,

    /// Explicitly rolled back; state has been reset.
    RolledBack,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Failed | TransactionState::RolledBack
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committing => write!(f, "COMMITTING"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Failed => write!(f, "FAILED"),
            TransactionState::RolledBack => write!(f, "ROLLED BACK"),
        }
    }
}
