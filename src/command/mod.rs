// ============================================================================
// Backend Commands
// ============================================================================
//
// Commands are produced by a data-access service, routed to one or more
// executors, and run at commit time. Everything here is a seam: the staging
// core never looks inside a command.
//
// ============================================================================

mod resolver;
mod result;

pub use resolver::{ExecutorResolver, RoutingResolver, SingleExecutorResolver};
pub use result::CommitResult;

use crate::core::Result;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;

/// An executable backend write.
pub trait Command: Send + Sync + fmt::Debug {
    /// Logical destination (table / collection) used for executor routing.
    fn target(&self) -> &str;

    fn describe(&self) -> String;

    /// Commands that may legitimately touch zero rows (idempotent deletes,
    /// bulk updates) do not fail a commit when nothing was affected.
    fn allow_empty(&self) -> bool {
        false
    }

    /// Pre-execution hook. Returning `false` silently drops the command.
    fn before_execute(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any;
}

/// A physical destination (connection, shard) commands run against.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Stable key used to group commands per destination.
    fn key(&self) -> &str;

    /// Runs one command and reports the number of affected rows.
    async fn execute(&self, command: &dyn Command) -> Result<u64>;
}
