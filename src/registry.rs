// ============================================================================
// Warehouse Registry
// ============================================================================
//
// Resolves the staging warehouse of the unit of work active in the current
// logical call chain. The active unit is a tokio task-local installed with
// `scope` (async) or `sync_scope`; outside any scope there is no transaction
// and reads fall back to the backing store alone.
//
// ============================================================================

use crate::core::{Result, StageError};
use crate::entity::Entity;
use crate::unit::UnitOfWork;
use crate::warehouse::SharedWarehouse;
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static ACTIVE_UNIT: Arc<UnitOfWork>;
}

pub struct WarehouseRegistry;

impl WarehouseRegistry {
    /// Runs `future` with `unit` as the active unit of work.
    pub async fn scope<F>(unit: Arc<UnitOfWork>, future: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE_UNIT.scope(unit, future).await
    }

    pub fn sync_scope<F, R>(unit: Arc<UnitOfWork>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        ACTIVE_UNIT.sync_scope(unit, f)
    }

    pub fn current() -> Option<Arc<UnitOfWork>> {
        ACTIVE_UNIT.try_with(Arc::clone).ok()
    }

    pub fn is_active() -> bool {
        Self::current().is_some()
    }

    /// Warehouse for `T` in the active unit, or `None` outside a transaction.
    pub fn warehouse<T: Entity>() -> Result<Option<SharedWarehouse<T>>> {
        Self::current().map(|unit| unit.warehouse::<T>()).transpose()
    }

    pub fn require_warehouse<T: Entity>() -> Result<SharedWarehouse<T>> {
        Self::warehouse::<T>()?.ok_or(StageError::NoActiveTransaction)
    }

    pub fn require_unit() -> Result<Arc<UnitOfWork>> {
        Self::current().ok_or(StageError::NoActiveTransaction)
    }
}
