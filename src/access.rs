// ============================================================================
// Backing-Store Accessor
// ============================================================================

use crate::command::Command;
use crate::core::{Result, Value};
use crate::entity::{Entity, FieldChanges};
use crate::query::{Modification, Query};
use async_trait::async_trait;
use std::sync::Arc;

/// Data-access service for one entity type.
///
/// Reads run immediately; writes only build commands, which the unit of work
/// executes at commit time.
#[async_trait]
pub trait DataAccess<T: Entity>: Send + Sync {
    async fn get(&self, query: &Query<T>) -> Result<Option<T>>;

    async fn get_list(&self, query: &Query<T>) -> Result<Vec<T>>;

    async fn exist(&self, query: &Query<T>) -> Result<bool>;

    async fn count(&self, query: &Query<T>) -> Result<u64>;

    async fn max(&self, query: &Query<T>) -> Result<Value>;

    async fn min(&self, query: &Query<T>) -> Result<Value>;

    async fn sum(&self, query: &Query<T>) -> Result<Value>;

    /// Average over the query's target field; `Null` when nothing matched.
    async fn avg(&self, query: &Query<T>) -> Result<Value> {
        let count = self.count(query).await?;
        if count == 0 {
            return Ok(Value::Null);
        }
        let sum = self.sum(query).await?;
        Ok(sum
            .as_f64()
            .map(|s| Value::Float(s / count as f64))
            .unwrap_or(Value::Null))
    }

    fn add(&self, entity: &T) -> Result<Arc<dyn Command>>;

    /// Update of the given fields only.
    fn modify(&self, entity: &T, changes: &FieldChanges) -> Result<Arc<dyn Command>>;

    fn delete(&self, entity: &T) -> Result<Arc<dyn Command>>;

    fn delete_where(&self, query: &Query<T>) -> Result<Arc<dyn Command>>;

    fn modify_where(&self, modification: &Modification, query: &Query<T>) -> Result<Arc<dyn Command>>;
}
