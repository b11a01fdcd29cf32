// ============================================================================
// Repository
// ============================================================================
//
// Transaction-consistent access to one entity type. Reads hit the backing
// store and are merged with the staged state of the active unit of work;
// writes are staged in the warehouse and registered as activation records,
// executed only when the unit commits.
//
// The unit is either bound explicitly or taken from the ambient registry
// scope. Without one, reads go straight to the backing store and writes fail
// with `NoActiveTransaction`.
//
// ============================================================================

use crate::access::DataAccess;
use crate::activation::{EntityActivation, WriteOptions};
use crate::core::{Result, StageError, Value};
use crate::entity::Entity;
use crate::query::{Criteria, Modification, Query};
use crate::registry::WarehouseRegistry;
use crate::unit::UnitOfWork;
use crate::warehouse::{Existence, LocalAggregate, SharedWarehouse};
use std::sync::Arc;
use tracing::{Level, event};

pub struct Repository<T: Entity> {
    access: Arc<dyn DataAccess<T>>,
    unit: Option<Arc<UnitOfWork>>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            access: Arc::clone(&self.access),
            unit: self.unit.clone(),
        }
    }
}

impl<T: Entity> Repository<T> {
    /// Repository following the ambient unit of work.
    pub fn new(access: Arc<dyn DataAccess<T>>) -> Self {
        Self { access, unit: None }
    }

    /// Repository pinned to `unit`, whatever scope it is used from.
    pub fn bound(access: Arc<dyn DataAccess<T>>, unit: Arc<UnitOfWork>) -> Self {
        Self {
            access,
            unit: Some(unit),
        }
    }

    pub fn access(&self) -> &Arc<dyn DataAccess<T>> {
        &self.access
    }

    pub fn unit(&self) -> Option<Arc<UnitOfWork>> {
        self.unit.clone().or_else(WarehouseRegistry::current)
    }

    fn require_unit(&self) -> Result<Arc<UnitOfWork>> {
        self.unit().ok_or(StageError::NoActiveTransaction)
    }

    fn warehouse(&self) -> Result<Option<SharedWarehouse<T>>> {
        self.unit().map(|unit| unit.warehouse::<T>()).transpose()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// First match after ordering. Only rows not already staged are fetched.
    pub async fn get(&self, query: &Query<T>) -> Result<Option<T>> {
        let Some(warehouse) = self.warehouse()? else {
            return self.access.get(query).await;
        };
        let residual = warehouse.lock()?.residual(query);
        let row = self.access.get(&residual).await?;
        let merged = warehouse.lock()?.merge_one(row, query)?;
        Ok(merged)
    }

    pub async fn get_list(&self, query: &Query<T>) -> Result<Vec<T>> {
        let Some(warehouse) = self.warehouse()? else {
            return self.access.get_list(query).await;
        };
        let page = warehouse.lock()?.backing_page(query);
        let rows = self.access.get_list(&page).await?;
        let fetched = rows.len();
        let merged = warehouse.lock()?.merge_list(rows, query)?;
        event!(Level::TRACE, fetched, merged = merged.len(), "list merged with staged state");
        Ok(merged)
    }

    pub async fn exist(&self, query: &Query<T>) -> Result<bool> {
        let Some(warehouse) = self.warehouse()? else {
            return self.access.exist(query).await;
        };
        let existence = warehouse.lock()?.exist(query);
        match existence {
            Existence::Found => Ok(true),
            Existence::Residual(residual) => self.access.exist(&residual).await,
        }
    }

    pub async fn count(&self, query: &Query<T>) -> Result<u64> {
        let Some(warehouse) = self.warehouse()? else {
            return self.access.count(query).await;
        };
        let local = warehouse.lock()?.count(query)?;
        let remote = self.access.count(&local.residual).await?;
        Ok(local.matched + remote)
    }

    pub async fn max(&self, query: &Query<T>) -> Result<Value> {
        let Some(warehouse) = self.warehouse()? else {
            return self.access.max(query).await;
        };
        let local = warehouse.lock()?.max(query)?;
        let remote = self.access.max(&local.residual).await?;
        local.combine(&remote)
    }

    pub async fn min(&self, query: &Query<T>) -> Result<Value> {
        let Some(warehouse) = self.warehouse()? else {
            return self.access.min(query).await;
        };
        let local = warehouse.lock()?.min(query)?;
        let remote = self.access.min(&local.residual).await?;
        local.combine(&remote)
    }

    pub async fn sum(&self, query: &Query<T>) -> Result<Value> {
        let Some(warehouse) = self.warehouse()? else {
            return self.access.sum(query).await;
        };
        let local = warehouse.lock()?.sum(query)?;
        let remote = self.access.sum(&local.residual).await?;
        local.combine(&remote)
    }

    /// Combined sum over combined count; `Null` when nothing matched.
    pub async fn avg(&self, query: &Query<T>) -> Result<Value> {
        let Some(warehouse) = self.warehouse()? else {
            return self.access.avg(query).await;
        };
        let (sum, count): (LocalAggregate<T>, LocalAggregate<T>) = {
            let staged = warehouse.lock()?;
            (staged.sum(query)?, staged.count(query)?)
        };
        let total = sum.combine(&self.access.sum(&sum.residual).await?)?;
        let matched = count.matched + self.access.count(&count.residual).await?;
        average(&total, matched)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Stages `entity` and returns its identity.
    pub fn save(&self, entity: T) -> Result<String> {
        self.save_with(entity, WriteOptions::new())
    }

    pub fn save_with(&self, entity: T, options: WriteOptions) -> Result<String> {
        let unit = self.require_unit()?;
        let warehouse = unit.warehouse::<T>()?;
        let identity = warehouse.lock()?.save(entity)?;
        let record = EntityActivation::save(warehouse, Arc::clone(&self.access), identity.clone(), options)?;
        unit.register(record)?;
        Ok(identity)
    }

    pub fn remove(&self, entity: T) -> Result<String> {
        self.remove_with(entity, WriteOptions::new())
    }

    pub fn remove_with(&self, entity: T, options: WriteOptions) -> Result<String> {
        let unit = self.require_unit()?;
        let warehouse = unit.warehouse::<T>()?;
        let identity = warehouse.lock()?.remove(entity)?;
        let record =
            EntityActivation::remove(warehouse, Arc::clone(&self.access), identity.clone(), options)?;
        unit.register(record)?;
        Ok(identity)
    }

    /// Removes every entity matching `criteria`, staged or not. Returns the
    /// number of staged records affected right away.
    pub fn remove_where(&self, criteria: Criteria<T>) -> Result<usize> {
        self.remove_where_with(criteria, WriteOptions::new())
    }

    pub fn remove_where_with(&self, criteria: Criteria<T>, options: WriteOptions) -> Result<usize> {
        let unit = self.require_unit()?;
        let warehouse = unit.warehouse::<T>()?;
        let touched = warehouse.lock()?.remove_where(criteria.clone())?;
        unit.register(EntityActivation::remove_where(
            warehouse,
            Arc::clone(&self.access),
            Query::filter(criteria),
            options,
        ))?;
        Ok(touched)
    }

    pub fn modify_where(&self, modification: Modification, criteria: Criteria<T>) -> Result<usize> {
        self.modify_where_with(modification, criteria, WriteOptions::new())
    }

    pub fn modify_where_with(
        &self,
        modification: Modification,
        criteria: Criteria<T>,
        options: WriteOptions,
    ) -> Result<usize> {
        let unit = self.require_unit()?;
        let warehouse = unit.warehouse::<T>()?;
        let touched = warehouse
            .lock()?
            .modify_where(modification.clone(), criteria.clone())?;
        unit.register(EntityActivation::modify_where(
            warehouse,
            Arc::clone(&self.access),
            modification,
            Query::filter(criteria),
            options,
        ))?;
        Ok(touched)
    }
}

fn average(sum: &Value, count: u64) -> Result<Value> {
    if count == 0 || sum.is_null() {
        return Ok(Value::Null);
    }
    let total = sum
        .as_f64()
        .ok_or_else(|| StageError::TypeMismatch(format!("cannot average {} values", sum.type_name())))?;
    Ok(Value::Float(total / count as f64))
}
