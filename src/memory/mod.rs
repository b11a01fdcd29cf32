// ============================================================================
// In-Memory Backing Store
// ============================================================================
//
// Reference backend: a keyed row map per entity type that answers reads and
// executes the commands it hands out. It is both the data-access service and
// the executor for its entity type.
//
// ============================================================================

mod command;

pub use command::StoreCommand;

use crate::access::DataAccess;
use crate::command::{Command, CommandExecutor};
use crate::core::{Result, StageError, Value};
use crate::entity::{Entity, EntityDescriptor, FieldChanges};
use crate::query::{Modification, Query};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{Level, event};

pub struct MemoryStore<T: Entity> {
    key: String,
    descriptor: Arc<EntityDescriptor<T>>,
    rows: RwLock<BTreeMap<String, T>>,
    reads: AtomicU64,
    executed: AtomicU64,
    unavailable: AtomicBool,
}

impl<T: Entity> MemoryStore<T> {
    pub fn new(key: &str) -> Result<Self> {
        let descriptor = Arc::new(T::descriptor());
        descriptor.validate()?;
        Ok(Self {
            key: key.to_string(),
            descriptor,
            rows: RwLock::new(BTreeMap::new()),
            reads: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        })
    }

    pub fn with_rows<I>(key: &str, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
    {
        let store = Self::new(key)?;
        let mut seeded = BTreeMap::new();
        for row in rows {
            seeded.insert(store.descriptor.identity_of(&row)?, row);
        }
        Ok(Self {
            rows: RwLock::new(seeded),
            ..store
        })
    }

    /// Snapshot of every stored row, ordered by identity.
    pub async fn rows(&self) -> Vec<T> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn row(&self, identity: &str) -> Option<T> {
        self.rows.read().await.get(identity).cloned()
    }

    /// Number of read calls served so far.
    pub fn read_calls(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of commands executed so far.
    pub fn executed_commands(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// While set, every command fails with an execution error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    async fn matching(&self, query: &Query<T>) -> Vec<T> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let rows = self.rows.read().await;
        let matches = rows
            .values()
            .filter(|row| query.matches(row, &self.descriptor))
            .cloned()
            .collect();
        query.window(matches, &self.descriptor)
    }

    async fn fold_target<F>(&self, query: &Query<T>, fold: F) -> Result<Value>
    where
        F: Fn(Value, Value) -> Result<Value>,
    {
        let target = query.target_field().ok_or_else(|| {
            StageError::Config(format!("aggregate on '{}' has no target field", self.descriptor.name()))
        })?;
        let mut acc = Value::Null;
        for row in self.matching(query).await {
            acc = fold(acc, self.descriptor.get(&row, target)?)?;
        }
        Ok(acc)
    }

    fn command(&self, command: StoreCommand<T>) -> Arc<dyn Command> {
        Arc::new(command)
    }

    async fn apply(&self, command: &StoreCommand<T>) -> Result<u64> {
        let mut rows = self.rows.write().await;
        match command {
            StoreCommand::Insert { identity, row, .. } => {
                if rows.contains_key(identity) {
                    return Err(StageError::Execution(format!(
                        "duplicate identity '{}' in '{}'",
                        identity,
                        self.descriptor.name()
                    )));
                }
                rows.insert(identity.clone(), row.clone());
                Ok(1)
            }
            StoreCommand::Update { identity, changes, .. } => match rows.get_mut(identity) {
                Some(row) => {
                    for (field, value) in changes {
                        self.descriptor.set(row, field, value.clone())?;
                    }
                    Ok(1)
                }
                None => Ok(0),
            },
            StoreCommand::Delete { identity, .. } => Ok(rows.remove(identity).map_or(0, |_| 1)),
            StoreCommand::DeleteWhere { query, .. } => {
                let before = rows.len();
                rows.retain(|_, row| !query.matches(row, &self.descriptor));
                Ok((before - rows.len()) as u64)
            }
            StoreCommand::UpdateWhere {
                modification, query, ..
            } => {
                let mut affected = 0;
                for row in rows.values_mut() {
                    if query.matches(row, &self.descriptor) {
                        modification.apply(row, &self.descriptor)?;
                        affected += 1;
                    }
                }
                Ok(affected)
            }
        }
    }
}

#[async_trait]
impl<T: Entity> DataAccess<T> for MemoryStore<T> {
    async fn get(&self, query: &Query<T>) -> Result<Option<T>> {
        Ok(self.matching(query).await.into_iter().next())
    }

    async fn get_list(&self, query: &Query<T>) -> Result<Vec<T>> {
        Ok(self.matching(query).await)
    }

    async fn exist(&self, query: &Query<T>) -> Result<bool> {
        Ok(!self.matching(query).await.is_empty())
    }

    async fn count(&self, query: &Query<T>) -> Result<u64> {
        Ok(self.matching(query).await.len() as u64)
    }

    async fn max(&self, query: &Query<T>) -> Result<Value> {
        self.fold_target(query, |acc, v| acc.max_of(v)).await
    }

    async fn min(&self, query: &Query<T>) -> Result<Value> {
        self.fold_target(query, |acc, v| acc.min_of(v)).await
    }

    async fn sum(&self, query: &Query<T>) -> Result<Value> {
        self.fold_target(query, |acc, v| acc.add(&v)).await
    }

    fn add(&self, entity: &T) -> Result<Arc<dyn Command>> {
        Ok(self.command(StoreCommand::Insert {
            target: self.descriptor.name(),
            identity: self.descriptor.identity_of(entity)?,
            row: entity.clone(),
        }))
    }

    fn modify(&self, entity: &T, changes: &FieldChanges) -> Result<Arc<dyn Command>> {
        Ok(self.command(StoreCommand::Update {
            target: self.descriptor.name(),
            identity: self.descriptor.identity_of(entity)?,
            changes: changes.clone(),
        }))
    }

    fn delete(&self, entity: &T) -> Result<Arc<dyn Command>> {
        Ok(self.command(StoreCommand::Delete {
            target: self.descriptor.name(),
            identity: self.descriptor.identity_of(entity)?,
        }))
    }

    fn delete_where(&self, query: &Query<T>) -> Result<Arc<dyn Command>> {
        Ok(self.command(StoreCommand::DeleteWhere {
            target: self.descriptor.name(),
            query: query.clone(),
        }))
    }

    fn modify_where(&self, modification: &Modification, query: &Query<T>) -> Result<Arc<dyn Command>> {
        Ok(self.command(StoreCommand::UpdateWhere {
            target: self.descriptor.name(),
            modification: modification.clone(),
            query: query.clone(),
        }))
    }
}

#[async_trait]
impl<T: Entity> CommandExecutor for MemoryStore<T> {
    fn key(&self) -> &str {
        &self.key
    }

    async fn execute(&self, command: &dyn Command) -> Result<u64> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StageError::Execution(format!("store '{}' is unavailable", self.key)));
        }
        let command = command
            .as_any()
            .downcast_ref::<StoreCommand<T>>()
            .ok_or_else(|| {
                StageError::Execution(format!(
                    "store '{}' cannot run command for '{}'",
                    self.key,
                    command.target()
                ))
            })?;
        let affected = self.apply(command).await?;
        self.executed.fetch_add(1, Ordering::Relaxed);
        event!(
            Level::DEBUG,
            store = %self.key,
            command = %command.describe(),
            affected,
            "memory store command applied"
        );
        Ok(affected)
    }
}
