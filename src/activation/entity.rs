use super::{Activation, ActivationKind, PreparedCommand, RecordIdentity, WriteOptions};
use crate::access::DataAccess;
use crate::command::Command;
use crate::core::Result;
use crate::entity::Entity;
use crate::query::{Modification, Query};
use crate::record::{Operation, Source};
use crate::warehouse::SharedWarehouse;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

enum Intent<T> {
    Save { identity: String },
    Remove { identity: String },
    RemoveWhere(Query<T>),
    ModifyWhere(Modification, Query<T>),
}

/// Activation record for a write against one entity type.
pub struct EntityActivation<T: Entity> {
    intent: Intent<T>,
    record_identity: RecordIdentity,
    warehouse: SharedWarehouse<T>,
    access: Arc<dyn DataAccess<T>>,
    options: WriteOptions,
    obsolete: AtomicBool,
}

impl<T: Entity> EntityActivation<T> {
    pub fn save(
        warehouse: SharedWarehouse<T>,
        access: Arc<dyn DataAccess<T>>,
        identity: String,
        options: WriteOptions,
    ) -> Result<Self> {
        Self::per_object(Intent::Save { identity }, warehouse, access, options)
    }

    pub fn remove(
        warehouse: SharedWarehouse<T>,
        access: Arc<dyn DataAccess<T>>,
        identity: String,
        options: WriteOptions,
    ) -> Result<Self> {
        Self::per_object(Intent::Remove { identity }, warehouse, access, options)
    }

    pub fn remove_where(
        warehouse: SharedWarehouse<T>,
        access: Arc<dyn DataAccess<T>>,
        query: Query<T>,
        options: WriteOptions,
    ) -> Self {
        Self::build(Intent::RemoveWhere(query), RecordIdentity::unique(), warehouse, access, options)
    }

    pub fn modify_where(
        warehouse: SharedWarehouse<T>,
        access: Arc<dyn DataAccess<T>>,
        modification: Modification,
        query: Query<T>,
        options: WriteOptions,
    ) -> Self {
        Self::build(
            Intent::ModifyWhere(modification, query),
            RecordIdentity::unique(),
            warehouse,
            access,
            options,
        )
    }

    fn per_object(
        intent: Intent<T>,
        warehouse: SharedWarehouse<T>,
        access: Arc<dyn DataAccess<T>>,
        options: WriteOptions,
    ) -> Result<Self> {
        let record_identity = if options.is_forced() {
            RecordIdentity::unique()
        } else {
            let entity_type = warehouse.lock()?.entity_type();
            let identity = match &intent {
                Intent::Save { identity } | Intent::Remove { identity } => identity.as_str(),
                Intent::RemoveWhere(_) | Intent::ModifyWhere(..) => "",
            };
            RecordIdentity::entity(entity_type, identity)
        };
        Ok(Self::build(intent, record_identity, warehouse, access, options))
    }

    fn build(
        intent: Intent<T>,
        record_identity: RecordIdentity,
        warehouse: SharedWarehouse<T>,
        access: Arc<dyn DataAccess<T>>,
        options: WriteOptions,
    ) -> Self {
        Self {
            intent,
            record_identity,
            warehouse,
            access,
            options,
            obsolete: AtomicBool::new(false),
        }
    }

    fn resolve_save(&self, identity: &str) -> Result<Option<Arc<dyn Command>>> {
        let warehouse = self.warehouse.lock()?;
        let Some(record) = warehouse.record(identity) else {
            return Ok(None);
        };

        match (record.operation(), record.source()) {
            (Operation::Remove, _) => Ok(None),
            (_, Source::NewlyCreated) => self.access.add(record.current()).map(Some),
            (_, Source::FromBackingStore) if record.has_changes() => self
                .access
                .modify(record.current(), record.changed_fields())
                .map(Some),
            (_, Source::FromBackingStore) if self.options.is_forced() => {
                let every_field = warehouse.descriptor().values_of(record.current());
                self.access.modify(record.current(), &every_field).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn resolve_remove(&self, identity: &str) -> Result<Option<Arc<dyn Command>>> {
        let warehouse = self.warehouse.lock()?;
        match warehouse.record(identity) {
            Some(record) if record.is_removed() => self.access.delete(record.current()).map(Some),
            _ => Ok(None),
        }
    }
}

impl<T: Entity> Activation for EntityActivation<T> {
    fn kind(&self) -> ActivationKind {
        match self.intent {
            Intent::Save { .. } => ActivationKind::Save,
            Intent::Remove { .. } => ActivationKind::Remove,
            Intent::RemoveWhere(_) => ActivationKind::RemoveWhere,
            Intent::ModifyWhere(..) => ActivationKind::ModifyWhere,
        }
    }

    fn record_identity(&self) -> &RecordIdentity {
        &self.record_identity
    }

    fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }

    fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    fn resolve(&self) -> Result<Option<PreparedCommand>> {
        if self.is_obsolete() {
            return Ok(None);
        }
        let command = match &self.intent {
            Intent::Save { identity } => self.resolve_save(identity)?,
            Intent::Remove { identity } => self.resolve_remove(identity)?,
            Intent::RemoveWhere(query) => Some(self.access.delete_where(query)?),
            Intent::ModifyWhere(modification, query) => {
                Some(self.access.modify_where(modification, query)?)
            }
        };
        Ok(command.map(|command| self.options.prepare(command)))
    }
}
