// ============================================================================
// Entity Change Record
// ============================================================================
//
// Shadow state of a single entity inside a unit of work: the value the
// application sees, the value last known to match the backing store, the
// pending operation, and the field-level diff between the two.
//
// ============================================================================

use crate::core::Result;
use crate::entity::{EntityDescriptor, FieldChanges};
use crate::query::Modification;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Pending write for a staged entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    None,
    Save,
    Remove,
}

/// Where a staged entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    FromBackingStore,
    NewlyCreated,
}

pub struct ChangeRecord<T> {
    descriptor: Arc<EntityDescriptor<T>>,
    identity: String,
    current: T,
    baseline: Option<T>,
    operation: Operation,
    source: Source,
    removed_by_predicate: bool,
    known_fields: HashSet<String>,
    changed_fields: FieldChanges,
}

impl<T: Clone> ChangeRecord<T> {
    /// Record for an entity the backing store has never returned.
    pub fn created(descriptor: Arc<EntityDescriptor<T>>, identity: String, value: T) -> Self {
        let mut record = Self {
            descriptor,
            identity,
            current: value,
            baseline: None,
            operation: Operation::None,
            source: Source::NewlyCreated,
            removed_by_predicate: false,
            known_fields: HashSet::new(),
            changed_fields: FieldChanges::new(),
        };
        record.refresh_changes();
        record
    }

    /// Record for a row first seen in a backing-store read.
    pub fn loaded(
        descriptor: Arc<EntityDescriptor<T>>,
        identity: String,
        value: T,
        requested: Option<&[String]>,
    ) -> Self {
        let known_fields = match requested {
            Some(fields) => fields.iter().cloned().collect(),
            None => descriptor.field_names().map(str::to_string).collect(),
        };
        Self {
            descriptor,
            identity,
            baseline: Some(value.clone()),
            current: value,
            operation: Operation::None,
            source: Source::FromBackingStore,
            removed_by_predicate: false,
            known_fields,
            changed_fields: FieldChanges::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    /// Current value, or `None` once the entity is removed.
    pub fn visible(&self) -> Option<&T> {
        (!self.is_removed()).then_some(&self.current)
    }

    pub fn baseline(&self) -> Option<&T> {
        self.baseline.as_ref()
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn is_removed(&self) -> bool {
        self.operation == Operation::Remove
    }

    pub fn removed_by_predicate(&self) -> bool {
        self.removed_by_predicate
    }

    pub fn known_fields(&self) -> &HashSet<String> {
        &self.known_fields
    }

    pub fn changed_fields(&self) -> &FieldChanges {
        &self.changed_fields
    }

    pub fn has_changes(&self) -> bool {
        !self.changed_fields.is_empty()
    }

    pub fn save(&mut self, value: T) {
        if self.is_removed() && !self.removed_by_predicate {
            // explicit remove followed by save: the row is added again
            self.source = Source::NewlyCreated;
            self.baseline = None;
            self.known_fields.clear();
        }
        self.removed_by_predicate = false;
        self.operation = Operation::Save;
        self.current = value;
        self.refresh_changes();
    }

    pub fn remove(&mut self) {
        self.operation = Operation::Remove;
    }

    pub fn remove_by_predicate(&mut self) {
        self.operation = Operation::Remove;
        self.removed_by_predicate = true;
    }

    /// Applies a bulk modification. The baseline follows along for rows that
    /// exist in the backing store because the bulk command itself writes them.
    /// The record is left untouched when any assignment fails.
    pub fn modify(&mut self, modification: &Modification) -> Result<()> {
        if let Some((current, baseline)) = self.modified(modification)? {
            self.accept_modified(current, baseline);
        }
        Ok(())
    }

    /// Current and baseline values as they would be after `modification`,
    /// computed on copies. `None` when the record is removed.
    pub fn modified(&self, modification: &Modification) -> Result<Option<(T, Option<T>)>> {
        if self.is_removed() {
            return Ok(None);
        }
        let mut current = self.current.clone();
        modification.apply(&mut current, &self.descriptor)?;
        let mut baseline = self.baseline.clone();
        if self.source == Source::FromBackingStore {
            if let Some(baseline) = baseline.as_mut() {
                modification.apply(baseline, &self.descriptor)?;
            }
        }
        Ok(Some((current, baseline)))
    }

    /// Installs values produced by [`modified`](Self::modified).
    pub fn accept_modified(&mut self, current: T, baseline: Option<T>) {
        self.current = current;
        self.baseline = baseline;
        self.refresh_changes();
    }

    /// Folds a fresh backing-store row into the record.
    ///
    /// Fields already known keep their staged values; newly requested fields
    /// take the fresh value in the baseline and, unless changed locally, in
    /// the current value too.
    pub fn merge_from_backing_store(
        &mut self,
        fresh: &T,
        requested: Option<&[String]>,
    ) -> Result<Option<&T>> {
        let pending: HashSet<String> = self.changed_fields.keys().cloned().collect();
        let requested: Vec<String> = match requested {
            Some(fields) => fields.to_vec(),
            None => self.descriptor.field_names().map(str::to_string).collect(),
        };

        self.source = Source::FromBackingStore;
        let mut baseline = self.baseline.take().unwrap_or_else(|| self.current.clone());

        for field in requested {
            if self.known_fields.contains(&field) {
                continue;
            }
            self.descriptor.copy_field(fresh, &mut baseline, &field)?;
            if !pending.contains(&field) {
                self.descriptor.copy_field(fresh, &mut self.current, &field)?;
            }
            self.known_fields.insert(field);
        }

        self.baseline = Some(baseline);
        self.refresh_changes();
        Ok(self.visible())
    }

    /// Recomputes the diff from scratch.
    fn refresh_changes(&mut self) {
        self.changed_fields = match &self.baseline {
            None => self.descriptor.values_of(&self.current),
            Some(baseline) => self
                .descriptor
                .fields()
                .iter()
                .filter_map(|field| {
                    let current = field.get(&self.current);
                    (!current.same_as(&field.get(baseline))).then(|| (field.name().to_string(), current))
                })
                .collect(),
        };
    }
}

impl<T> fmt::Debug for ChangeRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRecord")
            .field("entity", &self.descriptor.name())
            .field("identity", &self.identity)
            .field("operation", &self.operation)
            .field("source", &self.source)
            .field("removed_by_predicate", &self.removed_by_predicate)
            .field("changed_fields", &self.changed_fields)
            .finish()
    }
}
