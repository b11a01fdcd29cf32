// ============================================================================
// Entity Staging Warehouse
// ============================================================================
//
// One warehouse per entity type per unit of work. It owns every change
// record for that type, keeps bulk remove/modify predicates alive so rows
// fetched later still see them, merges backing-store reads with staged state,
// and splits aggregates into a local part plus a residual backing-store query.
//
// ============================================================================

mod aggregate;

pub use aggregate::{AggregateKind, LocalAggregate};

use crate::core::Result;
use crate::entity::{Entity, EntityDescriptor};
use crate::query::{Criteria, Modification, Query};
use crate::record::ChangeRecord;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

pub type SharedWarehouse<T> = Arc<Mutex<Warehouse<T>>>;

/// Bulk operation issued before every matching row was known.
pub enum PendingPredicate<T> {
    Remove(Criteria<T>),
    Modify(Modification, Criteria<T>),
}

impl<T> Clone for PendingPredicate<T> {
    fn clone(&self) -> Self {
        match self {
            PendingPredicate::Remove(c) => PendingPredicate::Remove(c.clone()),
            PendingPredicate::Modify(m, c) => PendingPredicate::Modify(m.clone(), c.clone()),
        }
    }
}

/// Outcome of a local existence check.
#[derive(Debug)]
pub enum Existence<T> {
    /// A staged, non-removed entity matches.
    Found,
    /// Nothing matched locally; the backing store must answer this query.
    Residual(Query<T>),
}

pub struct Warehouse<T> {
    descriptor: Arc<EntityDescriptor<T>>,
    records: HashMap<String, ChangeRecord<T>>,
    pending: Vec<PendingPredicate<T>>,
}

impl<T: Entity> Warehouse<T> {
    pub fn new() -> Result<Self> {
        Self::with_descriptor(Arc::new(T::descriptor()))
    }

    pub fn with_descriptor(descriptor: Arc<EntityDescriptor<T>>) -> Result<Self> {
        descriptor.validate()?;
        Ok(Self {
            descriptor,
            records: HashMap::new(),
            pending: Vec::new(),
        })
    }

    pub fn shared() -> Result<SharedWarehouse<T>> {
        Ok(Arc::new(Mutex::new(Self::new()?)))
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor<T>> {
        &self.descriptor
    }

    pub fn entity_type(&self) -> &'static str {
        self.descriptor.name()
    }

    pub fn identity_of(&self, entity: &T) -> Result<String> {
        self.descriptor.identity_of(entity)
    }

    pub fn record(&self, identity: &str) -> Option<&ChangeRecord<T>> {
        self.records.get(identity)
    }

    pub fn records(&self) -> impl Iterator<Item = &ChangeRecord<T>> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pending_removes(&self) -> impl Iterator<Item = &Criteria<T>> {
        self.pending.iter().filter_map(|p| match p {
            PendingPredicate::Remove(c) => Some(c),
            PendingPredicate::Modify(..) => None,
        })
    }

    pub fn pending_modifies(&self) -> impl Iterator<Item = (&Modification, &Criteria<T>)> {
        self.pending.iter().filter_map(|p| match p {
            PendingPredicate::Modify(m, c) => Some((m, c)),
            PendingPredicate::Remove(_) => None,
        })
    }

    /// Merges a page of backing-store rows with staged state.
    ///
    /// The result is the union of staged matches and merged fresh rows,
    /// without removed entities, ordered and truncated by `query`. Without an
    /// explicit ordering, results come back in identity order.
    pub fn merge_list(&mut self, rows: Vec<T>, query: &Query<T>) -> Result<Vec<T>> {
        let descriptor = Arc::clone(&self.descriptor);
        let requested = query.requested_fields();

        let mut merged: BTreeMap<String, T> = self
            .records
            .values()
            .filter_map(|record| record.visible().map(|v| (record.identity(), v)))
            .filter(|(_, v)| query.matches(v, &descriptor))
            .map(|(id, v)| (id.to_string(), v.clone()))
            .collect();

        for row in rows {
            let identity = descriptor.identity_of(&row)?;
            let visible = if let Some(record) = self.records.get_mut(&identity) {
                record.merge_from_backing_store(&row, requested)?.cloned()
            } else {
                let mut record =
                    ChangeRecord::loaded(Arc::clone(&descriptor), identity.clone(), row, requested);
                replay(&self.pending, &mut record, &descriptor)?;
                let visible = record.visible().cloned();
                self.records.insert(identity.clone(), record);
                visible
            };

            // staged edits may have moved the row out of the query
            match visible.filter(|v| query.matches(v, &descriptor)) {
                Some(value) => {
                    merged.insert(identity, value);
                }
                None => {
                    merged.remove(&identity);
                }
            }
        }

        let items: Vec<T> = merged.into_values().collect();
        Ok(query.window(items, &descriptor))
    }

    /// Single-row variant of [`Warehouse::merge_list`]: first result after
    /// ordering.
    pub fn merge_one(&mut self, row: Option<T>, query: &Query<T>) -> Result<Option<T>> {
        let rows = row.into_iter().collect();
        Ok(self.merge_list(rows, &query.clone().limit(1))?.into_iter().next())
    }

    /// Stages a save. Returns the entity identity.
    pub fn save(&mut self, entity: T) -> Result<String> {
        let identity = self.descriptor.identity_of(&entity)?;
        match self.records.get_mut(&identity) {
            Some(record) => record.save(entity),
            None => {
                let mut record = ChangeRecord::created(
                    Arc::clone(&self.descriptor),
                    identity.clone(),
                    entity.clone(),
                );
                record.save(entity);
                self.records.insert(identity.clone(), record);
            }
        }
        Ok(identity)
    }

    /// Stages the removal of one entity. Returns the entity identity.
    pub fn remove(&mut self, entity: T) -> Result<String> {
        let identity = self.descriptor.identity_of(&entity)?;
        self.records
            .entry(identity.clone())
            .or_insert_with(|| {
                ChangeRecord::created(Arc::clone(&self.descriptor), identity.clone(), entity)
            })
            .remove();
        Ok(identity)
    }

    /// Removes every known match now and every later-merged match on replay.
    /// Returns how many staged records were affected immediately.
    pub fn remove_where(&mut self, criteria: Criteria<T>) -> Result<usize> {
        let descriptor = Arc::clone(&self.descriptor);
        let mut touched = 0;
        for record in self.records.values_mut() {
            if !record.is_removed() && criteria.matches(record.current(), &descriptor) {
                record.remove_by_predicate();
                touched += 1;
            }
        }
        self.pending.push(PendingPredicate::Remove(criteria));
        Ok(touched)
    }

    /// Modifies every known match now and every later-merged match on
    /// replay. Returns how many staged records were affected immediately.
    pub fn modify_where(&mut self, modification: Modification, criteria: Criteria<T>) -> Result<usize> {
        modification.validate(&self.descriptor)?;
        let descriptor = Arc::clone(&self.descriptor);

        // compute every result first so a failure leaves no record half done
        let mut updates = Vec::new();
        for (identity, record) in &self.records {
            if record.is_removed() || !criteria.matches(record.current(), &descriptor) {
                continue;
            }
            if let Some(values) = record.modified(&modification)? {
                updates.push((identity.clone(), values));
            }
        }

        let touched = updates.len();
        for (identity, (current, baseline)) in updates {
            if let Some(record) = self.records.get_mut(&identity) {
                record.accept_modified(current, baseline);
            }
        }
        self.pending.push(PendingPredicate::Modify(modification, criteria));
        Ok(touched)
    }

    /// Query to send to the backing store for a paged list read. Each staged
    /// record can push at most one stored row out of the page, so the page
    /// grows by the number of records; a pending predicate can hide any
    /// number of rows and lifts the page size entirely.
    pub fn backing_page(&self, query: &Query<T>) -> Query<T> {
        let page = match query.page_size() {
            Some(_) if !self.pending.is_empty() => None,
            Some(limit) => Some(limit.saturating_add(self.records.len())),
            None => None,
        };
        query.clone().with_page_size(page)
    }

    pub fn exist(&self, query: &Query<T>) -> Existence<T> {
        if self.visible_matching(query).next().is_some() {
            Existence::Found
        } else {
            Existence::Residual(self.residual(query))
        }
    }

    /// Narrows `query` for the backing store: identities already staged here
    /// and rows caught by pending remove predicates are excluded.
    pub fn residual(&self, query: &Query<T>) -> Query<T> {
        let mut criteria = query.criteria().clone();
        if !self.records.is_empty() {
            criteria = criteria.and(Criteria::identity_in(self.records.keys().cloned()).not());
        }
        let removes: Vec<Criteria<T>> = self.pending_removes().cloned().collect();
        if !removes.is_empty() {
            criteria = criteria.and(Criteria::Or(removes).not());
        }
        query.with_criteria(criteria)
    }

    pub fn count(&self, query: &Query<T>) -> Result<LocalAggregate<T>> {
        self.aggregate(AggregateKind::Count, query)
    }

    pub fn max(&self, query: &Query<T>) -> Result<LocalAggregate<T>> {
        self.aggregate(AggregateKind::Max, query)
    }

    pub fn min(&self, query: &Query<T>) -> Result<LocalAggregate<T>> {
        self.aggregate(AggregateKind::Min, query)
    }

    pub fn sum(&self, query: &Query<T>) -> Result<LocalAggregate<T>> {
        self.aggregate(AggregateKind::Sum, query)
    }

    pub fn aggregate(&self, kind: AggregateKind, query: &Query<T>) -> Result<LocalAggregate<T>> {
        let local = aggregate::fold(kind, self.visible_matching(query), query, &self.descriptor)?;
        Ok(local.with_residual(self.residual(query)))
    }

    fn visible_matching<'a>(&'a self, query: &'a Query<T>) -> impl Iterator<Item = &'a T> + 'a {
        self.records
            .values()
            .filter_map(|record| record.visible())
            .filter(move |v| query.matches(v, &self.descriptor))
    }
}

/// Applies pending bulk operations, in issue order, to a row seen for the
/// first time.
fn replay<T: Clone>(
    pending: &[PendingPredicate<T>],
    record: &mut ChangeRecord<T>,
    descriptor: &EntityDescriptor<T>,
) -> Result<()> {
    for predicate in pending {
        if record.is_removed() {
            break;
        }
        match predicate {
            PendingPredicate::Remove(criteria) => {
                if criteria.matches(record.current(), descriptor) {
                    record.remove_by_predicate();
                }
            }
            PendingPredicate::Modify(modification, criteria) => {
                if criteria.matches(record.current(), descriptor) {
                    record.modify(modification)?;
                }
            }
        }
    }
    Ok(())
}

impl<T> fmt::Debug for Warehouse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Warehouse")
            .field("entity", &self.descriptor.name())
            .field("records", &self.records.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
