// ============================================================================
// Query Model
// ============================================================================
//
// What a read asks for: criteria, ordering, a limit, the fields it needs and
// (for aggregates) the target field. The staging warehouse evaluates queries
// in memory; backing stores translate them.
//
// ============================================================================

mod criteria;
mod modification;

pub use criteria::{CompareOp, Criteria, Predicate};
pub use modification::{Modification, Transform};

use crate::entity::EntityDescriptor;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Descending,
        }
    }
}

pub struct Query<T> {
    criteria: Criteria<T>,
    order: Vec<OrderBy>,
    limit: Option<usize>,
    fields: Option<Vec<String>>,
    target: Option<String>,
}

impl<T> Query<T> {
    /// Matches every entity.
    pub fn all() -> Self {
        Self::filter(Criteria::All)
    }

    pub fn filter(criteria: Criteria<T>) -> Self {
        Self {
            criteria,
            order: Vec::new(),
            limit: None,
            fields: None,
            target: None,
        }
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Replaces the page size, `None` meaning unbounded.
    pub fn with_page_size(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Restricts the fields a backing-store read needs to fetch.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Field an aggregate (max/min/sum/avg) is computed over.
    pub fn target(mut self, field: &str) -> Self {
        self.target = Some(field.to_string());
        self
    }

    pub fn criteria(&self) -> &Criteria<T> {
        &self.criteria
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn page_size(&self) -> Option<usize> {
        self.limit
    }

    /// Requested fields, `None` meaning every declared field.
    pub fn requested_fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub fn target_field(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Same query shape with the criteria replaced.
    pub fn with_criteria(&self, criteria: Criteria<T>) -> Self {
        Self {
            criteria,
            order: self.order.clone(),
            limit: self.limit,
            fields: self.fields.clone(),
            target: self.target.clone(),
        }
    }

    pub fn matches(&self, entity: &T, descriptor: &EntityDescriptor<T>) -> bool {
        self.criteria.matches(entity, descriptor)
    }

    /// Compares two entities by the query ordering. Unknown fields compare
    /// as equal.
    pub fn compare(&self, a: &T, b: &T, descriptor: &EntityDescriptor<T>) -> Ordering {
        for order in &self.order {
            let (Ok(left), Ok(right)) = (
                descriptor.get(a, &order.field),
                descriptor.get(b, &order.field),
            ) else {
                continue;
            };
            let ordering = match order.direction {
                Direction::Ascending => left.sort_cmp(&right),
                Direction::Descending => right.sort_cmp(&left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Sorts `items` by the query ordering and truncates to the page size.
    pub fn window(&self, mut items: Vec<T>, descriptor: &EntityDescriptor<T>) -> Vec<T> {
        if !self.order.is_empty() {
            items.sort_by(|a, b| self.compare(a, b, descriptor));
        }
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        items
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        self.with_criteria(self.criteria.clone())
    }
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self::all()
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("criteria", &self.criteria)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("fields", &self.fields)
            .field("target", &self.target)
            .finish()
    }
}
