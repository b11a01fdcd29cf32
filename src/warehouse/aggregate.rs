use crate::core::{Result, StageError, Value};
use crate::entity::EntityDescriptor;
use crate::query::Query;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Max,
    Min,
    Sum,
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateKind::Count => write!(f, "COUNT"),
            AggregateKind::Max => write!(f, "MAX"),
            AggregateKind::Min => write!(f, "MIN"),
            AggregateKind::Sum => write!(f, "SUM"),
        }
    }
}

/// Aggregate over staged entities plus the query the backing store still has
/// to answer. Combining the two is up to the caller.
#[derive(Debug)]
pub struct LocalAggregate<T> {
    pub kind: AggregateKind,
    /// Aggregate over staged, non-removed matches. `Null` when nothing
    /// contributed (except for `Count`, which is always an integer).
    pub value: Value,
    /// Number of staged entities that matched the query.
    pub matched: u64,
    pub residual: Query<T>,
}

impl<T> LocalAggregate<T> {
    pub(super) fn with_residual(mut self, residual: Query<T>) -> Self {
        self.residual = residual;
        self
    }

    /// Folds the backing-store result for the residual query into the local
    /// value.
    pub fn combine(&self, remote: &Value) -> Result<Value> {
        match self.kind {
            AggregateKind::Count | AggregateKind::Sum => self.value.add(remote),
            AggregateKind::Max => self.value.clone().max_of(remote.clone()),
            AggregateKind::Min => self.value.clone().min_of(remote.clone()),
        }
    }
}

pub(super) fn fold<'a, T: 'a>(
    kind: AggregateKind,
    entities: impl Iterator<Item = &'a T>,
    query: &Query<T>,
    descriptor: &EntityDescriptor<T>,
) -> Result<LocalAggregate<T>> {
    let target = match kind {
        AggregateKind::Count => None,
        _ => Some(query.target_field().ok_or_else(|| {
            StageError::Config(format!("{} query on '{}' has no target field", kind, descriptor.name()))
        })?),
    };

    let mut matched = 0u64;
    let mut value = match kind {
        AggregateKind::Count => Value::Integer(0),
        _ => Value::Null,
    };

    for entity in entities {
        matched += 1;
        let Some(field) = target else {
            continue;
        };
        let field_value = descriptor.get(entity, field)?;
        value = match kind {
            AggregateKind::Count => value,
            AggregateKind::Sum => value.add(&field_value)?,
            AggregateKind::Max => value.max_of(field_value)?,
            AggregateKind::Min => value.min_of(field_value)?,
        };
    }

    if kind == AggregateKind::Count {
        value = Value::Integer(matched as i64);
    }

    Ok(LocalAggregate {
        kind,
        value,
        matched,
        residual: query.clone(),
    })
}
