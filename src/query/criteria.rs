use crate::core::Value;
use crate::entity::EntityDescriptor;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        };
        write!(f, "{}", symbol)
    }
}

/// Compiled filter over entities of type `T`.
///
/// Structured variants (`Compare`, `IdentityIn`, the boolean combinators) stay
/// inspectable so a backend can translate them; `Where` is an opaque closure
/// that only in-memory evaluation understands.
pub enum Criteria<T> {
    All,
    Where(Predicate<T>),
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    IdentityIn(Arc<HashSet<String>>),
    And(Vec<Criteria<T>>),
    Or(Vec<Criteria<T>>),
    Not(Box<Criteria<T>>),
}

impl<T> Criteria<T> {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Criteria::Where(Arc::new(f))
    }

    pub fn compare(field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Criteria::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn identity_in<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Criteria::IdentityIn(Arc::new(identities.into_iter().collect()))
    }

    pub fn and(self, other: Criteria<T>) -> Self {
        match (self, other) {
            (Criteria::All, c) | (c, Criteria::All) => c,
            (Criteria::And(mut left), Criteria::And(right)) => {
                left.extend(right);
                Criteria::And(left)
            }
            (Criteria::And(mut left), c) => {
                left.push(c);
                Criteria::And(left)
            }
            (a, b) => Criteria::And(vec![a, b]),
        }
    }

    pub fn or(self, other: Criteria<T>) -> Self {
        match (self, other) {
            (Criteria::Or(mut left), c) => {
                left.push(c);
                Criteria::Or(left)
            }
            (a, b) => Criteria::Or(vec![a, b]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Criteria::Not(Box::new(self))
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Criteria::All)
    }

    /// Evaluates the criteria against `entity`. Fields that cannot be read or
    /// compared make the comparison false rather than failing the read.
    pub fn matches(&self, entity: &T, descriptor: &EntityDescriptor<T>) -> bool {
        match self {
            Criteria::All => true,
            Criteria::Where(f) => f(entity),
            Criteria::Compare { field, op, value } => descriptor
                .get(entity, field)
                .and_then(|actual| actual.compare(value))
                .map(|ordering| op.accepts(ordering))
                .unwrap_or(false),
            Criteria::IdentityIn(ids) => descriptor
                .identity_of(entity)
                .map(|id| ids.contains(&id))
                .unwrap_or(false),
            Criteria::And(parts) => parts.iter().all(|c| c.matches(entity, descriptor)),
            Criteria::Or(parts) => parts.iter().any(|c| c.matches(entity, descriptor)),
            Criteria::Not(inner) => !inner.matches(entity, descriptor),
        }
    }
}

impl<T> Clone for Criteria<T> {
    fn clone(&self) -> Self {
        match self {
            Criteria::All => Criteria::All,
            Criteria::Where(f) => Criteria::Where(Arc::clone(f)),
            Criteria::Compare { field, op, value } => Criteria::Compare {
                field: field.clone(),
                op: *op,
                value: value.clone(),
            },
            Criteria::IdentityIn(ids) => Criteria::IdentityIn(Arc::clone(ids)),
            Criteria::And(parts) => Criteria::And(parts.clone()),
            Criteria::Or(parts) => Criteria::Or(parts.clone()),
            Criteria::Not(inner) => Criteria::Not(inner.clone()),
        }
    }
}

impl<T> Default for Criteria<T> {
    fn default() -> Self {
        Criteria::All
    }
}

impl<T> fmt::Debug for Criteria<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criteria::All => write!(f, "TRUE"),
            Criteria::Where(_) => write!(f, "<predicate>"),
            Criteria::Compare { field, op, value } => write!(f, "{} {} {:?}", field, op, value),
            Criteria::IdentityIn(ids) => write!(f, "IDENTITY IN ({} ids)", ids.len()),
            Criteria::And(parts) => f.debug_tuple("AND").field(parts).finish(),
            Criteria::Or(parts) => f.debug_tuple("OR").field(parts).finish(),
            Criteria::Not(inner) => write!(f, "NOT ({:?})", inner),
        }
    }
}
