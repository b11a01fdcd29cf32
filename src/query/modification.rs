use crate::core::{Result, StageError, Value};
use crate::entity::EntityDescriptor;
use std::fmt;
use std::sync::Arc;

pub type Transform = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
struct Assignment {
    field: String,
    transform: Transform,
    // known up front for `set`, checked by `validate`
    constant: Option<Value>,
}

/// Field-level update expression: each assignment computes a new value from
/// the old one.
#[derive(Clone, Default)]
pub struct Modification {
    assignments: Vec<Assignment>,
}

impl Modification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<F>(self, field: &str, transform: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.try_update(field, move |old| Ok(transform(old)))
    }

    /// Like [`update`](Self::update) but the transform may reject the old value.
    pub fn try_update<F>(mut self, field: &str, transform: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.assignments.push(Assignment {
            field: field.to_string(),
            transform: Arc::new(transform),
            constant: None,
        });
        self
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let constant = value.clone();
        self.assignments.push(Assignment {
            field: field.to_string(),
            transform: Arc::new(move |_| Ok(value.clone())),
            constant: Some(constant),
        });
        self
    }

    /// Adds `delta` to a numeric field. Fails with a type mismatch when the
    /// old value is not numeric.
    pub fn increment(self, field: &str, delta: impl Into<Value>) -> Self {
        let delta = delta.into();
        self.try_update(field, move |old| old.add(&delta))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.assignments.iter().map(|a| a.field.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Checks every target field exists and every constant fits its column.
    pub fn validate<T>(&self, descriptor: &EntityDescriptor<T>) -> Result<()> {
        for assignment in &self.assignments {
            let field = descriptor.field(&assignment.field)?;
            if let Some(value) = &assignment.constant {
                if !field.data_type().is_compatible(value) {
                    return Err(StageError::TypeMismatch(format!(
                        "{}.{} expects {}, got {}",
                        descriptor.name(),
                        assignment.field,
                        field.data_type(),
                        value.type_name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies every assignment in order to `entity`. On error `entity` may
    /// be partially updated; callers apply to a copy.
    pub fn apply<T>(&self, entity: &mut T, descriptor: &EntityDescriptor<T>) -> Result<()> {
        for assignment in &self.assignments {
            let old = descriptor.get(entity, &assignment.field)?;
            let new = (assignment.transform)(&old)?;
            descriptor.set(entity, &assignment.field, new)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Modification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields()).finish()
    }
}
