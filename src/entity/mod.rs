// ============================================================================
// Entity Metadata
// ============================================================================
//
// Typed accessor tables registered once per entity type. Every generic
// operation in the staging core (identity, diffing, modification, sorting)
// goes through a descriptor instead of runtime reflection.
//
// ============================================================================

mod surrogate;

pub use surrogate::SurrogateKey;

use crate::core::{DataType, Result, StageError, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Separator between primary key components inside an identity value.
pub const IDENTITY_SEPARATOR: &str = "|";

/// Field name → value, ordered by field name.
pub type FieldChanges = BTreeMap<String, Value>;

pub type FieldGetter<T> = fn(&T) -> Value;
pub type FieldSetter<T> = fn(&mut T, Value) -> Result<()>;
pub type SurrogateSlot<T> = fn(&T) -> &SurrogateKey;

/// A domain entity that can be staged inside a unit of work.
pub trait Entity: Clone + Send + Sync + 'static {
    fn descriptor() -> EntityDescriptor<Self>;
}

pub struct FieldDescriptor<T> {
    name: &'static str,
    data_type: DataType,
    get: FieldGetter<T>,
    set: FieldSetter<T>,
}

impl<T> FieldDescriptor<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn get(&self, entity: &T) -> Value {
        (self.get)(entity)
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .finish()
    }
}

/// Field table, primary key and identity rules for one entity type.
pub struct EntityDescriptor<T> {
    name: &'static str,
    fields: Vec<FieldDescriptor<T>>,
    index: HashMap<&'static str, usize>,
    primary_key: Vec<&'static str>,
    surrogate: Option<SurrogateSlot<T>>,
}

impl<T> EntityDescriptor<T> {
    pub fn builder(name: &'static str) -> EntityDescriptorBuilder<T> {
        EntityDescriptorBuilder {
            name,
            fields: Vec::new(),
            primary_key: Vec::new(),
            surrogate: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    pub fn primary_key(&self) -> &[&'static str] {
        &self.primary_key
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn field(&self, name: &str) -> Result<&FieldDescriptor<T>> {
        self.index
            .get(name)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| StageError::UnknownField(name.to_string(), self.name.to_string()))
    }

    pub fn get(&self, entity: &T, name: &str) -> Result<Value> {
        Ok(self.field(name)?.get(entity))
    }

    pub fn set(&self, entity: &mut T, name: &str, value: Value) -> Result<()> {
        let field = self.field(name)?;
        if !field.data_type.is_compatible(&value) {
            return Err(StageError::TypeMismatch(format!(
                "{}.{} expects {}, got {}",
                self.name,
                name,
                field.data_type,
                value.type_name()
            )));
        }
        (field.set)(entity, value)
    }

    /// Copies one field from `source` into `target`.
    pub fn copy_field(&self, source: &T, target: &mut T, name: &str) -> Result<()> {
        let field = self.field(name)?;
        (field.set)(target, field.get(source))
    }

    /// Every declared field value of `entity`.
    pub fn values_of(&self, entity: &T) -> FieldChanges {
        self.fields
            .iter()
            .map(|f| (f.name.to_string(), f.get(entity)))
            .collect()
    }

    /// Computes the identity value of `entity`.
    ///
    /// Primary key components are joined with [`IDENTITY_SEPARATOR`]; keyless
    /// types fall back to their surrogate slot.
    pub fn identity_of(&self, entity: &T) -> Result<String> {
        if self.primary_key.is_empty() {
            let slot = self.surrogate.ok_or_else(|| StageError::MissingIdentity {
                entity: self.name.to_string(),
                reason: "no primary key and no surrogate key declared".into(),
            })?;
            return Ok(slot(entity).token().to_string());
        }

        let mut parts = Vec::with_capacity(self.primary_key.len());
        for key in &self.primary_key {
            let value = self.get(entity, key)?;
            if value.is_null() {
                return Err(StageError::MissingIdentity {
                    entity: self.name.to_string(),
                    reason: format!("primary key field '{}' is null", key),
                });
            }
            parts.push(value.to_string());
        }
        Ok(parts.join(IDENTITY_SEPARATOR))
    }

    /// Checks that the primary key refers to declared fields and that an
    /// identity rule exists at all.
    pub fn validate(&self) -> Result<()> {
        for key in &self.primary_key {
            if !self.has_field(key) {
                return Err(StageError::Config(format!(
                    "primary key '{}' is not a field of '{}'",
                    key, self.name
                )));
            }
        }
        if self.primary_key.is_empty() && self.surrogate.is_none() {
            return Err(StageError::MissingIdentity {
                entity: self.name.to_string(),
                reason: "no primary key and no surrogate key declared".into(),
            });
        }
        Ok(())
    }
}

impl<T> fmt::Debug for EntityDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("primary_key", &self.primary_key)
            .field("surrogate", &self.surrogate.is_some())
            .finish()
    }
}

pub struct EntityDescriptorBuilder<T> {
    name: &'static str,
    fields: Vec<FieldDescriptor<T>>,
    primary_key: Vec<&'static str>,
    surrogate: Option<SurrogateSlot<T>>,
}

impl<T> EntityDescriptorBuilder<T> {
    pub fn field(
        mut self,
        name: &'static str,
        data_type: DataType,
        get: FieldGetter<T>,
        set: FieldSetter<T>,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            data_type,
            get,
            set,
        });
        self
    }

    pub fn primary_key<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        self.primary_key = keys.into_iter().collect();
        self
    }

    pub fn surrogate_key(mut self, slot: SurrogateSlot<T>) -> Self {
        self.surrogate = Some(slot);
        self
    }

    pub fn build(self) -> EntityDescriptor<T> {
        let index = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name, i))
            .collect();
        EntityDescriptor {
            name: self.name,
            fields: self.fields,
            index,
            primary_key: self.primary_key,
            surrogate: self.surrogate,
        }
    }
}

/// Extracts an `i64` for use in a field setter.
pub fn expect_i64(value: Value, field: &str) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| StageError::TypeMismatch(format!("{} expects INTEGER, got {}", field, value.type_name())))
}

/// Extracts an `f64` for use in a field setter.
pub fn expect_f64(value: Value, field: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| StageError::TypeMismatch(format!("{} expects FLOAT, got {}", field, value.type_name())))
}

/// Extracts a `String` for use in a field setter.
pub fn expect_text(value: Value, field: &str) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(StageError::TypeMismatch(format!(
            "{} expects TEXT, got {}",
            field,
            other.type_name()
        ))),
    }
}

/// Extracts a `bool` for use in a field setter.
pub fn expect_bool(value: Value, field: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| StageError::TypeMismatch(format!("{} expects BOOLEAN, got {}", field, value.type_name())))
}
