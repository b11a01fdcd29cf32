use crate::command::Command;
use crate::entity::{Entity, FieldChanges};
use crate::query::{Modification, Query};
use std::any::Any;
use std::fmt;

/// Write understood by [`super::MemoryStore`].
pub enum StoreCommand<T> {
    Insert { target: &'static str, identity: String, row: T },
    Update { target: &'static str, identity: String, changes: FieldChanges },
    Delete { target: &'static str, identity: String },
    DeleteWhere { target: &'static str, query: Query<T> },
    UpdateWhere { target: &'static str, modification: Modification, query: Query<T> },
}

impl<T> StoreCommand<T> {
    pub fn verb(&self) -> &'static str {
        match self {
            StoreCommand::Insert { .. } => "INSERT",
            StoreCommand::Update { .. } => "UPDATE",
            StoreCommand::Delete { .. } => "DELETE",
            StoreCommand::DeleteWhere { .. } => "DELETE WHERE",
            StoreCommand::UpdateWhere { .. } => "UPDATE WHERE",
        }
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            StoreCommand::Insert { identity, .. }
            | StoreCommand::Update { identity, .. }
            | StoreCommand::Delete { identity, .. } => Some(identity),
            StoreCommand::DeleteWhere { .. } | StoreCommand::UpdateWhere { .. } => None,
        }
    }
}

impl<T: Entity> Command for StoreCommand<T> {
    fn target(&self) -> &str {
        match self {
            StoreCommand::Insert { target, .. }
            | StoreCommand::Update { target, .. }
            | StoreCommand::Delete { target, .. }
            | StoreCommand::DeleteWhere { target, .. }
            | StoreCommand::UpdateWhere { target, .. } => target,
        }
    }

    fn describe(&self) -> String {
        match self {
            StoreCommand::Update { changes, .. } => format!(
                "UPDATE {} SET {} WHERE identity = {}",
                self.target(),
                changes.keys().cloned().collect::<Vec<_>>().join(", "),
                self.identity().unwrap_or_default()
            ),
            StoreCommand::DeleteWhere { query, .. } => {
                format!("DELETE FROM {} WHERE {:?}", self.target(), query.criteria())
            }
            StoreCommand::UpdateWhere { modification, query, .. } => format!(
                "UPDATE {} SET {:?} WHERE {:?}",
                self.target(),
                modification,
                query.criteria()
            ),
            _ => format!(
                "{} {} {}",
                self.verb(),
                self.target(),
                self.identity().unwrap_or_default()
            ),
        }
    }

    fn allow_empty(&self) -> bool {
        !matches!(self, StoreCommand::Insert { .. } | StoreCommand::Update { .. })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> fmt::Debug for StoreCommand<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCommand")
            .field("verb", &self.verb())
            .field("identity", &self.identity())
            .finish()
    }
}
