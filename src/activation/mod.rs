// ============================================================================
// Activation Records
// ============================================================================
//
// Deferred descriptions of intended writes. A record is created when the
// application stages a write and only turns into a backend command at commit
// time, by reading the final state of its warehouse.
//
// State transitions:
//
//   Created ──resolve──> Command | nothing
//      │
//      └──superseded──> Obsolete
//
// ============================================================================

mod entity;

pub use entity::EntityActivation;

use crate::command::Command;
use crate::core::Result;
use crate::entity::Entity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Deduplication key of an activation record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordIdentity {
    /// Per-object write: later writes to the same entity supersede earlier ones.
    Entity { entity_type: String, identity: String },
    /// Predicate-based or forced write, never deduplicated.
    Unique(Uuid),
}

impl RecordIdentity {
    pub fn entity(entity_type: &str, identity: &str) -> Self {
        RecordIdentity::Entity {
            entity_type: entity_type.to_string(),
            identity: identity.to_string(),
        }
    }

    pub fn unique() -> Self {
        RecordIdentity::Unique(Uuid::new_v4())
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, RecordIdentity::Unique(_))
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordIdentity::Entity {
                entity_type,
                identity,
            } => write!(f, "{}:{}", entity_type, identity),
            RecordIdentity::Unique(id) => write!(f, "unique:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    Save,
    Remove,
    RemoveWhere,
    ModifyWhere,
    Package,
}

pub type BeforeExecuteHook = Arc<dyn Fn(&dyn Command) -> bool + Send + Sync>;
pub type CommandCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Per-write options supplied by the caller.
#[derive(Clone, Default)]
pub struct WriteOptions {
    force: bool,
    before_execute: Option<BeforeExecuteHook>,
    on_committed: Option<CommandCallback>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always execute: the record is never deduplicated and a save with an
    /// empty diff still writes.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Hook run right before execution; returning `false` vetoes the command.
    pub fn before_execute<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Command) -> bool + Send + Sync + 'static,
    {
        self.before_execute = Some(Arc::new(hook));
        self
    }

    /// Callback fired after a successful commit with the affected row count.
    pub fn on_committed<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.on_committed = Some(Arc::new(callback));
        self
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub(crate) fn prepare(&self, command: Arc<dyn Command>) -> PreparedCommand {
        PreparedCommand {
            command,
            before_execute: self.before_execute.clone(),
            on_committed: self.on_committed.clone(),
        }
    }
}

impl fmt::Debug for WriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("force", &self.force)
            .field("before_execute", &self.before_execute.is_some())
            .field("on_committed", &self.on_committed.is_some())
            .finish()
    }
}

/// A resolved command together with the hooks of the record it came from.
#[derive(Clone)]
pub struct PreparedCommand {
    pub command: Arc<dyn Command>,
    before_execute: Option<BeforeExecuteHook>,
    on_committed: Option<CommandCallback>,
}

impl PreparedCommand {
    pub fn new(command: Arc<dyn Command>) -> Self {
        Self {
            command,
            before_execute: None,
            on_committed: None,
        }
    }

    /// Runs the command's own pre-execution hook, then the caller's.
    pub fn approve(&self) -> bool {
        self.command.before_execute()
            && self
                .before_execute
                .as_ref()
                .is_none_or(|hook| hook(self.command.as_ref()))
    }

    pub fn callback(&self) -> Option<CommandCallback> {
        self.on_committed.clone()
    }
}

impl fmt::Debug for PreparedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedCommand")
            .field("command", &self.command)
            .finish()
    }
}

/// One deferred write.
pub trait Activation: Send + Sync {
    fn kind(&self) -> ActivationKind;

    fn record_identity(&self) -> &RecordIdentity;

    fn is_obsolete(&self) -> bool;

    fn mark_obsolete(&self);

    /// Materializes the command this write needs now, if any.
    fn resolve(&self) -> Result<Option<PreparedCommand>>;
}

/// Node of the activation tree registered on a unit of work.
#[derive(Clone)]
pub enum ActivationRecord {
    Entry(Arc<dyn Activation>),
    /// Pure grouping; children are resolved, the package itself never is.
    Package(Vec<ActivationRecord>),
}

impl ActivationRecord {
    pub fn package<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ActivationRecord>,
    {
        ActivationRecord::Package(records.into_iter().collect())
    }

    pub fn entry<A: Activation + 'static>(activation: A) -> Self {
        ActivationRecord::Entry(Arc::new(activation))
    }

    pub fn kind(&self) -> ActivationKind {
        match self {
            ActivationRecord::Entry(entry) => entry.kind(),
            ActivationRecord::Package(_) => ActivationKind::Package,
        }
    }

    /// Depth-first expansion of packages into their entries.
    pub fn flatten(self) -> Vec<Arc<dyn Activation>> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<Arc<dyn Activation>>) {
        match self {
            ActivationRecord::Entry(entry) => out.push(entry),
            ActivationRecord::Package(children) => {
                for child in children {
                    child.flatten_into(out);
                }
            }
        }
    }
}

impl<T: Entity> From<EntityActivation<T>> for ActivationRecord {
    fn from(activation: EntityActivation<T>) -> Self {
        ActivationRecord::entry(activation)
    }
}

impl fmt::Debug for ActivationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationRecord::Entry(entry) => write!(
                f,
                "{:?}({}{})",
                entry.kind(),
                entry.record_identity(),
                if entry.is_obsolete() { ", obsolete" } else { "" }
            ),
            ActivationRecord::Package(children) => f.debug_list().entries(children).finish(),
        }
    }
}
