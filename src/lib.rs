// ============================================================================
// txstage Library
// ============================================================================
//
// Change tracking and unit-of-work core for a data-access layer:
//
//   Repository ──reads──> DataAccess ──rows──> Warehouse::merge_*
//       │
//       └──writes──> Warehouse (ChangeRecord) + ActivationRecord
//                                                   │
//   UnitOfWork::commit ──resolve──> Command ──group──> CommandExecutor
//
// ============================================================================

pub mod access;
pub mod activation;
pub mod command;
pub mod core;
pub mod entity;
pub mod memory;
pub mod query;
pub mod record;
pub mod registry;
pub mod repository;
pub mod unit;
pub mod warehouse;

pub use access::DataAccess;
pub use activation::{ActivationKind, ActivationRecord, EntityActivation, RecordIdentity, WriteOptions};
pub use command::{
    Command, CommandExecutor, CommitResult, ExecutorResolver, RoutingResolver, SingleExecutorResolver,
};
pub use core::{DataType, Result, StageError, Value};
pub use entity::{Entity, EntityDescriptor, FieldChanges, SurrogateKey};
pub use memory::{MemoryStore, StoreCommand};
pub use query::{CompareOp, Criteria, Direction, Modification, OrderBy, Query};
pub use record::{ChangeRecord, Operation, Source};
pub use registry::WarehouseRegistry;
pub use repository::Repository;
pub use unit::{
    CallbackDispatcher, CommitFailure, DomainEvent, EventSink, MemoryEventSink, SpawnDispatcher,
    TrackingDispatcher, TransactionState, UnitId, UnitOfWork, UnitOfWorkConfig,
};
pub use warehouse::{AggregateKind, Existence, LocalAggregate, SharedWarehouse, Warehouse};
