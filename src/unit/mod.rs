// ============================================================================
// Unit of Work
// ============================================================================
//
// Accumulates activation records for one logical transaction and turns them
// into executed backend commands at commit time:
//
//   flatten -> sequence + dedup -> resolve + veto -> group by executor
//           -> execute (parallel across groups, sequential within)
//           -> callbacks / subscribers / events -> reset
//
// ============================================================================

mod config;
mod dispatch;
mod events;
mod state;

pub use config::UnitOfWorkConfig;
pub use dispatch::{CallbackDispatcher, SpawnDispatcher, TrackingDispatcher};
pub use events::{DomainEvent, EventSink, MemoryEventSink};
pub use state::{TransactionState, UnitId};

use crate::activation::{Activation, ActivationRecord, PreparedCommand, RecordIdentity};
use crate::command::{CommandExecutor, CommitResult, ExecutorResolver};
use crate::core::{Result, StageError};
use crate::entity::Entity;
use crate::warehouse::{SharedWarehouse, Warehouse};
use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{Instrument, Level, event, info_span};

pub type SuccessSubscriber = Box<dyn FnOnce(CommitResult) + Send>;
pub type FailureSubscriber = Box<dyn FnOnce(CommitFailure) + Send>;

/// Passed to failure subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitFailure {
    pub unit: UnitId,
    pub message: String,
}

/// Transaction-local state, dropped wholesale on every reset.
#[derive(Default)]
struct Staging {
    warehouses: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    records: Vec<ActivationRecord>,
    on_success: Vec<SuccessSubscriber>,
    on_failure: Vec<FailureSubscriber>,
    events: Vec<DomainEvent>,
}

struct Inner {
    state: TransactionState,
    staging: Staging,
}

/// Commands bound for one executor, in sequence order.
struct CommandGroup {
    executor: Arc<dyn CommandExecutor>,
    commands: Vec<PreparedCommand>,
}

/// What a group actually ran.
struct GroupOutcome {
    result: CommitResult,
    executed: Vec<(PreparedCommand, u64)>,
}

pub struct UnitOfWork {
    id: UnitId,
    config: UnitOfWorkConfig,
    resolver: Arc<dyn ExecutorResolver>,
    dispatcher: Arc<dyn CallbackDispatcher>,
    event_sink: Option<Arc<dyn EventSink>>,
    inner: Mutex<Inner>,
}

impl UnitOfWork {
    pub fn new(resolver: Arc<dyn ExecutorResolver>) -> Self {
        Self::builder(resolver).build()
    }

    pub fn builder(resolver: Arc<dyn ExecutorResolver>) -> UnitOfWorkBuilder {
        UnitOfWorkBuilder {
            config: UnitOfWorkConfig::default(),
            resolver,
            dispatcher: Arc::new(SpawnDispatcher),
            event_sink: None,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    pub fn state(&self) -> Result<TransactionState> {
        Ok(self.inner.lock()?.state)
    }

    /// Number of top-level activation records waiting for commit.
    pub fn pending_records(&self) -> Result<usize> {
        Ok(self.inner.lock()?.staging.records.len())
    }

    /// Staging warehouse for `T`, created on first use.
    pub fn warehouse<T: Entity>(&self) -> Result<SharedWarehouse<T>> {
        let mut inner = self.inner.lock()?;
        reopen(&mut inner);
        if let Some(existing) = inner.staging.warehouses.get(&TypeId::of::<T>()) {
            return Arc::clone(existing)
                .downcast::<Mutex<Warehouse<T>>>()
                .map_err(|_| StageError::InvalidState("warehouse registered under a foreign type".into()));
        }
        let warehouse = Warehouse::<T>::shared()?;
        inner
            .staging
            .warehouses
            .insert(TypeId::of::<T>(), Arc::clone(&warehouse) as Arc<dyn Any + Send + Sync>);
        Ok(warehouse)
    }

    pub fn register(&self, record: impl Into<ActivationRecord>) -> Result<()> {
        let mut inner = self.writable()?;
        inner.staging.records.push(record.into());
        Ok(())
    }

    pub fn on_success<F>(&self, subscriber: F) -> Result<()>
    where
        F: FnOnce(CommitResult) + Send + 'static,
    {
        self.writable()?.staging.on_success.push(Box::new(subscriber));
        Ok(())
    }

    pub fn on_failure<F>(&self, subscriber: F) -> Result<()>
    where
        F: FnOnce(CommitFailure) + Send + 'static,
    {
        self.writable()?.staging.on_failure.push(Box::new(subscriber));
        Ok(())
    }

    /// Queues a domain event, published only if the commit succeeds.
    pub fn raise_event(&self, event: DomainEvent) -> Result<()> {
        self.writable()?.staging.events.push(event);
        Ok(())
    }

    /// Discards every staged record without executing anything.
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if inner.state == TransactionState::Committing {
            return Err(StageError::InvalidState(format!(
                "cannot roll back {} while it is committing",
                self.id
            )));
        }
        let discarded = std::mem::take(&mut inner.staging).records.len();
        inner.state = TransactionState::RolledBack;
        event!(Level::DEBUG, unit = %self.id, discarded, "unit of work rolled back");
        Ok(())
    }

    /// Resolves and executes every staged write.
    ///
    /// The unit is reset whatever the outcome. Execution errors are returned
    /// after failure subscribers have been dispatched.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use std::sync::Arc;
    /// use txstage::{Command, CommandExecutor, CommitResult, SingleExecutorResolver, UnitOfWork};
    ///
    /// struct Noop;
    ///
    /// #[async_trait::async_trait]
    /// impl CommandExecutor for Noop {
    ///     fn key(&self) -> &str {
    ///         "noop"
    ///     }
    ///
    ///     async fn execute(&self, _command: &dyn Command) -> txstage::Result<u64> {
    ///         Ok(0)
    ///     }
    /// }
    ///
    /// let unit = UnitOfWork::new(Arc::new(SingleExecutorResolver::new(Arc::new(Noop))));
    /// // nothing staged: no executor call, empty success
    /// assert_eq!(unit.commit().await.unwrap(), CommitResult::empty());
    /// # });
    /// ```
    pub async fn commit(&self) -> Result<CommitResult> {
        let span = info_span!("unit_of_work.commit", unit = %self.id, label = %self.config.label);
        self.commit_staged().instrument(span).await
    }

    async fn commit_staged(&self) -> Result<CommitResult> {
        let staging = {
            let mut inner = self.inner.lock()?;
            if inner.state == TransactionState::Committing {
                return Err(StageError::InvalidState(format!("{} is already committing", self.id)));
            }
            inner.state = TransactionState::Committing;
            std::mem::take(&mut inner.staging)
        };
        let Staging {
            warehouses,
            records,
            on_success,
            on_failure,
            events,
        } = staging;

        let outcome = self.execute(records).await;
        // activation records are gone; the warehouses can go too
        drop(warehouses);

        match outcome {
            Ok((result, executed)) => {
                self.finish(TransactionState::Committed)?;
                event!(
                    Level::INFO,
                    commands = result.committed_command_count,
                    affected = result.affected_data_count,
                    "unit of work committed"
                );
                self.dispatch_success(result, executed, on_success, events);
                Ok(result)
            }
            Err(err) => {
                self.finish(TransactionState::Failed)?;
                event!(Level::ERROR, error = %err, "unit of work commit failed");
                self.dispatch_failure(&err, on_failure);
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        records: Vec<ActivationRecord>,
    ) -> Result<(CommitResult, Vec<(PreparedCommand, u64)>)> {
        let commands = self.resolve(records)?;
        if commands.is_empty() {
            return Ok((CommitResult::empty(), Vec::new()));
        }

        let groups = self.group(commands)?;
        let semaphore = Semaphore::new(self.config.max_parallel_groups.max(1));
        let outcomes = join_all(groups.iter().map(|group| self.run_group(group, &semaphore))).await;

        let mut total = CommitResult::empty();
        let mut executed = Vec::new();
        for outcome in outcomes {
            let outcome = outcome?;
            total += outcome.result;
            executed.extend(outcome.executed);
        }
        Ok((total, executed))
    }

    /// Flattens, sequences, deduplicates and resolves activation records.
    fn resolve(&self, records: Vec<ActivationRecord>) -> Result<Vec<PreparedCommand>> {
        let sequenced: Vec<Arc<dyn Activation>> = records
            .into_iter()
            .flat_map(ActivationRecord::flatten)
            .collect();

        // last write wins per record identity
        let mut latest: HashMap<&RecordIdentity, usize> = HashMap::new();
        for (sequence, record) in sequenced.iter().enumerate() {
            latest.insert(record.record_identity(), sequence);
        }

        let mut prepared = Vec::new();
        for (sequence, record) in sequenced.iter().enumerate() {
            if latest.get(record.record_identity()) != Some(&sequence) {
                record.mark_obsolete();
                continue;
            }
            let Some(command) = record.resolve()? else {
                continue;
            };
            if !command.approve() {
                event!(
                    Level::DEBUG,
                    command = %command.command.describe(),
                    "command vetoed before execution"
                );
                continue;
            }
            prepared.push(command);
        }

        event!(
            Level::DEBUG,
            records = sequenced.len(),
            commands = prepared.len(),
            "activation records resolved"
        );
        Ok(prepared)
    }

    /// Groups commands by executor key, keeping sequence order inside each
    /// group.
    fn group(&self, commands: Vec<PreparedCommand>) -> Result<Vec<CommandGroup>> {
        let mut groups: Vec<CommandGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for command in commands {
            for executor in self.resolver.resolve(command.command.as_ref())? {
                let slot = *index.entry(executor.key().to_string()).or_insert_with(|| {
                    groups.push(CommandGroup {
                        executor: Arc::clone(&executor),
                        commands: Vec::new(),
                    });
                    groups.len() - 1
                });
                groups[slot].commands.push(command.clone());
            }
        }
        Ok(groups)
    }

    async fn run_group(&self, group: &CommandGroup, semaphore: &Semaphore) -> Result<GroupOutcome> {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| StageError::Execution(e.to_string()))?;
        let executor = group.executor.as_ref();

        let mut result = CommitResult::empty();
        let mut executed = Vec::with_capacity(group.commands.len());
        for prepared in &group.commands {
            let command = prepared.command.as_ref();
            let affected = match self.config.executor_timeout {
                Some(limit) => timeout(limit, executor.execute(command))
                    .await
                    .map_err(|_| StageError::Timeout(executor.key().to_string()))??,
                None => executor.execute(command).await?,
            };

            result.committed_command_count += 1;
            result.affected_data_count += affected;
            if command.allow_empty() {
                result.allow_empty_command_count += 1;
            } else if affected == 0 {
                return Err(StageError::NothingAffected(command.describe()));
            }
            executed.push((prepared.clone(), affected));
        }

        event!(
            Level::DEBUG,
            executor = %executor.key(),
            commands = result.committed_command_count,
            affected = result.affected_data_count,
            "executor group finished"
        );
        Ok(GroupOutcome { result, executed })
    }

    fn finish(&self, state: TransactionState) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.state = state;
        Ok(())
    }

    fn dispatch_success(
        &self,
        result: CommitResult,
        executed: Vec<(PreparedCommand, u64)>,
        subscribers: Vec<SuccessSubscriber>,
        events: Vec<DomainEvent>,
    ) {
        for (prepared, affected) in executed {
            if let Some(callback) = prepared.callback() {
                self.dispatcher.dispatch(async move { callback(affected) }.boxed());
            }
        }
        for subscriber in subscribers {
            self.dispatcher.dispatch(async move { subscriber(result) }.boxed());
        }
        if !self.config.flush_events || events.is_empty() {
            return;
        }
        if let Some(sink) = self.event_sink.clone() {
            let unit = self.id;
            self.dispatcher.dispatch(
                async move {
                    if let Err(err) = sink.publish(events).await {
                        event!(Level::WARN, unit = %unit, error = %err, "event flush failed");
                    }
                }
                .boxed(),
            );
        }
    }

    fn dispatch_failure(&self, err: &StageError, subscribers: Vec<FailureSubscriber>) {
        for subscriber in subscribers {
            let failure = CommitFailure {
                unit: self.id,
                message: err.to_string(),
            };
            self.dispatcher.dispatch(async move { subscriber(failure) }.boxed());
        }
    }

    /// Guard for staging writes: rejects writes while committing and starts
    /// a fresh transaction after a terminal state.
    fn writable(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        let mut inner = self.inner.lock()?;
        if inner.state == TransactionState::Committing {
            return Err(StageError::InvalidState(format!(
                "cannot stage writes on {} while it is committing",
                self.id
            )));
        }
        reopen(&mut inner);
        Ok(inner)
    }
}

fn reopen(inner: &mut Inner) {
    if inner.state.is_terminal() {
        inner.state = TransactionState::Active;
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}

pub struct UnitOfWorkBuilder {
    config: UnitOfWorkConfig,
    resolver: Arc<dyn ExecutorResolver>,
    dispatcher: Arc<dyn CallbackDispatcher>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl UnitOfWorkBuilder {
    pub fn config(mut self, config: UnitOfWorkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn CallbackDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn build(self) -> UnitOfWork {
        UnitOfWork {
            id: UnitId::new(),
            config: self.config,
            resolver: self.resolver,
            dispatcher: self.dispatcher,
            event_sink: self.event_sink,
            inner: Mutex::new(Inner {
                state: TransactionState::Active,
                staging: Staging::default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests;
