use super::*;
use crate::access::DataAccess;
use crate::activation::{EntityActivation, WriteOptions};
use crate::command::{Command, RoutingResolver, SingleExecutorResolver};
use crate::entity::fixtures::Item;
use crate::memory::MemoryStore;
use crate::query::{Criteria, Modification, Query};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn seeded(rows: Vec<Item>) -> Arc<MemoryStore<Item>> {
    Arc::new(MemoryStore::with_rows("main", rows).unwrap())
}

fn unit_for(store: &Arc<MemoryStore<Item>>) -> UnitOfWork {
    UnitOfWork::new(Arc::new(SingleExecutorResolver::new(store.clone())))
}

fn access(store: &Arc<MemoryStore<Item>>) -> Arc<dyn DataAccess<Item>> {
    store.clone()
}

fn stage_save(unit: &UnitOfWork, store: &Arc<MemoryStore<Item>>, item: Item, options: WriteOptions) {
    let warehouse = unit.warehouse::<Item>().unwrap();
    let identity = warehouse.lock().unwrap().save(item).unwrap();
    let record = EntityActivation::save(warehouse, access(store), identity, options).unwrap();
    unit.register(record).unwrap();
}

fn stage_remove(unit: &UnitOfWork, store: &Arc<MemoryStore<Item>>, item: Item) {
    let warehouse = unit.warehouse::<Item>().unwrap();
    let identity = warehouse.lock().unwrap().remove(item).unwrap();
    let record =
        EntityActivation::remove(warehouse, access(store), identity, WriteOptions::new()).unwrap();
    unit.register(record).unwrap();
}

fn load(unit: &UnitOfWork, rows: Vec<Item>) {
    let warehouse = unit.warehouse::<Item>().unwrap();
    warehouse.lock().unwrap().merge_list(rows, &Query::all()).unwrap();
}

struct SlowExecutor {
    delay: Duration,
}

#[async_trait]
impl CommandExecutor for SlowExecutor {
    fn key(&self) -> &str {
        "slow"
    }

    async fn execute(&self, _command: &dyn Command) -> crate::core::Result<u64> {
        tokio::time::sleep(self.delay).await;
        Ok(1)
    }
}

#[tokio::test]
async fn test_empty_commit_touches_nothing() {
    let store = seeded(vec![Item::new(1, "a", 10)]);
    let unit = unit_for(&store);

    let result = unit.commit().await.unwrap();
    assert_eq!(result, CommitResult::empty());
    assert!(result.empty_or_success());
    assert_eq!(store.executed_commands(), 0);
    assert_eq!(unit.state().unwrap(), TransactionState::Committed);
}

#[tokio::test]
async fn test_commit_inserts_new_entities() {
    let store = seeded(vec![]);
    let unit = unit_for(&store);
    stage_save(&unit, &store, Item::new(1, "a", 10), WriteOptions::new());
    stage_save(&unit, &store, Item::new(2, "b", 20), WriteOptions::new());
    assert_eq!(unit.pending_records().unwrap(), 2);

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 2);
    assert_eq!(result.affected_data_count, 2);
    assert!(result.success());
    assert_eq!(store.rows().await.len(), 2);
    assert_eq!(unit.pending_records().unwrap(), 0);
}

#[tokio::test]
async fn test_save_then_remove_yields_single_delete() {
    let store = seeded(vec![Item::new(1, "a", 10)]);
    let unit = unit_for(&store);
    load(&unit, vec![Item::new(1, "a", 10)]);

    stage_save(&unit, &store, Item::new(1, "a", 99), WriteOptions::new());
    stage_remove(&unit, &store, Item::new(1, "a", 99));

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 1);
    assert_eq!(result.allow_empty_command_count, 1);
    assert!(store.row("1").await.is_none());
}

#[tokio::test]
async fn test_repeated_saves_collapse_to_last() {
    let store = seeded(vec![Item::new(1, "a", 10)]);
    let unit = unit_for(&store);
    load(&unit, vec![Item::new(1, "a", 10)]);

    stage_save(&unit, &store, Item::new(1, "a", 11), WriteOptions::new());
    stage_save(&unit, &store, Item::new(1, "a", 12), WriteOptions::new());

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 1);
    assert_eq!(store.row("1").await.unwrap().price, 12);
}

#[tokio::test]
async fn test_forced_saves_are_never_deduplicated() {
    let store = seeded(vec![Item::new(1, "a", 10)]);
    let unit = unit_for(&store);
    load(&unit, vec![Item::new(1, "a", 10)]);

    // no diff, but forced: both records write every field
    stage_save(&unit, &store, Item::new(1, "a", 10), WriteOptions::new().forced());
    stage_save(&unit, &store, Item::new(1, "a", 10), WriteOptions::new().forced());

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 2);
    assert_eq!(result.affected_data_count, 2);
}

#[tokio::test]
async fn test_unchanged_save_yields_no_command() {
    let store = seeded(vec![Item::new(1, "a", 10)]);
    let unit = unit_for(&store);
    load(&unit, vec![Item::new(1, "a", 10)]);

    stage_save(&unit, &store, Item::new(1, "a", 10), WriteOptions::new());

    let result = unit.commit().await.unwrap();
    assert_eq!(result, CommitResult::empty());
    assert_eq!(store.executed_commands(), 0);
}

#[tokio::test]
async fn test_rollback_discards_everything() {
    let store = seeded(vec![Item::new(1, "a", 10)]);
    let unit = unit_for(&store);
    load(&unit, vec![Item::new(1, "a", 10)]);
    stage_save(&unit, &store, Item::new(2, "b", 20), WriteOptions::new());
    stage_remove(&unit, &store, Item::new(1, "a", 10));

    unit.rollback().unwrap();
    assert_eq!(unit.state().unwrap(), TransactionState::RolledBack);
    assert!(unit.warehouse::<Item>().unwrap().lock().unwrap().is_empty());

    let result = unit.commit().await.unwrap();
    assert_eq!(result, CommitResult::empty());
    assert_eq!(store.executed_commands(), 0);
    assert_eq!(store.rows().await.len(), 1);
}

#[tokio::test]
async fn test_vetoed_command_is_skipped() {
    let store = seeded(vec![]);
    let unit = unit_for(&store);
    stage_save(
        &unit,
        &store,
        Item::new(1, "a", 10),
        WriteOptions::new().before_execute(|_| false),
    );
    stage_save(&unit, &store, Item::new(2, "b", 20), WriteOptions::new());

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 1);
    assert!(store.row("1").await.is_none());
    assert!(store.row("2").await.is_some());
}

#[tokio::test]
async fn test_packages_are_flattened() {
    let store = seeded(vec![]);
    let unit = unit_for(&store);
    let warehouse = unit.warehouse::<Item>().unwrap();
    let (first, second) = {
        let mut staged = warehouse.lock().unwrap();
        (
            staged.save(Item::new(1, "a", 10)).unwrap(),
            staged.save(Item::new(2, "b", 20)).unwrap(),
        )
    };
    let package = ActivationRecord::package(vec![
        EntityActivation::save(warehouse.clone(), access(&store), first, WriteOptions::new())
            .unwrap()
            .into(),
        ActivationRecord::package(vec![
            EntityActivation::save(warehouse.clone(), access(&store), second, WriteOptions::new())
                .unwrap()
                .into(),
        ]),
    ]);
    assert_eq!(package.kind(), crate::activation::ActivationKind::Package);
    unit.register(package).unwrap();

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 2);
    assert_eq!(store.rows().await.len(), 2);
}

#[tokio::test]
async fn test_predicate_writes_always_execute() {
    let store = seeded(vec![Item::new(1, "a", 10), Item::new(2, "b", 20)]);
    let unit = unit_for(&store);
    let warehouse = unit.warehouse::<Item>().unwrap();
    warehouse
        .lock()
        .unwrap()
        .modify_where(Modification::new().increment("price", 5), Criteria::gt("price", 15))
        .unwrap();
    unit.register(EntityActivation::modify_where(
        warehouse.clone(),
        access(&store),
        Modification::new().increment("price", 5),
        Query::filter(Criteria::gt("price", 15)),
        WriteOptions::new(),
    ))
    .unwrap();
    unit.register(EntityActivation::remove_where(
        warehouse,
        access(&store),
        Query::filter(Criteria::gt("price", 100)),
        WriteOptions::new(),
    ))
    .unwrap();

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 2);
    assert_eq!(result.allow_empty_command_count, 2);
    assert_eq!(result.affected_data_count, 1);
    assert_eq!(store.row("2").await.unwrap().price, 25);
}

#[tokio::test]
async fn test_failure_notifies_subscribers_and_resets() {
    let store = seeded(vec![]);
    let dispatcher = Arc::new(TrackingDispatcher::new());
    let unit = UnitOfWork::builder(Arc::new(SingleExecutorResolver::new(store.clone())))
        .dispatcher(dispatcher.clone())
        .build();

    // loaded from a read the store no longer agrees with: the update hits nothing
    load(&unit, vec![Item::new(9, "ghost", 1)]);
    stage_save(&unit, &store, Item::new(9, "ghost", 2), WriteOptions::new());

    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = failures.clone();
    unit.on_failure(move |failure| seen.lock().unwrap().push(failure.message))
        .unwrap();
    let successes = Arc::new(AtomicU64::new(0));
    let hits = successes.clone();
    unit.on_success(move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    let err = unit.commit().await.unwrap_err();
    assert!(matches!(err, StageError::NothingAffected(_)));
    dispatcher.wait_idle().await;

    assert_eq!(failures.lock().unwrap().len(), 1);
    assert_eq!(successes.load(Ordering::SeqCst), 0);
    assert_eq!(unit.state().unwrap(), TransactionState::Failed);
    assert_eq!(unit.pending_records().unwrap(), 0);
    assert!(unit.warehouse::<Item>().unwrap().lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_executor_error_fails_commit() {
    let store = seeded(vec![]);
    store.set_unavailable(true);
    let unit = unit_for(&store);
    stage_save(&unit, &store, Item::new(1, "a", 10), WriteOptions::new());

    let err = unit.commit().await.unwrap_err();
    assert!(err.is_execution_failure());
    assert_eq!(unit.state().unwrap(), TransactionState::Failed);
}

#[tokio::test]
async fn test_success_runs_callbacks_and_flushes_events() {
    let store = seeded(vec![]);
    let dispatcher = Arc::new(TrackingDispatcher::new());
    let sink = Arc::new(MemoryEventSink::new());
    let unit = UnitOfWork::builder(Arc::new(SingleExecutorResolver::new(store.clone())))
        .dispatcher(dispatcher.clone())
        .event_sink(sink.clone())
        .build();

    let affected = Arc::new(AtomicU64::new(0));
    let tally = affected.clone();
    stage_save(
        &unit,
        &store,
        Item::new(1, "a", 10),
        WriteOptions::new().on_committed(move |rows| {
            tally.fetch_add(rows, Ordering::SeqCst);
        }),
    );
    let results = Arc::new(Mutex::new(None));
    let slot = results.clone();
    unit.on_success(move |result| *slot.lock().unwrap() = Some(result))
        .unwrap();
    unit.raise_event(DomainEvent::new("item_created", &serde_json::json!({ "id": 1 })).unwrap())
        .unwrap();

    let result = unit.commit().await.unwrap();
    dispatcher.wait_idle().await;

    assert_eq!(affected.load(Ordering::SeqCst), 1);
    assert_eq!(*results.lock().unwrap(), Some(result));
    let published = sink.published().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].name, "item_created");
}

#[tokio::test]
async fn test_failed_commit_does_not_flush_events() {
    let store = seeded(vec![]);
    store.set_unavailable(true);
    let dispatcher = Arc::new(TrackingDispatcher::new());
    let sink = Arc::new(MemoryEventSink::new());
    let unit = UnitOfWork::builder(Arc::new(SingleExecutorResolver::new(store.clone())))
        .dispatcher(dispatcher.clone())
        .event_sink(sink.clone())
        .build();
    stage_save(&unit, &store, Item::new(1, "a", 10), WriteOptions::new());
    unit.raise_event(DomainEvent::new("item_created", &1).unwrap())
        .unwrap();

    assert!(unit.commit().await.is_err());
    dispatcher.wait_idle().await;
    assert!(sink.published().unwrap().is_empty());
}

#[tokio::test]
async fn test_fan_out_runs_every_executor() {
    let primary = seeded(vec![]);
    let replica = Arc::new(MemoryStore::<Item>::new("replica").unwrap());
    let resolver = RoutingResolver::new()
        .route("item", primary.clone())
        .route("item", replica.clone());
    let unit = UnitOfWork::builder(Arc::new(resolver))
        .config(UnitOfWorkConfig::new().max_parallel_groups(1))
        .build();
    stage_save(&unit, &primary, Item::new(1, "a", 10), WriteOptions::new());

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 2);
    assert!(primary.row("1").await.is_some());
    assert!(replica.row("1").await.is_some());
}

#[tokio::test]
async fn test_executor_timeout() {
    let store = seeded(vec![]);
    let slow: Arc<dyn CommandExecutor> = Arc::new(SlowExecutor {
        delay: Duration::from_millis(500),
    });
    let unit = UnitOfWork::builder(Arc::new(SingleExecutorResolver::new(slow)))
        .config(UnitOfWorkConfig::new().executor_timeout(Duration::from_millis(20)))
        .build();
    stage_save(&unit, &store, Item::new(1, "a", 10), WriteOptions::new());

    let err = unit.commit().await.unwrap_err();
    assert!(matches!(err, StageError::Timeout(key) if key == "slow"));
}

#[tokio::test]
async fn test_unit_reopens_after_commit() {
    let store = seeded(vec![]);
    let unit = unit_for(&store);
    stage_save(&unit, &store, Item::new(1, "a", 10), WriteOptions::new());
    unit.commit().await.unwrap();
    assert_eq!(unit.state().unwrap(), TransactionState::Committed);

    stage_save(&unit, &store, Item::new(2, "b", 20), WriteOptions::new());
    assert_eq!(unit.state().unwrap(), TransactionState::Active);
    unit.commit().await.unwrap();
    assert_eq!(store.rows().await.len(), 2);
}
