/// Unit-of-work commit behaviour end to end: repository writes, activation
/// resolution, executor routing and post-commit side effects.
///
/// Run with: cargo test --test unit_of_work_tests
mod common;

use common::{Account, Tag, accounts, unit_over};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use txstage::{
    CommandExecutor, CommitResult, Criteria, DataAccess, DomainEvent, MemoryEventSink, MemoryStore, Modification, Query,
    Repository, RoutingResolver, StageError, TrackingDispatcher, TransactionState, UnitOfWork,
    UnitOfWorkConfig, WarehouseRegistry, WriteOptions,
};

#[tokio::test]
async fn test_empty_commit_is_a_no_op() {
    let store = accounts(vec![Account::new(1, "ann", 100)]);
    let unit = unit_over(&store);

    let result = unit.commit().await.unwrap();
    assert_eq!(result, CommitResult::empty());
    assert!(result.empty_or_success());
    assert_eq!(store.executed_commands(), 0);
}

#[tokio::test]
async fn test_only_changed_fields_are_written() {
    let store = accounts(vec![Account::new(1, "ann", 100)]);
    let unit = unit_over(&store);
    let repo: Repository<Account> = Repository::bound(store.clone(), unit.clone());

    let mut ann = repo.get(&Query::filter(Criteria::eq("id", 1))).await.unwrap().unwrap();
    ann.balance = 120;
    repo.save(ann).unwrap();

    // another writer changes the owner before commit; the diff leaves it alone
    let concurrent = store
        .modify_where(&Modification::new().set("owner", "annie"), &Query::all())
        .unwrap();
    store.execute(concurrent.as_ref()).await.unwrap();

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 1);
    assert_eq!(store.row("1").await.unwrap(), Account::new(1, "annie", 120));
}

#[tokio::test]
async fn test_save_then_remove_commits_one_delete() {
    let store = accounts(vec![Account::new(1, "ann", 100)]);
    let unit = unit_over(&store);
    let repo: Repository<Account> = Repository::bound(store.clone(), unit.clone());

    let mut ann = repo.get_list(&Query::all()).await.unwrap().remove(0);
    ann.balance = 1;
    repo.save(ann.clone()).unwrap();
    repo.remove(ann).unwrap();
    assert_eq!(unit.pending_records().unwrap(), 2);

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 1);
    assert_eq!(result.affected_data_count, 1);
    assert!(store.rows().await.is_empty());
}

#[tokio::test]
async fn test_forced_write_escapes_deduplication() {
    let store = accounts(vec![Account::new(1, "ann", 100)]);
    let unit = unit_over(&store);
    let repo: Repository<Account> = Repository::bound(store.clone(), unit.clone());

    let ann = repo.get_list(&Query::all()).await.unwrap().remove(0);
    repo.save_with(ann.clone(), WriteOptions::new().forced()).unwrap();
    repo.remove(ann).unwrap();

    // the forced save survives deduplication but finds the record removed
    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 1);
    assert!(store.rows().await.is_empty());
}

#[tokio::test]
async fn test_new_entity_saved_twice_inserts_once() {
    let store = accounts(vec![]);
    let unit = unit_over(&store);
    let repo: Repository<Account> = Repository::bound(store.clone(), unit.clone());

    repo.save(Account::new(1, "ann", 100)).unwrap();
    repo.save(Account::new(1, "ann", 150)).unwrap();

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 1);
    assert_eq!(store.row("1").await.unwrap().balance, 150);
}

#[tokio::test]
async fn test_rollback_then_commit_executes_nothing() {
    let store = accounts(vec![Account::new(1, "ann", 100), Account::new(2, "bob", 5)]);
    let unit = unit_over(&store);
    let repo: Repository<Account> = Repository::bound(store.clone(), unit.clone());

    repo.save(Account::new(3, "cid", 30)).unwrap();
    repo.remove(Account::new(1, "ann", 100)).unwrap();
    repo.modify_where(Modification::new().increment("balance", 1), Criteria::All)
        .unwrap();
    unit.rollback().unwrap();

    let result = unit.commit().await.unwrap();
    assert_eq!(result, CommitResult::empty());
    assert_eq!(store.executed_commands(), 0);
    assert_eq!(store.rows().await.len(), 2);
}

#[tokio::test]
async fn test_bulk_commands_may_affect_nothing() {
    let store = accounts(vec![Account::new(1, "ann", 100)]);
    let unit = unit_over(&store);
    let repo: Repository<Account> = Repository::bound(store.clone(), unit.clone());

    repo.remove_where(Criteria::gt("balance", 1_000)).unwrap();
    repo.modify_where(Modification::new().set("owner", "x"), Criteria::eq("id", 42))
        .unwrap();

    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 2);
    assert_eq!(result.allow_empty_command_count, 2);
    assert_eq!(result.affected_data_count, 0);
    assert!(!result.success());
    assert!(result.empty_or_success());
}

#[tokio::test]
async fn test_commands_route_to_their_executor() {
    let account_store = accounts(vec![]);
    let tag_store = Arc::new(MemoryStore::<Tag>::new("tags").unwrap());
    let resolver = RoutingResolver::new()
        .route("account", account_store.clone())
        .route("tag", tag_store.clone());
    let unit = Arc::new(
        UnitOfWork::builder(Arc::new(resolver))
            .config(UnitOfWorkConfig::new().label("routing").max_parallel_groups(2))
            .build(),
    );
    let account_repo: Repository<Account> = Repository::new(account_store.clone());
    let tag_repo: Repository<Tag> = Repository::new(tag_store.clone());

    let result = WarehouseRegistry::scope(unit.clone(), async {
        account_repo.save(Account::new(1, "ann", 100)).unwrap();
        account_repo.save(Account::new(2, "bob", 50)).unwrap();
        tag_repo.save(Tag::new("vip")).unwrap();
        WarehouseRegistry::require_unit().unwrap().commit().await
    })
    .await
    .unwrap();

    assert_eq!(result.committed_command_count, 3);
    assert_eq!(account_store.executed_commands(), 2);
    assert_eq!(tag_store.executed_commands(), 1);
}

#[tokio::test]
async fn test_unrouted_command_fails_commit() {
    let account_store = accounts(vec![]);
    let resolver = RoutingResolver::new().route("tag", account_store.clone());
    let unit = Arc::new(UnitOfWork::new(Arc::new(resolver)));
    let repo: Repository<Account> = Repository::bound(account_store.clone(), unit.clone());
    repo.save(Account::new(1, "ann", 100)).unwrap();

    let err = unit.commit().await.unwrap_err();
    assert!(matches!(err, StageError::ExecutorNotFound(target) if target == "account"));
    assert_eq!(unit.state().unwrap(), TransactionState::Failed);
}

#[tokio::test]
async fn test_stale_update_fails_and_notifies() {
    let store = accounts(vec![Account::new(1, "ann", 100)]);
    let dispatcher = Arc::new(TrackingDispatcher::new());
    let sink = Arc::new(MemoryEventSink::new());
    let unit = Arc::new(
        UnitOfWork::builder(Arc::new(txstage::SingleExecutorResolver::new(store.clone())))
            .dispatcher(dispatcher.clone())
            .event_sink(sink.clone())
            .build(),
    );
    let repo: Repository<Account> = Repository::bound(store.clone(), unit.clone());

    let mut ann = repo.get_list(&Query::all()).await.unwrap().remove(0);
    ann.balance = 0;
    repo.save(ann).unwrap();
    unit.raise_event(DomainEvent::new("account_drained", &1).unwrap())
        .unwrap();

    // the row disappears behind the unit's back
    let purge = store.delete_where(&Query::all()).unwrap();
    store.execute(purge.as_ref()).await.unwrap();

    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = failures.clone();
    unit.on_failure(move |failure| seen.lock().unwrap().push(failure))
        .unwrap();

    let err = unit.commit().await.unwrap_err();
    assert!(matches!(err, StageError::NothingAffected(_)));
    dispatcher.wait_idle().await;

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].unit, unit.id());
    assert!(sink.published().unwrap().is_empty());
    assert_eq!(unit.pending_records().unwrap(), 0);
}

#[tokio::test]
async fn test_success_side_effects_run_after_commit() {
    let store = accounts(vec![]);
    let dispatcher = Arc::new(TrackingDispatcher::new());
    let sink = Arc::new(MemoryEventSink::new());
    let unit = Arc::new(
        UnitOfWork::builder(Arc::new(txstage::SingleExecutorResolver::new(store.clone())))
            .dispatcher(dispatcher.clone())
            .event_sink(sink.clone())
            .build(),
    );
    let repo: Repository<Account> = Repository::bound(store.clone(), unit.clone());

    let affected = Arc::new(AtomicU64::new(0));
    let tally = affected.clone();
    repo.save_with(
        Account::new(1, "ann", 100),
        WriteOptions::new().on_committed(move |rows| {
            tally.fetch_add(rows, Ordering::SeqCst);
        }),
    )
    .unwrap();
    let committed = Arc::new(AtomicU64::new(0));
    let counter = committed.clone();
    unit.on_success(move |result| {
        counter.store(result.committed_command_count, Ordering::SeqCst);
    })
    .unwrap();
    unit.raise_event(DomainEvent::new("account_opened", &serde_json::json!({ "id": 1 })).unwrap())
        .unwrap();

    unit.commit().await.unwrap();
    dispatcher.wait_idle().await;

    assert_eq!(affected.load(Ordering::SeqCst), 1);
    assert_eq!(committed.load(Ordering::SeqCst), 1);
    let events = sink.published().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["id"], 1);
}

#[tokio::test]
async fn test_vetoed_write_is_not_executed() {
    let store = accounts(vec![]);
    let unit = unit_over(&store);
    let repo: Repository<Account> = Repository::bound(store.clone(), unit.clone());

    repo.save_with(
        Account::new(1, "ann", 100),
        WriteOptions::new().before_execute(|_| false),
    )
    .unwrap();

    let result = unit.commit().await.unwrap();
    assert_eq!(result, CommitResult::empty());
    assert!(store.rows().await.is_empty());
}

#[tokio::test]
async fn test_unit_is_reusable_after_commit() {
    let store = accounts(vec![]);
    let unit = unit_over(&store);
    let repo: Repository<Account> = Repository::bound(store.clone(), unit.clone());

    repo.save(Account::new(1, "ann", 100)).unwrap();
    unit.commit().await.unwrap();
    assert_eq!(unit.state().unwrap(), TransactionState::Committed);

    // the next transaction starts from a clean warehouse and reads the store
    let mut ann = repo.get_list(&Query::all()).await.unwrap().remove(0);
    assert_eq!(unit.state().unwrap(), TransactionState::Active);
    ann.balance = 90;
    repo.save(ann).unwrap();
    let result = unit.commit().await.unwrap();
    assert_eq!(result.committed_command_count, 1);
    assert_eq!(store.row("1").await.unwrap().balance, 90);
}
