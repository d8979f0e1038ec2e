use std::sync::Arc;
use std::time::Duration;

use llmgate_common::{AccountState, AuthMethod, Provider, ProviderFilter};
use llmgate_core::account::Account;
use llmgate_core::account_pool::{account_to_row, AccountPool, TABLE};
use llmgate_storage::{InMemoryRowStore, Row, RowStore};
use time::OffsetDateTime;

fn sample_row(id: i64, priority: i16, weight: i32, created_at: OffsetDateTime) -> Row {
    let account = Account {
        id,
        owner_id: 1,
        name: format!("acct-{id}"),
        provider: Provider::Anthropic,
        auth_method: AuthMethod::ApiKey,
        credentials: "cipher".to_string(),
        state: AccountState::Active,
        priority,
        weight,
        proxy_binding: None,
        request_count: 0,
        success_count: 0,
        error_count: 0,
        last_health_check: None,
        health_status: None,
        last_used_at: None,
        created_at,
        updated_at: created_at,
    };
    account_to_row(&account)
}

#[tokio::test]
async fn snapshot_is_sorted_by_priority_then_weight_then_created_at() {
    let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
    let t0 = llmgate_common::now();
    store.create(TABLE, sample_row(1, 2, 50, t0)).await.unwrap();
    store.create(TABLE, sample_row(2, 1, 10, t0 + time::Duration::seconds(1))).await.unwrap();
    store.create(TABLE, sample_row(3, 1, 90, t0)).await.unwrap();

    let pool = AccountPool::new(store, Duration::from_secs(60));
    let snap = pool.snapshot(1, ProviderFilter::Any, false).await;
    let ids: Vec<i64> = snap.iter().map(|a| a.id).collect();
    // priority 1 accounts first (3 before 2 since weight 90 > 10), then priority 2.
    assert_eq!(ids, vec![3, 2, 1]);
}

#[tokio::test]
async fn record_usage_increments_counters_without_double_counting() {
    let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
    let t0 = llmgate_common::now();
    store.create(TABLE, sample_row(1, 1, 1, t0)).await.unwrap();
    let pool = AccountPool::new(store, Duration::from_secs(60));

    pool.record_usage(1, true, Some(120)).await;
    pool.record_usage(1, false, Some(5000)).await;

    let account = pool.get(1).await.unwrap();
    assert_eq!(account.request_count, 2);
    assert_eq!(account.success_count, 1);
    assert_eq!(account.error_count, 1);
    assert!(account.success_count + account.error_count <= account.request_count);
}

#[tokio::test]
async fn mark_failed_sets_error_state_immediately() {
    let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
    store.create(TABLE, sample_row(1, 1, 1, llmgate_common::now())).await.unwrap();
    let pool = AccountPool::new(store, Duration::from_secs(60));

    pool.mark_failed(1, "token_expired_or_invalid").await;
    let account = pool.get(1).await.unwrap();
    assert_eq!(account.state, AccountState::Error);
    assert_eq!(account.error_count, 1);
}

#[tokio::test]
async fn invalidate_forces_snapshot_to_rebuild() {
    let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
    store.create(TABLE, sample_row(1, 1, 1, llmgate_common::now())).await.unwrap();
    let pool = AccountPool::new(store, Duration::from_secs(3600));

    let first = pool.snapshot(1, ProviderFilter::Any, false).await;
    assert_eq!(first.len(), 1);

    pool.mark_failed(1, "x").await; // also invalidates
    let second = pool.snapshot(1, ProviderFilter::Any, false).await;
    assert_eq!(second[0].state, AccountState::Error);
}
