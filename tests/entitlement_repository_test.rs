use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use tollgate::{
    domain::LedgerBizType,
    error::AppError,
    repository::{EntitlementRepository, SqliteEntitlementRepository},
};

async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

async fn setup() -> Arc<dyn EntitlementRepository> {
    Arc::new(SqliteEntitlementRepository::new(test_pool().await))
}

#[tokio::test]
async fn consumption_debits_the_balance_with_a_ledger_entry() {
    let repo = setup().await;
    repo.grant_tokens(
        "alice",
        "alice@example.com",
        LedgerBizType::GrantBasic,
        "TOK100_a",
        100,
        "token pack purchase",
    )
    .await
    .unwrap();

    let result = repo.consume_tokens("alice", 30, "report generation").await.unwrap();
    assert_eq!(result.balance_after, 70);
    assert!(!result.already_granted);

    let entitlement = repo.find_by_user("alice").await.unwrap().unwrap();
    assert_eq!(entitlement.token_balance, 70);

    let ledger = repo.ledger_for_user("alice").await.unwrap();
    assert_eq!(ledger.len(), 2);
    let debit = &ledger[1];
    assert_eq!(debit.biz_type, LedgerBizType::Consume);
    assert_eq!(debit.change_amount, -30);
    assert_eq!(debit.balance_after, 70);
    assert!(debit.order_id.is_none());
}

#[tokio::test]
async fn overdraft_is_a_conflict_and_changes_nothing() {
    let repo = setup().await;
    repo.grant_tokens(
        "bob",
        "bob@example.com",
        LedgerBizType::GrantBasic,
        "TOK100_b",
        100,
        "token pack purchase",
    )
    .await
    .unwrap();

    let err = repo.consume_tokens("bob", 101, "too greedy").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let entitlement = repo.find_by_user("bob").await.unwrap().unwrap();
    assert_eq!(entitlement.token_balance, 100);
    assert_eq!(repo.ledger_for_user("bob").await.unwrap().len(), 1);
}

#[tokio::test]
async fn consumption_by_unknown_user_is_a_conflict() {
    let repo = setup().await;
    let err = repo.consume_tokens("nobody", 1, "no row").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn non_positive_consumption_is_rejected() {
    let repo = setup().await;
    let err = repo.consume_tokens("alice", 0, "noop").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
