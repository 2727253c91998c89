use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use tollgate::{
    domain::{Entitlement, LedgerBizType, RedeemCode, RedeemCodeStatus, TokenLedgerEntry},
    error::{AppError, Result},
    repository::{
        EntitlementRepository, RedeemCodeRepository, SqliteEntitlementRepository,
        SqliteRedeemCodeRepository, TokenGrant,
    },
    service::redeem_service::{RedeemOutcome, RedeemService},
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

struct Fixture {
    codes: Arc<dyn RedeemCodeRepository>,
    entitlements: Arc<dyn EntitlementRepository>,
    service: Arc<RedeemService>,
}

async fn setup() -> Fixture {
    let pool = test_pool().await;
    let codes: Arc<dyn RedeemCodeRepository> = Arc::new(SqliteRedeemCodeRepository::new(pool.clone()));
    let entitlements: Arc<dyn EntitlementRepository> =
        Arc::new(SqliteEntitlementRepository::new(pool));
    let service = Arc::new(RedeemService::new(codes.clone(), entitlements.clone()));
    Fixture {
        codes,
        entitlements,
        service,
    }
}

async fn mint(fx: &Fixture, code: &str, status: RedeemCodeStatus) {
    fx.codes
        .create(&RedeemCode {
            code: code.to_string(),
            status,
            grant_days: 365,
            used_by: None,
            used_by_email: None,
            used_at: None,
            expires_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

const CODE: &str = "ABCD1234EFGH5678";

#[tokio::test]
async fn redeem_grants_membership_once_per_user() {
    let fx = setup().await;
    mint(&fx, CODE, RedeemCodeStatus::Unused).await;

    let first = fx
        .service
        .consume("  abcd1234efgh5678 ", "alice", "alice@example.com")
        .await
        .unwrap();
    let RedeemOutcome::Redeemed {
        membership_expires_at,
    } = first
    else {
        panic!("unexpected outcome: {:?}", first);
    };
    let delta = (membership_expires_at - (Utc::now() + Duration::days(365)))
        .num_seconds()
        .abs();
    assert!(delta < 5);

    // Same user retrying their own code is an idempotent success.
    let second = fx
        .service
        .consume(CODE, "alice", "alice@example.com")
        .await
        .unwrap();
    let RedeemOutcome::AlreadyRedeemed {
        membership_expires_at: retry_expiry,
    } = second
    else {
        panic!("unexpected outcome: {:?}", second);
    };
    assert_eq!(retry_expiry, Some(membership_expires_at));

    // No duplicate grant.
    let entitlement = fx.entitlements.find_by_user("alice").await.unwrap().unwrap();
    assert_eq!(entitlement.membership_expires_at, Some(membership_expires_at));
}

#[tokio::test]
async fn race_between_two_users_has_one_winner_and_one_conflict() {
    let fx = setup().await;
    mint(&fx, CODE, RedeemCodeStatus::Unused).await;

    let (a, b) = tokio::join!(
        fx.service.consume(CODE, "alice", "alice@example.com"),
        fx.service.consume(CODE, "mallory", "mallory@example.com"),
    );

    let results = [a, b];
    let wins = results
        .iter()
        .filter(|r| matches!(r, Ok(RedeemOutcome::Redeemed { .. })))
        .count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::Conflict(_))))
        .count();
    assert_eq!(wins, 1, "results: {:?}", results);
    assert_eq!(conflicts, 1, "results: {:?}", results);

    let record = fx.codes.find_by_code(CODE).await.unwrap().unwrap();
    assert_eq!(record.status, RedeemCodeStatus::Used);
}

#[tokio::test]
async fn malformed_codes_never_reach_the_store() {
    let fx = setup().await;
    for bad in ["short", "has spaces in it yes", "lower-case-code!!"] {
        let err = fx
            .service
            .consume(bad, "alice", "alice@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "code: {}", bad);
    }
}

#[tokio::test]
async fn unknown_disabled_and_expired_codes_are_rejected() {
    let fx = setup().await;

    let err = fx
        .service
        .consume(CODE, "alice", "alice@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    mint(&fx, "DISABLEDCODE0001", RedeemCodeStatus::Disabled).await;
    let err = fx
        .service
        .consume("DISABLEDCODE0001", "alice", "alice@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    fx.codes
        .create(&RedeemCode {
            code: "EXPIREDCODE00001".to_string(),
            status: RedeemCodeStatus::Unused,
            grant_days: 365,
            used_by: None,
            used_by_email: None,
            used_at: None,
            expires_at: Some(Utc::now() - Duration::days(1)),
            created_at: Utc::now() - Duration::days(30),
        })
        .await
        .unwrap();
    let err = fx
        .service
        .consume("EXPIREDCODE00001", "alice", "alice@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

/// Entitlement store that always fails, to exercise the compensation path.
struct FailingEntitlements;

#[async_trait]
impl EntitlementRepository for FailingEntitlements {
    async fn find_by_user(&self, _user_id: &str) -> Result<Option<Entitlement>> {
        Ok(None)
    }
    async fn upsert_membership(
        &self,
        _user_id: &str,
        _user_email: &str,
        _expires_at: DateTime<Utc>,
    ) -> Result<Entitlement> {
        Err(AppError::Database("entitlement store down".to_string()))
    }
    async fn grant_tokens(
        &self,
        _user_id: &str,
        _user_email: &str,
        _biz_type: LedgerBizType,
        _order_id: &str,
        _quantity: i64,
        _note: &str,
    ) -> Result<TokenGrant> {
        Err(AppError::Database("entitlement store down".to_string()))
    }
    async fn consume_tokens(&self, _user_id: &str, _quantity: i64, _note: &str) -> Result<TokenGrant> {
        Err(AppError::Database("entitlement store down".to_string()))
    }
    async fn ledger_for_user(&self, _user_id: &str) -> Result<Vec<TokenLedgerEntry>> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn failed_grant_reverts_the_code_to_unused() {
    let pool = test_pool().await;
    let codes: Arc<dyn RedeemCodeRepository> =
        Arc::new(SqliteRedeemCodeRepository::new(pool));
    let service = RedeemService::new(codes.clone(), Arc::new(FailingEntitlements));

    codes
        .create(&RedeemCode {
            code: CODE.to_string(),
            status: RedeemCodeStatus::Unused,
            grant_days: 365,
            used_by: None,
            used_by_email: None,
            used_at: None,
            expires_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let outcome = service
        .consume(CODE, "alice", "alice@example.com")
        .await
        .unwrap();
    let RedeemOutcome::GrantFailed {
        rollback_succeeded,
        ..
    } = outcome
    else {
        panic!("unexpected outcome: {:?}", outcome);
    };
    assert!(rollback_succeeded);

    // The saga compensated: the code is unused again and claimable.
    let record = codes.find_by_code(CODE).await.unwrap().unwrap();
    assert_eq!(record.status, RedeemCodeStatus::Unused);
    assert!(record.used_by.is_none());
    assert!(record.used_at.is_none());
}

#[tokio::test]
async fn claim_by_another_user_is_a_conflict() {
    let fx = setup().await;
    mint(&fx, CODE, RedeemCodeStatus::Unused).await;

    fx.service
        .consume(CODE, "alice", "alice@example.com")
        .await
        .unwrap();
    let err = fx
        .service
        .consume(CODE, "mallory", "mallory@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}
