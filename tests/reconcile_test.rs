use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use tollgate::{
    config::PricingConfig,
    domain::{Order, OrderBizType, OrderStatus, PaymentMethod},
    error::{AppError, Result},
    repository::{
        EntitlementRepository, OrderRepository, SqliteEntitlementRepository,
        SqliteOrderRepository,
    },
    service::{
        fulfillment::FulfillmentEngine,
        reconcile_service::{Reconciler, SettledPayment, TransactionSource},
    },
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

/// Canned processor answers keyed by order id. Orders absent from both
/// maps are reported as not settled.
#[derive(Default)]
struct MockSource {
    settled: HashMap<String, SettledPayment>,
    errors: HashMap<String, String>,
}

#[async_trait]
impl TransactionSource for MockSource {
    async fn find_settled(&self, order: &Order) -> Result<Option<SettledPayment>> {
        if let Some(reason) = self.errors.get(&order.order_id) {
            return Err(AppError::External(reason.clone()));
        }
        Ok(self.settled.get(&order.order_id).cloned())
    }
}

struct Fixture {
    orders: Arc<dyn OrderRepository>,
    entitlements: Arc<dyn EntitlementRepository>,
    engine: Arc<FulfillmentEngine>,
}

async fn setup() -> Fixture {
    let pool = test_pool().await;
    let orders: Arc<dyn OrderRepository> = Arc::new(SqliteOrderRepository::new(pool.clone()));
    let entitlements: Arc<dyn EntitlementRepository> =
        Arc::new(SqliteEntitlementRepository::new(pool));
    let engine = Arc::new(FulfillmentEngine::new(
        orders.clone(),
        entitlements.clone(),
        PricingConfig::default(),
    ));
    Fixture {
        orders,
        entitlements,
        engine,
    }
}

fn reconciler(fx: &Fixture, source: MockSource, batch_size: i64) -> Reconciler {
    Reconciler::new(fx.orders.clone(), fx.engine.clone(), Arc::new(source), batch_size)
}

fn pending_order(biz_type: OrderBizType, user_id: &str, ttl_minutes: i64) -> Order {
    let now = Utc::now();
    Order {
        order_id: biz_type.new_order_id(),
        user_id: user_id.to_string(),
        user_email: format!("{}@example.com", user_id),
        biz_type,
        amount_cents: match biz_type {
            OrderBizType::Membership => 49900,
            OrderBizType::TokenBasic => 9900,
            OrderBizType::TokenPro => 24900,
        },
        payment_method: PaymentMethod::Wechat,
        status: OrderStatus::Pending,
        transaction_id: None,
        code_url: None,
        created_at: now,
        paid_at: None,
        expires_at: now + Duration::minutes(ttl_minutes),
    }
}

#[tokio::test]
async fn stale_pending_orders_are_expired() {
    let fx = setup().await;
    let stale = pending_order(OrderBizType::Membership, "alice", -5);
    let fresh = pending_order(OrderBizType::Membership, "bob", 10);
    fx.orders.create(&stale).await.unwrap();
    fx.orders.create(&fresh).await.unwrap();

    let summary = reconciler(&fx, MockSource::default(), 50)
        .reconcile()
        .await
        .unwrap();
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.paid, 0);
    assert!(summary.failed.is_empty());

    let stored = fx.orders.find_by_id(&stale.order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Expired);
    let stored = fx.orders.find_by_id(&fresh.order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
}

#[tokio::test]
async fn missed_webhook_is_recovered_and_granted_exactly_once() {
    let fx = setup().await;
    let order = pending_order(OrderBizType::TokenBasic, "carol", 10);
    fx.orders.create(&order).await.unwrap();

    let mut source = MockSource::default();
    source.settled.insert(
        order.order_id.clone(),
        SettledPayment {
            transaction_id: "wx-settled-1".to_string(),
            paid_at: Utc::now(),
        },
    );
    let reconciler = reconciler(&fx, source, 50);

    let first = reconciler.reconcile().await.unwrap();
    assert_eq!(first.paid, 1);
    assert_eq!(first.idempotent, 0);

    // A second pass sees no remaining pending work.
    let second = reconciler.reconcile().await.unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(second.paid, 0);

    let stored = fx.orders.find_by_id(&order.order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(stored.transaction_id.as_deref(), Some("wx-settled-1"));

    let entitlement = fx.entitlements.find_by_user("carol").await.unwrap().unwrap();
    assert_eq!(entitlement.token_balance, 100);
    assert_eq!(fx.entitlements.ledger_for_user("carol").await.unwrap().len(), 1);
}

#[tokio::test]
async fn unsettled_orders_are_left_pending() {
    let fx = setup().await;
    let order = pending_order(OrderBizType::Membership, "dave", 10);
    fx.orders.create(&order).await.unwrap();

    let summary = reconciler(&fx, MockSource::default(), 50)
        .reconcile()
        .await
        .unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.paid, 0);
    assert_eq!(summary.expired, 0);
    assert!(summary.failed.is_empty());

    let stored = fx.orders.find_by_id(&order.order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
}

#[tokio::test]
async fn one_bad_order_does_not_abort_the_batch() {
    let fx = setup().await;
    let broken = pending_order(OrderBizType::Membership, "erin", 10);
    let healthy = pending_order(OrderBizType::TokenPro, "frank", 10);
    fx.orders.create(&broken).await.unwrap();
    fx.orders.create(&healthy).await.unwrap();

    let mut source = MockSource::default();
    source
        .errors
        .insert(broken.order_id.clone(), "processor query timed out".to_string());
    source.settled.insert(
        healthy.order_id.clone(),
        SettledPayment {
            transaction_id: "wx-settled-2".to_string(),
            paid_at: Utc::now(),
        },
    );

    let summary = reconciler(&fx, source, 50).reconcile().await.unwrap();
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.paid, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].order_id, broken.order_id);

    let stored = fx.orders.find_by_id(&healthy.order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    let stored = fx.orders.find_by_id(&broken.order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
}

#[tokio::test]
async fn batch_size_bounds_a_single_pass() {
    let fx = setup().await;
    for i in 0..5 {
        let order = pending_order(OrderBizType::Membership, &format!("user{}", i), -5);
        fx.orders.create(&order).await.unwrap();
    }

    let reconciler = reconciler(&fx, MockSource::default(), 2);
    let summary = reconciler.reconcile().await.unwrap();
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.expired, 2);

    // The remainder drains on later passes.
    let summary = reconciler.reconcile().await.unwrap();
    assert_eq!(summary.scanned, 2);
    let summary = reconciler.reconcile().await.unwrap();
    assert_eq!(summary.scanned, 1);
}
