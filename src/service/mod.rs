pub mod fulfillment;
pub mod order_service;
pub mod reconcile_service;
pub mod redeem_service;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Settings;
use crate::repository::{
    EntitlementRepository, OrderRepository, RedeemCodeRepository, SqliteEntitlementRepository,
    SqliteOrderRepository, SqliteRedeemCodeRepository,
};
use crate::wechat::{GatewayClient, WebhookVerifier};
use fulfillment::FulfillmentEngine;
use order_service::OrderService;
use reconcile_service::{Reconciler, TransactionSource};
use redeem_service::RedeemService;

pub use fulfillment::{FulfillmentOutcome, GrantResult};
pub use reconcile_service::{ReconcileSummary, SettledPayment};
pub use redeem_service::RedeemOutcome;

pub struct ServiceContext {
    pub order_repo: Arc<dyn OrderRepository>,
    pub entitlement_repo: Arc<dyn EntitlementRepository>,
    pub redeem_code_repo: Arc<dyn RedeemCodeRepository>,
    pub order_service: Arc<OrderService>,
    pub fulfillment: Arc<FulfillmentEngine>,
    pub reconciler: Option<Arc<Reconciler>>,
    pub redeem_service: Arc<RedeemService>,
    pub verifier: Option<Arc<WebhookVerifier>>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        settings: &Settings,
        db_pool: SqlitePool,
        gateway: Option<Arc<GatewayClient>>,
        verifier: Option<Arc<WebhookVerifier>>,
    ) -> Self {
        let order_repo: Arc<dyn OrderRepository> =
            Arc::new(SqliteOrderRepository::new(db_pool.clone()));
        let entitlement_repo: Arc<dyn EntitlementRepository> =
            Arc::new(SqliteEntitlementRepository::new(db_pool.clone()));
        let redeem_code_repo: Arc<dyn RedeemCodeRepository> =
            Arc::new(SqliteRedeemCodeRepository::new(db_pool.clone()));

        let fulfillment = Arc::new(FulfillmentEngine::new(
            order_repo.clone(),
            entitlement_repo.clone(),
            settings.pricing.clone(),
        ));
        let order_service = Arc::new(OrderService::new(
            order_repo.clone(),
            gateway.clone(),
            settings.pricing.clone(),
            settings.ttl.clone(),
        ));
        // Reconciliation needs the gateway as its transaction source; with
        // payments disabled only the webhook path can fulfill.
        let reconciler = gateway.map(|gw| {
            let source: Arc<dyn TransactionSource> = gw;
            Arc::new(Reconciler::new(
                order_repo.clone(),
                fulfillment.clone(),
                source,
                settings.scheduler.batch_size,
            ))
        });
        let redeem_service = Arc::new(RedeemService::new(
            redeem_code_repo.clone(),
            entitlement_repo.clone(),
        ));

        Self {
            order_repo,
            entitlement_repo,
            redeem_code_repo,
            order_service,
            fulfillment,
            reconciler,
            redeem_service,
            verifier,
            db_pool,
        }
    }
}
