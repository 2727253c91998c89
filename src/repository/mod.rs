use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::*;
use crate::error::Result;

pub mod entitlement_repository;
pub mod order_repository;
pub mod redeem_code_repository;

pub use entitlement_repository::SqliteEntitlementRepository;
pub use order_repository::SqliteOrderRepository;
pub use redeem_code_repository::SqliteRedeemCodeRepository;

/// Order persistence. Every state transition is a conditional update that
/// reports whether it won (rows affected == 1); callers re-read and resolve
/// on a lost race rather than assuming success.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a new order. Returns false when the order_id already exists
    /// (a concurrent creator won); the caller re-reads the surviving row.
    async fn create(&self, order: &Order) -> Result<bool>;
    async fn find_by_id(&self, order_id: &str) -> Result<Option<Order>>;
    /// An unexpired pending order for the same user, method and amount,
    /// reusable instead of inserting a duplicate intent.
    async fn find_reusable_pending(
        &self,
        user_id: &str,
        payment_method: PaymentMethod,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>>;
    /// Oldest pending orders first, bounding reconciliation staleness.
    async fn list_pending_oldest(&self, limit: i64) -> Result<Vec<Order>>;
    async fn set_code_url(&self, order_id: &str, code_url: &str) -> Result<()>;
    /// CAS pending -> paid, stamping transaction id and paid time.
    async fn mark_paid(
        &self,
        order_id: &str,
        transaction_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool>;
    /// Compensation: paid -> pending, guarded on the transaction id written
    /// by the fulfiller doing the rollback.
    async fn revert_paid(&self, order_id: &str, transaction_id: &str) -> Result<bool>;
    /// CAS pending -> expired.
    async fn mark_expired(&self, order_id: &str) -> Result<bool>;
    /// CAS pending -> cancelled.
    async fn mark_cancelled(&self, order_id: &str) -> Result<bool>;
}

/// Result of a token grant attempt.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub balance_after: i64,
    /// True when a ledger row for this (user, biz_type, order) already
    /// existed and no balance change was applied.
    pub already_granted: bool,
}

#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<Entitlement>>;
    /// Upsert the membership flag and expiry for a user.
    async fn upsert_membership(
        &self,
        user_id: &str,
        user_email: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Entitlement>;
    /// Credit tokens and append the matching ledger row in one store
    /// transaction. The ledger's (user, biz_type, order) uniqueness makes a
    /// replay a no-op reported via `already_granted`.
    async fn grant_tokens(
        &self,
        user_id: &str,
        user_email: &str,
        biz_type: LedgerBizType,
        order_id: &str,
        quantity: i64,
        note: &str,
    ) -> Result<TokenGrant>;
    /// Debit tokens with the paired ledger append. Fails when the balance
    /// would go negative.
    async fn consume_tokens(
        &self,
        user_id: &str,
        quantity: i64,
        note: &str,
    ) -> Result<TokenGrant>;
    async fn ledger_for_user(&self, user_id: &str) -> Result<Vec<TokenLedgerEntry>>;
}

#[async_trait]
pub trait RedeemCodeRepository: Send + Sync {
    async fn create(&self, code: &RedeemCode) -> Result<()>;
    async fn find_by_code(&self, code: &str) -> Result<Option<RedeemCode>>;
    /// CAS unused -> used, stamping the claimant.
    async fn mark_used(
        &self,
        code: &str,
        user_id: &str,
        user_email: &str,
        used_at: DateTime<Utc>,
    ) -> Result<bool>;
    /// Compensation: used -> unused, guarded on the claimant just written.
    async fn revert_unused(&self, code: &str, user_id: &str, used_at: DateTime<Utc>)
        -> Result<bool>;
}
