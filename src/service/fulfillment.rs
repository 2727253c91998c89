//! The fulfillment engine: the single code path allowed to mark an order
//! paid and grant the matching entitlement.
//!
//! "Mark paid" and "grant entitlement" are two separate conditional writes
//! with an explicit compensating action in between them on failure; the
//! order's status column is the coordination record. Both the webhook path
//! and the reconciliation job funnel into `fulfill_paid_order`, racing
//! freely: first writer wins the status CAS, later writers observe
//! success-without-effect.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::PricingConfig,
    domain::{extend_membership, LedgerBizType, Order, OrderBizType, OrderStatus},
    error::Result,
    repository::{EntitlementRepository, OrderRepository},
};

/// What a successful fulfillment granted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GrantResult {
    Membership {
        expires_at: DateTime<Utc>,
    },
    Tokens {
        granted: i64,
        balance_after: i64,
    },
}

/// Structured outcome of a fulfillment attempt. Nothing escapes the engine
/// as a raised error; store and network failures surface as `Unavailable`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum FulfillmentOutcome {
    /// The order transitioned to paid and the grant was applied.
    Fulfilled { grant: GrantResult },
    /// The order was already paid; no side effects. The primary defense
    /// against duplicate webhook delivery and overlapping reconciliation.
    AlreadyFulfilled,
    /// No such order.
    NotFound,
    /// Payment arrived for an expired or cancelled order; reported, never
    /// silently accepted.
    DeadOrder { status: OrderStatus },
    /// Lost the status CAS to a concurrent fulfiller that did not finish
    /// as paid; retryable.
    Conflict,
    /// The grant failed after the order was marked paid. When the rollback
    /// also failed, the order and entitlement may have diverged and need
    /// human reconciliation.
    GrantFailed {
        rollback_succeeded: bool,
        detail: String,
    },
    /// Store or network failure before any state changed; retryable.
    Unavailable { detail: String },
}

impl FulfillmentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            FulfillmentOutcome::Fulfilled { .. } | FulfillmentOutcome::AlreadyFulfilled
        )
    }

    pub fn is_idempotent_replay(&self) -> bool {
        matches!(self, FulfillmentOutcome::AlreadyFulfilled)
    }

    /// True only for the fatal divergence case that must invite a
    /// processor retry and human attention.
    pub fn rollback_failed(&self) -> bool {
        matches!(
            self,
            FulfillmentOutcome::GrantFailed {
                rollback_succeeded: false,
                ..
            }
        )
    }
}

pub struct FulfillmentEngine {
    orders: Arc<dyn OrderRepository>,
    entitlements: Arc<dyn EntitlementRepository>,
    pricing: PricingConfig,
}

impl FulfillmentEngine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        entitlements: Arc<dyn EntitlementRepository>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            orders,
            entitlements,
            pricing,
        }
    }

    /// Atomically transition an order to paid and grant the matching
    /// entitlement, or roll back.
    pub async fn fulfill_paid_order(
        &self,
        order_id: &str,
        transaction_id: &str,
        paid_at: DateTime<Utc>,
    ) -> FulfillmentOutcome {
        match self.try_fulfill(order_id, transaction_id, paid_at).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Fulfillment of {} hit infrastructure failure: {}", order_id, e);
                FulfillmentOutcome::Unavailable {
                    detail: e.to_string(),
                }
            }
        }
    }

    async fn try_fulfill(
        &self,
        order_id: &str,
        transaction_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<FulfillmentOutcome> {
        let Some(order) = self.orders.find_by_id(order_id).await? else {
            return Ok(FulfillmentOutcome::NotFound);
        };

        match order.status {
            OrderStatus::Paid => return Ok(FulfillmentOutcome::AlreadyFulfilled),
            OrderStatus::Expired | OrderStatus::Cancelled => {
                tracing::warn!(
                    "Payment {} arrived for dead order {} ({:?})",
                    transaction_id,
                    order_id,
                    order.status
                );
                return Ok(FulfillmentOutcome::DeadOrder {
                    status: order.status,
                });
            }
            OrderStatus::Pending => {}
        }

        // A pending order past its TTL is dead even before the scheduler
        // gets to it; it may transition to expired, never to paid.
        if order.is_expired_at(Utc::now()) {
            if self.orders.mark_expired(order_id).await? {
                return Ok(FulfillmentOutcome::DeadOrder {
                    status: OrderStatus::Expired,
                });
            }
            // Lost the expire CAS; a concurrent fulfiller may have just
            // paid the order. Re-read and resolve.
            return match self.orders.find_by_id(order_id).await? {
                Some(current) if current.status == OrderStatus::Paid => {
                    Ok(FulfillmentOutcome::AlreadyFulfilled)
                }
                Some(current) if current.status != OrderStatus::Pending => {
                    Ok(FulfillmentOutcome::DeadOrder {
                        status: current.status,
                    })
                }
                _ => Ok(FulfillmentOutcome::Conflict),
            };
        }

        if !self.orders.mark_paid(order_id, transaction_id, paid_at).await? {
            // A concurrent fulfiller won the CAS. Re-read and resolve.
            return match self.orders.find_by_id(order_id).await? {
                Some(current) if current.status == OrderStatus::Paid => {
                    Ok(FulfillmentOutcome::AlreadyFulfilled)
                }
                _ => Ok(FulfillmentOutcome::Conflict),
            };
        }

        match self.grant(&order, paid_at).await {
            Ok(grant) => Ok(FulfillmentOutcome::Fulfilled { grant }),
            Err(e) => {
                let detail = e.to_string();
                let rollback_succeeded =
                    match self.orders.revert_paid(order_id, transaction_id).await {
                        Ok(reverted) => reverted,
                        Err(rollback_err) => {
                            tracing::error!(
                                "Rollback of order {} also failed: {}",
                                order_id,
                                rollback_err
                            );
                            false
                        }
                    };
                if rollback_succeeded {
                    tracing::warn!(
                        "Grant for order {} failed ({}); order reverted to pending",
                        order_id,
                        detail
                    );
                } else {
                    tracing::error!(
                        "FATAL: grant for order {} failed ({}) and rollback did not restore it; \
                         order and entitlement state may have diverged",
                        order_id,
                        detail
                    );
                }
                Ok(FulfillmentOutcome::GrantFailed {
                    rollback_succeeded,
                    detail,
                })
            }
        }
    }

    async fn grant(&self, order: &Order, paid_at: DateTime<Utc>) -> Result<GrantResult> {
        match order.biz_type {
            OrderBizType::Membership => {
                let current = self
                    .entitlements
                    .find_by_user(&order.user_id)
                    .await?
                    .and_then(|e| e.membership_expires_at);
                let expires_at =
                    extend_membership(current, paid_at, self.pricing.membership_days);
                self.entitlements
                    .upsert_membership(&order.user_id, &order.user_email, expires_at)
                    .await?;
                Ok(GrantResult::Membership { expires_at })
            }
            OrderBizType::TokenBasic | OrderBizType::TokenPro => {
                let (ledger_type, quantity) = if order.biz_type == OrderBizType::TokenBasic {
                    (LedgerBizType::GrantBasic, self.pricing.token_basic_grant)
                } else {
                    (LedgerBizType::GrantPro, self.pricing.token_pro_grant)
                };
                let grant = self
                    .entitlements
                    .grant_tokens(
                        &order.user_id,
                        &order.user_email,
                        ledger_type,
                        &order.order_id,
                        quantity,
                        "token pack purchase",
                    )
                    .await?;
                if grant.already_granted {
                    tracing::info!(
                        "Token grant for order {} was already recorded; no balance change",
                        order.order_id
                    );
                }
                Ok(GrantResult::Tokens {
                    granted: quantity,
                    balance_after: grant.balance_after,
                })
            }
        }
    }
}
