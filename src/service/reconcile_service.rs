//! Periodic reconciliation: expire stale pending orders and re-derive
//! payment status for orders whose webhook never arrived, driving them
//! through the same fulfillment engine as the push path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    domain::Order,
    error::Result,
    repository::OrderRepository,
    service::fulfillment::{FulfillmentEngine, FulfillmentOutcome},
};

/// A settled payment discovered at the processor for an order we still
/// hold as pending.
#[derive(Debug, Clone)]
pub struct SettledPayment {
    pub transaction_id: String,
    pub paid_at: DateTime<Utc>,
}

/// Collaborator that answers "did this order actually settle?" against the
/// processor's transaction records.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn find_settled(&self, order: &Order) -> Result<Option<SettledPayment>>;
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ReconcileSummary {
    pub scanned: usize,
    pub paid: usize,
    pub expired: usize,
    pub idempotent: usize,
    pub failed: Vec<ReconcileFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileFailure {
    pub order_id: String,
    pub reason: String,
}

pub struct Reconciler {
    orders: Arc<dyn OrderRepository>,
    engine: Arc<FulfillmentEngine>,
    source: Arc<dyn TransactionSource>,
    batch_size: i64,
}

impl Reconciler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        engine: Arc<FulfillmentEngine>,
        source: Arc<dyn TransactionSource>,
        batch_size: i64,
    ) -> Self {
        Self {
            orders,
            engine,
            source,
            batch_size,
        }
    }

    /// One bounded batch, oldest pending orders first. Safe to run
    /// concurrently with the webhook path and with itself; the engine's
    /// status CAS and already-paid short-circuit absorb the races.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let pending = self.orders.list_pending_oldest(self.batch_size).await?;
        let mut summary = ReconcileSummary {
            scanned: pending.len(),
            ..Default::default()
        };
        let now = Utc::now();

        for order in pending {
            match self.reconcile_one(&order, now).await {
                Ok(step) => match step {
                    ReconcileStep::Expired => summary.expired += 1,
                    ReconcileStep::Paid => summary.paid += 1,
                    ReconcileStep::Idempotent => summary.idempotent += 1,
                    ReconcileStep::StillPending => {}
                    ReconcileStep::Failed(reason) => summary.failed.push(ReconcileFailure {
                        order_id: order.order_id.clone(),
                        reason,
                    }),
                },
                // One bad row never aborts the batch.
                Err(e) => summary.failed.push(ReconcileFailure {
                    order_id: order.order_id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        tracing::info!(
            "Reconciliation pass: scanned={} paid={} expired={} idempotent={} failed={}",
            summary.scanned,
            summary.paid,
            summary.expired,
            summary.idempotent,
            summary.failed.len()
        );
        Ok(summary)
    }

    async fn reconcile_one(&self, order: &Order, now: DateTime<Utc>) -> Result<ReconcileStep> {
        if order.is_expired_at(now) {
            // CAS on pending: a webhook may have paid it since we listed.
            return if self.orders.mark_expired(&order.order_id).await? {
                Ok(ReconcileStep::Expired)
            } else {
                Ok(ReconcileStep::StillPending)
            };
        }

        let Some(settled) = self.source.find_settled(order).await? else {
            return Ok(ReconcileStep::StillPending);
        };

        let outcome = self
            .engine
            .fulfill_paid_order(&order.order_id, &settled.transaction_id, settled.paid_at)
            .await;
        Ok(match outcome {
            FulfillmentOutcome::Fulfilled { .. } => ReconcileStep::Paid,
            FulfillmentOutcome::AlreadyFulfilled => ReconcileStep::Idempotent,
            FulfillmentOutcome::DeadOrder { .. } => ReconcileStep::StillPending,
            other => ReconcileStep::Failed(format!("{:?}", other)),
        })
    }
}

enum ReconcileStep {
    Expired,
    Paid,
    Idempotent,
    StillPending,
    Failed(String),
}
