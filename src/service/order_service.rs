//! Order lifecycle: idempotent creation, pricing, TTL computation and the
//! gateway side effect for scannable payment codes.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::{
    config::{PricingConfig, TtlConfig},
    domain::{BizPlan, Order, OrderBizType, OrderStatus, PaymentMethod},
    error::{AppError, Result},
    repository::OrderRepository,
    wechat::GatewayClient,
};

pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    gateway: Option<Arc<GatewayClient>>,
    pricing: PricingConfig,
    ttl: TtlConfig,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        gateway: Option<Arc<GatewayClient>>,
        pricing: PricingConfig,
        ttl: TtlConfig,
    ) -> Self {
        Self {
            orders,
            gateway,
            pricing,
            ttl,
        }
    }

    /// Price and label a business type from configuration.
    pub fn plan(&self, biz_type: OrderBizType) -> Result<BizPlan> {
        let (yuan, label) = match biz_type {
            OrderBizType::Membership => (
                self.pricing.membership_yuan,
                format!("Annual membership ({} days)", self.pricing.membership_days),
            ),
            OrderBizType::TokenBasic => (
                self.pricing.token_basic_yuan,
                format!("Token pack ({} tokens)", self.pricing.token_basic_grant),
            ),
            OrderBizType::TokenPro => (
                self.pricing.token_pro_yuan,
                format!("Token pack ({} tokens)", self.pricing.token_pro_grant),
            ),
        };

        if !yuan.is_finite() || yuan <= 0.0 {
            return Err(AppError::Validation(format!(
                "Configured amount for {:?} is not a positive finite number",
                biz_type
            )));
        }

        Ok(BizPlan {
            biz_type,
            label,
            amount_cents: (yuan * 100.0).round() as i64,
        })
    }

    /// Create a pending order, or return an existing reusable one.
    ///
    /// Idempotency-by-intent: an unexpired pending order for the same user,
    /// payment method and amount is returned instead of inserting a
    /// duplicate, which absorbs double-submitted client requests without a
    /// client-supplied idempotency key.
    pub async fn create_order(
        &self,
        user_id: &str,
        user_email: &str,
        payment_method: PaymentMethod,
        biz_type: OrderBizType,
    ) -> Result<(Order, bool)> {
        let plan = self.plan(biz_type)?;
        let now = Utc::now();

        if let Some(existing) = self
            .orders
            .find_reusable_pending(user_id, payment_method, plan.amount_cents, now)
            .await?
        {
            tracing::debug!(
                "Reusing pending order {} for user {}",
                existing.order_id,
                user_id
            );
            return Ok((existing, true));
        }

        let expires_at = if payment_method.settles_by_push() {
            now + Duration::minutes(self.ttl.native_minutes)
        } else {
            now + Duration::hours(self.ttl.manual_hours)
        };

        let mut order = Order {
            order_id: biz_type.new_order_id(),
            user_id: user_id.to_string(),
            user_email: user_email.to_string(),
            biz_type,
            amount_cents: plan.amount_cents,
            payment_method,
            status: OrderStatus::Pending,
            transaction_id: None,
            code_url: None,
            created_at: now,
            paid_at: None,
            expires_at,
        };

        if !self.orders.create(&order).await? {
            // A concurrent creator inserted this id first; their row is the
            // order of record.
            let existing = self
                .orders
                .find_by_id(&order.order_id)
                .await?
                .ok_or_else(|| {
                    AppError::Internal(format!(
                        "Insert conflict on {} but row not found",
                        order.order_id
                    ))
                })?;
            return Ok((existing, true));
        }

        if payment_method == PaymentMethod::Wechat {
            let gateway = self.gateway.as_ref().ok_or_else(|| {
                AppError::ServiceUnavailable("WeChat payments are not configured".to_string())
            })?;
            // Gateway failure leaves the order pending and payable through
            // another channel; the caller still sees the error.
            let code_url = gateway.create_native_order(&order, &plan.label).await?;
            self.orders.set_code_url(&order.order_id, &code_url).await?;
            order.code_url = Some(code_url);
        }

        tracing::info!(
            "Created order {} ({} fen, {:?}) for user {}",
            order.order_id,
            order.amount_cents,
            biz_type,
            user_id
        );
        Ok((order, false))
    }

    pub async fn find_order(&self, order_id: &str) -> Result<Option<Order>> {
        self.orders.find_by_id(order_id).await
    }
}
