use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub user_email: String,
    pub biz_type: OrderBizType,
    pub amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub transaction_id: Option<String>,
    pub code_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl Order {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Wechat,
    Alipay,
}

impl PaymentMethod {
    /// Whether payment confirmation arrives as a gateway push notification
    /// (short order TTL) or waits on manual settlement (long TTL).
    pub fn settles_by_push(&self) -> bool {
        matches!(self, PaymentMethod::Wechat)
    }
}

/// The business type is decided once at order creation and persisted on the
/// order row. Fulfillment dispatches on this column, never by re-parsing the
/// order id string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderBizType {
    Membership,
    TokenBasic,
    TokenPro,
}

impl OrderBizType {
    /// Legacy prefix carried on the order id so the merchant reference is
    /// human-readable in gateway dashboards and bill exports.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            OrderBizType::Membership => "MEM_",
            OrderBizType::TokenBasic => "TOK100_",
            OrderBizType::TokenPro => "TOK300_",
        }
    }

    pub fn new_order_id(&self) -> String {
        format!("{}{}", self.id_prefix(), Uuid::new_v4().simple())
    }
}

/// Priced plan for one business type, derived from configuration at order
/// creation time.
#[derive(Debug, Clone)]
pub struct BizPlan {
    pub biz_type: OrderBizType,
    pub label: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, validator::Validate)]
pub struct CreateOrderRequest {
    pub payment_method: PaymentMethod,
    pub biz_type: OrderBizType,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub reused: bool,
}
