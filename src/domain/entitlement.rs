use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entitlement {
    pub user_id: String,
    pub user_email: String,
    pub is_member: bool,
    pub membership_expires_at: Option<DateTime<Utc>>,
    pub token_balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TokenLedgerEntry {
    pub id: i64,
    pub user_id: String,
    pub order_id: Option<String>,
    pub biz_type: LedgerBizType,
    pub change_amount: i64,
    pub balance_after: i64,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerBizType {
    GrantBasic,
    GrantPro,
    Consume,
}

/// Monotonic-additive membership extension: renewing before expiry extends
/// from the current expiry, renewing after a lapse extends from the payment
/// time. Existing coverage is never shortened.
pub fn extend_membership(
    current_expiry: Option<DateTime<Utc>>,
    paid_at: DateTime<Utc>,
    grant_days: i64,
) -> DateTime<Utc> {
    let base = match current_expiry {
        Some(expiry) if expiry > paid_at => expiry,
        _ => paid_at,
    };
    base + Duration::days(grant_days)
}
