use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::{
    domain::{Order, OrderBizType, OrderStatus, PaymentMethod},
    error::{AppError, Result},
    repository::OrderRepository,
};

#[derive(FromRow)]
struct OrderRow {
    order_id: String,
    user_id: String,
    user_email: String,
    biz_type: String,
    amount_cents: i64,
    payment_method: String,
    status: String,
    transaction_id: Option<String>,
    code_url: Option<String>,
    created_at: NaiveDateTime,
    paid_at: Option<NaiveDateTime>,
    expires_at: NaiveDateTime,
}

const ORDER_COLUMNS: &str = r#"
    order_id, user_id, user_email, biz_type, amount_cents, payment_method,
    status, transaction_id, code_url, created_at, paid_at, expires_at
"#;

pub struct SqliteOrderRepository {
    pool: SqlitePool,
}

impl SqliteOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: OrderRow) -> Result<Order> {
        Ok(Order {
            order_id: row.order_id,
            user_id: row.user_id,
            user_email: row.user_email,
            biz_type: Self::parse_biz_type(&row.biz_type)?,
            amount_cents: row.amount_cents,
            payment_method: Self::parse_payment_method(&row.payment_method)?,
            status: Self::parse_status(&row.status)?,
            transaction_id: row.transaction_id,
            code_url: row.code_url,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            paid_at: row.paid_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            expires_at: DateTime::from_naive_utc_and_offset(row.expires_at, Utc),
        })
    }

    fn parse_status(s: &str) -> Result<OrderStatus> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "expired" => Ok(OrderStatus::Expired),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(AppError::Database(format!("Invalid order status: {}", s))),
        }
    }

    fn status_to_str(status: OrderStatus) -> &'static str {
        match status {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Expired => "expired",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    fn parse_payment_method(s: &str) -> Result<PaymentMethod> {
        match s {
            "wechat" => Ok(PaymentMethod::Wechat),
            "alipay" => Ok(PaymentMethod::Alipay),
            _ => Err(AppError::Database(format!("Invalid payment method: {}", s))),
        }
    }

    fn payment_method_to_str(method: PaymentMethod) -> &'static str {
        match method {
            PaymentMethod::Wechat => "wechat",
            PaymentMethod::Alipay => "alipay",
        }
    }

    fn parse_biz_type(s: &str) -> Result<OrderBizType> {
        match s {
            "membership" => Ok(OrderBizType::Membership),
            "token_basic" => Ok(OrderBizType::TokenBasic),
            "token_pro" => Ok(OrderBizType::TokenPro),
            _ => Err(AppError::Database(format!("Invalid biz type: {}", s))),
        }
    }

    fn biz_type_to_str(biz_type: OrderBizType) -> &'static str {
        match biz_type {
            OrderBizType::Membership => "membership",
            OrderBizType::TokenBasic => "token_basic",
            OrderBizType::TokenPro => "token_pro",
        }
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn create(&self, order: &Order) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, user_id, user_email, biz_type, amount_cents,
                payment_method, status, transaction_id, code_url,
                created_at, paid_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.user_id)
        .bind(&order.user_email)
        .bind(Self::biz_type_to_str(order.biz_type))
        .bind(order.amount_cents)
        .bind(Self::payment_method_to_str(order.payment_method))
        .bind(Self::status_to_str(order.status))
        .bind(&order.transaction_id)
        .bind(&order.code_url)
        .bind(order.created_at.naive_utc())
        .bind(order.paid_at.map(|dt| dt.naive_utc()))
        .bind(order.expires_at.naive_utc())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    async fn find_by_id(&self, order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_id = ?",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_order(r)?)),
            None => Ok(None),
        }
    }

    async fn find_reusable_pending(
        &self,
        user_id: &str,
        payment_method: PaymentMethod,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {} FROM orders
            WHERE user_id = ? AND payment_method = ? AND amount_cents = ?
              AND status = 'pending' AND expires_at > ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(Self::payment_method_to_str(payment_method))
        .bind(amount_cents)
        .bind(now.naive_utc())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_order(r)?)),
            None => Ok(None),
        }
    }

    async fn list_pending_oldest(&self, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {} FROM orders
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT ?
            "#,
            ORDER_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn set_code_url(&self, order_id: &str, code_url: &str) -> Result<()> {
        sqlx::query("UPDATE orders SET code_url = ? WHERE order_id = ?")
            .bind(code_url)
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn mark_paid(
        &self,
        order_id: &str,
        transaction_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'paid', transaction_id = ?, paid_at = ?
            WHERE order_id = ? AND status = 'pending'
            "#,
        )
        .bind(transaction_id)
        .bind(paid_at.naive_utc())
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn revert_paid(&self, order_id: &str, transaction_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'pending', transaction_id = NULL, paid_at = NULL
            WHERE order_id = ? AND status = 'paid' AND transaction_id = ?
            "#,
        )
        .bind(order_id)
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_expired(&self, order_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'expired' WHERE order_id = ? AND status = 'pending'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_cancelled(&self, order_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'cancelled' WHERE order_id = ? AND status = 'pending'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }
}
