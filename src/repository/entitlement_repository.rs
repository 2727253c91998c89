use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::{
    domain::{Entitlement, LedgerBizType, TokenLedgerEntry},
    error::{AppError, Result},
    repository::{EntitlementRepository, TokenGrant},
};

#[derive(FromRow)]
struct EntitlementRow {
    user_id: String,
    user_email: String,
    is_member: bool,
    membership_expires_at: Option<NaiveDateTime>,
    token_balance: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(FromRow)]
struct LedgerRow {
    id: i64,
    user_id: String,
    order_id: Option<String>,
    biz_type: String,
    change_amount: i64,
    balance_after: i64,
    note: String,
    created_at: NaiveDateTime,
}

pub struct SqliteEntitlementRepository {
    pool: SqlitePool,
}

impl SqliteEntitlementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entitlement(row: EntitlementRow) -> Entitlement {
        Entitlement {
            user_id: row.user_id,
            user_email: row.user_email,
            is_member: row.is_member,
            membership_expires_at: row
                .membership_expires_at
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            token_balance: row.token_balance,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        }
    }

    fn row_to_ledger(row: LedgerRow) -> Result<TokenLedgerEntry> {
        Ok(TokenLedgerEntry {
            id: row.id,
            user_id: row.user_id,
            order_id: row.order_id,
            biz_type: Self::parse_biz_type(&row.biz_type)?,
            change_amount: row.change_amount,
            balance_after: row.balance_after,
            note: row.note,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }

    fn parse_biz_type(s: &str) -> Result<LedgerBizType> {
        match s {
            "grant_basic" => Ok(LedgerBizType::GrantBasic),
            "grant_pro" => Ok(LedgerBizType::GrantPro),
            "consume" => Ok(LedgerBizType::Consume),
            _ => Err(AppError::Database(format!("Invalid ledger biz type: {}", s))),
        }
    }

    fn biz_type_to_str(biz_type: LedgerBizType) -> &'static str {
        match biz_type {
            LedgerBizType::GrantBasic => "grant_basic",
            LedgerBizType::GrantPro => "grant_pro",
            LedgerBizType::Consume => "consume",
        }
    }
}

#[async_trait]
impl EntitlementRepository for SqliteEntitlementRepository {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<Entitlement>> {
        let row = sqlx::query_as::<_, EntitlementRow>(
            r#"
            SELECT user_id, user_email, is_member, membership_expires_at,
                   token_balance, created_at, updated_at
            FROM entitlements
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Self::row_to_entitlement))
    }

    async fn upsert_membership(
        &self,
        user_id: &str,
        user_email: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Entitlement> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO entitlements (
                user_id, user_email, is_member, membership_expires_at,
                token_balance, created_at, updated_at
            ) VALUES (?, ?, 1, ?, 0, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                user_email = excluded.user_email,
                is_member = 1,
                membership_expires_at = excluded.membership_expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(user_email)
        .bind(expires_at.naive_utc())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_user(user_id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve upserted entitlement".to_string())
        })
    }

    async fn grant_tokens(
        &self,
        user_id: &str,
        user_email: &str,
        biz_type: LedgerBizType,
        order_id: &str,
        quantity: i64,
        note: &str,
    ) -> Result<TokenGrant> {
        let biz_str = Self::biz_type_to_str(biz_type);
        let now = Utc::now().naive_utc();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        // Replay check against the ledger idempotency key.
        let existing: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT balance_after FROM token_ledger
            WHERE user_id = ? AND biz_type = ? AND order_id = ?
            "#,
        )
        .bind(user_id)
        .bind(biz_str)
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if let Some((balance_after,)) = existing {
            return Ok(TokenGrant {
                balance_after,
                already_granted: true,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO entitlements (
                user_id, user_email, is_member, membership_expires_at,
                token_balance, created_at, updated_at
            ) VALUES (?, ?, 0, NULL, 0, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(user_email)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        sqlx::query(
            "UPDATE entitlements SET token_balance = token_balance + ?, updated_at = ? WHERE user_id = ?",
        )
        .bind(quantity)
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let (balance_after,): (i64,) =
            sqlx::query_as("SELECT token_balance FROM entitlements WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

        let ledger_insert = sqlx::query(
            r#"
            INSERT INTO token_ledger (
                user_id, order_id, biz_type, change_amount, balance_after,
                note, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(order_id)
        .bind(biz_str)
        .bind(quantity)
        .bind(balance_after)
        .bind(note)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match ledger_insert {
            Ok(_) => {
                tx.commit()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(TokenGrant {
                    balance_after,
                    already_granted: false,
                })
            }
            // A concurrent grant for the same key slipped in between our
            // replay check and the append; the transaction rolls back and
            // the earlier grant stands.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                drop(tx);
                let (balance_after,): (i64,) = sqlx::query_as(
                    r#"
                    SELECT balance_after FROM token_ledger
                    WHERE user_id = ? AND biz_type = ? AND order_id = ?
                    "#,
                )
                .bind(user_id)
                .bind(biz_str)
                .bind(order_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(TokenGrant {
                    balance_after,
                    already_granted: true,
                })
            }
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    async fn consume_tokens(&self, user_id: &str, quantity: i64, note: &str) -> Result<TokenGrant> {
        if quantity <= 0 {
            return Err(AppError::Validation(
                "Consumption amount must be positive".to_string(),
            ));
        }
        let now = Utc::now().naive_utc();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE entitlements
            SET token_balance = token_balance - ?, updated_at = ?
            WHERE user_id = ? AND token_balance >= ?
            "#,
        )
        .bind(quantity)
        .bind(now)
        .bind(user_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict("Insufficient token balance".to_string()));
        }

        let (balance_after,): (i64,) =
            sqlx::query_as("SELECT token_balance FROM entitlements WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO token_ledger (
                user_id, order_id, biz_type, change_amount, balance_after,
                note, created_at
            ) VALUES (?, NULL, 'consume', ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(-quantity)
        .bind(balance_after)
        .bind(note)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(TokenGrant {
            balance_after,
            already_granted: false,
        })
    }

    async fn ledger_for_user(&self, user_id: &str) -> Result<Vec<TokenLedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, user_id, order_id, biz_type, change_amount,
                   balance_after, note, created_at
            FROM token_ledger
            WHERE user_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_ledger).collect()
    }
}
