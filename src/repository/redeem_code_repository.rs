use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::{
    domain::{RedeemCode, RedeemCodeStatus},
    error::{AppError, Result},
    repository::RedeemCodeRepository,
};

#[derive(FromRow)]
struct RedeemCodeRow {
    code: String,
    status: String,
    grant_days: i64,
    used_by: Option<String>,
    used_by_email: Option<String>,
    used_at: Option<NaiveDateTime>,
    expires_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
}

pub struct SqliteRedeemCodeRepository {
    pool: SqlitePool,
}

impl SqliteRedeemCodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_code(row: RedeemCodeRow) -> Result<RedeemCode> {
        Ok(RedeemCode {
            code: row.code,
            status: Self::parse_status(&row.status)?,
            grant_days: row.grant_days,
            used_by: row.used_by,
            used_by_email: row.used_by_email,
            used_at: row.used_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            expires_at: row.expires_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }

    fn parse_status(s: &str) -> Result<RedeemCodeStatus> {
        match s {
            "unused" => Ok(RedeemCodeStatus::Unused),
            "used" => Ok(RedeemCodeStatus::Used),
            "disabled" => Ok(RedeemCodeStatus::Disabled),
            _ => Err(AppError::Database(format!("Invalid redeem code status: {}", s))),
        }
    }

    fn status_to_str(status: RedeemCodeStatus) -> &'static str {
        match status {
            RedeemCodeStatus::Unused => "unused",
            RedeemCodeStatus::Used => "used",
            RedeemCodeStatus::Disabled => "disabled",
        }
    }
}

#[async_trait]
impl RedeemCodeRepository for SqliteRedeemCodeRepository {
    async fn create(&self, code: &RedeemCode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO redeem_codes (
                code, status, grant_days, used_by, used_by_email,
                used_at, expires_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&code.code)
        .bind(Self::status_to_str(code.status))
        .bind(code.grant_days)
        .bind(&code.used_by)
        .bind(&code.used_by_email)
        .bind(code.used_at.map(|dt| dt.naive_utc()))
        .bind(code.expires_at.map(|dt| dt.naive_utc()))
        .bind(code.created_at.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<RedeemCode>> {
        let row = sqlx::query_as::<_, RedeemCodeRow>(
            r#"
            SELECT code, status, grant_days, used_by, used_by_email,
                   used_at, expires_at, created_at
            FROM redeem_codes
            WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_code(r)?)),
            None => Ok(None),
        }
    }

    async fn mark_used(
        &self,
        code: &str,
        user_id: &str,
        user_email: &str,
        used_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE redeem_codes
            SET status = 'used', used_by = ?, used_by_email = ?, used_at = ?
            WHERE code = ? AND status = 'unused'
            "#,
        )
        .bind(user_id)
        .bind(user_email)
        .bind(used_at.naive_utc())
        .bind(code)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn revert_unused(
        &self,
        code: &str,
        user_id: &str,
        used_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE redeem_codes
            SET status = 'unused', used_by = NULL, used_by_email = NULL, used_at = NULL
            WHERE code = ? AND status = 'used' AND used_by = ? AND used_at = ?
            "#,
        )
        .bind(code)
        .bind(user_id)
        .bind(used_at.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }
}
