//! Redeem codes: a parallel, simpler idempotent state machine that grants
//! membership directly, with the same compensation discipline as the
//! fulfillment engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    domain::{extend_membership, is_valid_code_format, normalize_code, RedeemCodeStatus},
    error::{AppError, Result},
    repository::{EntitlementRepository, RedeemCodeRepository},
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum RedeemOutcome {
    Redeemed {
        membership_expires_at: DateTime<Utc>,
    },
    /// The same user re-submitting a code they already consumed; no
    /// duplicate grant.
    AlreadyRedeemed {
        membership_expires_at: Option<DateTime<Utc>>,
    },
    /// The entitlement write failed after the code was claimed; the code
    /// was rolled back (or not, which is the fatal case).
    GrantFailed {
        rollback_succeeded: bool,
        detail: String,
    },
}

pub struct RedeemService {
    codes: Arc<dyn RedeemCodeRepository>,
    entitlements: Arc<dyn EntitlementRepository>,
}

impl RedeemService {
    pub fn new(
        codes: Arc<dyn RedeemCodeRepository>,
        entitlements: Arc<dyn EntitlementRepository>,
    ) -> Self {
        Self { codes, entitlements }
    }

    pub async fn consume(
        &self,
        raw_code: &str,
        user_id: &str,
        user_email: &str,
    ) -> Result<RedeemOutcome> {
        let code = normalize_code(raw_code);
        if !is_valid_code_format(&code) {
            return Err(AppError::Validation("Malformed redeem code".to_string()));
        }

        let record = self
            .codes
            .find_by_code(&code)
            .await?
            .ok_or_else(|| AppError::NotFound("Redeem code not found".to_string()))?;

        let now = Utc::now();
        match record.status {
            RedeemCodeStatus::Disabled => {
                return Err(AppError::BadRequest("Redeem code is disabled".to_string()));
            }
            RedeemCodeStatus::Used => {
                return self.resolve_used(&code, user_id).await;
            }
            RedeemCodeStatus::Unused => {}
        }
        if record.expires_at.map(|at| at < now).unwrap_or(false) {
            return Err(AppError::BadRequest("Redeem code has expired".to_string()));
        }

        if !self.codes.mark_used(&code, user_id, user_email, now).await? {
            // Lost the unused -> used race; re-read and resolve.
            return self.resolve_used(&code, user_id).await;
        }

        match self
            .grant_membership(user_id, user_email, record.grant_days, now)
            .await
        {
            Ok(expires_at) => {
                tracing::info!("Redeem code {} consumed by user {}", code, user_id);
                Ok(RedeemOutcome::Redeemed {
                    membership_expires_at: expires_at,
                })
            }
            Err(e) => {
                let detail = e.to_string();
                let rollback_succeeded =
                    match self.codes.revert_unused(&code, user_id, now).await {
                        Ok(reverted) => reverted,
                        Err(rollback_err) => {
                            tracing::error!(
                                "Rollback of redeem code {} also failed: {}",
                                code,
                                rollback_err
                            );
                            false
                        }
                    };
                if rollback_succeeded {
                    tracing::warn!(
                        "Membership grant for code {} failed ({}); code reverted to unused",
                        code,
                        detail
                    );
                } else {
                    tracing::error!(
                        "FATAL: membership grant for code {} failed ({}) and rollback did not \
                         restore it",
                        code,
                        detail
                    );
                }
                Ok(RedeemOutcome::GrantFailed {
                    rollback_succeeded,
                    detail,
                })
            }
        }
    }

    async fn grant_membership(
        &self,
        user_id: &str,
        user_email: &str,
        grant_days: i64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let current = self
            .entitlements
            .find_by_user(user_id)
            .await?
            .and_then(|e| e.membership_expires_at);
        let expires_at = extend_membership(current, now, grant_days);
        self.entitlements
            .upsert_membership(user_id, user_email, expires_at)
            .await?;
        Ok(expires_at)
    }

    /// A used code is an idempotent success only for the user who claimed
    /// it; anyone else gets a conflict.
    async fn resolve_used(&self, code: &str, user_id: &str) -> Result<RedeemOutcome> {
        let record = self
            .codes
            .find_by_code(code)
            .await?
            .ok_or_else(|| AppError::NotFound("Redeem code not found".to_string()))?;

        match record.status {
            RedeemCodeStatus::Used if record.used_by.as_deref() == Some(user_id) => {
                let expiry = self
                    .entitlements
                    .find_by_user(user_id)
                    .await?
                    .and_then(|e| e.membership_expires_at);
                Ok(RedeemOutcome::AlreadyRedeemed {
                    membership_expires_at: expiry,
                })
            }
            RedeemCodeStatus::Used => Err(AppError::Conflict(
                "Redeem code already claimed by another user".to_string(),
            )),
            RedeemCodeStatus::Disabled => {
                Err(AppError::BadRequest("Redeem code is disabled".to_string()))
            }
            // Raced with a compensating rollback; the caller may retry.
            RedeemCodeStatus::Unused => Err(AppError::Conflict(
                "Redeem code state changed, please retry".to_string(),
            )),
        }
    }
}
