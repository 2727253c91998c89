use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RedeemCode {
    pub code: String,
    pub status: RedeemCodeStatus,
    pub grant_days: i64,
    pub used_by: Option<String>,
    pub used_by_email: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RedeemCodeStatus {
    Unused,
    Used,
    Disabled,
}

/// Uppercase and trim a caller-supplied code before any lookup.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Codes are 16-64 uppercase alphanumeric characters. Anything else is
/// rejected before touching the store.
pub fn is_valid_code_format(code: &str) -> bool {
    (16..=64).contains(&code.len())
        && code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

#[derive(Debug, Clone, Deserialize, validator::Validate)]
pub struct RedeemRequest {
    #[validate(length(min = 16, max = 64))]
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_uppercases_and_trims() {
        assert_eq!(normalize_code("  abcd1234abcd1234 "), "ABCD1234ABCD1234");
    }

    #[test]
    fn format_check_rejects_short_and_symbols() {
        assert!(is_valid_code_format("ABCD1234ABCD1234"));
        assert!(!is_valid_code_format("SHORT"));
        assert!(!is_valid_code_format("ABCD-1234-ABCD-12"));
        assert!(!is_valid_code_format("abcd1234abcd1234"));
    }
}
