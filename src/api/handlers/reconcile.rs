use axum::{extract::State, http::HeaderMap, Json};
use subtle::ConstantTimeEq;

use crate::{
    api::state::AppState,
    error::{AppError, Result},
    service::ReconcileSummary,
};

const TOKEN_HEADER: &str = "x-reconcile-token";

/// Manual or cron-driven reconciliation trigger. Accepts either a bearer
/// token or the custom token header; refuses to run when no secret is
/// configured at all.
pub async fn run(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReconcileSummary>> {
    let secret = state
        .settings
        .scheduler
        .secret
        .as_deref()
        .ok_or_else(|| {
            AppError::ServiceUnavailable("Reconciliation secret is not configured".to_string())
        })?;

    if !authorized(&headers, secret) {
        return Err(AppError::Unauthorized);
    }

    let reconciler = state.services.reconciler.clone().ok_or_else(|| {
        AppError::ServiceUnavailable("Reconciliation requires gateway configuration".to_string())
    })?;

    let summary = reconciler.reconcile().await?;
    Ok(Json(summary))
}

fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let custom = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok());

    [bearer, custom]
        .into_iter()
        .flatten()
        .any(|candidate| candidate.as_bytes().ct_eq(secret.as_bytes()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn accepts_bearer_or_custom_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer s3cret"));
        assert!(authorized(&headers, "s3cret"));

        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("s3cret"));
        assert!(authorized(&headers, "s3cret"));
    }

    #[test]
    fn rejects_wrong_or_missing_token() {
        let headers = HeaderMap::new();
        assert!(!authorized(&headers, "s3cret"));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer nope"));
        assert!(!authorized(&headers, "s3cret"));
    }
}
