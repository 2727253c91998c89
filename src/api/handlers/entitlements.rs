use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    error::Result,
};

#[derive(Serialize)]
pub struct EntitlementView {
    pub user_id: String,
    pub is_member: bool,
    pub membership_active: bool,
    pub membership_expires_at: Option<chrono::DateTime<Utc>>,
    pub token_balance: i64,
}

pub async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<EntitlementView>> {
    let entitlement = state
        .services
        .entitlement_repo
        .find_by_user(&user.user_id)
        .await?;

    let view = match entitlement {
        Some(e) => EntitlementView {
            membership_active: e.is_member
                && e.membership_expires_at.map(|at| at > Utc::now()).unwrap_or(false),
            user_id: e.user_id,
            is_member: e.is_member,
            membership_expires_at: e.membership_expires_at,
            token_balance: e.token_balance,
        },
        // Users with no purchases yet have no row; report the zero state.
        None => EntitlementView {
            user_id: user.user_id,
            is_member: false,
            membership_active: false,
            membership_expires_at: None,
            token_balance: 0,
        },
    };
    Ok(Json(view))
}

pub async fn ledger(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<serde_json::Value>> {
    let entries = state
        .services
        .entitlement_repo
        .ledger_for_user(&user.user_id)
        .await?;
    Ok(Json(json!({ "entries": entries })))
}
