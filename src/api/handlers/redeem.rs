use axum::{extract::State, Json};
use validator::Validate;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::RedeemRequest,
    error::{AppError, Result},
    service::RedeemOutcome,
};

pub async fn consume(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<RedeemRequest>,
) -> Result<Json<RedeemOutcome>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let outcome = state
        .services
        .redeem_service
        .consume(&request.code, &user.user_id, &user.email)
        .await?;
    Ok(Json(outcome))
}
