use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{CreateOrderRequest, CreateOrderResponse, Order},
    error::{AppError, Result},
};

pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>)> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (order, reused) = state
        .services
        .order_service
        .create_order(
            &user.user_id,
            &user.email,
            request.payment_method,
            request.biz_type,
        )
        .await?;

    let status = if reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(CreateOrderResponse { order, reused })))
}

pub async fn get(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(order_id): Path<String>,
) -> Result<Json<Order>> {
    let order = state
        .services
        .order_service
        .find_order(&order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;

    if order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }
    Ok(Json(order))
}
