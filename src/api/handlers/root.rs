use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Tollgate API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Payment order lifecycle and fulfillment engine",
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "orders": "/api/orders",
            "entitlements": "/api/entitlements/me",
            "redeem": "/api/redeem",
            "webhook": "/api/payments/webhook/wechat",
            "reconcile": "/api/reconcile"
        }
    }))
}

pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}
