pub mod handlers;
pub mod middleware;
pub mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{config::Settings, service::ServiceContext};
use state::AppState;

pub fn create_app(services: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(services, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))
        // API routes
        .nest("/api", api_routes())
        // Add state to the router
        .with_state(app_state)
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive()) // Configure properly for production
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Authenticated caller surface; identity arrives from the upstream
        // auth layer and is enforced by the CurrentUser extractor.
        .route("/orders", post(handlers::orders::create))
        .route("/orders/:order_id", get(handlers::orders::get))
        .route("/entitlements/me", get(handlers::entitlements::me))
        .route("/entitlements/ledger", get(handlers::entitlements::ledger))
        .route("/redeem", post(handlers::redeem::consume))
        // Public webhook endpoint (no auth; verified cryptographically)
        .route("/payments/webhook/wechat", post(handlers::webhook::wechat_webhook))
        // Scheduler endpoint (shared-secret auth)
        .route("/reconcile", post(handlers::reconcile::run))
}
