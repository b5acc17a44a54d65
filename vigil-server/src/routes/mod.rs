pub mod v1;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::infra::app_state::AppState;

/// Assemble the full application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(v1::create_v1_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
