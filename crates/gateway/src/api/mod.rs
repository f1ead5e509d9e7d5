pub mod auth;
pub mod completion;
pub mod error;
pub mod events;
pub mod models;
pub mod settings;
pub mod tools;

use axum::response::{IntoResponse, Json};
use axum::routing::{get, post, put};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Admin routes enforce the bearer token through the `AdminGuard`
/// extractor on each handler; the internal completion endpoint does its
/// own loopback check instead.
pub fn router() -> Router<AppState> {
    Router::new()
        // Public
        .route("/api/health", get(health))
        // Internal (loopback-only, checked in the handler)
        .route(
            "/api/internal/v1/local_completion",
            post(completion::local_completion),
        )
        // Events
        .route(
            "/api/events/activations/:id",
            get(events::activation_events_sse),
        )
        .route("/api/events/ws", get(events::events_ws))
        // Models
        .route("/api/admin/models", get(models::list_models))
        .route("/api/admin/models/pool-status", get(models::pool_status))
        .route("/api/admin/models/deactivate", post(models::deactivate))
        .route(
            "/api/admin/models/:id",
            get(models::get_model).delete(models::delete_model),
        )
        .route("/api/admin/models/:id/activate", post(models::activate))
        .route("/api/admin/models/:id/config", put(models::put_model_config))
        // Providers
        .route("/api/admin/providers", get(models::list_providers))
        // Settings
        .route(
            "/api/admin/settings/privacy",
            get(settings::get_privacy).put(settings::put_privacy),
        )
        .route(
            "/api/admin/settings/air_gapped",
            get(settings::get_air_gapped).put(settings::put_air_gapped),
        )
        .route(
            "/api/admin/settings/scalytics-api",
            get(settings::get_scalytics_api).put(settings::put_scalytics_api),
        )
        .route(
            "/api/admin/settings/preferred-embedding-model",
            get(settings::get_preferred_embedding).put(settings::put_preferred_embedding),
        )
        // Local tools
        .route(
            "/api/admin/mcp/local-tools/:tool_name/status",
            put(tools::set_tool_status),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Liveness probe. Public, no auth.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
