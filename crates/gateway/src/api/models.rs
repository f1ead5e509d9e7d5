//! Model administration endpoints.
//!
//! - `GET    /api/admin/models`              — list registry models
//! - `GET    /api/admin/models/:id`          — single model
//! - `PUT    /api/admin/models/:id/config`   — edit the tuning blob
//! - `DELETE /api/admin/models/:id`          — delete (inactive only)
//! - `POST   /api/admin/models/:id/activate` — start activation (202)
//! - `POST   /api/admin/models/deactivate`   — stop the current model
//! - `GET    /api/admin/models/pool-status`  — supervisor status + cache
//! - `GET    /api/admin/providers`           — provider listing

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use mg_domain::error::Error;
use mg_domain::model::ModelTuning;

use crate::api::auth::AdminGuard;
use crate::api::error::ApiError;
use crate::runtime::snapshot::write_config_snapshot;
use crate::state::AppState;

pub async fn list_models(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    let models = state.registry.list_models();
    Json(serde_json::json!({ "models": models, "count": models.len() }))
}

pub async fn get_model(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let model = state
        .registry
        .get_model(id)
        .ok_or_else(|| Error::NotFound(format!("model {id}")))?;
    Ok(Json(serde_json::json!(model)))
}

/// Replace the model's tuning blob and mirror it to the config snapshot.
pub async fn put_model_config(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(tuning): Json<ModelTuning>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.update_model(id, |m| m.config = tuning)?;
    let model = state
        .registry
        .get_model(id)
        .ok_or_else(|| Error::NotFound(format!("model {id}")))?;

    match write_config_snapshot(&state.config.paths, &model) {
        Ok(path) => tracing::debug!(model = %model.name, path = %path.display(), "config snapshot written"),
        Err(e) => tracing::warn!(model = %model.name, error = %e, "config snapshot failed"),
    }
    Ok(Json(serde_json::json!(model)))
}

/// Models are destroyed only after deactivation; the registry refuses
/// otherwise.
pub async fn delete_model(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.delete_model(id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub async fn list_providers(
    _guard: AdminGuard,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let providers = state.registry.list_providers();
    Json(serde_json::json!({ "providers": providers, "count": providers.len() }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Activation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct ActivateRequest {
    /// Client-supplied activation id, for correlating an event
    /// subscription opened before the POST.
    #[serde(default, rename = "activationId")]
    pub activation_id: Option<String>,
}

/// Returns 202 immediately; the outcome arrives on the event bus under the
/// returned activation id.
pub async fn activate(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    body: Option<Json<ActivateRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let provided = body.and_then(|Json(b)| b.activation_id);
    let activation_id = state.lifecycle.activate(id, provided).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "activationId": activation_id,
            "status": "activating",
        })),
    ))
}

pub async fn deactivate(
    _guard: AdminGuard,
    State(state): State<AppState>,
) -> impl IntoResponse {
    state.lifecycle.deactivate_current().await;
    Json(serde_json::json!({ "status": "idle" }))
}

pub async fn pool_status(
    _guard: AdminGuard,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(state.lifecycle.pool_status().await)
}
