//! Admin settings endpoints.
//!
//! The privacy and air-gap handlers compute the coupled target pair and
//! delegate every table mutation to the policy engine. They are the only
//! place the coupling rules live.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use mg_domain::error::Error;
use mg_domain::settings;

use crate::api::auth::AdminGuard;
use crate::api::error::ApiError;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Privacy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PutPrivacy {
    pub enabled: bool,
}

pub async fn get_privacy(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "enabled": state.registry.settings().privacy_mode() }))
}

pub async fn put_privacy(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<PutPrivacy>,
) -> Result<impl IntoResponse, ApiError> {
    let air_gap_now = state.registry.settings().air_gapped();
    // Disabling privacy also disables air-gap; enabling it leaves the
    // air-gap toggle as it was.
    let (privacy, air_gap) = if body.enabled {
        (true, air_gap_now)
    } else {
        (false, false)
    };
    apply_modes(&state, privacy, air_gap)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Air gap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PutAirGap {
    #[serde(rename = "airGapped")]
    pub air_gapped: bool,
}

pub async fn get_air_gapped(
    _guard: AdminGuard,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "airGapped": state.registry.settings().air_gapped() }))
}

pub async fn put_air_gapped(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<PutAirGap>,
) -> Result<impl IntoResponse, ApiError> {
    let privacy_now = state.registry.settings().privacy_mode();
    // Air-gap implies privacy; lifting it keeps privacy as it was.
    let (privacy, air_gap) = if body.air_gapped {
        (true, true)
    } else {
        (privacy_now, false)
    };
    apply_modes(&state, privacy, air_gap)
}

/// Persist both toggles and run the policy cascade in that order; the
/// settings carry the admin's intent even if the cascade fails and is
/// retried later.
fn apply_modes(
    state: &AppState,
    privacy: bool,
    air_gap: bool,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.update_settings(|s| {
        s.set_bool(settings::GLOBAL_PRIVACY_MODE, privacy);
        s.set_bool(settings::AIR_GAPPED_MODE, air_gap);
    })?;
    let outcome = state.policy.apply_provider_and_key_rules(privacy, air_gap)?;
    Ok(Json(serde_json::json!({
        "globalPrivacy": privacy,
        "airGapped": air_gap,
        "changes": outcome,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public API settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PutScalyticsApi {
    pub scalytics_api_enabled: String,
    pub scalytics_api_rate_limit_window_ms: u64,
    pub scalytics_api_rate_limit_max: u64,
}

pub async fn get_scalytics_api(
    _guard: AdminGuard,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let s = state.registry.settings();
    Json(serde_json::json!({
        "scalytics_api_enabled": s.get(settings::SCALYTICS_API_ENABLED).unwrap_or("false"),
        "scalytics_api_rate_limit_window_ms":
            s.get_u64(settings::SCALYTICS_API_RATE_LIMIT_WINDOW_MS).unwrap_or(60_000),
        "scalytics_api_rate_limit_max":
            s.get_u64(settings::SCALYTICS_API_RATE_LIMIT_MAX).unwrap_or(100),
    }))
}

pub async fn put_scalytics_api(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<PutScalyticsApi>,
) -> Result<impl IntoResponse, ApiError> {
    if body.scalytics_api_enabled != "true" && body.scalytics_api_enabled != "false" {
        return Err(Error::InvalidRequest {
            param: "scalytics_api_enabled".into(),
            message: "must be \"true\" or \"false\"".into(),
        }
        .into());
    }
    if body.scalytics_api_rate_limit_window_ms == 0 {
        return Err(Error::InvalidRequest {
            param: "scalytics_api_rate_limit_window_ms".into(),
            message: "must be greater than 0".into(),
        }
        .into());
    }

    state.registry.update_settings(|s| {
        s.set(settings::SCALYTICS_API_ENABLED, &body.scalytics_api_enabled);
        s.set(
            settings::SCALYTICS_API_RATE_LIMIT_WINDOW_MS,
            body.scalytics_api_rate_limit_window_ms.to_string(),
        );
        s.set(
            settings::SCALYTICS_API_RATE_LIMIT_MAX,
            body.scalytics_api_rate_limit_max.to_string(),
        );
    })?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Preferred embedding model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PutEmbeddingModel {
    pub preferred_local_embedding_model_id: Option<u64>,
}

pub async fn get_preferred_embedding(
    _guard: AdminGuard,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "preferred_local_embedding_model_id":
            state.registry.settings().preferred_embedding_model_id(),
    }))
}

pub async fn put_preferred_embedding(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<PutEmbeddingModel>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(id) = body.preferred_local_embedding_model_id {
        let model = state
            .registry
            .get_model(id)
            .ok_or_else(|| Error::PreconditionFailed(format!("model {id} does not exist")))?;
        if !model.is_local() {
            return Err(Error::PreconditionFailed(format!("model {id} is not local")).into());
        }
        if !model.is_embedding_model {
            return Err(
                Error::PreconditionFailed(format!("model {id} is not embedding-capable")).into(),
            );
        }
    }

    state.registry.update_settings(|s| {
        match body.preferred_local_embedding_model_id {
            Some(id) => s.set(settings::PREFERRED_LOCAL_EMBEDDING_MODEL_ID, id.to_string()),
            None => {
                s.remove(settings::PREFERRED_LOCAL_EMBEDDING_MODEL_ID);
            }
        }
    })?;
    Ok(Json(serde_json::json!({
        "preferred_local_embedding_model_id": body.preferred_local_embedding_model_id,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
