//! Local tool administration.
//!
//! `PUT /api/admin/mcp/local-tools/:toolName/status` — flip a built-in
//! tool's activation flag. The policy engine owns the preconditions
//! (enabling the search tool requires a usable embedding model).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::api::auth::AdminGuard;
use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PutToolStatus {
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

pub async fn set_tool_status(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    Json(body): Json<PutToolStatus>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .policy
        .set_local_tool_active(&tool_name, body.is_active)?;
    Ok(Json(serde_json::json!({
        "toolName": tool_name,
        "isActive": body.is_active,
    })))
}
