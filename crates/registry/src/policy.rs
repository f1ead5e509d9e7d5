//! Privacy / air-gap policy resolution.
//!
//! The engine turns a target `(privacy, air_gap)` pair into concrete
//! provider/key/model mutations, applied in a single registry transaction.
//! Coupling between the two toggles (air-gap implies privacy, privacy-off
//! implies air-gap-off) is enforced by the settings handlers before they
//! call in here.

use std::sync::Arc;

use serde::Serialize;

use mg_domain::error::{Error, Result};
use mg_domain::model::ModelRecord;
use mg_domain::provider::ProviderCategory;
use mg_domain::settings;

use crate::store::{Registry, Tables};

/// Name of the built-in local search tool gated on an embedding model.
pub const SCALYTICS_SEARCH_TOOL: &str = "scalytics_search";

/// Settings key prefix for local tool activation flags.
fn local_tool_key(tool: &str) -> String {
    format!("local_tool_active:{tool}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Row-change tally returned for logging and the admin response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PolicyOutcome {
    pub providers_deactivated: usize,
    pub providers_activated: usize,
    pub keys_deactivated: usize,
    pub keys_activated: usize,
    pub models_deactivated: usize,
    pub models_activated: usize,
}

impl PolicyOutcome {
    pub fn is_noop(&self) -> bool {
        *self == PolicyOutcome::default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PolicyEngine {
    registry: Arc<Registry>,
}

impl PolicyEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Resolve the target `(privacy, air_gap)` state into table mutations.
    ///
    /// Idempotent: re-applying the same pair is a no-op. Applied in one
    /// transaction — an error commits nothing.
    pub fn apply_provider_and_key_rules(
        &self,
        target_privacy: bool,
        target_air_gap: bool,
    ) -> Result<PolicyOutcome> {
        let outcome = self.registry.transaction(|t| {
            let mut out = PolicyOutcome::default();
            if target_air_gap {
                deactivate_categories(t, &ProviderCategory::OUTBOUND, &mut out);
            } else if target_privacy {
                deactivate_categories(t, &[ProviderCategory::ExtLlm], &mut out);
                activate_categories(
                    t,
                    &[ProviderCategory::Search, ProviderCategory::Hf],
                    &mut out,
                );
            } else {
                activate_categories(t, &ProviderCategory::OUTBOUND, &mut out);
            }
            Ok(out)
        })?;

        tracing::info!(
            privacy = target_privacy,
            air_gap = target_air_gap,
            ?outcome,
            "policy rules applied"
        );
        Ok(outcome)
    }

    /// Flip a local tool's activation flag. Enabling the search tool
    /// requires a usable embedding model.
    pub fn set_local_tool_active(&self, tool: &str, active: bool) -> Result<()> {
        if active && tool == SCALYTICS_SEARCH_TOOL {
            ensure_embedding_ready(&self.registry)?;
        }
        self.registry.update_settings(|s| {
            s.set_bool(&local_tool_key(tool), active);
        })
    }

    pub fn is_local_tool_active(&self, tool: &str) -> bool {
        self.registry.settings().get_bool(&local_tool_key(tool))
    }
}

/// Validate that the configured preferred embedding model exists, is local,
/// and is embedding-capable. All failure modes are `precondition_failed` —
/// the caller must fix configuration, nothing is auto-repaired.
pub fn ensure_embedding_ready(registry: &Registry) -> Result<ModelRecord> {
    let id = registry
        .settings()
        .preferred_embedding_model_id()
        .ok_or_else(|| {
            Error::PreconditionFailed(
                format!("{} is not configured", settings::PREFERRED_LOCAL_EMBEDDING_MODEL_ID),
            )
        })?;
    let model = registry.get_model(id).ok_or_else(|| {
        Error::PreconditionFailed(format!("preferred embedding model {id} does not exist"))
    })?;
    if !model.is_local() {
        return Err(Error::PreconditionFailed(format!(
            "preferred embedding model {id} is not local"
        )));
    }
    if !model.is_embedding_model {
        return Err(Error::PreconditionFailed(format!(
            "model {id} is not embedding-capable"
        )));
    }
    Ok(model)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Table sweeps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn deactivate_categories(t: &mut Tables, cats: &[ProviderCategory], out: &mut PolicyOutcome) {
    let provider_ids = t.provider_ids_in(cats);

    for key in t.keys.values_mut() {
        if provider_ids.contains(&key.provider_id) && key.is_active {
            key.is_active = false;
            out.keys_deactivated += 1;
        }
    }
    for provider in t.providers.values_mut() {
        if cats.contains(&provider.category) && provider.is_active {
            provider.is_active = false;
            out.providers_deactivated += 1;
        }
    }
    for model in t.models.values_mut() {
        let external = model
            .external_provider_id
            .map(|id| provider_ids.contains(&id))
            .unwrap_or(false);
        if external && model.is_active {
            model.is_active = false;
            out.models_deactivated += 1;
        }
    }
}

fn activate_categories(t: &mut Tables, cats: &[ProviderCategory], out: &mut PolicyOutcome) {
    let provider_ids = t.provider_ids_in(cats);

    for provider in t.providers.values_mut() {
        if cats.contains(&provider.category) && !provider.is_active {
            provider.is_active = true;
            out.providers_activated += 1;
        }
    }
    for model in t.models.values_mut() {
        let external = model
            .external_provider_id
            .map(|id| provider_ids.contains(&id))
            .unwrap_or(false);
        if external && !model.is_active {
            model.is_active = true;
            out.models_activated += 1;
        }
    }
    // Only global keys come back automatically; per-user keys stay off
    // until their owner re-enables them.
    for key in t.keys.values_mut() {
        if key.is_global() && provider_ids.contains(&key.provider_id) && !key.is_active {
            key.is_active = true;
            out.keys_activated += 1;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
