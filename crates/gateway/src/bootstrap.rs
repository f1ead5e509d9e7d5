//! AppState construction shared by `serve` and the CLI commands.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use mg_domain::config::Config;
use mg_events::EventBus;
use mg_registry::{PolicyEngine, Registry};

use crate::runtime::{CancellationRegistry, LifecycleManager};
use crate::state::AppState;

/// Initialize every subsystem and return a fully-wired [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Data layout ──────────────────────────────────────────────────
    std::fs::create_dir_all(config.paths.models_dir())
        .context("creating models directory")?;
    std::fs::create_dir_all(config.paths.model_config_dir())
        .context("creating model config directory")?;

    // ── Registry ─────────────────────────────────────────────────────
    let registry = Arc::new(
        Registry::open(&config.paths.registry_file()).context("opening registry")?,
    );

    // ── Policy engine ────────────────────────────────────────────────
    let policy = Arc::new(PolicyEngine::new(registry.clone()));

    // ── Event bus ────────────────────────────────────────────────────
    let bus = EventBus::new();
    tracing::info!("event bus ready");

    // ── Cancellation registry ────────────────────────────────────────
    let cancellations = Arc::new(CancellationRegistry::new());

    // ── Lifecycle manager ────────────────────────────────────────────
    let lifecycle = Arc::new(LifecycleManager::new(
        registry.clone(),
        bus.clone(),
        cancellations.clone(),
        config.engine.clone(),
    ));
    tracing::info!(
        engine_url = %config.engine.base_url(),
        wrapper = %config.engine.wrapper_script,
        "lifecycle manager ready"
    );

    // ── Admin token (read once, hashed for constant-time comparison) ─
    let admin_token_hash = match std::env::var(&config.admin.token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %config.admin.token_env, "admin bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env_var = %config.admin.token_env,
                "admin bearer-token auth DISABLED — set the env var to enable"
            );
            None
        }
    };

    Ok(AppState {
        config,
        registry,
        policy,
        bus,
        lifecycle,
        cancellations,
        admin_token_hash,
        http: reqwest::Client::new(),
    })
}
