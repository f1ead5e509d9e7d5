use std::sync::Arc;

use mg_domain::config::Config;
use mg_events::EventBus;
use mg_registry::{PolicyEngine, Registry};

use crate::runtime::{CancellationRegistry, LifecycleManager};

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Durable model/provider/key/settings tables.
    pub registry: Arc<Registry>,
    /// Privacy / air-gap policy resolver.
    pub policy: Arc<PolicyEngine>,
    /// Process-wide event bus; the only activation notification channel.
    pub bus: EventBus,
    /// Supervisor of the single inference subprocess.
    pub lifecycle: Arc<LifecycleManager>,
    /// Advisory cancellation flags for long-running workflows.
    pub cancellations: Arc<CancellationRegistry>,
    /// SHA-256 of the admin bearer token; `None` = dev mode.
    pub admin_token_hash: Option<Vec<u8>>,
    /// Shared outbound HTTP client (engine proxying).
    pub http: reqwest::Client,
}
