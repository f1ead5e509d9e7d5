//! Engine readiness probing and the pool-status cache.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use mg_domain::config::ReadinessConfig;
use mg_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One-shot health probe against the engine's `/v1/models`.
pub struct ReadinessProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }

    /// Names of the models the engine currently serves. Readiness means a
    /// non-empty list.
    pub async fn served_models(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("engine probe: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "engine probe: HTTP {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Internal(format!("engine probe body: {e}")))?;
        let models = body["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }
}

/// The stuck heuristic: the engine process is alive but has failed to
/// become healthy for long enough that waiting further is pointless.
pub fn is_stuck(cfg: &ReadinessConfig, elapsed: Duration, consecutive_failures: u32) -> bool {
    elapsed > Duration::from_secs(cfg.stuck_after_secs)
        && consecutive_failures > cfg.stuck_failures
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Memoized positive readiness probe for the pool-status endpoint.
/// Invalidated on every activation state change.
pub struct StatusCache {
    ttl: Duration,
    inner: Mutex<Option<CacheEntry>>,
}

struct CacheEntry {
    at: Instant,
    models: Vec<String>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Option<Vec<String>> {
        let guard = self.inner.lock();
        guard
            .as_ref()
            .filter(|e| e.at.elapsed() < self.ttl)
            .map(|e| e.models.clone())
    }

    /// Only positive results are cached; failures must re-probe.
    pub fn put(&self, models: Vec<String>) {
        *self.inner.lock() = Some(CacheEntry {
            at: Instant::now(),
            models,
        });
    }

    pub fn invalidate(&self) {
        *self.inner.lock() = None;
    }
}
