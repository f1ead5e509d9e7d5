//! Local model lifecycle management.
//!
//! At most one inference subprocess is alive at a time, bound to exactly
//! one model id, and reported ready only after the health probe succeeds.
//! `activate` and `deactivate_current` are serialized by a transition
//! mutex; everything long-running happens in background tasks that talk to
//! the world only through the registry and the event bus.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use uuid::Uuid;

use mg_domain::config::EngineConfig;
use mg_domain::error::{Error, Result};
use mg_domain::model::{DiskModelConfig, ModelFormat};
use mg_events::{ActivationEvent, BusEvent, DebugLevel, EventBus};
use mg_launch::{build_plan, PlanInput};
use mg_registry::Registry;

use super::cancel::CancellationRegistry;
use super::logparse::{classify_line, ProgressTracker};
use super::readiness::{is_stuck, ReadinessProbe, StatusCache};
use super::sweep;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolPhase {
    Idle,
    Activating,
    Ready,
    Failed,
}

/// Ephemeral activation state. Reads without the transition mutex are
/// advisory; critical transitions always hold it.
#[derive(Debug, Clone)]
pub struct ActivationState {
    pub active_model_id: Option<u64>,
    pub active_context_size: Option<u32>,
    pub activation_id: Option<String>,
    pub phase: PoolPhase,
}

impl Default for ActivationState {
    fn default() -> Self {
        Self {
            active_model_id: None,
            active_context_size: None,
            activation_id: None,
            phase: PoolPhase::Idle,
        }
    }
}

/// Response shape of the pool-status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub active_model_id: Option<u64>,
    pub is_process_running: bool,
    pub status: PoolPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_models: Option<Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LifecycleManager {
    registry: Arc<Registry>,
    bus: EventBus,
    cancellations: Arc<CancellationRegistry>,
    engine: EngineConfig,
    /// Serializes activate/deactivate. A `tokio` mutex: held across awaits.
    transition: tokio::sync::Mutex<()>,
    state: Mutex<ActivationState>,
    /// The singleton subprocess handle. Shared with the readiness loop and
    /// the exit monitor.
    child: tokio::sync::Mutex<Option<Child>>,
    status_cache: StatusCache,
    http: reqwest::Client,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<Registry>,
        bus: EventBus,
        cancellations: Arc<CancellationRegistry>,
        engine: EngineConfig,
    ) -> Self {
        let status_cache = StatusCache::new(Duration::from_secs(engine.status_cache_secs));
        Self {
            registry,
            bus,
            cancellations,
            engine,
            transition: tokio::sync::Mutex::new(()),
            state: Mutex::new(ActivationState::default()),
            child: tokio::sync::Mutex::new(None),
            status_cache,
            http: reqwest::Client::new(),
        }
    }

    /// Advisory snapshot of the activation state.
    pub fn snapshot(&self) -> ActivationState {
        self.state.lock().clone()
    }

    /// Whether `activation_id` is still the owner of the subprocess slot.
    /// Background tasks of a displaced activation must stand down instead
    /// of touching their successor's state.
    fn owns(&self, activation_id: &str) -> bool {
        self.state.lock().activation_id.as_deref() == Some(activation_id)
    }

    pub fn active_model_id(&self) -> Option<u64> {
        self.state.lock().active_model_id
    }

    // ── Activation ───────────────────────────────────────────────────

    /// Start activating a model. Returns the activation id immediately;
    /// the outcome is reported on the event bus.
    pub async fn activate(
        self: &Arc<Self>,
        model_id: u64,
        provided_activation_id: Option<String>,
    ) -> Result<String> {
        let _transition = self.transition.lock().await;

        // A live subprocess belongs to the previous activation.
        if self.child.lock().await.is_some() {
            self.deactivate_locked().await;
        }

        let model = self
            .registry
            .get_model(model_id)
            .ok_or_else(|| Error::NotFound(format!("model {model_id}")))?;
        if model.model_format != ModelFormat::Torch {
            return Err(Error::UnsupportedFormat(model.name));
        }
        if !model.is_local() {
            return Err(Error::NotLocal(model.name));
        }
        if !model.model_path.exists() {
            self.registry.clear_model_active(model_id);
            return Err(Error::ModelNotFoundOnDisk(
                model.model_path.display().to_string(),
            ));
        }

        let activation_id = provided_activation_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.bus.publish_activation(ActivationEvent::Start {
            activation_id: activation_id.clone(),
            model_id,
            model_name: model.name.clone(),
        });

        let disk = load_disk_config(&model.model_path);
        if let Some(gib) =
            mg_estimator::estimate(&model, disk.as_ref(), weights_size_bytes(&model.model_path))
        {
            tracing::info!(model = %model.name, estimated_vram_gib = gib, "VRAM estimate");
        }

        let offline = self.registry.settings().air_gapped();
        let plan = build_plan(&PlanInput {
            model: &model,
            disk: disk.as_ref(),
            engine: &self.engine,
            offline,
        })?;
        tracing::debug!(argv = ?plan.argv, "engine launch plan");

        let mut child = Command::new(&self.engine.wrapper_script)
            .args(&plan.argv)
            .envs(plan.env.clone())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| Error::Internal(format!("spawning engine: {e}")))?;

        let tracker = Arc::new(Mutex::new(ProgressTracker::new()));
        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(stdout, false, activation_id.clone(), tracker.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(stderr, true, activation_id.clone(), tracker.clone());
        }

        *self.child.lock().await = Some(child);
        {
            let mut state = self.state.lock();
            state.active_model_id = Some(model_id);
            state.active_context_size = Some(model.context_window);
            state.activation_id = Some(activation_id.clone());
            state.phase = PoolPhase::Activating;
        }
        self.status_cache.invalidate();
        self.bus.publish(BusEvent::WorkerStatusChanged {
            status: "activating".into(),
        });

        // Readiness runs in the background; the caller gets the id now.
        let mgr = self.clone();
        let model_name = model.name.clone();
        let id_for_task = activation_id.clone();
        tokio::spawn(async move {
            mgr.finish_activation(model_id, model_name, id_for_task).await;
        });

        Ok(activation_id)
    }

    fn spawn_reader<R>(
        &self,
        stream: R,
        from_stderr: bool,
        activation_id: String,
        tracker: Arc<Mutex<ProgressTracker>>,
    ) where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let class = classify_line(&line, from_stderr);
                if let Some((pct, step)) = class.progress {
                    if tracker.lock().accept(pct) {
                        bus.publish_activation(ActivationEvent::Progress {
                            activation_id: activation_id.clone(),
                            progress_pct: pct,
                            message: line,
                            step,
                        });
                        continue;
                    }
                    // Marker below the high-water mark: falls through as a
                    // plain debug line.
                }
                bus.publish_activation(ActivationEvent::debug_now(
                    activation_id.clone(),
                    class.level,
                    line,
                ));
            }
        });
    }

    async fn finish_activation(
        self: Arc<Self>,
        model_id: u64,
        model_name: String,
        activation_id: String,
    ) {
        let outcome = self.wait_for_ready(&activation_id).await;
        match outcome {
            Ok(()) => {
                if !self.owns(&activation_id) {
                    // Displaced between the last probe and now.
                    self.fail_activation(
                        model_id,
                        model_name,
                        activation_id,
                        Error::Cancelled("activation was displaced".into()),
                    )
                    .await;
                    return;
                }
                if let Err(e) = self.registry.commit_activation(model_id) {
                    tracing::error!(model_id, error = %e, "activation commit failed");
                    self.fail_activation(model_id, model_name, activation_id, e)
                        .await;
                    return;
                }
                self.state.lock().phase = PoolPhase::Ready;
                self.status_cache.invalidate();
                self.bus.publish_activation(ActivationEvent::complete(
                    activation_id,
                    model_id,
                    model_name,
                ));
                self.bus.publish(BusEvent::ActiveModelChanged {
                    model_id: Some(model_id),
                });
                self.bus.publish(BusEvent::WorkerStatusChanged {
                    status: "ready".into(),
                });
                self.spawn_exit_monitor(model_id);
            }
            Err(e) => {
                self.fail_activation(model_id, model_name, activation_id, e)
                    .await;
            }
        }
    }

    async fn fail_activation(
        &self,
        model_id: u64,
        model_name: String,
        activation_id: String,
        error: Error,
    ) {
        tracing::warn!(model_id, error = %error, "activation failed");
        // Clean up only while this activation still owns the slot — a
        // displaced activation must not kill its successor's subprocess,
        // and its worker-status report belongs to the successor.
        let owner = self.owns(&activation_id);
        if owner {
            self.force_cleanup().await;
        }
        self.bus.publish_activation(ActivationEvent::Error {
            activation_id,
            error_message: error.to_string(),
            model_id: Some(model_id),
            model_name: Some(model_name),
        });
        if owner {
            self.bus.publish(BusEvent::WorkerStatusChanged {
                status: "failed".into(),
            });
        }
    }

    /// Poll the engine until it serves at least one model.
    ///
    /// Cancellation points, each iteration: explicit cancellation, the
    /// subprocess dying, the hard cap, and the stuck heuristic. At most
    /// one debug event is published per iteration.
    async fn wait_for_ready(&self, activation_id: &str) -> Result<()> {
        let cfg = self.engine.readiness.clone();
        let probe = ReadinessProbe::new(
            self.http.clone(),
            self.engine.models_url(),
            Duration::from_secs(cfg.probe_timeout_secs),
        );
        let started = Instant::now();
        let mut consecutive_failures: u32 = 0;

        loop {
            if !self.owns(activation_id) {
                return Err(Error::Cancelled(format!(
                    "activation {activation_id} was displaced"
                )));
            }
            if self.cancellations.take(activation_id) {
                return Err(Error::Cancelled(format!("activation {activation_id}")));
            }

            {
                let mut guard = self.child.lock().await;
                match guard.as_mut() {
                    None => {
                        return Err(Error::SubprocessExited(
                            "engine handle cleared during activation".into(),
                        ))
                    }
                    Some(child) => {
                        if let Ok(Some(status)) = child.try_wait() {
                            *guard = None;
                            return Err(Error::SubprocessExited(format!(
                                "engine exited with {status}"
                            )));
                        }
                    }
                }
            }

            let debug_msg = match probe.served_models().await {
                Ok(models) if !models.is_empty() => return Ok(()),
                Ok(_) => {
                    consecutive_failures += 1;
                    "engine is up but serves no models yet".to_owned()
                }
                Err(e) => {
                    consecutive_failures += 1;
                    format!("readiness probe failed: {e}")
                }
            };

            let elapsed = started.elapsed();
            if elapsed > Duration::from_secs(cfg.hard_cap_secs) {
                return Err(Error::Timeout(format!(
                    "readiness not reached within {}s",
                    cfg.hard_cap_secs
                )));
            }
            if is_stuck(&cfg, elapsed, consecutive_failures) {
                return Err(Error::Stuck(format!(
                    "engine made no progress after {}s and {consecutive_failures} failed probes",
                    elapsed.as_secs()
                )));
            }

            self.bus.publish_activation(ActivationEvent::debug_now(
                activation_id.to_owned(),
                DebugLevel::Info,
                debug_msg,
            ));
            tokio::time::sleep(Duration::from_secs(cfg.poll_interval_secs)).await;
        }
    }

    /// After a successful activation, watch for an unexpected subprocess
    /// exit. The exit path never re-enters HTTP: it clears the database
    /// flag and publishes on the bus, nothing else.
    fn spawn_exit_monitor(self: &Arc<Self>, model_id: u64) {
        let mgr = self.clone();
        let owning_activation = self.state.lock().activation_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                // A newer activation owns the handle now; stand down.
                if mgr.state.lock().activation_id != owning_activation {
                    return;
                }
                let mut guard = mgr.child.lock().await;
                match guard.as_mut() {
                    None => return, // deactivated through the front door
                    Some(child) => match child.try_wait() {
                        Ok(Some(status)) => {
                            *guard = None;
                            drop(guard);
                            tracing::warn!(model_id, %status, "engine exited unexpectedly");
                            mgr.registry.clear_model_active(model_id);
                            {
                                let mut state = mgr.state.lock();
                                *state = ActivationState {
                                    phase: PoolPhase::Failed,
                                    ..ActivationState::default()
                                };
                            }
                            mgr.status_cache.invalidate();
                            mgr.bus
                                .publish(BusEvent::ActiveModelChanged { model_id: None });
                            mgr.bus.publish(BusEvent::WorkerStatusChanged {
                                status: "failed".into(),
                            });
                            return;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "exit monitor wait failed");
                        }
                    },
                }
            }
        });
    }

    // ── Deactivation ─────────────────────────────────────────────────

    /// Stop the current subprocess, if any. Idempotent.
    pub async fn deactivate_current(&self) {
        let _transition = self.transition.lock().await;
        self.deactivate_locked().await;
    }

    async fn deactivate_locked(&self) {
        let taken = self.child.lock().await.take();
        let deactivated = self.state.lock().active_model_id;

        if let Some(mut child) = taken {
            // Ask nicely first.
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
            let grace = Duration::from_secs(self.engine.shutdown_grace_secs);
            tokio::select! {
                exit = child.wait() => {
                    match exit {
                        Ok(status) => tracing::info!(%status, "engine stopped"),
                        Err(e) => tracing::warn!(error = %e, "engine wait failed"),
                    }
                }
                _ = tokio::time::sleep(grace) => {
                    tracing::warn!("engine ignored SIGTERM; killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "engine kill failed");
                    }
                    let _ = child.wait().await;
                }
            }
        }

        if let Some(id) = deactivated {
            self.registry.clear_model_active(id);
        }
        *self.state.lock() = ActivationState::default();
        self.status_cache.invalidate();
        self.bus
            .publish(BusEvent::ActiveModelChanged { model_id: None });
        self.bus.publish(BusEvent::WorkerStatusChanged {
            status: "idle".into(),
        });

        sweep::sweep(&self.engine).await;
    }

    /// Forced cleanup for hang paths. Never fails; every step is
    /// best-effort.
    pub async fn force_cleanup(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "force kill failed");
            }
            let _ = child.wait().await;
        }
        sweep::sweep(&self.engine).await;

        let last = {
            let mut state = self.state.lock();
            let id = state.active_model_id.take();
            *state = ActivationState {
                phase: PoolPhase::Failed,
                ..ActivationState::default()
            };
            id
        };
        if let Some(id) = last {
            self.registry.clear_model_active(id);
        }
        self.status_cache.invalidate();
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Pool status for the admin endpoint, with the cached readiness probe.
    pub async fn pool_status(&self) -> PoolStatus {
        let (active_model_id, phase) = {
            let state = self.state.lock();
            (state.active_model_id, state.phase)
        };
        let is_process_running = self.child.lock().await.is_some();

        let available_models = if phase == PoolPhase::Ready {
            match self.status_cache.get() {
                Some(models) => Some(models),
                None => {
                    let probe = ReadinessProbe::new(
                        self.http.clone(),
                        self.engine.models_url(),
                        Duration::from_secs(3),
                    );
                    match probe.served_models().await {
                        Ok(models) => {
                            self.status_cache.put(models.clone());
                            Some(models)
                        }
                        Err(_) => None,
                    }
                }
            }
        } else {
            None
        };

        PoolStatus {
            active_model_id,
            is_process_running,
            status: phase,
            available_models,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disk helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read `<model_path>/config.json` when the path is a directory, or a
/// sibling `config.json` for single-file checkpoints. Unreadable or
/// malformed configs are treated as absent.
fn load_disk_config(model_path: &Path) -> Option<DiskModelConfig> {
    let candidate = if model_path.is_dir() {
        model_path.join("config.json")
    } else {
        model_path.parent()?.join("config.json")
    };
    let raw = std::fs::read_to_string(candidate).ok()?;
    match serde_json::from_str(&raw) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::warn!(path = %model_path.display(), error = %e, "unreadable config.json");
            None
        }
    }
}

/// Total size of the weight files, for the estimator's fallback path.
fn weights_size_bytes(model_path: &Path) -> Option<u64> {
    if model_path.is_file() {
        return std::fs::metadata(model_path).map(|m| m.len()).ok();
    }
    let entries = std::fs::read_dir(model_path).ok()?;
    let mut total = 0u64;
    for entry in entries.flatten() {
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if matches!(ext, "safetensors" | "bin" | "pt") {
            if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
    }
    (total > 0).then_some(total)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
