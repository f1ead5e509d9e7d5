//! Activation event variants.
//!
//! One activation attempt = one `activation_id`, threaded through every
//! event. `Complete` and `Error` are terminal: nothing may be published
//! for an id after either.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugLevel {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "PERF")]
    Perf,
}

/// Coarse phase of an activation, derived from engine log markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStep {
    PlatformDetection,
    LoadingWeights,
    WeightsLoaded,
    EngineInit,
    EngineReady,
    ServerStart,
    RoutesReady,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationEvent {
    Start {
        activation_id: String,
        model_id: u64,
        model_name: String,
    },
    Progress {
        activation_id: String,
        /// Non-decreasing within an activation.
        progress_pct: u8,
        message: String,
        step: ActivationStep,
    },
    Debug {
        activation_id: String,
        level: DebugLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Complete {
        activation_id: String,
        model_id: u64,
        model_name: String,
        progress_pct: u8,
        step: ActivationStep,
    },
    Error {
        activation_id: String,
        error_message: String,
        model_id: Option<u64>,
        model_name: Option<String>,
    },
}

impl ActivationEvent {
    /// A `Complete` event always reports 100% / ready.
    pub fn complete(activation_id: String, model_id: u64, model_name: String) -> Self {
        ActivationEvent::Complete {
            activation_id,
            model_id,
            model_name,
            progress_pct: 100,
            step: ActivationStep::Ready,
        }
    }

    pub fn debug_now(activation_id: String, level: DebugLevel, message: String) -> Self {
        ActivationEvent::Debug {
            activation_id,
            level,
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn activation_id(&self) -> &str {
        match self {
            ActivationEvent::Start { activation_id, .. }
            | ActivationEvent::Progress { activation_id, .. }
            | ActivationEvent::Debug { activation_id, .. }
            | ActivationEvent::Complete { activation_id, .. }
            | ActivationEvent::Error { activation_id, .. } => activation_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActivationEvent::Complete { .. } | ActivationEvent::Error { .. }
        )
    }

    /// Bus channel for this variant (without the activation-id key).
    pub fn channel(&self) -> &'static str {
        match self {
            ActivationEvent::Start { .. } => "activation:start",
            ActivationEvent::Progress { .. } => "activation:progress",
            ActivationEvent::Debug { .. } => "activation:debug",
            ActivationEvent::Complete { .. } => "activation:complete",
            ActivationEvent::Error { .. } => "activation:error",
        }
    }
}
