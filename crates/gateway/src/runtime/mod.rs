//! Runtime supervision: the lifecycle manager and its supporting pieces.

pub mod cancel;
pub mod lifecycle;
pub mod logparse;
pub mod readiness;
pub mod snapshot;
pub mod sweep;

pub use cancel::CancellationRegistry;
pub use lifecycle::{ActivationState, LifecycleManager, PoolPhase, PoolStatus};
