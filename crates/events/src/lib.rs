//! Typed activation events and the process-wide event bus.
//!
//! The bus is the only cross-component notification channel for activation
//! state. Publishers never block on slow subscribers; each subscription
//! holds its own bounded buffer with an overflow policy that protects
//! terminal events.

mod activation;
mod bus;

pub use activation::{ActivationEvent, ActivationStep, DebugLevel};
pub use bus::{BusEvent, EventBus, Subscription, SUBSCRIPTION_BUFFER};
