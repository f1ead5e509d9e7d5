//! Topic-keyed pub/sub with per-subscription bounded buffers.
//!
//! Topics are `<channel>` or `<channel>:<key>` strings. A subscription
//! pattern is either an exact topic or a prefix ending in `*`
//! (`activation:progress:*`). Publishing is a synchronous enqueue; slow
//! subscribers lose their oldest non-terminal events, never terminals.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

use crate::activation::ActivationEvent;

/// Per-subscription buffer capacity.
pub const SUBSCRIPTION_BUFFER: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything that can travel over the bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BusEvent {
    Activation(ActivationEvent),
    /// The locally-served model changed (or was cleared).
    ActiveModelChanged { model_id: Option<u64> },
    /// The inference worker's coarse status changed.
    WorkerStatusChanged { status: String },
    /// Download progress from the weights fetcher.
    DownloadActivity { download_id: String, message: String },
}

impl BusEvent {
    /// The topic this event is published under.
    pub fn topic(&self) -> String {
        match self {
            BusEvent::Activation(ev) => format!("{}:{}", ev.channel(), ev.activation_id()),
            BusEvent::ActiveModelChanged { .. } => "active-model-changed".into(),
            BusEvent::WorkerStatusChanged { .. } => "worker-status-changed".into(),
            BusEvent::DownloadActivity { download_id, .. } => {
                format!("download-activity:{download_id}")
            }
        }
    }

    /// Terminal events survive buffer overflow.
    pub fn is_terminal(&self) -> bool {
        match self {
            BusEvent::Activation(ev) => ev.is_terminal(),
            _ => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SubState {
    id: u64,
    pattern: String,
    queue: Mutex<VecDeque<BusEvent>>,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl SubState {
    fn matches(&self, topic: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => topic.starts_with(prefix),
            None => self.pattern == topic,
        }
    }

    /// Enqueue, applying the overflow policy.
    fn push(&self, event: BusEvent) {
        let mut queue = self.queue.lock();
        if queue.len() >= SUBSCRIPTION_BUFFER {
            // Evict the oldest non-terminal entry. If the buffer is all
            // terminals (pathological), grow past the cap instead.
            if let Some(idx) = queue.iter().position(|e| !e.is_terminal()) {
                queue.remove(idx);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }
}

/// A live subscription: an async stream of matching events.
///
/// Dropping the subscription cancels it; buffered events are discarded.
pub struct Subscription {
    state: Arc<SubState>,
    registry: Arc<Mutex<Vec<Arc<SubState>>>>,
}

impl Subscription {
    /// Receive the next event. Returns `None` once the subscription is
    /// cancelled and its buffer is empty.
    pub async fn recv(&self) -> Option<BusEvent> {
        loop {
            // Arm the notification before checking the queue so a publish
            // between the check and the await cannot be lost.
            let notified = self.state.notify.notified();
            if let Some(event) = self.state.queue.lock().pop_front() {
                return Some(event);
            }
            if self.state.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Non-blocking receive, used by tests and the WS drain loop.
    pub fn try_recv(&self) -> Option<BusEvent> {
        self.state.queue.lock().pop_front()
    }

    /// Number of events this subscription lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Cancel the subscription and discard anything buffered.
    pub fn cancel(&self) {
        self.state.closed.store(true, Ordering::Release);
        self.state.queue.lock().clear();
        self.state.notify.notify_waiters();
        // Also store a permit for a receiver that has not yet parked.
        self.state.notify.notify_one();
        self.registry.lock().retain(|s| s.id != self.state.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide pub/sub broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventBus {
    subs: Arc<Mutex<Vec<Arc<SubState>>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subs: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to an exact topic or a trailing-`*` prefix pattern.
    pub fn subscribe(&self, pattern: &str) -> Subscription {
        let state = Arc::new(SubState {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            pattern: pattern.to_owned(),
            queue: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        });
        self.subs.lock().push(state.clone());
        Subscription {
            state,
            registry: self.subs.clone(),
        }
    }

    /// Publish an event to every matching subscription.
    ///
    /// Never fails observably; a poisoned subscriber cannot affect the
    /// publisher or its siblings.
    pub fn publish(&self, event: BusEvent) {
        let topic = event.topic();
        let targets: Vec<Arc<SubState>> = {
            let subs = self.subs.lock();
            subs.iter()
                .filter(|s| !s.closed.load(Ordering::Acquire) && s.matches(&topic))
                .cloned()
                .collect()
        };
        for sub in targets {
            sub.push(event.clone());
        }
    }

    /// Convenience wrapper for the dominant event kind.
    pub fn publish_activation(&self, event: ActivationEvent) {
        self.publish(BusEvent::Activation(event));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.lock().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
