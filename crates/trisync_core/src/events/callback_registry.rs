//! Subscribers to committed Doc mutations.
//!
//! A subscriber sees every event of a commit, in commit order, before the
//! next commit is delivered. It may be scoped to a folder: a [`DocEvent`]
//! matches when the Doc sits at or under that folder, before or after a move.
//! A subscriber that panics is logged and dropped; the rest of the commit
//! still reaches the others.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::error;

use super::domain::DocEvent;
use crate::path_utils;

/// Handle returned by [`EventRegistry::subscribe`].
pub type SubscriptionId = u64;

/// Callbacks run on the merging thread and should not block for extended periods.
pub type EventCallback = Arc<dyn Fn(&DocEvent) + Send + Sync>;

struct Subscription {
    scope: Option<String>,
    callback: EventCallback,
}

impl Subscription {
    fn wants(&self, event: &DocEvent) -> bool {
        let Some(scope) = self.scope.as_deref() else {
            return true;
        };
        let under = |path: &str| path == scope || path_utils::is_descendant(path, scope);
        match event {
            DocEvent::Moved { from, .. } => under(event.path()) || under(from),
            _ => under(event.path()),
        }
    }
}

/// Thread-safe registry of domain event subscribers.
///
/// # Example
///
/// ```ignore
/// use trisync_core::events::EventRegistry;
/// use std::sync::Arc;
///
/// let registry = EventRegistry::new();
///
/// let id = registry.subscribe_under("notes", Arc::new(|event| {
///     log::info!("{} {}", event.event_type(), event.path());
/// }));
///
/// registry.unsubscribe(id);
/// ```
pub struct EventRegistry {
    subscriptions: RwLock<BTreeMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Receive every event.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        self.insert(None, callback)
    }

    /// Receive only events touching `folder` or anything below it.
    pub fn subscribe_under(&self, folder: &str, callback: EventCallback) -> SubscriptionId {
        self.insert(Some(folder.trim_matches('/').to_string()), callback)
    }

    fn insert(&self, scope: Option<String>, callback: EventCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Subscription { scope, callback });
        id
    }

    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    /// Deliver one event.
    pub fn emit(&self, event: &DocEvent) {
        self.emit_all(std::slice::from_ref(event));
    }

    /// Deliver the events of one commit. Subscribers are called in
    /// subscription order, each with the whole commit before the next.
    pub fn emit_all(&self, events: &[DocEvent]) {
        if events.is_empty() {
            return;
        }
        let mut panicked = Vec::new();
        {
            let subscriptions = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
            for (id, subscription) in subscriptions.iter() {
                let delivered = catch_unwind(AssertUnwindSafe(|| {
                    for event in events.iter().filter(|e| subscription.wants(e)) {
                        (subscription.callback)(event);
                    }
                }));
                if delivered.is_err() {
                    panicked.push(*id);
                }
            }
        }
        for id in panicked {
            error!("Event subscriber {} panicked, unsubscribing it", id);
            self.unsubscribe(id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("subscriber_count", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
