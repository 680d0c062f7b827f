//! Topic listeners owned by controllers.
//!
//! Actions publish domain events (`user.created`, ...) through the
//! messenger of the controller that produced them. The router never sees
//! these events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

/// A topic listener.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

struct Entry {
    listener: Listener,
    once: bool,
}

/// Topic-keyed listeners. Clones share the same listener table.
///
/// # Examples
///
/// ```
/// use blueprint::Messenger;
/// use serde_json::json;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let messenger = Messenger::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = seen.clone();
/// messenger.once("user.created", move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// messenger.emit("user.created", &json!({"id": 1}));
/// messenger.emit("user.created", &json!({"id": 2}));
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone, Default)]
pub struct Messenger {
    topics: Arc<Mutex<HashMap<String, Vec<Entry>>>>,
}

impl Messenger {
    /// Creates a messenger without listeners.
    pub fn new() -> Self {
        Self::default()
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        // Listeners run outside the lock, so a poisoned table is still consistent.
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls `listener` for every event on `topic`.
    pub fn on<F>(&self, topic: &str, listener: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add(topic, Arc::new(listener), false);
    }

    /// Calls `listener` for the next event on `topic` only.
    pub fn once<F>(&self, topic: &str, listener: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add(topic, Arc::new(listener), true);
    }

    fn add(&self, topic: &str, listener: Listener, once: bool) {
        self.topics()
            .entry(topic.to_string())
            .or_default()
            .push(Entry { listener, once });
    }

    /// Publishes `payload` on `topic` and returns how many listeners ran.
    pub fn emit(&self, topic: &str, payload: &Value) -> usize {
        let listeners: Vec<Listener> = {
            let mut topics = self.topics();
            let Some(entries) = topics.get_mut(topic) else {
                return 0;
            };
            let listeners = entries.iter().map(|e| e.listener.clone()).collect();
            entries.retain(|e| !e.once);
            listeners
        };

        tracing::trace!(topic, listeners = listeners.len(), "emitting event");
        for listener in &listeners {
            listener(payload);
        }
        listeners.len()
    }

    /// Number of listeners currently registered for `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics().get(topic).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics();
        let mut names: Vec<&String> = topics.keys().collect();
        names.sort();
        f.debug_struct("Messenger").field("topics", &names).finish()
    }
}
