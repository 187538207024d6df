//! Subscribers to the raw framed sentence stream.
//!
//! Delivery iterates a snapshot taken under a short read lock, so listeners
//! may register or unregister (even from inside a callback) while a
//! notification is in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Receives every framed `$`/`!` sentence, trimmed.
pub trait SentenceListener: Send + Sync {
    fn on_sentence(&self, sentence: &str);
}

impl<F> SentenceListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_sentence(&self, sentence: &str) {
        self(sentence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn SentenceListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn SentenceListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false when the id was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn notify(&self, sentence: &str) {
        let snapshot: Vec<Arc<dyn SentenceListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener.on_sentence(sentence);
        }
    }
}
