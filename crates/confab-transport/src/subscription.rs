//! Event handler registry.
//!
//! Handlers are keyed by event type. Registration returns a
//! [`SubscriptionId`] which is the only way to remove a handler; closures
//! have no usable identity.
//!
//! Dispatch snapshots the matching handlers under a read lock and releases
//! it before spawning, so handlers may register or remove subscriptions
//! (including their own) while running.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::future::BoxFuture;
use parking_lot::RwLock;

use crate::event::{Event, WILDCARD};

/// Boxed asynchronous event handler.
pub type Handler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Token identifying one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Event type to ordered handler list.
#[derive(Default)]
pub struct Subscriptions {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
}

impl Subscriptions {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type, [`WILDCARD`], or an
    /// `activity:<verb>` compound type.
    pub fn on<F, Fut>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler =
            Arc::new(move |event| -> BoxFuture<'static, ()> { Box::pin(handler(event)) });

        self.handlers.write().entry(event_type.to_string()).or_default().push((id, handler));
        id
    }

    /// Remove one handler. Returns false if nothing matched.
    ///
    /// Removing the last handler for a type drops the entry.
    pub fn off(&self, event_type: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(event_type) else {
            return false;
        };

        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;

        if list.is_empty() {
            handlers.remove(event_type);
        }
        removed
    }

    /// Handlers for an event in dispatch order: exact type, then the
    /// compound activity type, then wildcard. Registration order is kept
    /// within each group.
    pub fn matching(&self, event: &Event) -> Vec<Handler> {
        let handlers = self.handlers.read();
        let compound = event.compound_type();

        [Some(event.event_type.as_str()), compound.as_deref(), Some(WILDCARD)]
            .into_iter()
            .flatten()
            .filter_map(|key| handlers.get(key))
            .flat_map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)))
            .collect()
    }

    /// Spawn every matching handler in its own task. Returns how many were
    /// spawned.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, event: Event) -> usize {
        let handlers = self.matching(&event);
        let event = Arc::new(event);

        for handler in &handlers {
            let handler = Arc::clone(handler);
            let event = Arc::clone(&event);
            tokio::spawn(async move { handler(event).await });
        }

        handlers.len()
    }

    /// Handlers registered for exactly this type.
    pub fn count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Number of event types with at least one handler.
    pub fn type_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let mut types: Vec<(&String, usize)> =
            handlers.iter().map(|(key, list)| (key, list.len())).collect();
        types.sort();
        f.debug_struct("Subscriptions").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::event::CONVERSATION_ACTIVITY_EVENT;

    fn activity(verb: &str) -> Event {
        Event::new(
            CONVERSATION_ACTIVITY_EVENT,
            json!({"eventType": CONVERSATION_ACTIVITY_EVENT, "activity": {"verb": verb}}),
        )
    }

    fn recorder(
        tx: &mpsc::UnboundedSender<&'static str>,
        name: &'static str,
    ) -> impl Fn(Arc<Event>) -> futures_util::future::Ready<()> + Send + Sync + 'static {
        let tx = tx.clone();
        move |_| {
            let _ = tx.send(name);
            futures_util::future::ready(())
        }
    }

    #[test]
    fn off_removes_only_matching_handler() {
        let subs = Subscriptions::new();
        let a = subs.on("x", |_| async {});
        let b = subs.on("x", |_| async {});

        assert!(subs.off("x", a));
        assert_eq!(subs.count("x"), 1);
        assert!(!subs.off("x", a), "second removal is a no-op");
        assert!(!subs.off("y", b), "wrong type is a no-op");
        assert_eq!(subs.count("x"), 1);
    }

    #[test]
    fn last_removal_prunes_entry() {
        let subs = Subscriptions::new();
        let id = subs.on("x", |_| async {});
        assert_eq!(subs.type_count(), 1);

        subs.off("x", id);
        assert_eq!(subs.type_count(), 0);
    }

    #[test]
    fn matching_order_is_exact_then_compound_then_wildcard() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subs = Subscriptions::new();
        subs.on(WILDCARD, recorder(&tx, "wildcard"));
        subs.on("activity:post", recorder(&tx, "verb"));
        subs.on(CONVERSATION_ACTIVITY_EVENT, recorder(&tx, "exact-1"));
        subs.on(CONVERSATION_ACTIVITY_EVENT, recorder(&tx, "exact-2"));
        subs.on("activity:share", recorder(&tx, "other-verb"));

        let event = Arc::new(activity("post"));
        for handler in subs.matching(&event) {
            drop(handler(Arc::clone(&event)));
        }

        let mut seen = Vec::new();
        while let Ok(name) = rx.try_recv() {
            seen.push(name);
        }
        assert_eq!(seen, vec!["exact-1", "exact-2", "verb", "wildcard"]);
    }

    #[tokio::test]
    async fn dispatch_runs_every_match() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subs = Subscriptions::new();
        subs.on(WILDCARD, recorder(&tx, "wildcard"));
        subs.on("activity:post", recorder(&tx, "verb"));

        assert_eq!(subs.dispatch(activity("post")), 2);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let name = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
            seen.push(name.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, vec!["verb", "wildcard"]);
    }

    #[tokio::test]
    async fn handler_may_unsubscribe_itself() {
        let subs = Arc::new(Subscriptions::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id_slot = Arc::new(parking_lot::Mutex::new(None));
        let id = {
            let subs = Arc::clone(&subs);
            let id_slot = Arc::clone(&id_slot);
            subs.clone().on("x", move |_| {
                let subs = Arc::clone(&subs);
                let id_slot = Arc::clone(&id_slot);
                let tx = tx.clone();
                async move {
                    if let Some(id) = *id_slot.lock() {
                        subs.off("x", id);
                    }
                    let _ = tx.send(());
                }
            })
        };
        *id_slot.lock() = Some(id);

        subs.dispatch(Event::new("x", json!({})));
        tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(subs.count("x"), 0);
    }
}
