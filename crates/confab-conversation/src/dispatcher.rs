//! Activity dispatcher.
//!
//! Decodes `conversation.activity` events, decrypts their content, and fans
//! them out to handlers registered per verb or for every verb.
//!
//! ```text
//! Event ──► Activity::from_event_data ──► decrypt (post/share) ──► handlers
//!                                              │ failure
//!                                              └──► raw content kept,
//!                                                   `decrypted` left empty
//! ```

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
use serde_json::Value;

use crate::{
    activity::{Activity, DecryptedObject},
    decryptor::ContentDecryptor,
    error::ConversationError,
};

/// Registration key that matches every verb
pub const ANY_VERB: &str = "*";

/// Boxed asynchronous activity handler.
pub type ActivityHandler = Arc<dyn Fn(Arc<Activity>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Token identifying one registered activity handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Routes decoded activities to handlers.
pub struct ActivityDispatcher {
    decryptor: Arc<dyn ContentDecryptor>,
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(HandlerId, ActivityHandler)>>>,
}

impl fmt::Debug for ActivityDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let mut verbs: Vec<_> = handlers.iter().map(|(verb, list)| (verb, list.len())).collect();
        verbs.sort();
        f.debug_struct("ActivityDispatcher").field("handlers", &verbs).finish_non_exhaustive()
    }
}

impl ActivityDispatcher {
    /// Dispatcher decrypting content through `decryptor`.
    pub fn new(decryptor: Arc<dyn ContentDecryptor>) -> Self {
        Self { decryptor, next_id: AtomicU64::new(0), handlers: RwLock::new(HashMap::new()) }
    }

    /// Register a handler for `verb`, or for every verb with [`ANY_VERB`].
    pub fn on<F, Fut>(&self, verb: &str, handler: F) -> HandlerId
    where
        F: Fn(Arc<Activity>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: ActivityHandler =
            Arc::new(move |activity| -> BoxFuture<'static, ()> { Box::pin(handler(activity)) });

        self.handlers.write().entry(verb.to_string()).or_default().push((id, handler));
        id
    }

    /// Remove one handler. Returns false if nothing matched.
    pub fn off(&self, verb: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(verb) else {
            return false;
        };

        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;

        if list.is_empty() {
            handlers.remove(verb);
        }
        removed
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    /// Decode, decrypt, and dispatch one event payload. Returns the number of
    /// handlers started.
    ///
    /// # Errors
    ///
    /// - `MissingActivity` / `MalformedActivity` if the payload does not
    ///   hold an activity. Decryption failures are not errors.
    pub async fn handle_event_data(&self, data: &Value) -> Result<usize, ConversationError> {
        let activity = Activity::from_event_data(data)?;
        let activity = self.process(activity).await;
        Ok(self.dispatch(Arc::new(activity)))
    }

    /// Decrypt the content of `post` and `share` activities.
    ///
    /// Each field is decrypted on its own. Fields that fail keep their raw
    /// value in `object`; `decrypted` stays `None` only if no field could be
    /// decrypted.
    pub async fn process(&self, mut activity: Activity) -> Activity {
        if !activity.has_content() {
            return activity;
        }
        let Some(key_uri) = activity.key_uri().map(str::to_string) else {
            return activity;
        };

        let object = &activity.object;
        let decrypted = DecryptedObject {
            display_name: self
                .decrypt_field(&key_uri, &activity.id, "displayName", object.display_name.as_deref())
                .await,
            content: self
                .decrypt_field(&key_uri, &activity.id, "content", object.content.as_deref())
                .await,
        };
        if decrypted.display_name.is_some() || decrypted.content.is_some() {
            activity.decrypted = Some(decrypted);
        }
        activity
    }

    async fn decrypt_field(
        &self,
        key_uri: &str,
        activity_id: &str,
        field: &str,
        ciphertext: Option<&str>,
    ) -> Option<String> {
        let ciphertext = ciphertext?;
        match self.decryptor.decrypt(key_uri, ciphertext).await {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                tracing::warn!("Keeping encrypted {} of activity {}: {}", field, activity_id, e);
                None
            },
        }
    }

    /// Start every handler for the activity's verb, then every wildcard
    /// handler, each in its own task. Returns the number started.
    pub fn dispatch(&self, activity: Arc<Activity>) -> usize {
        let matching: Vec<ActivityHandler> = {
            let handlers = self.handlers.read();
            [activity.verb.as_str(), ANY_VERB]
                .into_iter()
                .filter_map(|verb| handlers.get(verb))
                .flatten()
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in &matching {
            tokio::spawn(handler(Arc::clone(&activity)));
        }
        matching.len()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use confab_kms::KmsError;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    /// Reverses the ciphertext; fails on the literal "undecryptable".
    struct Reverse;

    #[async_trait]
    impl ContentDecryptor for Reverse {
        async fn decrypt(&self, _key_uri: &str, ciphertext: &str) -> Result<String, KmsError> {
            if ciphertext == "undecryptable" {
                return Err(KmsError::KeyNotFound { uri: "kms://d/k".into() });
            }
            Ok(ciphertext.chars().rev().collect())
        }
    }

    fn dispatcher() -> ActivityDispatcher {
        ActivityDispatcher::new(Arc::new(Reverse))
    }

    fn activity(verb: &str, display_name: &str) -> Activity {
        Activity {
            id: "a1".into(),
            verb: verb.into(),
            encryption_key_url: Some("kms://d/k".into()),
            object: crate::activity::ActivityObject {
                display_name: Some(display_name.into()),
                content: Some("<p>tnetnoc</p>".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn post_content_is_decrypted() {
        let processed = dispatcher().process(activity("post", "olleh")).await;
        let decrypted = processed.decrypted.unwrap();
        assert_eq!(decrypted.display_name.as_deref(), Some("hello"));
        assert_eq!(decrypted.content.as_deref(), Some(">p/<content>p<"));
    }

    #[tokio::test]
    async fn failure_keeps_raw_content() {
        let mut share = activity("share", "undecryptable");
        share.object.content = Some("undecryptable".into());

        let processed = dispatcher().process(share).await;
        assert!(processed.decrypted.is_none());
        assert_eq!(processed.object.display_name.as_deref(), Some("undecryptable"));
    }

    #[tokio::test]
    async fn content_failure_keeps_decrypted_display_name() {
        let mut post = activity("post", "olleh");
        post.object.content = Some("undecryptable".into());

        let processed = dispatcher().process(post).await;
        let decrypted = processed.decrypted.as_ref().unwrap();
        assert_eq!(decrypted.display_name.as_deref(), Some("hello"));
        assert!(decrypted.content.is_none());
        assert_eq!(processed.object.content.as_deref(), Some("undecryptable"));
        assert_eq!(processed.text(), Some("hello"));
    }

    #[tokio::test]
    async fn other_verbs_and_keyless_activities_untouched() {
        let dispatcher = dispatcher();
        assert!(dispatcher.process(activity("acknowledge", "x")).await.decrypted.is_none());

        let mut keyless = activity("post", "x");
        keyless.encryption_key_url = None;
        assert!(dispatcher.process(keyless).await.decrypted.is_none());
    }

    #[tokio::test]
    async fn dispatch_reaches_verb_and_wildcard_handlers() {
        let dispatcher = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for (verb, name) in [("post", "post"), (ANY_VERB, "any"), ("share", "share")] {
            let tx = tx.clone();
            dispatcher.on(verb, move |activity: Arc<Activity>| {
                let _ = tx.send(format!("{name}:{}", activity.verb));
                async {}
            });
        }

        let data = json!({"activity": {"verb": "post", "object": {"displayName": "olleh"}}});
        assert_eq!(dispatcher.handle_event_data(&data).await.unwrap(), 2);

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort();
        assert_eq!(seen, ["any:post", "post:post"]);
    }

    #[tokio::test]
    async fn off_removes_only_that_handler() {
        let dispatcher = dispatcher();
        let first = dispatcher.on("post", |_| async {});
        let second = dispatcher.on("post", |_| async {});

        assert!(dispatcher.off("post", first));
        assert!(!dispatcher.off("post", first));
        assert_eq!(dispatcher.handler_count(), 1);
        assert!(dispatcher.off("post", second));
        assert_eq!(dispatcher.handler_count(), 0);
    }
}
