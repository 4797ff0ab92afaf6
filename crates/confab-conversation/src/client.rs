//! Wiring between the transport, the KMS client, and the dispatcher.

use std::{future::Future, sync::Arc};

use confab_kms::KmsClient;
use confab_transport::{
    CONVERSATION_ACTIVITY_EVENT, Event, SubscriptionId, TransportClient, TransportError,
};
use serde_json::Value;

use crate::{
    activity::Activity,
    decryptor::ContentDecryptor,
    dispatcher::{ActivityDispatcher, HandlerId},
};

/// Event type carrying KMS responses delivered asynchronously
pub const KMS_MESSAGE_EVENT: &str = "encryption.kms_message";

/// A transport and a KMS client joined into one conversation pipeline.
///
/// Activities arriving on the transport are decrypted with keys from the
/// KMS client and handed to [`ActivityDispatcher`] handlers. KMS responses
/// arriving on the transport are fed back into the KMS client.
#[derive(Debug)]
pub struct ConversationClient {
    transport: TransportClient,
    kms: KmsClient,
    dispatcher: Arc<ActivityDispatcher>,
    subscriptions: Vec<(&'static str, SubscriptionId)>,
}

impl ConversationClient {
    /// Subscribe to activity and KMS events on `transport`.
    pub fn attach(transport: TransportClient, kms: KmsClient) -> Self {
        let decryptor: Arc<dyn ContentDecryptor> = Arc::new(kms.clone());
        let dispatcher = Arc::new(ActivityDispatcher::new(decryptor));

        let activities = transport.on(CONVERSATION_ACTIVITY_EVENT, {
            let dispatcher = Arc::clone(&dispatcher);
            move |event: Arc<Event>| {
                let dispatcher = Arc::clone(&dispatcher);
                async move {
                    if let Err(e) = dispatcher.handle_event_data(&event.data).await {
                        tracing::warn!("Dropping conversation event: {}", e);
                    }
                }
            }
        });

        let kms_messages = transport.on(KMS_MESSAGE_EVENT, {
            let kms = kms.clone();
            move |event: Arc<Event>| {
                let messages = kms_messages_in(&event.data);
                if messages.is_empty() {
                    tracing::debug!("KMS event without messages");
                } else {
                    kms.process_kms_messages(&messages);
                }
                std::future::ready(())
            }
        });

        Self {
            transport,
            kms,
            dispatcher,
            subscriptions: vec![
                (CONVERSATION_ACTIVITY_EVENT, activities),
                (KMS_MESSAGE_EVENT, kms_messages),
            ],
        }
    }

    /// Connect the underlying transport.
    ///
    /// # Errors
    ///
    /// - Any [`TransportError`] from [`TransportClient::connect`]
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect().await
    }

    /// Disconnect the underlying transport.
    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    /// Register an activity handler for `verb` or
    /// [`ANY_VERB`](crate::ANY_VERB).
    pub fn on<F, Fut>(&self, verb: &str, handler: F) -> HandlerId
    where
        F: Fn(Arc<Activity>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dispatcher.on(verb, handler)
    }

    /// Remove an activity handler.
    pub fn off(&self, verb: &str, id: HandlerId) -> bool {
        self.dispatcher.off(verb, id)
    }

    /// The transport.
    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    /// The KMS client.
    pub fn kms(&self) -> &KmsClient {
        &self.kms
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Arc<ActivityDispatcher> {
        &self.dispatcher
    }

    /// Unsubscribe from the transport. Activity handlers stay registered on
    /// the dispatcher.
    pub fn detach(self) -> (TransportClient, KmsClient) {
        for (event_type, id) in &self.subscriptions {
            self.transport.off(event_type, *id);
        }
        (self.transport, self.kms)
    }
}

/// `data.encryption.kmsMessages` of a KMS event.
fn kms_messages_in(data: &Value) -> Vec<String> {
    data.pointer("/encryption/kmsMessages")
        .and_then(Value::as_array)
        .map(|messages| {
            messages.iter().filter_map(Value::as_str).map(str::to_string).collect()
        })
        .unwrap_or_default()
}
