//! Activities flowing from an in-memory socket through decryption to
//! handlers.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use confab_conversation::{ANY_VERB, Activity, ConversationClient, KMS_MESSAGE_EVENT};
use confab_crypto::Jwk;
use confab_kms::{
    Key, KmsApi, KmsClient, KmsConfig, KmsError, KmsInfo, PostOutcome, encrypt_with_key,
};
use confab_transport::{
    CONVERSATION_ACTIVITY_EVENT, Connector, MemoryConnector, MemoryPeer, TransportClient,
    TransportConfig,
};
use serde_json::json;
use tokio::{sync::mpsc, time::timeout};

const KEY_URI: &str = "kms://kms.example.com/keys/conversation";

/// KMS that is never reachable; keys must already be cached.
struct OfflineKms;

#[async_trait]
impl KmsApi for OfflineKms {
    async fn user_id(&self) -> Result<String, KmsError> {
        Err(KmsError::Http { status: None, reason: "offline".into() })
    }

    fn bearer(&self) -> String {
        String::new()
    }

    async fn info(&self, _user_id: &str) -> Result<KmsInfo, KmsError> {
        Err(KmsError::Http { status: None, reason: "offline".into() })
    }

    async fn post_messages(
        &self,
        _destination: &str,
        _messages: Vec<String>,
    ) -> Result<PostOutcome, KmsError> {
        Err(KmsError::Http { status: None, reason: "offline".into() })
    }
}

fn content_key() -> Key {
    Key::new(KEY_URI, Jwk::symmetric(&[42; 32]))
}

async fn connected() -> (ConversationClient, MemoryPeer, mpsc::UnboundedReceiver<Arc<Activity>>) {
    let connector = Arc::new(MemoryConnector::new());
    let transport = TransportClient::new(
        TransportConfig::development(),
        "token",
        Arc::clone(&connector) as Arc<dyn Connector>,
        None,
    );
    transport.set_custom_url(Some("memory://events".to_string()));
    let kms = KmsClient::new(Arc::new(OfflineKms), "device-1", KmsConfig::development());

    let conversation = ConversationClient::attach(transport, kms);
    let (tx, rx) = mpsc::unbounded_channel();
    conversation.on(ANY_VERB, move |activity| {
        let _ = tx.send(activity);
        async {}
    });

    conversation.connect().await.unwrap();
    let peer = connector.next_peer().await.unwrap();
    (conversation, peer, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Arc<Activity>>) -> Arc<Activity> {
    timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
}

fn activity_event(verb: &str, object: serde_json::Value) -> serde_json::Value {
    json!({
        "eventType": CONVERSATION_ACTIVITY_EVENT,
        "activity": {
            "id": format!("{verb}-1"),
            "verb": verb,
            "actor": {"id": "user-2", "displayName": "Grace"},
            "target": {"id": "conv-1", "encryptionKeyUrl": KEY_URI},
            "object": object,
        }
    })
}

#[tokio::test]
async fn shared_content_arrives_decrypted() {
    let (conversation, peer, mut rx) = connected().await;
    conversation.kms().cache_key(Some(content_key()));

    let display_name = encrypt_with_key(&content_key(), "quarterly report").unwrap();
    let content = encrypt_with_key(&content_key(), "<p>see attached</p>").unwrap();
    peer.send_event(activity_event(
        "share",
        json!({"objectType": "content", "displayName": display_name, "content": content}),
    ))
    .await;

    let activity = next(&mut rx).await;
    let decrypted = activity.decrypted.as_ref().unwrap();
    assert_eq!(decrypted.display_name.as_deref(), Some("quarterly report"));
    assert_eq!(decrypted.content.as_deref(), Some("<p>see attached</p>"));
    assert_eq!(activity.text(), Some("quarterly report"));
    assert_eq!(activity.actor.id, "user-2");
}

#[tokio::test]
async fn unresolvable_key_keeps_ciphertext() {
    let (_conversation, peer, mut rx) = connected().await;

    let display_name = encrypt_with_key(&content_key(), "hello").unwrap();
    peer.send_event(activity_event("post", json!({"displayName": display_name.clone()}))).await;

    let activity = next(&mut rx).await;
    assert!(activity.decrypted.is_none());
    assert_eq!(activity.object.display_name.as_deref(), Some(display_name.as_str()));
}

#[tokio::test]
async fn acknowledge_surfaces_object_id() {
    let (_conversation, peer, mut rx) = connected().await;

    peer.send_event(activity_event("acknowledge", json!({"id": "post-1", "objectType": "activity"})))
        .await;

    let activity = next(&mut rx).await;
    assert_eq!(activity.acknowledged_id(), Some("post-1"));
    assert!(activity.decrypted.is_none());
}

#[tokio::test]
async fn kms_events_populate_the_key_cache() {
    let (conversation, peer, mut rx) = connected().await;

    let pushed = json!({"keys": [{"uri": KEY_URI, "jwk": Jwk::symmetric(&[42; 32])}]});
    peer.send_event(json!({
        "eventType": KMS_MESSAGE_EVENT,
        "encryption": {"kmsMessages": [pushed.to_string()]},
    }))
    .await;

    for _ in 0..100 {
        if conversation.kms().cache().get(KEY_URI).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let display_name = encrypt_with_key(&content_key(), "now readable").unwrap();
    peer.send_event(activity_event("post", json!({"displayName": display_name}))).await;

    let activity = next(&mut rx).await;
    assert_eq!(activity.text(), Some("now readable"));
}

#[tokio::test]
async fn detached_client_stops_receiving() {
    let (conversation, peer, mut rx) = connected().await;
    let (transport, _kms) = conversation.detach();
    assert_eq!(transport.subscriber_count(CONVERSATION_ACTIVITY_EVENT), 0);

    peer.send_event(activity_event("post", json!({"displayName": "plain"}))).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}
