//! In-process KMS speaking the real wire protocol.

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use confab_crypto::{
    CompactJwe, DecryptionKey, EcSecretKey, Jwk, KeyManagement, RsaPrivateKey,
    agree_session_secret, encrypt_direct, encrypt_ecdh_es,
};
use confab_kms::{
    KmsApi, KmsClient, KmsConfig, KmsError, KmsInfo, PostOutcome,
    wire::{KmsRequest, METHOD_CREATE, METHOD_RETRIEVE},
};
use parking_lot::Mutex;
use rand::{SeedableRng, rngs::StdRng};
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const CLUSTER: &str = "kms://kms.example.com";
pub const USER_ID: &str = "user-1";
pub const CLIENT_ID: &str = "https://devices.example.com/devices/1";

/// How the fake answers `post_messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Responses in the HTTP body
    Sync,
    /// `202`, responses pushed to the outbox
    Async,
}

/// One-shot fault for the next retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// HTTP error status
    Http(u16),
    /// KMS status inside an encrypted response
    Status(u16),
    /// Response encrypted under a key the client does not have
    Garbled,
    /// No response at all
    Drop,
}

pub struct FakeKms {
    rsa: RsaPrivateKey,
    delivery: Mutex<Delivery>,
    content_keys: Mutex<HashMap<String, Jwk>>,
    sessions: Mutex<HashMap<String, [u8; 32]>>,
    latest_session: Mutex<Option<String>>,
    faults: Mutex<VecDeque<Fault>>,
    outbox: mpsc::UnboundedSender<Vec<String>>,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<String>>>>,
    rng: Mutex<StdRng>,
    pub user_id_calls: AtomicUsize,
    pub info_calls: AtomicUsize,
    pub negotiations: AtomicUsize,
    pub retrievals: AtomicUsize,
}

impl FakeKms {
    pub fn new() -> Arc<Self> {
        let mut rng = StdRng::seed_from_u64(0x6b6d73);
        let rsa = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            rsa,
            delivery: Mutex::new(Delivery::Sync),
            content_keys: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            latest_session: Mutex::new(None),
            faults: Mutex::new(VecDeque::new()),
            outbox,
            outbox_rx: Mutex::new(Some(outbox_rx)),
            rng: Mutex::new(rng),
            user_id_calls: AtomicUsize::new(0),
            info_calls: AtomicUsize::new(0),
            negotiations: AtomicUsize::new(0),
            retrievals: AtomicUsize::new(0),
        })
    }

    pub fn set_delivery(&self, delivery: Delivery) {
        *self.delivery.lock() = delivery;
    }

    /// Register a content key and return its URI.
    pub fn add_content_key(&self, name: &str, secret: [u8; 32]) -> String {
        let uri = format!("{CLUSTER}/keys/{name}");
        self.content_keys.lock().insert(uri.clone(), Jwk::symmetric(&secret));
        uri
    }

    pub fn fail_next(&self, faults: impl IntoIterator<Item = Fault>) {
        self.faults.lock().extend(faults);
    }

    pub fn negotiations(&self) -> usize {
        self.negotiations.load(Ordering::SeqCst)
    }

    pub fn retrievals(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }

    /// Forward asynchronously delivered responses into `client`, the way the
    /// event transport would.
    pub fn pump_into(&self, client: &KmsClient) -> tokio::task::JoinHandle<()> {
        let Some(mut outbox) = self.outbox_rx.lock().take() else {
            panic!("outbox already pumped");
        };
        let client = client.clone();
        tokio::spawn(async move {
            while let Some(batch) = outbox.recv().await {
                client.process_kms_messages(&batch);
            }
        })
    }

    /// Unsolicited key notification encrypted under the latest session.
    pub fn key_notification(&self, uri: &str) -> String {
        let jwk = self.content_keys.lock().get(uri).cloned().unwrap();
        let body = json!({"status": 200, "keys": [{"uri": uri, "jwk": jwk}]});
        self.seal_for_latest_session(&body)
    }

    fn seal_for_latest_session(&self, body: &Value) -> String {
        let kid = self.latest_session.lock().clone().unwrap();
        let secret = self.sessions.lock()[&kid];
        encrypt_direct(body.to_string().as_bytes(), &secret, Some(&kid), &mut *self.rng.lock())
            .unwrap()
    }

    fn negotiate(&self, jwe: &CompactJwe) -> Result<String, KmsError> {
        self.negotiations.fetch_add(1, Ordering::SeqCst);
        let payload = jwe.decrypt(DecryptionKey::Rsa(&self.rsa))?;
        let request: KmsRequest = serde_json::from_slice(&payload)?;
        assert_eq!(request.method, METHOD_CREATE);
        assert_eq!(request.uri, format!("{CLUSTER}/ecdhe"));
        assert_eq!(request.client.client_id, CLIENT_ID);
        assert_eq!(request.client.credential.user_id, USER_ID);

        let client_public = request.jwk.unwrap().to_p256()?;
        let mut rng = self.rng.lock();
        let server = EcSecretKey::random(&mut *rng);
        let secret = agree_session_secret(&server, &client_public);

        let kid = format!("{CLUSTER}/ecdhe/{}", self.negotiations());
        self.sessions.lock().insert(kid.clone(), *secret);
        *self.latest_session.lock() = Some(kid.clone());

        let body = json!({
            "status": 201,
            "requestId": request.request_id,
            "key": {"uri": kid, "jwk": Jwk::from_p256(&server.public_key())},
        });
        Ok(encrypt_ecdh_es(body.to_string().as_bytes(), &client_public, &mut *rng)?)
    }

    fn take_http_fault(&self) -> Option<u16> {
        let mut faults = self.faults.lock();
        match faults.front() {
            Some(Fault::Http(status)) => {
                let status = *status;
                faults.pop_front();
                Some(status)
            },
            _ => None,
        }
    }

    fn retrieve(&self, jwe: &CompactJwe) -> Result<Option<String>, KmsError> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        let fault = self.faults.lock().pop_front();

        let Some(kid) = jwe.header().kid.clone() else {
            return Ok(Some(json!({"status": 400, "reason": "missing kid"}).to_string()));
        };
        let Some(secret) = self.sessions.lock().get(&kid).copied() else {
            return Ok(Some(json!({"status": 401, "reason": "unknown session"}).to_string()));
        };

        let payload = jwe.decrypt(DecryptionKey::Symmetric(&secret))?;
        let request: KmsRequest = serde_json::from_slice(&payload)?;
        assert_eq!(request.method, METHOD_RETRIEVE);

        let body = match (&fault, self.content_keys.lock().get(&request.uri)) {
            (Some(Fault::Status(status)), _) => {
                json!({"status": status, "requestId": request.request_id, "reason": "injected"})
            },
            (_, Some(jwk)) => json!({
                "status": 200,
                "requestId": request.request_id,
                "key": {"uri": request.uri, "jwk": jwk, "userId": USER_ID},
            }),
            (_, None) => {
                json!({"status": 404, "requestId": request.request_id, "reason": "no such key"})
            },
        };

        let mut rng = self.rng.lock();
        let sealing_key = match fault {
            Some(Fault::Drop) => return Ok(None),
            Some(Fault::Garbled) => [0xee; 32],
            _ => secret,
        };
        Ok(Some(encrypt_direct(body.to_string().as_bytes(), &sealing_key, Some(&kid), &mut *rng)?))
    }
}

#[async_trait]
impl KmsApi for FakeKms {
    async fn user_id(&self) -> Result<String, KmsError> {
        self.user_id_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(USER_ID.to_string())
    }

    fn bearer(&self) -> String {
        "bearer-token".to_string()
    }

    async fn info(&self, user_id: &str) -> Result<KmsInfo, KmsError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(user_id, USER_ID);
        let jwk = Jwk::from_rsa(&self.rsa.to_public_key()).with_kid("rsa-1");
        Ok(serde_json::from_value(json!({"kmsCluster": CLUSTER, "rsaPublicKey": jwk}))?)
    }

    async fn post_messages(
        &self,
        destination: &str,
        messages: Vec<String>,
    ) -> Result<PostOutcome, KmsError> {
        assert_eq!(destination, CLUSTER);
        // Let concurrent callers pile up behind the first request
        tokio::task::yield_now().await;

        let mut responses = Vec::new();
        for message in &messages {
            let jwe = CompactJwe::parse(message)?;
            let response = match jwe.key_management()? {
                KeyManagement::RsaOaep => Some(self.negotiate(&jwe)?),
                KeyManagement::Direct => {
                    if let Some(status) = self.take_http_fault() {
                        self.retrievals.fetch_add(1, Ordering::SeqCst);
                        return Err(KmsError::Http { status: Some(status), reason: "injected".into() });
                    }
                    self.retrieve(&jwe)?
                },
                KeyManagement::EcdhEs => panic!("clients never send ECDH-ES"),
            };
            responses.extend(response);
        }

        match *self.delivery.lock() {
            Delivery::Sync => Ok(PostOutcome::Sync(responses)),
            Delivery::Async => {
                if !responses.is_empty() {
                    let _ = self.outbox.send(responses);
                }
                Ok(PostOutcome::Accepted)
            },
        }
    }
}

pub fn client(kms: &Arc<FakeKms>) -> KmsClient {
    client_with(kms, KmsConfig::development())
}

pub fn client_with(kms: &Arc<FakeKms>, config: KmsConfig) -> KmsClient {
    KmsClient::new(Arc::clone(kms) as Arc<dyn KmsApi>, CLIENT_ID, config)
}
