//! Key exchange engine.
//!
//! # Resolution
//!
//! ```text
//! get_key(uri) ──► validate ──► cache hit? ──yes──► key
//!                                  │ no
//!                                  ▼
//!                       singleflight(uri) ──► ensure_session ──► retrieve
//!                                                   │                │
//!                              RSA-OAEP / ECDH-ES ◄─┘                ▼
//!                              negotiation (once)        "dir" JWE ──► KMS
//!                                                                     │
//!                    200: body ◄──────────────────────────────────────┤
//!                    202: process_kms_messages ◄── event transport ◄──┘
//! ```
//!
//! Responses arrive either in the HTTP body or, when the KMS answers
//! `202 Accepted`, as events on the transport. Both paths decode messages the
//! same way and are correlated by request id.
//!
//! A failed retrieval is retried once. Auth failures and undecryptable
//! responses drop the session first; anything else retries on the same
//! session.

use std::{fmt, sync::Arc};

use confab_crypto::{
    CompactJwe, DecryptionKey, EcSecretKey, Jwk, KeyManagement, agree_session_secret,
    encrypt_direct, encrypt_rsa_oaep, jws,
};
use rand::rngs::OsRng;
use tokio::sync::OnceCell;

use crate::{
    api::{KmsApi, PostOutcome},
    cache::KeyCache,
    config::KmsConfig,
    error::{KmsError, RetryClass},
    pending::PendingRequests,
    session::{Acquired, KmsSession, SessionSlot},
    singleflight::Singleflight,
    uri::KeyUri,
    wire::{ClientInfo, Credential, Key, KmsRequest, KmsResponse},
};

/// Client for the key management service.
///
/// Cheap to clone; clones share the session, the key cache, and in-flight
/// requests.
#[derive(Clone)]
pub struct KmsClient {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn KmsApi>,
    config: KmsConfig,
    client_id: String,
    user_id: OnceCell<String>,
    session: SessionSlot,
    pending: PendingRequests,
    cache: KeyCache,
    flights: Singleflight<Result<Key, KmsError>>,
}

impl fmt::Debug for KmsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsClient")
            .field("client_id", &self.inner.client_id)
            .field("session", &self.inner.session.current())
            .field("cached_keys", &self.inner.cache.len())
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl KmsClient {
    /// Client identified to the KMS as `client_id` (the registered device
    /// URL).
    pub fn new(api: Arc<dyn KmsApi>, client_id: impl Into<String>, config: KmsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                client_id: client_id.into(),
                user_id: OnceCell::new(),
                session: SessionSlot::new(),
                pending: PendingRequests::default(),
                cache: KeyCache::new(),
                flights: Singleflight::new(),
            }),
        }
    }

    /// Resolve the key for `uri`.
    ///
    /// Concurrent calls for the same URI share one network resolution and
    /// receive the same result.
    ///
    /// # Errors
    ///
    /// - `InvalidUri` before any I/O if `uri` is malformed
    /// - Any negotiation or retrieval error that survived the single retry
    pub async fn get_key(&self, uri: &str) -> Result<Key, KmsError> {
        let uri = KeyUri::parse(uri)?;
        if let Some(key) = self.inner.cache.get(uri.as_str()) {
            return Ok(key);
        }

        let inner = Arc::clone(&self.inner);
        let flight = uri.as_str().to_string();
        self.inner.flights.run(&flight, move || async move { inner.resolve(&uri).await }).await
    }

    /// Decode KMS messages that arrived over the event transport.
    ///
    /// Responses to pending requests are delivered to their waiters; any
    /// other key material is cached. Undecodable messages are logged and
    /// dropped.
    pub fn process_kms_messages(&self, messages: &[String]) {
        let session = self.inner.session.current();
        let ephemeral = self.inner.pending.ephemeral_keys();

        for message in messages {
            match decode_message(message, session.as_deref(), &ephemeral) {
                Ok(response) => self.inner.route(response),
                Err(e) => tracing::warn!("Dropping undecodable KMS message: {}", e),
            }
        }
    }

    /// Insert a key into the cache. `None` and keys without a URI are
    /// ignored.
    pub fn cache_key(&self, key: Option<Key>) {
        self.inner.cache.cache_key(key);
    }

    /// Resolved keys.
    pub fn cache(&self) -> &KeyCache {
        &self.inner.cache
    }

    /// Current session, if one is negotiated and fresh.
    pub fn session(&self) -> Option<Arc<KmsSession>> {
        self.inner.session.current()
    }

    /// Drop the current session; the next request renegotiates.
    pub fn invalidate_session(&self) {
        if let Some(session) = self.inner.session.current() {
            self.inner.session.invalidate(&session);
        }
    }

    /// Negotiate a session now if there is no fresh one.
    ///
    /// # Errors
    ///
    /// - Identity, info, transport, or crypto errors from negotiation
    pub async fn ensure_session(&self) -> Result<Arc<KmsSession>, KmsError> {
        self.inner.ensure_session().await
    }
}

impl Inner {
    async fn resolve(&self, uri: &KeyUri) -> Result<Key, KmsError> {
        // A flight for this URI may have completed between the caller's cache
        // check and this one starting.
        if let Some(key) = self.cache.get(uri.as_str()) {
            return Ok(key);
        }

        let (error, session) = match self.attempt(uri, None).await {
            Ok(key) => return Ok(key),
            Err(failure) => failure,
        };

        let retry_session = match error.retry_class() {
            RetryClass::SessionInvalid => {
                tracing::info!("Renegotiating KMS session after {}", error);
                if let Some(session) = &session {
                    self.session.invalidate(session);
                }
                None
            },
            RetryClass::Transient => {
                tracing::debug!("Retrying {} after {}", uri, error);
                session
            },
        };

        self.attempt(uri, retry_session).await.map_err(|(e, _)| {
            tracing::warn!("Key retrieval for {} failed: {}", uri, e);
            e
        })
    }

    /// One retrieval. On failure, also returns the session it ran on.
    async fn attempt(
        &self,
        uri: &KeyUri,
        session: Option<Arc<KmsSession>>,
    ) -> Result<Key, (KmsError, Option<Arc<KmsSession>>)> {
        let session = match session {
            Some(session) => session,
            None => self.ensure_session().await.map_err(|e| (e, None))?,
        };
        let result = self.retrieve(&session, uri).await;
        result.map_err(|e| (e, Some(session)))
    }

    async fn retrieve(&self, session: &KmsSession, uri: &KeyUri) -> Result<Key, KmsError> {
        let request = KmsRequest::retrieve(self.client_info().await?, uri.as_str());
        let payload = serde_json::to_vec(&request)?;
        let message =
            encrypt_direct(&payload, session.secret(), Some(session.key_uri()), &mut OsRng)?;

        let response = self
            .exchange(session.cluster(), &request.request_id, message, Some(session), None)
            .await?
            .into_result()?;

        let key = response
            .into_keys()
            .into_iter()
            .find(|key| key.uri == uri.as_str())
            .ok_or_else(|| KmsError::KeyNotFound { uri: uri.to_string() })?;

        self.cache.cache_key(Some(key.clone()));
        Ok(key)
    }

    async fn ensure_session(&self) -> Result<Arc<KmsSession>, KmsError> {
        match self.session.acquire().await {
            Acquired::Ready(session) => Ok(session),
            Acquired::Negotiate(guard) => {
                let session = Arc::new(self.negotiate().await?);
                tracing::info!("Negotiated KMS session {}", session.key_uri());
                guard.complete(Arc::clone(&session));
                Ok(session)
            },
        }
    }

    /// ECDHE handshake with the KMS.
    async fn negotiate(&self) -> Result<KmsSession, KmsError> {
        let client = self.client_info().await?;
        let info = self.api.info(&client.credential.user_id).await?;
        let kms_rsa = info.rsa_public_key.to_rsa()?;

        let ephemeral = Arc::new(EcSecretKey::random(&mut OsRng));
        let request = KmsRequest::create_ecdhe(
            client,
            &info.kms_cluster,
            Jwk::from_p256(&ephemeral.public_key()),
        );
        let payload = serde_json::to_vec(&request)?;
        let message = encrypt_rsa_oaep(
            &payload,
            &kms_rsa,
            info.rsa_public_key.kid.as_deref(),
            &mut OsRng,
        )?;

        let response = self
            .exchange(
                &info.kms_cluster,
                &request.request_id,
                message,
                None,
                Some(Arc::clone(&ephemeral)),
            )
            .await?
            .into_result()?;

        let (key_uri, kms_jwk) = session_key(response)?;
        let kms_public = kms_jwk.to_p256()?;
        let secret = agree_session_secret(&ephemeral, &kms_public);

        Ok(KmsSession::new(key_uri, info.kms_cluster, secret, self.config.session_ttl))
    }

    /// Send one message and wait for its response, whichever way it
    /// arrives.
    async fn exchange(
        &self,
        destination: &str,
        request_id: &str,
        message: String,
        session: Option<&KmsSession>,
        ephemeral: Option<Arc<EcSecretKey>>,
    ) -> Result<KmsResponse, KmsError> {
        // Registered before sending so an early async delivery finds it
        let mut pending = self.pending.register(request_id, ephemeral.clone());

        match self.api.post_messages(destination, vec![message]).await? {
            PostOutcome::Sync(messages) => {
                let ephemeral: Vec<_> = ephemeral.into_iter().collect();
                let mut last_error = None;
                for message in &messages {
                    match decode_message(message, session, &ephemeral) {
                        Ok(response) if answers(&response, request_id) => return Ok(response),
                        Ok(response) => self.route(response),
                        Err(e) => last_error = Some(e),
                    }
                }
                Err(last_error.unwrap_or_else(|| KmsError::MalformedResponse {
                    reason: format!("no response to {request_id} in body"),
                }))
            },
            PostOutcome::Accepted => {
                match tokio::time::timeout(self.config.response_timeout, pending.response()).await
                {
                    Ok(Some(response)) => Ok(response),
                    Ok(None) => Err(KmsError::Internal {
                        reason: format!("delivery channel for {request_id} closed"),
                    }),
                    Err(_) => Err(KmsError::Timeout { request_id: request_id.to_string() }),
                }
            },
        }
    }

    fn route(&self, response: KmsResponse) {
        let Err(response) = self.pending.deliver(response) else {
            return;
        };
        if !response.is_success() {
            tracing::debug!(
                "Ignoring unsolicited KMS failure {:?}: {}",
                response.status,
                response.reason.as_deref().unwrap_or_default()
            );
            return;
        }
        for key in response.into_keys() {
            tracing::debug!("Caching unsolicited key {}", key.uri);
            self.cache.cache_key(Some(key));
        }
    }

    async fn client_info(&self) -> Result<ClientInfo, KmsError> {
        let user_id = self.user_id.get_or_try_init(|| self.api.user_id()).await?.clone();
        Ok(ClientInfo {
            client_id: self.client_id.clone(),
            credential: Credential { user_id, bearer: self.api.bearer() },
        })
    }
}

fn answers(response: &KmsResponse, request_id: &str) -> bool {
    response.request_id.as_deref().is_none_or(|id| id == request_id)
}

/// Session key URI and KMS public key from a negotiation response.
fn session_key(response: KmsResponse) -> Result<(String, Jwk), KmsError> {
    let missing = |what: &str| KmsError::MalformedResponse {
        reason: format!("session response has no {what}"),
    };

    let key = response.key.ok_or_else(|| missing("key"))?;
    let jwk = key.jwk.or(response.jwk).ok_or_else(|| missing("public key"))?;
    if key.uri.is_empty() {
        return Err(missing("key uri"));
    }
    Ok((key.uri, jwk))
}

/// Decode one KMS message.
///
/// Tried in order: signed payload, JWE under the session secret, JWE under
/// each pending ephemeral key, bare JSON. A JWE that no key opens reports
/// its crypto error.
fn decode_message(
    message: &str,
    session: Option<&KmsSession>,
    ephemeral: &[Arc<EcSecretKey>],
) -> Result<KmsResponse, KmsError> {
    if jws::is_compact_jws(message) {
        if let Ok(payload) = jws::extract_payload(message) {
            return KmsResponse::from_slice(&payload);
        }
    }

    let mut crypto_error = None;

    if let Ok(jwe) = CompactJwe::parse(message) {
        match jwe.key_management() {
            Ok(KeyManagement::Direct) => {
                if let Some(session) = session {
                    match jwe.decrypt(DecryptionKey::Symmetric(session.secret())) {
                        Ok(payload) => return KmsResponse::from_slice(&payload),
                        Err(e) => crypto_error = Some(e),
                    }
                }
            },
            Ok(KeyManagement::EcdhEs) => {
                for key in ephemeral {
                    match jwe.decrypt(DecryptionKey::Ec(key)) {
                        Ok(payload) => return KmsResponse::from_slice(&payload),
                        Err(e) => crypto_error = Some(e),
                    }
                }
            },
            Ok(KeyManagement::RsaOaep) => {},
            Err(e) => crypto_error = Some(e),
        }
    }

    KmsResponse::from_slice(message.as_bytes())
        .map_err(|json_error| crypto_error.map_or(json_error, KmsError::Crypto))
}
