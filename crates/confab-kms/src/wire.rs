//! KMS request and response payloads.
//!
//! Requests are serialized to JSON and wrapped in a JWE before they leave the
//! client. Responses arrive as JWE, JWS, or bare JSON and are normalised into
//! [`KmsResponse`].

use std::fmt;

use confab_crypto::Jwk;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::KmsError;

/// Request method that negotiates a session
pub const METHOD_CREATE: &str = "create";

/// Request method that fetches a key
pub const METHOD_RETRIEVE: &str = "retrieve";

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Registered device URL
    pub client_id: String,
    /// Caller credential
    pub credential: Credential,
}

/// Caller credential carried inside every encrypted request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Caller's user id
    pub user_id: String,
    /// Bearer token
    pub bearer: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("bearer", &"<redacted>")
            .finish()
    }
}

/// Request to the KMS, before encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KmsRequest {
    /// Caller
    pub client: ClientInfo,
    /// Correlation id echoed in the response
    pub request_id: String,
    /// [`METHOD_CREATE`] or [`METHOD_RETRIEVE`]
    pub method: String,
    /// Target URI
    pub uri: String,
    /// Our ephemeral public key (session negotiation only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
}

impl KmsRequest {
    /// Session negotiation request carrying our ephemeral public key.
    pub fn create_ecdhe(client: ClientInfo, cluster: &str, ephemeral: Jwk) -> Self {
        Self {
            client,
            request_id: new_request_id(),
            method: METHOD_CREATE.to_string(),
            uri: format!("{cluster}/ecdhe"),
            jwk: Some(ephemeral),
        }
    }

    /// Key retrieval request.
    pub fn retrieve(client: ClientInfo, uri: &str) -> Self {
        Self {
            client,
            request_id: new_request_id(),
            method: METHOD_RETRIEVE.to_string(),
            uri: uri.to_string(),
            jwk: None,
        }
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// A key record as returned by the KMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    /// Key URI
    pub uri: String,
    /// Key material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    /// Owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Creating device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Creation time (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<String>,
    /// Expiry time (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    /// Resource the key is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_uri: Option<String>,
}

impl Key {
    /// Key record with only a URI and material.
    pub fn new(uri: impl Into<String>, jwk: Jwk) -> Self {
        Self {
            uri: uri.into(),
            jwk: Some(jwk),
            user_id: None,
            client_id: None,
            create_date: None,
            expiration_date: None,
            resource_uri: None,
        }
    }

    /// Raw bytes of a symmetric key.
    ///
    /// # Errors
    ///
    /// - `MissingKeyMaterial` if no JWK is attached
    /// - `Crypto(WrongKeyType)` if the JWK is not `oct`
    pub fn symmetric_bytes(&self) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let jwk = self
            .jwk
            .as_ref()
            .ok_or_else(|| KmsError::MissingKeyMaterial { uri: self.uri.clone() })?;
        Ok(jwk.symmetric_bytes()?)
    }
}

/// Decoded KMS response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KmsResponse {
    /// Status code; some deployments send it as a string
    #[serde(
        default,
        deserialize_with = "deserialize_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<u16>,
    /// Correlation id of the request this answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Bare JWK (some session responses put the KMS key here)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    /// Single key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    /// Several keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<Key>,
}

impl KmsResponse {
    /// Decode a JSON payload.
    ///
    /// # Errors
    ///
    /// - `MalformedResponse` if the payload is not a response object
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KmsError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// No status, or a 2xx status.
    pub fn is_success(&self) -> bool {
        self.status.is_none_or(|status| (200..300).contains(&status))
    }

    /// The response itself on success.
    ///
    /// # Errors
    ///
    /// - `Status` carrying the KMS status and reason otherwise
    pub fn into_result(self) -> Result<Self, KmsError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(KmsError::Status {
            status: self.status.unwrap_or_default(),
            reason: self.reason.unwrap_or_default(),
        })
    }

    /// All key records in the response, `key` first.
    pub fn into_keys(self) -> Vec<Key> {
        self.key.into_iter().chain(self.keys).collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatusRepr {
    Number(u16),
    Text(String),
}

fn deserialize_status<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<StatusRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(StatusRepr::Number(status)) => Ok(Some(status)),
        Some(StatusRepr::Text(text)) => {
            text.trim().parse().map(Some).map_err(serde::de::Error::custom)
        },
    }
}
