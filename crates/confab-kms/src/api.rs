//! KMS HTTP surface.
//!
//! [`KmsApi`] is the seam between the key exchange engine and the network.
//! [`HttpKmsApi`] talks to the real service; tests substitute an in-process
//! KMS.

use async_trait::async_trait;
use confab_crypto::Jwk;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};

use crate::{config::HttpKmsConfig, error::KmsError};

/// Cluster and public key of the caller's KMS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KmsInfo {
    /// Cluster URI; also the destination for KMS messages
    pub kms_cluster: String,
    /// RSA key that session negotiation requests are encrypted to
    #[serde(deserialize_with = "deserialize_embedded_jwk")]
    pub rsa_public_key: Jwk,
}

/// Outcome of posting KMS messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// `200`: responses are in the body
    Sync(Vec<String>),
    /// `202`: responses will arrive over the event transport
    Accepted,
}

/// Network operations the key exchange engine depends on.
#[async_trait]
pub trait KmsApi: Send + Sync {
    /// Caller's user id.
    async fn user_id(&self) -> Result<String, KmsError>;

    /// Bearer token to embed in request credentials.
    fn bearer(&self) -> String;

    /// Cluster and RSA public key for `user_id`.
    async fn info(&self, user_id: &str) -> Result<KmsInfo, KmsError>;

    /// Submit encrypted KMS messages to `destination` (a cluster URI).
    async fn post_messages(
        &self,
        destination: &str,
        messages: Vec<String>,
    ) -> Result<PostOutcome, KmsError>;
}

/// [`KmsApi`] over HTTPS.
#[derive(Clone)]
pub struct HttpKmsApi {
    client: reqwest::Client,
    config: HttpKmsConfig,
    token: String,
}

impl HttpKmsApi {
    /// Build a client with the configured request timeout.
    ///
    /// # Errors
    ///
    /// - `Http` if the TLS backend cannot be initialised
    pub fn new(config: HttpKmsConfig, token: impl Into<String>) -> Result<Self, KmsError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("confab-kms/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config, token: token.into() })
    }

    async fn get_json(&self, url: String) -> Result<Value, KmsError> {
        let res = self.client.get(url).bearer_auth(&self.token).send().await?;
        if !res.status().is_success() {
            return Err(status_error(res).await);
        }
        Ok(res.json().await?)
    }
}

#[async_trait]
impl KmsApi for HttpKmsApi {
    async fn user_id(&self) -> Result<String, KmsError> {
        let url = format!("{}/people/me", self.config.identity_url);
        let body = self.get_json(url).await?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| KmsError::Identity { reason: "response has no id".to_string() })
    }

    fn bearer(&self) -> String {
        self.token.clone()
    }

    async fn info(&self, user_id: &str) -> Result<KmsInfo, KmsError> {
        let url = format!("{}/kms/{}", self.config.encryption_url, user_id);
        let body = self.get_json(url).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn post_messages(
        &self,
        destination: &str,
        messages: Vec<String>,
    ) -> Result<PostOutcome, KmsError> {
        let url = format!("{}/kms/messages", self.config.encryption_url);
        let res = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({"destination": destination, "kmsMessages": messages}))
            .send()
            .await?;

        match res.status() {
            StatusCode::ACCEPTED => Ok(PostOutcome::Accepted),
            StatusCode::OK => {
                let body: Value = res.json().await?;
                Ok(PostOutcome::Sync(messages_in(&body)))
            },
            _ => Err(status_error(res).await),
        }
    }
}

async fn status_error(res: reqwest::Response) -> KmsError {
    let status = res.status();
    let reason = res.text().await.unwrap_or_default();
    KmsError::Http {
        status: Some(status.as_u16()),
        reason: if reason.is_empty() { status.to_string() } else { reason },
    }
}

fn messages_in(body: &Value) -> Vec<String> {
    body.get("kmsMessages")
        .and_then(Value::as_array)
        .map(|messages| {
            messages.iter().filter_map(Value::as_str).map(str::to_string).collect()
        })
        .unwrap_or_default()
}

/// Accepts a JWK object or a JSON string containing one.
fn deserialize_embedded_jwk<'de, D>(deserializer: D) -> Result<Jwk, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Embedded {
        Object(Jwk),
        Text(String),
    }

    match Embedded::deserialize(deserializer)? {
        Embedded::Object(jwk) => Ok(jwk),
        Embedded::Text(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
    }
}
