//! KMS client configuration.

use std::time::Duration;

/// Default wait for an asynchronously delivered KMS response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default lifetime of a negotiated session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Default timeout for a single HTTP call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Key exchange engine configuration.
#[derive(Debug, Clone)]
pub struct KmsConfig {
    /// How long to wait for a response delivered over the event transport
    /// after the KMS answered `202 Accepted`
    pub response_timeout: Duration,

    /// Sessions older than this are renegotiated on next use
    pub session_ttl: Duration,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self { response_timeout: DEFAULT_RESPONSE_TIMEOUT, session_ttl: DEFAULT_SESSION_TTL }
    }
}

impl KmsConfig {
    /// Short timeouts for local development and tests.
    pub fn development() -> Self {
        Self { response_timeout: Duration::from_secs(2), session_ttl: Duration::from_secs(60) }
    }
}

/// Endpoints for [`HttpKmsApi`](crate::HttpKmsApi).
#[derive(Debug, Clone)]
pub struct HttpKmsConfig {
    /// Base URL of the encryption service (`{base}/kms/...`)
    pub encryption_url: String,

    /// Base URL of the identity service (`{base}/people/me`)
    pub identity_url: String,

    /// Timeout for each HTTP request
    pub request_timeout: Duration,
}

impl HttpKmsConfig {
    /// Config with the default request timeout.
    pub fn new(encryption_url: impl Into<String>, identity_url: impl Into<String>) -> Self {
        Self {
            encryption_url: encryption_url.into(),
            identity_url: identity_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
