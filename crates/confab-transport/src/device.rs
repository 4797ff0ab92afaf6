//! Device-registration collaborator.
//!
//! Registration is an external service; the transport only needs it to
//! produce a socket URL. [`StaticEndpoint`] covers deployments where the URL
//! is known up front.

use async_trait::async_trait;

use crate::error::DeviceError;

/// Source of socket endpoints.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Register (or refresh the registration of) this device.
    async fn register(&self) -> Result<(), DeviceError>;

    /// Socket URL assigned to this device.
    async fn web_socket_url(&self) -> Result<String, DeviceError>;

    /// URL identifying this device to other services, if registered.
    fn device_url(&self) -> Option<String> {
        None
    }
}

/// Fixed endpoint with no registration step.
#[derive(Debug, Clone)]
pub struct StaticEndpoint {
    web_socket_url: String,
    device_url: Option<String>,
}

impl StaticEndpoint {
    /// Endpoint that always yields `web_socket_url`.
    pub fn new(web_socket_url: impl Into<String>) -> Self {
        Self { web_socket_url: web_socket_url.into(), device_url: None }
    }

    /// Attach a device URL.
    #[must_use]
    pub fn with_device_url(mut self, device_url: impl Into<String>) -> Self {
        self.device_url = Some(device_url.into());
        self
    }
}

#[async_trait]
impl DeviceRegistry for StaticEndpoint {
    async fn register(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn web_socket_url(&self) -> Result<String, DeviceError> {
        if self.web_socket_url.is_empty() {
            return Err(DeviceError::NoWebSocketUrl);
        }
        Ok(self.web_socket_url.clone())
    }

    fn device_url(&self) -> Option<String> {
        self.device_url.clone()
    }
}
