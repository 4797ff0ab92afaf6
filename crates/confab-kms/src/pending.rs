//! Requests awaiting a response delivered over the event transport.

use std::{collections::HashMap, sync::Arc};

use confab_crypto::EcSecretKey;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::wire::KmsResponse;

struct Entry {
    tx: oneshot::Sender<KmsResponse>,
    ephemeral: Option<Arc<EcSecretKey>>,
}

/// Pending requests by request id.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<String, Entry>>,
}

impl PendingRequests {
    /// Register `request_id` before its request is sent. The entry lives
    /// until the response is delivered or the returned guard is dropped.
    pub(crate) fn register(
        &self,
        request_id: &str,
        ephemeral: Option<Arc<EcSecretKey>>,
    ) -> PendingGuard<'_> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(request_id.to_string(), Entry { tx, ephemeral });
        PendingGuard { pending: self, request_id: request_id.to_string(), rx }
    }

    /// Hand `response` to the request it answers. Gives the response back
    /// if nothing is waiting for it.
    pub(crate) fn deliver(&self, response: KmsResponse) -> Result<(), KmsResponse> {
        let entry =
            response.request_id.as_deref().and_then(|id| self.entries.lock().remove(id));
        match entry {
            Some(entry) => entry.tx.send(response),
            None => Err(response),
        }
    }

    /// Ephemeral private keys of in-flight negotiations.
    pub(crate) fn ephemeral_keys(&self) -> Vec<Arc<EcSecretKey>> {
        self.entries.lock().values().filter_map(|entry| entry.ephemeral.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Receiving side of one pending request.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    request_id: String,
    rx: oneshot::Receiver<KmsResponse>,
}

impl PendingGuard<'_> {
    /// Wait for delivery. `None` if the entry was dropped without a response.
    pub(crate) async fn response(&mut self) -> Option<KmsResponse> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.entries.lock().remove(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    fn response(request_id: &str) -> KmsResponse {
        KmsResponse { request_id: Some(request_id.into()), ..KmsResponse::default() }
    }

    #[tokio::test]
    async fn delivers_by_request_id() {
        let pending = PendingRequests::default();
        let mut guard = pending.register("r1", None);

        assert!(pending.deliver(response("other")).is_err());
        assert!(pending.deliver(response("r1")).is_ok());
        assert_eq!(guard.response().await.unwrap().request_id.as_deref(), Some("r1"));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn dropped_guard_removes_entry() {
        let pending = PendingRequests::default();
        let guard = pending.register("r1", None);
        assert_eq!(pending.len(), 1);
        drop(guard);
        assert_eq!(pending.len(), 0);
        assert!(pending.deliver(response("r1")).is_err());
    }

    #[test]
    fn exposes_ephemeral_keys() {
        let pending = PendingRequests::default();
        let _plain = pending.register("r1", None);
        let _negotiation = pending.register("r2", Some(Arc::new(EcSecretKey::random(&mut OsRng))));
        assert_eq!(pending.ephemeral_keys().len(), 1);
    }

    #[test]
    fn response_without_id_is_returned() {
        let pending = PendingRequests::default();
        let _guard = pending.register("r1", None);
        assert!(pending.deliver(KmsResponse::default()).is_err());
        assert_eq!(pending.len(), 1);
    }
}
