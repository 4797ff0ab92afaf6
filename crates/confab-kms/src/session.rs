//! Negotiated KMS session and the slot that serialises negotiation.
//!
//! ```text
//!            acquire()                 complete()
//! Empty ───────────────► Negotiating ───────────► Ready(session)
//!   ▲                        │                        │
//!   └── guard dropped ───────┘    expired / invalidate┘
//! ```
//!
//! At most one caller negotiates at a time. Others wait on a [`Notify`] and
//! re-check the slot when woken. The lock is never held across I/O.

use std::{fmt, sync::Arc, time::Duration};

use confab_crypto::SESSION_SECRET_SIZE;
use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};
use zeroize::Zeroizing;

/// Symmetric session shared with the KMS.
pub struct KmsSession {
    key_uri: String,
    cluster: String,
    secret: Zeroizing<[u8; SESSION_SECRET_SIZE]>,
    created_at: Instant,
    ttl: Duration,
}

impl KmsSession {
    /// Session created now.
    pub fn new(
        key_uri: String,
        cluster: String,
        secret: Zeroizing<[u8; SESSION_SECRET_SIZE]>,
        ttl: Duration,
    ) -> Self {
        Self { key_uri, cluster, secret, created_at: Instant::now(), ttl }
    }

    /// KMS-assigned URI of the session key, sent as `kid`.
    pub fn key_uri(&self) -> &str {
        &self.key_uri
    }

    /// Cluster the session was negotiated with.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret[..]
    }

    /// Whether the session is still within its TTL.
    pub fn is_fresh(&self) -> bool {
        self.created_at.elapsed() < self.ttl
    }
}

impl fmt::Debug for KmsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsSession")
            .field("key_uri", &self.key_uri)
            .field("cluster", &self.cluster)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

enum SlotState {
    Empty,
    Negotiating,
    Ready(Arc<KmsSession>),
}

/// Result of [`SessionSlot::acquire`].
pub(crate) enum Acquired<'a> {
    /// A fresh session exists
    Ready(Arc<KmsSession>),
    /// The caller must negotiate and hand the result to the guard
    Negotiate(NegotiationGuard<'a>),
}

pub(crate) struct SessionSlot {
    state: Mutex<SlotState>,
    changed: Notify,
}

impl SessionSlot {
    pub(crate) fn new() -> Self {
        Self { state: Mutex::new(SlotState::Empty), changed: Notify::new() }
    }

    /// Fresh session, or the right to negotiate one. Waits while another
    /// caller is negotiating.
    pub(crate) async fn acquire(&self) -> Acquired<'_> {
        loop {
            // Registered before inspecting state so a wakeup between the
            // check and the await is not lost.
            let changed = self.changed.notified();
            {
                let mut state = self.state.lock();
                match &*state {
                    SlotState::Ready(session) if session.is_fresh() => {
                        return Acquired::Ready(Arc::clone(session));
                    },
                    SlotState::Negotiating => {},
                    SlotState::Ready(_) | SlotState::Empty => {
                        *state = SlotState::Negotiating;
                        return Acquired::Negotiate(NegotiationGuard {
                            slot: self,
                            finished: false,
                        });
                    },
                }
            }
            changed.await;
        }
    }

    /// Current session if it is fresh.
    pub(crate) fn current(&self) -> Option<Arc<KmsSession>> {
        match &*self.state.lock() {
            SlotState::Ready(session) if session.is_fresh() => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Drop `session` if it is still the current one. A session that has
    /// already been replaced is left alone.
    pub(crate) fn invalidate(&self, session: &Arc<KmsSession>) -> bool {
        let mut state = self.state.lock();
        match &*state {
            SlotState::Ready(current) if Arc::ptr_eq(current, session) => {
                *state = SlotState::Empty;
                true
            },
            _ => false,
        }
    }

    fn settle(&self, next: SlotState) {
        *self.state.lock() = next;
        self.changed.notify_waiters();
    }
}

/// Exclusive right to negotiate. Dropping it without
/// [`complete`](Self::complete) empties the slot and wakes waiters, so a
/// failed or cancelled negotiation never wedges the slot.
pub(crate) struct NegotiationGuard<'a> {
    slot: &'a SessionSlot,
    finished: bool,
}

impl NegotiationGuard<'_> {
    pub(crate) fn complete(mut self, session: Arc<KmsSession>) {
        self.finished = true;
        self.slot.settle(SlotState::Ready(session));
    }
}

impl Drop for NegotiationGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.slot.settle(SlotState::Empty);
        }
    }
}
