//! Per-key request coalescing.
//!
//! The first caller for a key becomes the leader and runs the work. Callers
//! that arrive while it is in flight wait for the leader's result instead of
//! starting their own. If the leader is cancelled, a waiter takes over.

use std::{collections::HashMap, future::Future};

use parking_lot::Mutex;
use tokio::sync::watch;

/// Coalesces concurrent work per key.
#[derive(Debug)]
pub struct Singleflight<T> {
    inflight: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

impl<T> Default for Singleflight<T> {
    fn default() -> Self {
        Self { inflight: Mutex::new(HashMap::new()) }
    }
}

enum Role<T> {
    Leader(watch::Sender<Option<T>>),
    Follower(watch::Receiver<Option<T>>),
}

impl<T: Clone + Send + Sync> Singleflight<T> {
    /// Empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a run is already in flight, in which case
    /// wait for and return its result.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut work = Some(work);
        loop {
            match self.join(key) {
                Role::Follower(mut rx) => {
                    let outcome = rx.wait_for(Option::is_some).await.map(|value| value.clone());
                    if let Ok(Some(value)) = outcome {
                        return value;
                    }
                    // Leader went away without a result
                },
                Role::Leader(tx) => {
                    let Some(work) = work.take() else {
                        unreachable!("a caller leads at most once");
                    };
                    let _flight = FlightGuard { group: self, key, rx: tx.subscribe() };
                    let value = work().await;
                    tx.send_replace(Some(value.clone()));
                    return value;
                },
            }
        }
    }

    /// Number of keys with work in flight.
    pub fn inflight(&self) -> usize {
        self.inflight.lock().len()
    }

    fn join(&self, key: &str) -> Role<T> {
        let mut inflight = self.inflight.lock();
        if let Some(rx) = inflight.get(key) {
            return Role::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        inflight.insert(key.to_string(), rx);
        Role::Leader(tx)
    }
}

/// Removes the leader's entry on completion or cancellation.
struct FlightGuard<'a, T> {
    group: &'a Singleflight<T>,
    key: &'a str,
    rx: watch::Receiver<Option<T>>,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        let mut inflight = self.group.inflight.lock();
        if inflight.get(self.key).is_some_and(|rx| rx.same_channel(&self.rx)) {
            inflight.remove(self.key);
        }
    }
}
