//! Single-flight de-duplication of identical in-flight work.
//!
//! The first caller for a key becomes the leader: its future is spawned as a
//! task and registered under the key. Callers arriving while it runs attach
//! to the same task through a [`watch`] channel and all receive a clone of
//! its output. Because the work runs in its own task, a caller that gives up
//! waiting (timeout, drop) never cancels it for the others.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::{Instrument, debug, info_span};

use crate::metrics;

type Registry<K, T> = DashMap<K, watch::Receiver<Option<T>>>;

/// Registry of in-flight work keyed by `K`.
///
/// Cloning is cheap; clones share the registry.
pub struct SingleFlight<K, T> {
    inflight: Arc<Registry<K, T>>,
    label: &'static str,
}

impl<K, T> Clone for SingleFlight<K, T> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
            label: self.label,
        }
    }
}

impl<K: Eq + Hash, T> Debug for SingleFlight<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("label", &self.label)
            .field("in_flight", &self.inflight.len())
            .finish()
    }
}

/// Removes the registration when the leader task ends, even by panic.
struct Registration<K, T>
where
    K: Eq + Hash,
{
    inflight: Arc<Registry<K, T>>,
    key: Option<K>,
}

impl<K, T> Registration<K, T>
where
    K: Eq + Hash,
{
    fn release(&mut self) {
        if let Some(key) = self.key.take() {
            self.inflight.remove(&key);
        }
    }
}

impl<K, T> Drop for Registration<K, T>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.release();
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry. `label` names it in logs and metrics.
    pub fn new(label: &'static str) -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
            label,
        }
    }

    /// Runs `work` unless work for `key` is already in flight, and returns
    /// the output of whichever run completes.
    ///
    /// Returns `None` if the in-flight task ended without output (it
    /// panicked or the runtime shut down).
    pub async fn run<F>(&self, key: K, work: F) -> Option<T>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (mut receiver, leader) = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(flight = self.label, ?key, "Joining in-flight request");
                metrics::record_coalesced(self.label);
                (entry.get().clone(), None)
            }
            Entry::Vacant(entry) => {
                let (sender, receiver) = watch::channel(None);
                entry.insert(receiver.clone());
                (receiver, Some(sender))
            }
        };
        if let Some(sender) = leader {
            self.spawn_leader(key, sender, work);
        }

        match receiver.wait_for(Option::is_some).await {
            Ok(output) => output.clone(),
            Err(_) => None,
        }
    }

    fn spawn_leader<F>(&self, key: K, sender: watch::Sender<Option<T>>, work: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let span = info_span!("single_flight", flight = self.label, key = ?key);
        let mut registration = Registration {
            inflight: Arc::clone(&self.inflight),
            key: Some(key),
        };
        tokio::spawn(
            async move {
                let output = work.await;
                registration.release();
                // All waiters may have gone away.
                let _ = sender.send(Some(output));
            }
            .instrument(span),
        );
    }

    /// Whether work for `key` is currently in flight.
    pub fn contains(&self, key: &K) -> bool {
        self.inflight.contains_key(key)
    }

    /// Number of keys currently in flight.
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    /// `true` when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}
