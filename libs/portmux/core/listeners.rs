//! Listener registry shared by the client session and the server registry.
//!
//! A `ListenerSet` maps keys to ordered lists of `(listener, validator)`
//! entries. The session keys by subscriber identity with replace-on-insert
//! semantics; the endpoint registry keys by event kind and appends. Dispatch
//! always iterates a snapshot of the matching entries, so a listener may
//! subscribe, unsubscribe or post from inside its own invocation without
//! corrupting the iteration. A panicking listener is contained and logged;
//! the remaining listeners still run.

use crate::traits::validate::Validator;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Listener invoked with a payload and a dispatch context.
pub type Listener<P, C> = Box<dyn Fn(&P, &C) + Send + Sync>;

struct Entry<P, C> {
    token: u64,
    listener: Listener<P, C>,
    validator: Validator<P>,
}

/// Registry of listeners keyed by `K`, delivering payloads of type `P` with
/// context `C`.
pub struct ListenerSet<K, P, C> {
    entries: RwLock<HashMap<K, Vec<Arc<Entry<P, C>>>>>,
    next_token: AtomicU64,
}

impl<K, P, C> ListenerSet<K, P, C>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register under `key`, replacing any existing entries for that key
    /// (last write wins). Returns the registration token.
    pub fn insert(&self, key: K, listener: Listener<P, C>, validator: Validator<P>) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry {
            token,
            listener,
            validator,
        });
        self.entries.write().insert(key, vec![entry]);
        token
    }

    /// Register under `key`, appending to that key's ordered entry list.
    /// Returns the registration token.
    pub fn push(&self, key: K, listener: Listener<P, C>, validator: Validator<P>) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry {
            token,
            listener,
            validator,
        });
        self.entries.write().entry(key).or_default().push(entry);
        token
    }

    /// Remove every entry registered under `key`. Redundant calls are no-ops.
    pub fn remove(&self, key: &K) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove the single entry carrying `token`, if it is still registered
    /// under `key`. A stale token (already removed or replaced) is a no-op,
    /// which makes old unsubscribe handles inert.
    pub fn remove_token(&self, key: &K, token: u64) -> bool {
        let mut entries = self.entries.write();
        if let Some(list) = entries.get_mut(key) {
            let before = list.len();
            list.retain(|entry| entry.token != token);
            let removed = list.len() != before;
            if list.is_empty() {
                entries.remove(key);
            }
            return removed;
        }
        false
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Total number of registered entries across all keys.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deliver `payload` to every entry under `key` whose validator accepts
    /// it. Returns the number of listeners invoked.
    pub fn dispatch(&self, key: &K, payload: &P, ctx: &C) -> usize {
        let snapshot: Vec<Arc<Entry<P, C>>> = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };
        Self::invoke(&snapshot, payload, ctx)
    }

    /// Deliver `payload` to every registered entry, regardless of key.
    /// Returns the number of listeners invoked. Order across distinct keys
    /// is unspecified.
    pub fn dispatch_all(&self, payload: &P, ctx: &C) -> usize {
        let snapshot: Vec<Arc<Entry<P, C>>> = {
            let entries = self.entries.read();
            entries.values().flat_map(|list| list.iter().cloned()).collect()
        };
        Self::invoke(&snapshot, payload, ctx)
    }

    /// Deliver `payload` to the single entry carrying `token`, if it is
    /// still live under `key` and its validator accepts the payload. Used
    /// for the deferred cached-message flush, which must re-check liveness
    /// at delivery time rather than at schedule time.
    pub fn dispatch_token(&self, key: &K, token: u64, payload: &P, ctx: &C) -> bool {
        let entry = {
            let entries = self.entries.read();
            entries
                .get(key)
                .and_then(|list| list.iter().find(|entry| entry.token == token).cloned())
        };
        match entry {
            Some(entry) => Self::invoke(&[entry], payload, ctx) == 1,
            None => false,
        }
    }

    fn invoke(snapshot: &[Arc<Entry<P, C>>], payload: &P, ctx: &C) -> usize {
        let mut delivered = 0;
        for entry in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if (entry.validator)(payload) {
                    (entry.listener)(payload, ctx);
                    true
                } else {
                    false
                }
            }));
            match outcome {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(_) => {
                    error!(token = entry.token, "listener panicked during dispatch; continuing");
                }
            }
        }
        delivered
    }
}

impl<K, P, C> Default for ListenerSet<K, P, C>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
