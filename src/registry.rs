//! Permission Schema Registry
//!
//! Source of truth for which permission names are valid per object type.
//! Registration happens once at process startup; lookups are read-mostly
//! afterwards. Registrations that arrive before the grant storage is
//! provisioned are queued and replayed by `flush_pending`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::errors::{PermError, PermResult};
use crate::store::GrantStore;

/// Input conversion for `register`: an ordered list of names, or a single
/// name. The single-name form is the deprecated back-compat path.
pub trait IntoPerms {
    fn into_perms(self) -> Vec<String>;
}

impl IntoPerms for &str {
    fn into_perms(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoPerms for String {
    fn into_perms(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoPerms for Vec<String> {
    fn into_perms(self) -> Vec<String> {
        self
    }
}

impl IntoPerms for &[&str] {
    fn into_perms(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> IntoPerms for [&str; N] {
    fn into_perms(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

#[derive(Debug, Default)]
struct PendingState {
    queue: Vec<(Vec<String>, String)>,
    flushed: bool,
}

pub struct Registry {
    store: Arc<dyn GrantStore>,
    registered: RwLock<HashMap<String, Vec<String>>>,
    pending: Mutex<PendingState>,
}

impl Registry {
    pub fn new(store: Arc<dyn GrantStore>) -> Self {
        Self {
            store,
            registered: RwLock::new(HashMap::new()),
            pending: Mutex::new(PendingState::default()),
        }
    }

    /// Register the permission set for an object type.
    ///
    /// Re-registering a type is a warning-level no-op, never an error, so
    /// idempotent startup code can call this freely. If the grant storage is
    /// not provisioned yet the pair is queued for `flush_pending` and this
    /// still returns `Ok`.
    pub async fn register<P: IntoPerms>(&self, perms: P, object_type: &str) -> PermResult<()> {
        let perms = dedup_preserving_order(perms.into_perms());
        match self.try_register(&perms, object_type).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_ready() || matches!(err, PermError::Store(_)) => {
                tracing::debug!(object_type, "grant storage not ready, queueing registration");
                let mut pending = self.pending.lock().await;
                pending.queue.push((perms, object_type.to_string()));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn try_register(&self, perms: &[String], object_type: &str) -> PermResult<()> {
        if self.registered.read().await.contains_key(object_type) {
            tracing::warn!(object_type, "tried to double-register permissions");
            return Ok(());
        }

        self.store.ensure_storage(object_type, perms).await?;

        let mut registered = self.registered.write().await;
        if registered.contains_key(object_type) {
            tracing::warn!(object_type, "tried to double-register permissions");
            return Ok(());
        }
        registered.insert(object_type.to_string(), perms.to_vec());
        tracing::debug!(object_type, perms = perms.len(), "registered permission set");
        Ok(())
    }

    /// Replay registrations queued before storage was provisioned. Invoked
    /// once after migrations complete; calling it again is harmless. If the
    /// storage is still not ready the error is swallowed and the queue is
    /// left intact for a later flush.
    pub async fn flush_pending(&self) {
        let mut pending = self.pending.lock().await;
        if pending.flushed {
            return;
        }

        for (perms, object_type) in &pending.queue {
            if let Err(err) = self.try_register(perms, object_type).await {
                tracing::debug!(
                    object_type = object_type.as_str(),
                    error = %err,
                    "flush deferred, grant storage still not ready"
                );
                return;
            }
        }

        pending.queue.clear();
        pending.flushed = true;
    }

    /// The registered ordered permission set for the type.
    pub async fn get_permissions(&self, object_type: &str) -> PermResult<Vec<String>> {
        self.registered
            .read()
            .await
            .get(object_type)
            .cloned()
            .ok_or_else(|| PermError::unregistered(object_type))
    }

    pub async fn is_registered(&self, object_type: &str) -> bool {
        self.registered.read().await.contains_key(object_type)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.queue.len()
    }
}

fn dedup_preserving_order(perms: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    perms.into_iter().filter(|p| seen.insert(p.clone())).collect()
}
