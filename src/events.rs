//! Notification Hook
//!
//! Two named channels, `granted` and `revoked`, carrying the subject,
//! permission name and object of a mutation that actually happened.
//! Dispatch is fire-and-forget: a send with no receivers, a dropped
//! receiver, or a lagging receiver never affects other receivers or the
//! grant/revoke that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{ObjectRef, Subject};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionEvent {
    pub id: Uuid,
    pub subject: Subject,
    pub permission: String,
    pub object: ObjectRef,
    pub occurred_at: DateTime<Utc>,
}

impl PermissionEvent {
    pub fn new(subject: Subject, permission: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            permission: permission.into(),
            object,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    granted: broadcast::Sender<PermissionEvent>,
    revoked: broadcast::Sender<PermissionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (granted, _) = broadcast::channel(capacity);
        let (revoked, _) = broadcast::channel(capacity);
        Self { granted, revoked }
    }

    pub fn subscribe_granted(&self) -> broadcast::Receiver<PermissionEvent> {
        self.granted.subscribe()
    }

    pub fn subscribe_revoked(&self) -> broadcast::Receiver<PermissionEvent> {
        self.revoked.subscribe()
    }

    /// Whether anyone is listening on the revoked channel. `revoke_all`
    /// skips its pre-delete read when this is false.
    pub fn has_revoked_observers(&self) -> bool {
        self.revoked.receiver_count() > 0
    }

    pub(crate) fn emit_granted(&self, event: PermissionEvent) {
        let _ = self.granted.send(event);
    }

    pub(crate) fn emit_revoked(&self, event: PermissionEvent) {
        let _ = self.revoked.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Project permission events into the `audit_log` table. Spawn one listener
/// per channel; `name` becomes the stored event name ("granted"/"revoked").
/// Write failures are logged and never affect the engine.
pub async fn start_audit_listener(
    mut rx: broadcast::Receiver<PermissionEvent>,
    name: &'static str,
    pool: SqlitePool,
) {
    tracing::info!(channel = name, "audit listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                let result = sqlx::query(
                    "INSERT INTO audit_log \
                     (id, event_name, subject_kind, subject_id, permission, object_type, \
                      object_id, occurred_at, payload) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(event.id.to_string())
                .bind(name)
                .bind(event.subject.kind().as_str())
                .bind(event.subject.id().to_string())
                .bind(&event.permission)
                .bind(&event.object.object_type)
                .bind(event.object.object_id.to_string())
                .bind(event.occurred_at)
                .bind(payload)
                .execute(&pool)
                .await;

                if let Err(e) = result {
                    tracing::error!(channel = name, "failed to save audit log: {}", e);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(channel = name, skipped, "audit listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
