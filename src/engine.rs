//! Authorization Engine
//!
//! Grant/revoke/query operations over the grant store and schema registry.
//! Effective permissions for a user are the union of direct grants and
//! grants held by the groups the user belongs to.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::directory::Directory;
use crate::errors::{PermError, PermResult};
use crate::events::{EventBus, PermissionEvent};
use crate::models::{GrantRecord, ObjectRef, Subject, SubjectKind};
use crate::registry::Registry;
use crate::store::{GrantFilter, GrantStore, SubjectSel};

pub struct Engine {
    registry: Arc<Registry>,
    store: Arc<dyn GrantStore>,
    directory: Arc<dyn Directory>,
    events: EventBus,
}

impl Engine {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn GrantStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            registry,
            store,
            directory,
            events: EventBus::default(),
        }
    }

    /// The notification channels fired by grant/revoke.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    async fn schema_for(&self, object_type: &str) -> PermResult<Vec<String>> {
        self.registry.get_permissions(object_type).await
    }

    fn require_known(schema: &[String], object_type: &str, permission: &str) -> PermResult<()> {
        if schema.iter().any(|p| p == permission) {
            Ok(())
        } else {
            Err(PermError::unknown_permission(object_type, permission))
        }
    }

    /// Idempotently set the named flag true for (subject, object) and
    /// dispatch `granted` after persisting.
    pub async fn grant(
        &self,
        subject: &Subject,
        permission: &str,
        object: &ObjectRef,
    ) -> PermResult<()> {
        let schema = self.schema_for(&object.object_type).await?;
        Self::require_known(&schema, &object.object_type, permission)?;

        self.store.grant_flag(subject, object, permission).await?;
        tracing::debug!(
            subject = %subject.id(),
            kind = subject.kind().as_str(),
            permission,
            object_type = %object.object_type,
            object_id = %object.object_id,
            "granted"
        );
        self.events
            .emit_granted(PermissionEvent::new(*subject, permission, object.clone()));
        Ok(())
    }

    /// Idempotently clear the flag. Revoking an ungranted permission is a
    /// no-op; `revoked` fires only when a grant actually existed.
    pub async fn revoke(
        &self,
        subject: &Subject,
        permission: &str,
        object: &ObjectRef,
    ) -> PermResult<()> {
        self.schema_for(&object.object_type).await?;

        let removed = self.store.clear_flag(subject, object, permission).await?;
        if removed {
            tracing::debug!(
                subject = %subject.id(),
                kind = subject.kind().as_str(),
                permission,
                object_type = %object.object_type,
                object_id = %object.object_id,
                "revoked"
            );
            self.events
                .emit_revoked(PermissionEvent::new(*subject, permission, object.clone()));
        }
        Ok(())
    }

    /// Clear every permission the subject holds on the object. The removed
    /// names are captured before deletion only when someone is subscribed to
    /// the revoked channel; with no observers the read is skipped.
    pub async fn revoke_all(&self, subject: &Subject, object: &ObjectRef) -> PermResult<()> {
        let schema = self.schema_for(&object.object_type).await?;

        if self.events.has_revoked_observers() {
            let removed = match self.store.read_record(subject, object, &schema).await? {
                Some(record) => record.granted(&schema),
                None => Vec::new(),
            };
            self.store.delete_record(subject, object).await?;
            for permission in removed {
                self.events
                    .emit_revoked(PermissionEvent::new(*subject, permission, object.clone()));
            }
        } else {
            self.store.delete_record(subject, object).await?;
        }
        Ok(())
    }

    /// Replace the subject's flag set on the object with exactly
    /// `permissions`. One transaction per call; concurrent callers race
    /// last-writer-wins at the (subject, object) row level.
    pub async fn set_perms(
        &self,
        subject: &Subject,
        permissions: &[&str],
        object: &ObjectRef,
    ) -> PermResult<Vec<String>> {
        let schema = self.schema_for(&object.object_type).await?;
        for permission in permissions {
            Self::require_known(&schema, &object.object_type, permission)?;
        }

        let mut record = GrantRecord::empty(*subject, object.clone(), &schema);
        for permission in permissions {
            record.set(permission, true);
        }
        self.store.write_record(&record).await?;

        Ok(permissions.iter().map(|p| p.to_string()).collect())
    }

    /// Names currently true for (subject, object), in schema order. Empty if
    /// no record exists; absence is never an error.
    pub async fn get_perms(&self, subject: &Subject, object: &ObjectRef) -> PermResult<Vec<String>> {
        let schema = self.schema_for(&object.object_type).await?;
        Ok(self
            .store
            .read_record(subject, object, &schema)
            .await?
            .map(|record| record.granted(&schema))
            .unwrap_or_default())
    }

    /// Permission checks on a missing object deny rather than raise.
    pub async fn has_perm(
        &self,
        subject: &Subject,
        permission: &str,
        object: Option<&ObjectRef>,
    ) -> PermResult<bool> {
        let Some(object) = object else {
            return Ok(false);
        };
        self.schema_for(&object.object_type).await?;

        self.store
            .grant_exists(&GrantFilter {
                subject: subject.into(),
                object_type: &object.object_type,
                object_id: Some(object.object_id),
                permissions: &[permission],
            })
            .await
    }

    /// True if the subject holds any of `permissions` on any instance of the
    /// type. Direct grants are checked first; group grants only if the
    /// direct check fails and `include_groups` is set.
    pub async fn perms_on_any(
        &self,
        subject: &Subject,
        object_type: &str,
        permissions: &[&str],
        include_groups: bool,
    ) -> PermResult<bool> {
        self.schema_for(object_type).await?;

        let direct = GrantFilter {
            subject: subject.into(),
            object_type,
            object_id: None,
            permissions,
        };
        if self.store.grant_exists(&direct).await? {
            return Ok(true);
        }

        if include_groups {
            if let Subject::User(user_id) = subject {
                let groups = self.directory.groups_of(*user_id).await?;
                let via_groups = GrantFilter {
                    subject: SubjectSel::Groups(&groups),
                    object_type,
                    object_id: None,
                    permissions,
                };
                if self.store.grant_exists(&via_groups).await? {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Identities of all instances of the type on which the subject holds at
    /// least one of `permissions`, directly or via group membership.
    pub async fn filter_on_perms(
        &self,
        subject: &Subject,
        object_type: &str,
        permissions: &[&str],
        include_groups: bool,
    ) -> PermResult<HashSet<Uuid>> {
        self.filter_on_perms_where(subject, object_type, permissions, include_groups, |_| true)
            .await
    }

    /// Same as `filter_on_perms`, intersected with the caller's extra
    /// predicate.
    pub async fn filter_on_perms_where<F>(
        &self,
        subject: &Subject,
        object_type: &str,
        permissions: &[&str],
        include_groups: bool,
        extra: F,
    ) -> PermResult<HashSet<Uuid>>
    where
        F: Fn(&Uuid) -> bool,
    {
        self.schema_for(object_type).await?;

        let mut ids = self
            .store
            .query_ids(&GrantFilter {
                subject: subject.into(),
                object_type,
                object_id: None,
                permissions,
            })
            .await?;

        if include_groups {
            if let Subject::User(user_id) = subject {
                let groups = self.directory.groups_of(*user_id).await?;
                let via_groups = self
                    .store
                    .query_ids(&GrantFilter {
                        subject: SubjectSel::Groups(&groups),
                        object_type,
                        object_id: None,
                        permissions,
                    })
                    .await?;
                ids.extend(via_groups);
            }
        }

        ids.retain(|id| extra(id));
        Ok(ids)
    }

    /// Instances on which one specific group holds at least one of
    /// `permissions`. No membership expansion.
    pub async fn filter_on_group_perms(
        &self,
        group_id: Uuid,
        object_type: &str,
        permissions: &[&str],
    ) -> PermResult<HashSet<Uuid>> {
        self.filter_on_group_perms_where(group_id, object_type, permissions, |_| true)
            .await
    }

    pub async fn filter_on_group_perms_where<F>(
        &self,
        group_id: Uuid,
        object_type: &str,
        permissions: &[&str],
        extra: F,
    ) -> PermResult<HashSet<Uuid>>
    where
        F: Fn(&Uuid) -> bool,
    {
        self.schema_for(object_type).await?;

        let mut ids = self
            .store
            .query_ids(&GrantFilter {
                subject: SubjectSel::Group(group_id),
                object_type,
                object_id: None,
                permissions,
            })
            .await?;

        ids.retain(|id| extra(id));
        Ok(ids)
    }

    /// Distinct users with any direct permission on the object.
    /// Group-derived access is excluded by design.
    pub async fn get_users(&self, object: &ObjectRef) -> PermResult<Vec<Subject>> {
        self.schema_for(&object.object_type).await?;
        self.store
            .subjects_for_object(SubjectKind::User, object)
            .await
    }

    /// Distinct groups with any direct permission on the object.
    pub async fn get_groups(&self, object: &ObjectRef) -> PermResult<Vec<Subject>> {
        self.schema_for(&object.object_type).await?;
        self.store
            .subjects_for_object(SubjectKind::Group, object)
            .await
    }
}
