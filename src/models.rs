use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The entity a permission can be granted to: a user or a group.
///
/// Identities are opaque here; group membership is resolved through the
/// `Directory` trait, never stored on the subject itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Subject {
    User(Uuid),
    Group(Uuid),
}

impl Subject {
    pub fn id(&self) -> Uuid {
        match self {
            Subject::User(id) | Subject::Group(id) => *id,
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::User(_) => SubjectKind::User,
            Subject::Group(_) => SubjectKind::Group,
        }
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    User,
    Group,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Group => "group",
        }
    }
}

/// Reference to one instance of a registered object type. Not a live foreign
/// key: the target store only ever sees (type, id) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: Uuid,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: Uuid) -> Self {
        Self {
            object_type: object_type.into(),
            object_id,
        }
    }
}

/// Flat persisted form of a single grant: one row per
/// (subject, object-type, object-id, permission). The row's existence is the
/// grant; the store's primary key keeps grants idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRow {
    pub subject: Subject,
    pub object_type: String,
    pub object_id: Uuid,
    pub permission: String,
}

/// The flag set one subject holds on one object instance. Every name in the
/// type's schema maps to a boolean, defaulting to false.
#[derive(Debug, Clone)]
pub struct GrantRecord {
    pub subject: Subject,
    pub object: ObjectRef,
    pub flags: HashMap<String, bool>,
}

impl GrantRecord {
    /// A record with every schema flag false.
    pub fn empty(subject: Subject, object: ObjectRef, schema: &[String]) -> Self {
        Self {
            subject,
            object,
            flags: schema.iter().map(|p| (p.clone(), false)).collect(),
        }
    }

    /// Rebuild a record from its flat rows. Rows naming permissions outside
    /// the schema (stale after a schema change) are ignored.
    pub fn from_rows(
        subject: Subject,
        object: ObjectRef,
        schema: &[String],
        rows: &[GrantRow],
    ) -> Self {
        let mut record = Self::empty(subject, object, schema);
        for row in rows {
            record.set(&row.permission, true);
        }
        record
    }

    /// Flip a flag. No-op for names outside the schema; callers validate
    /// names against the registry before writing.
    pub fn set(&mut self, permission: &str, value: bool) {
        if let Some(flag) = self.flags.get_mut(permission) {
            *flag = value;
        }
    }

    pub fn is_set(&self, permission: &str) -> bool {
        self.flags.get(permission).copied().unwrap_or(false)
    }

    /// Names currently true, in the schema's insertion order.
    pub fn granted(&self, schema: &[String]) -> Vec<String> {
        schema
            .iter()
            .filter(|p| self.is_set(p))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.values().all(|set| !set)
    }
}
