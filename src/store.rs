//! Grant Store Adapter
//!
//! Persistence contract for grant rows plus the SQLite implementation. The
//! flat layout (one row per subject/object/permission) is the only persisted
//! format; `GrantRecord` flag sets are reconstituted from it on read.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::errors::{PermError, PermResult};
use crate::models::{GrantRecord, GrantRow, ObjectRef, Subject, SubjectKind};

/// Which subject(s) a grant query runs against. `Groups` is the
/// membership-expansion path: any grant held by any of the listed groups.
#[derive(Debug, Clone)]
pub enum SubjectSel<'a> {
    User(Uuid),
    Group(Uuid),
    Groups(&'a [Uuid]),
}

impl<'a> From<&Subject> for SubjectSel<'a> {
    fn from(subject: &Subject) -> Self {
        match subject {
            Subject::User(id) => SubjectSel::User(*id),
            Subject::Group(id) => SubjectSel::Group(*id),
        }
    }
}

/// Filter predicate over grant rows. An empty `permissions` slice matches
/// any permission; `object_id: None` matches any instance of the type.
#[derive(Debug, Clone)]
pub struct GrantFilter<'a> {
    pub subject: SubjectSel<'a>,
    pub object_type: &'a str,
    pub object_id: Option<Uuid>,
    pub permissions: &'a [&'a str],
}

#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Succeeds once the grant tables are provisioned; `NotReady` before
    /// migrations have run. Called from registration, where the error is
    /// absorbed and queued, never surfaced.
    async fn ensure_storage(&self, object_type: &str, permissions: &[String]) -> PermResult<()>;

    async fn record_exists(&self, subject: &Subject, object: &ObjectRef) -> PermResult<bool>;

    /// The subject's flag set on the object, or `None` if no grant row
    /// exists for the pair.
    async fn read_record(
        &self,
        subject: &Subject,
        object: &ObjectRef,
        schema: &[String],
    ) -> PermResult<Option<GrantRecord>>;

    /// Replaces the stored flag set with `record` in one transaction: a
    /// single logical read-modify-write per (subject, object) pair.
    async fn write_record(&self, record: &GrantRecord) -> PermResult<()>;

    /// Removes every grant the subject holds on the object.
    async fn delete_record(&self, subject: &Subject, object: &ObjectRef) -> PermResult<()>;

    /// Idempotently set one flag true.
    async fn grant_flag(
        &self,
        subject: &Subject,
        object: &ObjectRef,
        permission: &str,
    ) -> PermResult<()>;

    /// Clear one flag. Returns whether a grant actually existed.
    async fn clear_flag(
        &self,
        subject: &Subject,
        object: &ObjectRef,
        permission: &str,
    ) -> PermResult<bool>;

    /// True if any grant row matches the filter.
    async fn grant_exists(&self, filter: &GrantFilter<'_>) -> PermResult<bool>;

    /// Distinct object ids with at least one row matching the filter.
    async fn query_ids(&self, filter: &GrantFilter<'_>) -> PermResult<HashSet<Uuid>>;

    /// Distinct subjects of `kind` holding any direct grant on the object.
    async fn subjects_for_object(
        &self,
        kind: SubjectKind,
        object: &ObjectRef,
    ) -> PermResult<Vec<Subject>>;
}

/// SQLite-backed grant store over the `user_grants` / `group_grants` tables.
#[derive(Debug, Clone)]
pub struct SqliteGrantStore {
    pool: SqlitePool,
}

impl SqliteGrantStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn target(kind: SubjectKind) -> (&'static str, &'static str) {
        match kind {
            SubjectKind::User => ("user_grants", "user_id"),
            SubjectKind::Group => ("group_grants", "group_id"),
        }
    }

    fn filter_target(sel: &SubjectSel<'_>) -> (&'static str, &'static str, Vec<Uuid>) {
        match sel {
            SubjectSel::User(id) => ("user_grants", "user_id", vec![*id]),
            SubjectSel::Group(id) => ("group_grants", "group_id", vec![*id]),
            SubjectSel::Groups(ids) => ("group_grants", "group_id", ids.to_vec()),
        }
    }

    fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, col: &str, ids: &[Uuid], filter: &GrantFilter<'_>) {
        qb.push(" WHERE ").push(col).push(" IN (");
        {
            let mut sep = qb.separated(", ");
            for id in ids {
                sep.push_bind(id.to_string());
            }
        }
        qb.push(") AND object_type = ").push_bind(filter.object_type.to_string());
        if let Some(object_id) = filter.object_id {
            qb.push(" AND object_id = ").push_bind(object_id.to_string());
        }
        if !filter.permissions.is_empty() {
            qb.push(" AND permission IN (");
            let mut sep = qb.separated(", ");
            for perm in filter.permissions {
                sep.push_bind(perm.to_string());
            }
            qb.push(")");
        }
    }

    async fn fetch_rows(&self, subject: &Subject, object: &ObjectRef) -> PermResult<Vec<GrantRow>> {
        let (table, col) = Self::target(subject.kind());
        let sql = format!(
            "SELECT permission FROM {table} WHERE {col} = ? AND object_type = ? AND object_id = ?"
        );
        let rows = sqlx::query(&sql)
            .bind(subject.id().to_string())
            .bind(&object.object_type)
            .bind(object.object_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|r| GrantRow {
                subject: *subject,
                object_type: object.object_type.clone(),
                object_id: object.object_id,
                permission: r.get("permission"),
            })
            .collect())
    }
}

#[async_trait]
impl GrantStore for SqliteGrantStore {
    async fn ensure_storage(&self, object_type: &str, permissions: &[String]) -> PermResult<()> {
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('user_grants', 'group_grants')",
        )
        .fetch_one(&self.pool)
        .await?;

        if tables < 2 {
            return Err(PermError::not_ready(object_type));
        }

        tracing::debug!(object_type, perms = permissions.len(), "grant storage ready");
        Ok(())
    }

    async fn record_exists(&self, subject: &Subject, object: &ObjectRef) -> PermResult<bool> {
        let (table, col) = Self::target(subject.kind());
        let sql = format!(
            "SELECT 1 FROM {table} WHERE {col} = ? AND object_type = ? AND object_id = ? LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(subject.id().to_string())
            .bind(&object.object_type)
            .bind(object.object_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn read_record(
        &self,
        subject: &Subject,
        object: &ObjectRef,
        schema: &[String],
    ) -> PermResult<Option<GrantRecord>> {
        let rows = self.fetch_rows(subject, object).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(GrantRecord::from_rows(
            *subject,
            object.clone(),
            schema,
            &rows,
        )))
    }

    async fn write_record(&self, record: &GrantRecord) -> PermResult<()> {
        let (table, col) = Self::target(record.subject.kind());
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let delete_sql = format!(
            "DELETE FROM {table} WHERE {col} = ? AND object_type = ? AND object_id = ?"
        );
        sqlx::query(&delete_sql)
            .bind(record.subject.id().to_string())
            .bind(&record.object.object_type)
            .bind(record.object.object_id.to_string())
            .execute(&mut *tx)
            .await?;

        let insert_sql = format!(
            "INSERT INTO {table} ({col}, object_type, object_id, permission, created_at) \
             VALUES (?, ?, ?, ?, ?)"
        );
        for (permission, set) in &record.flags {
            if !set {
                continue;
            }
            sqlx::query(&insert_sql)
                .bind(record.subject.id().to_string())
                .bind(&record.object.object_type)
                .bind(record.object.object_id.to_string())
                .bind(permission)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_record(&self, subject: &Subject, object: &ObjectRef) -> PermResult<()> {
        let (table, col) = Self::target(subject.kind());
        let sql = format!(
            "DELETE FROM {table} WHERE {col} = ? AND object_type = ? AND object_id = ?"
        );
        sqlx::query(&sql)
            .bind(subject.id().to_string())
            .bind(&object.object_type)
            .bind(object.object_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn grant_flag(
        &self,
        subject: &Subject,
        object: &ObjectRef,
        permission: &str,
    ) -> PermResult<()> {
        let (table, col) = Self::target(subject.kind());
        // INSERT OR IGNORE + primary key keeps duplicate grants idempotent.
        let sql = format!(
            "INSERT OR IGNORE INTO {table} ({col}, object_type, object_id, permission, created_at) \
             VALUES (?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(subject.id().to_string())
            .bind(&object.object_type)
            .bind(object.object_id.to_string())
            .bind(permission)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_flag(
        &self,
        subject: &Subject,
        object: &ObjectRef,
        permission: &str,
    ) -> PermResult<bool> {
        let (table, col) = Self::target(subject.kind());
        let sql = format!(
            "DELETE FROM {table} WHERE {col} = ? AND object_type = ? AND object_id = ? \
             AND permission = ?"
        );
        let result = sqlx::query(&sql)
            .bind(subject.id().to_string())
            .bind(&object.object_type)
            .bind(object.object_id.to_string())
            .bind(permission)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn grant_exists(&self, filter: &GrantFilter<'_>) -> PermResult<bool> {
        let (table, col, ids) = Self::filter_target(&filter.subject);
        if ids.is_empty() {
            return Ok(false);
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT 1 FROM {table}"));
        Self::push_where(&mut qb, col, &ids, filter);
        qb.push(" LIMIT 1");

        let row = qb.build().fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    async fn query_ids(&self, filter: &GrantFilter<'_>) -> PermResult<HashSet<Uuid>> {
        let (table, col, ids) = Self::filter_target(&filter.subject);
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT DISTINCT object_id FROM {table}"));
        Self::push_where(&mut qb, col, &ids, filter);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .filter_map(|r| Uuid::parse_str(&r.get::<String, _>("object_id")).ok())
            .collect())
    }

    async fn subjects_for_object(
        &self,
        kind: SubjectKind,
        object: &ObjectRef,
    ) -> PermResult<Vec<Subject>> {
        let (table, col) = Self::target(kind);
        let sql = format!(
            "SELECT DISTINCT {col} AS subject_id FROM {table} \
             WHERE object_type = ? AND object_id = ?"
        );
        let rows = sqlx::query(&sql)
            .bind(&object.object_type)
            .bind(object.object_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|r| Uuid::parse_str(&r.get::<String, _>("subject_id")).ok())
            .map(|id| match kind {
                SubjectKind::User => Subject::User(id),
                SubjectKind::Group => Subject::Group(id),
            })
            .collect())
    }
}
