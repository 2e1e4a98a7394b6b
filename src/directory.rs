//! Identity/group directory contract. The engine only ever asks two
//! questions of it: which groups does a user belong to, and who is in a
//! group. Everything else about identities stays external.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::PermResult;

#[async_trait]
pub trait Directory: Send + Sync {
    /// Groups the user belongs to.
    async fn groups_of(&self, user_id: Uuid) -> PermResult<Vec<Uuid>>;

    /// Users belonging to the group.
    async fn members_of(&self, group_id: Uuid) -> PermResult<Vec<Uuid>>;
}

/// Directory backed by the `group_members` table.
#[derive(Debug, Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> PermResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(group_id.to_string())
        .bind(user_id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> PermResult<()> {
        sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Directory for SqliteDirectory {
    async fn groups_of(&self, user_id: Uuid) -> PermResult<Vec<Uuid>> {
        let rows = sqlx::query("SELECT group_id FROM group_members WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Uuid::parse_str(&r.get::<String, _>("group_id")).ok())
            .collect())
    }

    async fn members_of(&self, group_id: Uuid) -> PermResult<Vec<Uuid>> {
        let rows = sqlx::query("SELECT user_id FROM group_members WHERE group_id = ?")
            .bind(group_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Uuid::parse_str(&r.get::<String, _>("user_id")).ok())
            .collect())
    }
}
