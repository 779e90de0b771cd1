//! Group Chat Module
//!
//! Handles group creation and membership. Doubles as the membership provider
//! for the fanout router.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Group;

pub struct GroupManager {
    pool: SqlitePool,
}

impl GroupManager {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let manager = Self { pool };
        manager.init_db().await?;
        info!("[Groups] Initialized");
        Ok(manager)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (group_id, user_id),
                FOREIGN KEY (group_id) REFERENCES groups(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create a group. The creator is always a member and the sole initial
    /// admin.
    pub async fn create_group(
        &self,
        name: String,
        description: Option<String>,
        mut members: Vec<String>,
        created_by: &str,
    ) -> Result<Group> {
        if name.trim().is_empty() {
            return Err(Error::Validation("group name is required".to_string()));
        }
        if !members.iter().any(|m| m == created_by) {
            members.push(created_by.to_string());
        }
        members.sort();
        members.dedup();

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO groups (id, name, description, created_by, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name.trim())
        .bind(&description)
        .bind(created_by)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        for member in &members {
            sqlx::query(
                "INSERT INTO group_members (group_id, user_id, is_admin, joined_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(member)
            .bind(member == created_by)
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }

        info!("[Groups] Created group {} ({} members)", id, members.len());
        self.get_group(&id).await
    }

    pub async fn get_group(&self, group_id: &str) -> Result<Group> {
        let row: Option<(String, String, Option<String>, String, String)> = sqlx::query_as(
            "SELECT id, name, description, created_by, created_at FROM groups WHERE id = ?",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        let (id, name, description, created_by, created_at) =
            row.ok_or(Error::NotFound("group"))?;

        let member_rows: Vec<(String, bool)> = sqlx::query_as(
            "SELECT user_id, is_admin FROM group_members WHERE group_id = ? ORDER BY joined_at",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        let members = member_rows.iter().map(|(u, _)| u.clone()).collect();
        let admins = member_rows
            .iter()
            .filter(|(_, admin)| *admin)
            .map(|(u, _)| u.clone())
            .collect();

        Ok(Group {
            id,
            name,
            description,
            members,
            admins,
            created_by,
            created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    /// All groups the user belongs to.
    pub async fn groups_for_user(&self, user_id: &str) -> Result<Vec<Group>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT group_id FROM group_members WHERE user_id = ? ORDER BY joined_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut groups = Vec::with_capacity(ids.len());
        for (id,) in ids {
            groups.push(self.get_group(&id).await?);
        }
        Ok(groups)
    }

    /// Add a member. Admin-only.
    pub async fn add_member(&self, group_id: &str, requester: &str, user_id: &str) -> Result<()> {
        let group = self.get_group(group_id).await?;

        if !group.admins.iter().any(|a| a == requester) {
            return Err(Error::Forbidden(
                "only group admins can add members".to_string(),
            ));
        }
        if group.members.iter().any(|m| m == user_id) {
            return Err(Error::Validation("user already in group".to_string()));
        }

        sqlx::query(
            "INSERT INTO group_members (group_id, user_id, is_admin, joined_at) VALUES (?, ?, 0, ?)",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!("[Groups] Added {} to group {}", user_id, group_id);
        Ok(())
    }

    /// Remove a member. Admins may remove anyone; a member may remove
    /// themselves. A removal that would leave the group without an admin is
    /// rejected.
    pub async fn remove_member(
        &self,
        group_id: &str,
        requester: &str,
        user_id: &str,
    ) -> Result<()> {
        let group = self.get_group(group_id).await?;

        let requester_is_admin = group.admins.iter().any(|a| a == requester);
        if !requester_is_admin && requester != user_id {
            return Err(Error::Forbidden(
                "only group admins can remove other members".to_string(),
            ));
        }
        if !group.members.iter().any(|m| m == user_id) {
            return Err(Error::NotFound("group member"));
        }

        let removing_admin = group.admins.iter().any(|a| a == user_id);
        if removing_admin && group.admins.len() == 1 {
            return Err(Error::Validation(
                "group must retain at least one admin".to_string(),
            ));
        }

        sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        info!("[Groups] Removed {} from group {}", user_id, group_id);
        Ok(())
    }

    pub async fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?")
                .bind(group_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Current member ids, used by the fanout router to compute recipients.
    pub async fn members(&self, group_id: &str) -> Result<Vec<String>> {
        let group = self.get_group(group_id).await?;
        Ok(group.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use tempfile::TempDir;

    async fn manager() -> (TempDir, GroupManager) {
        let dir = TempDir::new().unwrap();
        let pool = store::connect(&dir.path().join("test.sqlite")).await.unwrap();
        (dir, GroupManager::new(pool).await.unwrap())
    }

    #[tokio::test]
    async fn creator_is_always_a_member_and_admin() {
        let (_dir, groups) = manager().await;
        let group = groups
            .create_group("team".to_string(), None, vec!["bob".to_string()], "alice")
            .await
            .unwrap();

        assert!(group.members.iter().any(|m| m == "alice"));
        assert_eq!(group.admins, vec!["alice"]);
    }

    #[tokio::test]
    async fn only_admins_add_members() {
        let (_dir, groups) = manager().await;
        let group = groups
            .create_group("team".to_string(), None, vec!["bob".to_string()], "alice")
            .await
            .unwrap();

        let err = groups.add_member(&group.id, "bob", "carol").await;
        assert!(matches!(err, Err(Error::Forbidden(_))));

        groups.add_member(&group.id, "alice", "carol").await.unwrap();
        assert!(groups.is_member(&group.id, "carol").await.unwrap());
    }

    #[tokio::test]
    async fn removing_the_last_admin_is_rejected() {
        let (_dir, groups) = manager().await;
        let group = groups
            .create_group("team".to_string(), None, vec!["bob".to_string()], "alice")
            .await
            .unwrap();

        let err = groups.remove_member(&group.id, "alice", "alice").await;
        assert!(matches!(err, Err(Error::Validation(_))));

        // Non-admin members can still leave.
        groups.remove_member(&group.id, "bob", "bob").await.unwrap();
        assert!(!groups.is_member(&group.id, "bob").await.unwrap());
    }

    #[tokio::test]
    async fn members_are_deduplicated() {
        let (_dir, groups) = manager().await;
        let group = groups
            .create_group(
                "team".to_string(),
                None,
                vec!["bob".to_string(), "bob".to_string(), "alice".to_string()],
                "alice",
            )
            .await
            .unwrap();
        assert_eq!(group.members.len(), 2);
    }
}
