//! Friend Request & Contacts Module
//!
//! Handles friend requests and the symmetric friend relation. Friendship is
//! stored as a contact row in both directions; the two rows are created and
//! deleted together.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Friend request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}

/// Friend request record, enriched with sender details for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: String,
    pub from_user_id: String,
    pub from_username: String,
    pub from_profile_pic: Option<String>,
    pub to_user_id: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// An established friend, as shown in the sidebar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub user_id: String,
    pub username: String,
    pub profile_pic: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Relationship of a search result to the searching user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationStatus {
    Friend,
    RequestSent,
    RequestReceived,
    None,
}

/// Batch relationship summary for one candidate user.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationSummary {
    pub status: RelationStatus,
    pub mutual_friends: usize,
}

pub struct FriendManager {
    pool: SqlitePool,
}

impl FriendManager {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let manager = Self { pool };
        manager.init_db().await?;
        info!("[Friends] Initialized");
        Ok(manager)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS friend_requests (
                id TEXT PRIMARY KEY,
                from_user_id TEXT NOT NULL,
                to_user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                responded_at TEXT,
                FOREIGN KEY (from_user_id) REFERENCES users(id),
                FOREIGN KEY (to_user_id) REFERENCES users(id),
                UNIQUE(from_user_id, to_user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                user_id TEXT NOT NULL,
                contact_user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, contact_user_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (contact_user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Send a friend request. A previously declined request may be re-sent;
    /// the old row is reset to pending.
    pub async fn send_request(&self, from_user_id: &str, to_user_id: &str) -> Result<()> {
        if from_user_id == to_user_id {
            return Err(Error::Validation(
                "cannot send a friend request to yourself".to_string(),
            ));
        }

        if self.are_friends(from_user_id, to_user_id).await? {
            return Err(Error::Validation("already friends".to_string()));
        }

        let existing: Option<(String, RequestStatus)> = sqlx::query_as(
            "SELECT id, status FROM friend_requests WHERE from_user_id = ? AND to_user_id = ?",
        )
        .bind(from_user_id)
        .bind(to_user_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some((_, RequestStatus::Pending)) => {
                return Err(Error::Validation("request already sent".to_string()));
            }
            Some((id, _)) => {
                sqlx::query(
                    "UPDATE friend_requests SET status = 'pending', created_at = ?, responded_at = NULL WHERE id = ?",
                )
                .bind(Utc::now().to_rfc3339())
                .bind(&id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO friend_requests (id, from_user_id, to_user_id, status, created_at) VALUES (?, ?, ?, 'pending', ?)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(from_user_id)
                .bind(to_user_id)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
            }
        }

        info!("[Friends] Request sent: {} -> {}", from_user_id, to_user_id);
        Ok(())
    }

    /// Accept a pending request from `from_user_id`, creating the symmetric
    /// contact pair.
    pub async fn accept_request(&self, accepter_id: &str, from_user_id: &str) -> Result<()> {
        self.respond(accepter_id, from_user_id, RequestStatus::Accepted)
            .await?;

        let now = Utc::now().to_rfc3339();
        for (a, b) in [(from_user_id, accepter_id), (accepter_id, from_user_id)] {
            sqlx::query(
                "INSERT OR IGNORE INTO contacts (user_id, contact_user_id, created_at) VALUES (?, ?, ?)",
            )
            .bind(a)
            .bind(b)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }

        info!(
            "[Friends] Request accepted: {} <-> {}",
            from_user_id, accepter_id
        );
        Ok(())
    }

    /// Decline a pending request from `from_user_id`.
    pub async fn decline_request(&self, decliner_id: &str, from_user_id: &str) -> Result<()> {
        self.respond(decliner_id, from_user_id, RequestStatus::Declined)
            .await?;
        info!(
            "[Friends] Request declined: {} -> {}",
            from_user_id, decliner_id
        );
        Ok(())
    }

    async fn respond(&self, to_user_id: &str, from_user_id: &str, status: RequestStatus) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE friend_requests SET status = ?, responded_at = ? WHERE from_user_id = ? AND to_user_id = ? AND status = 'pending'",
        )
        .bind(status)
        .bind(Utc::now().to_rfc3339())
        .bind(from_user_id)
        .bind(to_user_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::NotFound("pending friend request"));
        }
        Ok(())
    }

    /// Pending requests addressed to the user, newest first.
    pub async fn pending_requests(&self, user_id: &str) -> Result<Vec<FriendRequest>> {
        let rows: Vec<(String, String, String, Option<String>, String, String)> = sqlx::query_as(
            r#"
            SELECT fr.id, fr.from_user_id, u.username, u.profile_pic, fr.to_user_id, fr.created_at
            FROM friend_requests fr
            JOIN users u ON fr.from_user_id = u.id
            WHERE fr.to_user_id = ? AND fr.status = 'pending'
            ORDER BY fr.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, from_user_id, from_username, from_profile_pic, to_user_id, created_at)| {
                    FriendRequest {
                        id,
                        from_user_id,
                        from_username,
                        from_profile_pic,
                        to_user_id,
                        status: RequestStatus::Pending,
                        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                        responded_at: None,
                    }
                },
            )
            .collect())
    }

    /// The user's friends, ordered by name.
    pub async fn friends_of(&self, user_id: &str) -> Result<Vec<Friend>> {
        let rows: Vec<(String, String, Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT c.contact_user_id, u.username, u.profile_pic, u.last_seen
            FROM contacts c
            JOIN users u ON c.contact_user_id = u.id
            WHERE c.user_id = ?
            ORDER BY u.username
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, username, profile_pic, last_seen)| Friend {
                user_id,
                username,
                profile_pic,
                last_seen: last_seen.and_then(|t| t.parse().ok()),
            })
            .collect())
    }

    /// Remove a friendship in both directions.
    pub async fn remove_friend(&self, user_id: &str, contact_user_id: &str) -> Result<()> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM contacts WHERE
             (user_id = ? AND contact_user_id = ?) OR
             (user_id = ? AND contact_user_id = ?)
            "#,
        )
        .bind(user_id)
        .bind(contact_user_id)
        .bind(contact_user_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if deleted.rows_affected() == 0 {
            return Err(Error::NotFound("friend"));
        }

        info!("[Friends] Removed: {} <-> {}", user_id, contact_user_id);
        Ok(())
    }

    pub async fn are_friends(&self, a: &str, b: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM contacts WHERE user_id = ? AND contact_user_id = ?")
                .bind(a)
                .bind(b)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Relationship status and mutual-friend count for a batch of candidate
    /// users, computed with a fixed number of queries and joined in memory.
    pub async fn relation_summary(
        &self,
        me: &str,
        candidates: &[String],
    ) -> Result<HashMap<String, RelationSummary>> {
        if candidates.is_empty() {
            return Ok(HashMap::new());
        }

        let my_friends: HashSet<String> =
            sqlx::query_as::<_, (String,)>("SELECT contact_user_id FROM contacts WHERE user_id = ?")
                .bind(me)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|(id,)| id)
                .collect();

        let pending: Vec<(String, String)> = sqlx::query_as(
            "SELECT from_user_id, to_user_id FROM friend_requests WHERE status = 'pending' AND (from_user_id = ? OR to_user_id = ?)",
        )
        .bind(me)
        .bind(me)
        .fetch_all(&self.pool)
        .await?;

        let sent: HashSet<&str> = pending
            .iter()
            .filter(|(from, _)| from == me)
            .map(|(_, to)| to.as_str())
            .collect();
        let received: HashSet<&str> = pending
            .iter()
            .filter(|(_, to)| to == me)
            .map(|(from, _)| from.as_str())
            .collect();

        // One query for every candidate's friend list, for mutual counts.
        let placeholders = vec!["?"; candidates.len()].join(", ");
        let sql = format!(
            "SELECT user_id, contact_user_id FROM contacts WHERE user_id IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for candidate in candidates {
            query = query.bind(candidate);
        }
        let mut their_friends: HashMap<String, HashSet<String>> = HashMap::new();
        for (owner, friend) in query.fetch_all(&self.pool).await? {
            their_friends.entry(owner).or_default().insert(friend);
        }

        Ok(candidates
            .iter()
            .map(|candidate| {
                let status = if my_friends.contains(candidate) {
                    RelationStatus::Friend
                } else if sent.contains(candidate.as_str()) {
                    RelationStatus::RequestSent
                } else if received.contains(candidate.as_str()) {
                    RelationStatus::RequestReceived
                } else {
                    RelationStatus::None
                };
                let mutual_friends = their_friends
                    .get(candidate)
                    .map(|friends| friends.intersection(&my_friends).count())
                    .unwrap_or(0);
                (
                    candidate.clone(),
                    RelationSummary {
                        status,
                        mutual_friends,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthManager;
    use crate::store;
    use tempfile::TempDir;

    async fn managers() -> (TempDir, AuthManager, FriendManager) {
        let dir = TempDir::new().unwrap();
        let pool = store::connect(&dir.path().join("test.sqlite")).await.unwrap();
        let auth = AuthManager::new(pool.clone()).await.unwrap();
        let friends = FriendManager::new(pool).await.unwrap();
        (dir, auth, friends)
    }

    async fn user(auth: &AuthManager, name: &str) -> String {
        auth.signup(
            format!("{name}@example.com"),
            name.to_string(),
            "password".to_string(),
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn request_lifecycle_creates_symmetric_friendship() {
        let (_dir, auth, friends) = managers().await;
        let alice = user(&auth, "alice").await;
        let bob = user(&auth, "bob").await;

        friends.send_request(&alice, &bob).await.unwrap();
        let pending = friends.pending_requests(&bob).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].from_username, "alice");

        friends.accept_request(&bob, &alice).await.unwrap();
        assert!(friends.are_friends(&alice, &bob).await.unwrap());
        assert!(friends.are_friends(&bob, &alice).await.unwrap());
        assert!(friends.pending_requests(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_pending_request_is_rejected() {
        let (_dir, auth, friends) = managers().await;
        let alice = user(&auth, "alice").await;
        let bob = user(&auth, "bob").await;

        friends.send_request(&alice, &bob).await.unwrap();
        let err = friends.send_request(&alice, &bob).await;
        assert!(matches!(err, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn declined_request_can_be_resent_as_single_pending_row() {
        let (_dir, auth, friends) = managers().await;
        let alice = user(&auth, "alice").await;
        let bob = user(&auth, "bob").await;

        friends.send_request(&alice, &bob).await.unwrap();
        friends.decline_request(&bob, &alice).await.unwrap();
        assert!(friends.pending_requests(&bob).await.unwrap().is_empty());

        friends.send_request(&alice, &bob).await.unwrap();
        let pending = friends.pending_requests(&bob).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn relation_summary_is_joined_in_memory() {
        let (_dir, auth, friends) = managers().await;
        let alice = user(&auth, "alice").await;
        let bob = user(&auth, "bob").await;
        let carol = user(&auth, "carol").await;
        let dave = user(&auth, "dave").await;

        // alice <-> bob friends; alice -> carol pending; dave unrelated.
        friends.send_request(&alice, &bob).await.unwrap();
        friends.accept_request(&bob, &alice).await.unwrap();
        friends.send_request(&alice, &carol).await.unwrap();
        // bob <-> carol friends, making bob a mutual friend of alice/carol.
        friends.send_request(&bob, &carol).await.unwrap();
        friends.accept_request(&carol, &bob).await.unwrap();

        let summary = friends
            .relation_summary(
                &alice,
                &[bob.clone(), carol.clone(), dave.clone()],
            )
            .await
            .unwrap();

        assert_eq!(summary[&bob].status, RelationStatus::Friend);
        assert_eq!(summary[&carol].status, RelationStatus::RequestSent);
        assert_eq!(summary[&carol].mutual_friends, 1);
        assert_eq!(summary[&dave].status, RelationStatus::None);
        assert_eq!(summary[&dave].mutual_friends, 0);
    }
}
