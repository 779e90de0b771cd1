//! Authentication Module
//!
//! Handles user signup, login, session management, profile updates, and the
//! best-effort last-seen timestamp.

use std::collections::HashMap;

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

const SESSION_TTL_DAYS: i64 = 30;
const MIN_PASSWORD_LEN: usize = 6;

/// User record stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub profile_pic: Option<String>,
    pub bio: Option<String>,
    pub status_line: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Public user info (no sensitive data).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub username: String,
    pub profile_pic: Option<String>,
    pub bio: Option<String>,
    pub status_line: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            profile_pic: user.profile_pic,
            bio: user.bio,
            status_line: user.status_line,
            last_seen: user.last_seen,
        }
    }
}

/// Session token for authenticated requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Fields a user may change about themselves.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub profile_pic: Option<String>,
    pub bio: Option<String>,
    pub status_line: Option<String>,
}

type UserRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

const USER_COLUMNS: &str =
    "id, email, username, password_hash, profile_pic, bio, status_line, last_seen, created_at";

fn user_from_row(row: UserRow) -> User {
    let (id, email, username, password_hash, profile_pic, bio, status_line, last_seen, created_at) =
        row;
    User {
        id,
        email,
        username,
        password_hash,
        profile_pic,
        bio,
        status_line,
        last_seen: last_seen.and_then(|t| t.parse().ok()),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    }
}

/// Auth manager handles all authentication.
pub struct AuthManager {
    pool: SqlitePool,
    /// In-memory session cache in front of the sessions table.
    sessions: RwLock<HashMap<String, Session>>,
}

impl AuthManager {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let manager = Self {
            pool,
            sessions: RwLock::new(HashMap::new()),
        };
        manager.init_db().await?;
        info!("[Auth] Initialized");
        Ok(manager)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                username TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                profile_pic TEXT,
                bio TEXT,
                status_line TEXT,
                last_seen TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register a new user.
    pub async fn signup(&self, email: String, username: String, password: String) -> Result<User> {
        if email.trim().is_empty() || username.trim().is_empty() {
            return Err(Error::Validation("all fields are required".to_string()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(Error::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(Error::Validation("email already registered".to_string()));
        }

        let password_hash = hash(&password, DEFAULT_COST)
            .map_err(|e| Error::Internal(format!("failed to hash password: {e}")))?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            username,
            password_hash,
            profile_pic: None,
            bio: None,
            status_line: None,
            last_seen: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO users (id, email, username, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!("[Auth] User registered: {} ({})", user.username, user.email);
        Ok(user)
    }

    /// Login user and create a session.
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, Session)> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        let user = row
            .map(user_from_row)
            .ok_or_else(|| Error::Unauthorized("invalid credentials".to_string()))?;

        let valid = verify(password, &user.password_hash)
            .map_err(|e| Error::Internal(format!("failed to verify password: {e}")))?;
        if !valid {
            warn!("[Auth] Failed login attempt for {}", email);
            return Err(Error::Unauthorized("invalid credentials".to_string()));
        }

        let session = self.create_session(&user.id).await?;
        info!("[Auth] User logged in: {}", user.username);
        Ok((user, session))
    }

    async fn create_session(&self, user_id: &str) -> Result<Session> {
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::days(SESSION_TTL_DAYS),
        };

        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());

        Ok(session)
    }

    /// Validate a session token and resolve its user.
    pub async fn validate_session(&self, token: &str) -> Result<UserInfo> {
        let cached = {
            let sessions = self.sessions.read().await;
            sessions.get(token).cloned()
        };

        let user_id = match cached {
            Some(session) if session.expires_at > Utc::now() => session.user_id,
            _ => {
                let row: Option<(String, String)> = sqlx::query_as(
                    "SELECT user_id, expires_at FROM sessions WHERE token = ?",
                )
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

                let (user_id, expires_at) = row
                    .ok_or_else(|| Error::Unauthorized("invalid or expired session".to_string()))?;
                let expires: DateTime<Utc> = expires_at
                    .parse()
                    .map_err(|_| Error::Internal("malformed session expiry".to_string()))?;
                if expires <= Utc::now() {
                    return Err(Error::Unauthorized("invalid or expired session".to_string()));
                }
                user_id
            }
        };

        self.get_user(&user_id).await
    }

    /// Logout user (invalidate session).
    pub async fn logout(&self, token: &str) -> Result<()> {
        self.sessions.write().await.remove(token);

        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        info!("[Auth] Session invalidated");
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<UserInfo> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row)
            .map(UserInfo::from)
            .ok_or(Error::NotFound("user"))
    }

    /// Apply profile changes and return the updated record.
    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<UserInfo> {
        if let Some(profile_pic) = &update.profile_pic {
            sqlx::query("UPDATE users SET profile_pic = ? WHERE id = ?")
                .bind(profile_pic)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(bio) = &update.bio {
            sqlx::query("UPDATE users SET bio = ? WHERE id = ?")
                .bind(bio)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(status_line) = &update.status_line {
            sqlx::query("UPDATE users SET status_line = ? WHERE id = ?")
                .bind(status_line)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }

        self.get_user(user_id).await
    }

    /// Best-effort last-seen bump, fired on connect and disconnect. May
    /// transiently lag actual connection state.
    pub async fn touch_last_seen(&self, user_id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET last_seen = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Case-insensitive substring search over usernames and emails,
    /// excluding the searching user.
    pub async fn search_users(&self, me: &str, query: &str) -> Result<Vec<UserInfo>> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query is required".to_string()));
        }

        let pattern = format!("%{}%", query.trim());
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE id != ? AND (username LIKE ? COLLATE NOCASE OR email LIKE ? COLLATE NOCASE)
            ORDER BY username
            "#
        ))
        .bind(me)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(user_from_row)
            .map(UserInfo::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use tempfile::TempDir;

    async fn manager() -> (TempDir, AuthManager) {
        let dir = TempDir::new().unwrap();
        let pool = store::connect(&dir.path().join("test.sqlite")).await.unwrap();
        (dir, AuthManager::new(pool).await.unwrap())
    }

    #[tokio::test]
    async fn signup_login_roundtrip() {
        let (_dir, auth) = manager().await;
        let user = auth
            .signup(
                "alice@example.com".to_string(),
                "alice".to_string(),
                "secret1".to_string(),
            )
            .await
            .unwrap();

        let (logged_in, session) = auth.login("alice@example.com", "secret1").await.unwrap();
        assert_eq!(logged_in.id, user.id);

        let info = auth.validate_session(&session.token).await.unwrap();
        assert_eq!(info.username, "alice");

        auth.logout(&session.token).await.unwrap();
        assert!(auth.validate_session(&session.token).await.is_err());
    }

    #[tokio::test]
    async fn signup_rejects_duplicates_and_short_passwords() {
        let (_dir, auth) = manager().await;
        auth.signup(
            "alice@example.com".to_string(),
            "alice".to_string(),
            "secret1".to_string(),
        )
        .await
        .unwrap();

        let dup = auth
            .signup(
                "alice@example.com".to_string(),
                "alice2".to_string(),
                "secret1".to_string(),
            )
            .await;
        assert!(matches!(dup, Err(Error::Validation(_))));

        let short = auth
            .signup(
                "bob@example.com".to_string(),
                "bob".to_string(),
                "four".to_string(),
            )
            .await;
        assert!(matches!(short, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let (_dir, auth) = manager().await;
        auth.signup(
            "alice@example.com".to_string(),
            "alice".to_string(),
            "secret1".to_string(),
        )
        .await
        .unwrap();

        let err = auth.login("alice@example.com", "wrong password").await;
        assert!(matches!(err, Err(Error::Unauthorized(_))));
    }

    #[tokio::test]
    async fn search_excludes_self() {
        let (_dir, auth) = manager().await;
        let alice = auth
            .signup(
                "alice@example.com".to_string(),
                "alice".to_string(),
                "secret1".to_string(),
            )
            .await
            .unwrap();
        auth.signup(
            "alicia@example.com".to_string(),
            "alicia".to_string(),
            "secret1".to_string(),
        )
        .await
        .unwrap();

        let results = auth.search_users(&alice.id, "ali").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].username, "alicia");
    }
}
