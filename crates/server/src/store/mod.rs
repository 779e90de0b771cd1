//! Persistence layer: database connection plus the conversation store.

pub mod message_store;

pub use message_store::MessageStore;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::Result;

/// Open (creating if missing) the server database. All managers share the
/// returned pool.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true);
    Ok(SqlitePoolOptions::new().connect_with(options).await?)
}
