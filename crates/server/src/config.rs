//! Server configuration and shared state.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::AuthManager;
use crate::blobs::ImageStore;
use crate::fanout::FanoutRouter;
use crate::friends::FriendManager;
use crate::groups::GroupManager;
use crate::presence::PresenceTable;
use crate::store::MessageStore;

/// Configuration for the chat server.
#[derive(Clone, Debug)]
pub struct ChatServerConfig {
    /// Root data directory.
    pub base_dir: PathBuf,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Image storage directory.
    pub images_dir: PathBuf,
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Max decoded image size in bytes.
    pub max_image_bytes: usize,
    /// Default page size for conversation history.
    pub history_page_size: i64,
}

impl Default for ChatServerConfig {
    fn default() -> Self {
        let base_dir = std::env::var("CHAT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("chat_data"));
        Self::with_base_dir(base_dir)
    }
}

impl ChatServerConfig {
    /// Create config with a custom base directory.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            db_path: base_dir.join("chatty.sqlite"),
            images_dir: base_dir.join("images"),
            base_dir,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            max_image_bytes: 5 * 1024 * 1024,
            history_page_size: 50,
        }
    }

    /// Ensure all directories exist.
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        tokio::fs::create_dir_all(&self.images_dir).await?;
        Ok(())
    }
}

/// App state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ChatServerConfig>,
    pub auth: Arc<AuthManager>,
    pub friends: Arc<FriendManager>,
    pub groups: Arc<GroupManager>,
    pub messages: Arc<MessageStore>,
    pub images: Arc<ImageStore>,
    pub presence: Arc<PresenceTable>,
    pub fanout: Arc<FanoutRouter>,
}
