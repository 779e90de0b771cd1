//! Chatty Chat Server Library
//!
//! Real-time messaging server: REST endpoints for accounts, friends, groups,
//! and conversation history, plus a websocket gateway that tracks presence
//! and fans live events out to online users.

pub mod auth;
pub mod blobs;
pub mod config;
pub mod error;
pub mod fanout;
pub mod friends;
pub mod gateway;
pub mod groups;
pub mod handlers;
pub mod models;
pub mod presence;
pub mod store;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use auth::AuthManager;
use blobs::ImageStore;
use config::{AppState, ChatServerConfig};
use fanout::FanoutRouter;
use friends::FriendManager;
use groups::GroupManager;
use handlers::{
    accept_friend_request,
    add_group_member,
    // Auth
    check_auth,
    create_group,
    decline_friend_request,
    delete_message,
    edit_message,
    get_image,
    get_messages,
    // Friends
    list_friend_requests,
    list_friends,
    // Groups
    list_groups,
    login,
    logout,
    mark_read,
    remove_friend,
    remove_group_member,
    search_messages,
    search_users,
    // Messages
    send_message,
    sidebar_users,
    signup,
    update_profile,
    send_friend_request,
};
use presence::PresenceTable;
use store::MessageStore;

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Chatty Server ===");
    info!("Features: Auth | Friends | Groups | Live Fanout");

    let config = ChatServerConfig::default();
    config.ensure_dirs().await?;
    info!("Data directory: {:?}", config.base_dir);

    // One pool shared by every manager.
    let pool = store::connect(&config.db_path).await?;

    let auth_manager = Arc::new(AuthManager::new(pool.clone()).await?);
    info!("Auth Manager initialized");

    let friend_manager = Arc::new(FriendManager::new(pool.clone()).await?);
    info!("Friend Manager initialized");

    let group_manager = Arc::new(GroupManager::new(pool.clone()).await?);
    info!("Group Manager initialized");

    let message_store = Arc::new(MessageStore::new(pool).await?);
    info!("Message Store initialized");

    let image_store = Arc::new(ImageStore::new(
        config.images_dir.clone(),
        config.max_image_bytes,
    ));

    // Presence is owned by the gateway; the fanout router only reads it.
    let presence = Arc::new(PresenceTable::new());
    let fanout = Arc::new(FanoutRouter::new(presence.clone(), group_manager.clone()));
    info!("Presence table and fanout router initialized");

    let addr = config.bind_addr;
    let app_state = AppState {
        config: Arc::new(config),
        auth: auth_manager,
        friends: friend_manager,
        groups: group_manager,
        messages: message_store,
        images: image_store,
        presence,
        fanout,
    };

    let app = Router::new()
        // Auth endpoints
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/check", get(check_auth))
        .route("/auth/update-profile", put(update_profile))
        .route("/auth/search", get(search_users))
        // Friends system
        .route("/auth/friends", get(list_friends))
        .route("/auth/friend-requests", get(list_friend_requests))
        .route("/auth/friend-request/{user_id}", post(send_friend_request))
        .route("/auth/accept-friend/{user_id}", post(accept_friend_request))
        .route(
            "/auth/decline-friend/{user_id}",
            post(decline_friend_request),
        )
        .route("/auth/remove-friend/{user_id}", post(remove_friend))
        // Groups
        .route("/groups/create", post(create_group))
        .route("/groups", get(list_groups))
        .route("/groups/{group_id}/add/{user_id}", post(add_group_member))
        .route(
            "/groups/{group_id}/remove/{user_id}",
            delete(remove_group_member),
        )
        // Messages (fixed paths before the {chat_id} catch-all)
        .route("/messages/users", get(sidebar_users))
        .route("/messages/search", get(search_messages))
        .route("/messages/{chat_id}", get(get_messages))
        .route("/messages/send/{chat_id}", post(send_message))
        .route("/messages/edit/{message_id}", put(edit_message))
        .route("/messages/delete/{message_id}", delete(delete_message))
        .route("/messages/read/{message_id}", post(mark_read))
        // Images
        .route("/images/{hash}", get(get_image))
        // Live gateway
        .route("/ws", get(gateway::ws_handler))
        // Health check
        .route("/health", get(health_check))
        .with_state(app_state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK - Chatty Server"
}
