//! HTTP handlers.

pub mod auth;
pub mod friends;
pub mod groups;
pub mod messages;

use axum::http::HeaderMap;

use crate::auth::UserInfo;
use crate::config::AppState;
use crate::error::{Error, Result};

pub use auth::{check_auth, login, logout, search_users, signup, update_profile};
pub use friends::{
    accept_friend_request, decline_friend_request, list_friend_requests, list_friends,
    remove_friend, send_friend_request,
};
pub use groups::{add_group_member, create_group, list_groups, remove_group_member};
pub use messages::{
    delete_message, edit_message, get_image, get_messages, mark_read, search_messages,
    send_message, sidebar_users,
};

/// Resolve the acting user from the Authorization bearer token.
pub(crate) async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserInfo> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| Error::Unauthorized("missing authorization".to_string()))?;

    state.auth.validate_session(token).await
}
