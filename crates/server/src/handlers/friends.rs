//! Friend Request Handlers
//!
//! The friend-flow mutations also notify the affected user over their live
//! connection when they are online.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::info;

use super::authenticate;
use crate::config::AppState;
use crate::error::Result;
use crate::fanout::{FriendEventKind, ServerEvent};
use crate::friends::{Friend, FriendRequest};

/// GET /auth/friends
pub async fn list_friends(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Friend>>> {
    let user = authenticate(&state, &headers).await?;
    let friends = state.friends.friends_of(&user.id).await?;
    Ok(Json(friends))
}

/// GET /auth/friend-requests
pub async fn list_friend_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<FriendRequest>>> {
    let user = authenticate(&state, &headers).await?;
    let requests = state.friends.pending_requests(&user.id).await?;
    Ok(Json(requests))
}

/// POST /auth/friend-request/{user_id}
pub async fn send_friend_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<StatusCode> {
    let me = authenticate(&state, &headers).await?;
    info!("POST /auth/friend-request/{} from {}", user_id, me.username);

    // The target must exist before anything is written.
    state.auth.get_user(&user_id).await?;
    state.friends.send_request(&me.id, &user_id).await?;

    state
        .fanout
        .deliver_to_user(
            &user_id,
            ServerEvent::FriendRequest {
                from: me.id,
                kind: FriendEventKind::Received,
            },
        )
        .await;

    Ok(StatusCode::OK)
}

/// POST /auth/accept-friend/{user_id}
pub async fn accept_friend_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<StatusCode> {
    let me = authenticate(&state, &headers).await?;
    info!("POST /auth/accept-friend/{} by {}", user_id, me.username);

    state.friends.accept_request(&me.id, &user_id).await?;

    // Tell the original requester, if online.
    state
        .fanout
        .deliver_to_user(
            &user_id,
            ServerEvent::FriendRequest {
                from: me.id,
                kind: FriendEventKind::Accepted,
            },
        )
        .await;

    Ok(StatusCode::OK)
}

/// POST /auth/decline-friend/{user_id}
pub async fn decline_friend_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<StatusCode> {
    let me = authenticate(&state, &headers).await?;
    info!("POST /auth/decline-friend/{} by {}", user_id, me.username);

    state.friends.decline_request(&me.id, &user_id).await?;
    Ok(StatusCode::OK)
}

/// POST /auth/remove-friend/{user_id}
pub async fn remove_friend(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<StatusCode> {
    let me = authenticate(&state, &headers).await?;
    info!("POST /auth/remove-friend/{} by {}", user_id, me.username);

    state.friends.remove_friend(&me.id, &user_id).await?;
    Ok(StatusCode::OK)
}
