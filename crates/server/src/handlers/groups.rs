//! Group Management Handlers

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::authenticate;
use crate::config::AppState;
use crate::error::Result;
use crate::models::Group;

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

/// POST /groups/create
pub async fn create_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>)> {
    let user = authenticate(&state, &headers).await?;
    info!("POST /groups/create - {:?} by {}", req.name, user.username);

    let group = state
        .groups
        .create_group(req.name, req.description, req.members, &user.id)
        .await?;

    Ok((StatusCode::CREATED, Json(group)))
}

/// GET /groups
pub async fn list_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Group>>> {
    let user = authenticate(&state, &headers).await?;
    let groups = state.groups.groups_for_user(&user.id).await?;
    Ok(Json(groups))
}

/// POST /groups/{group_id}/add/{user_id}
pub async fn add_group_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((group_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let requester = authenticate(&state, &headers).await?;
    info!("POST /groups/{}/add/{}", group_id, user_id);

    state.auth.get_user(&user_id).await?;
    state
        .groups
        .add_member(&group_id, &requester.id, &user_id)
        .await?;

    Ok(StatusCode::OK)
}

/// DELETE /groups/{group_id}/remove/{user_id}
pub async fn remove_group_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((group_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let requester = authenticate(&state, &headers).await?;
    info!("DELETE /groups/{}/remove/{}", group_id, user_id);

    state
        .groups
        .remove_member(&group_id, &requester.id, &user_id)
        .await?;

    Ok(StatusCode::OK)
}
