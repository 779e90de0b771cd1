//! Auth and profile handlers.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::authenticate;
use crate::auth::{ProfileUpdate, UserInfo};
use crate::config::AppState;
use crate::error::Result;
use crate::friends::RelationSummary;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub user: UserInfo,
    #[serde(flatten)]
    pub relation: RelationSummary,
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    info!("POST /auth/signup - {}", req.email);

    let user = state
        .auth
        .signup(req.email, req.username, req.password.clone())
        .await?;
    let (user, session) = state.auth.login(&user.email, &req.password).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token: session.token,
            user: user.into(),
        }),
    ))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    info!("POST /auth/login - {}", req.email);

    let (user, session) = state.auth.login(&req.email, &req.password).await?;
    Ok(Json(AuthResponse {
        token: session.token,
        user: user.into(),
    }))
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        state.auth.logout(token).await?;
    }
    Ok(StatusCode::OK)
}

/// GET /auth/check
pub async fn check_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserInfo>> {
    let user = authenticate(&state, &headers).await?;
    Ok(Json(user))
}

/// PUT /auth/update-profile
pub async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut update): Json<ProfileUpdate>,
) -> Result<Json<UserInfo>> {
    let user = authenticate(&state, &headers).await?;
    info!("PUT /auth/update-profile - {}", user.username);

    // Base64 payloads become stored images; the record keeps only the URL.
    if let Some(payload) = update.profile_pic.take() {
        update.profile_pic = Some(state.images.store_base64(&payload).await?);
    }

    let updated = state.auth.update_profile(&user.id, update).await?;
    Ok(Json(updated))
}

/// GET /auth/search?query=
///
/// Relationship status and mutual-friend counts come from one batch lookup
/// joined in memory, not a query per result.
pub async fn search_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>> {
    let me = authenticate(&state, &headers).await?;
    info!("GET /auth/search - {:?}", params.query);

    let users = state.auth.search_users(&me.id, &params.query).await?;
    let ids: Vec<String> = users.iter().map(|u| u.id.clone()).collect();
    let mut summaries = state.friends.relation_summary(&me.id, &ids).await?;

    let results = users
        .into_iter()
        .filter_map(|user| {
            summaries
                .remove(&user.id)
                .map(|relation| SearchResult { user, relation })
        })
        .collect();

    Ok(Json(results))
}
