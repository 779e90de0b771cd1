//! Message Handlers
//!
//! Request/response side of the conversation flow. Every mutation persists
//! first and fans out second, so a failed write can never produce a phantom
//! delivery.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::info;

use super::authenticate;
use crate::config::AppState;
use crate::error::{Error, Result};
use crate::fanout::ServerEvent;
use crate::friends::Friend;
use crate::models::{ChatTarget, ChatType, Message, SendMessageInput};

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(rename = "type", default)]
    pub chat_type: ChatType,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMessageParams {
    pub chat_id: String,
    pub query: String,
    #[serde(rename = "type", default)]
    pub chat_type: ChatType,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub text: String,
}

/// GET /messages/users
///
/// Conversation partners for the sidebar: the user's friends.
pub async fn sidebar_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Friend>>> {
    let user = authenticate(&state, &headers).await?;
    let friends = state.friends.friends_of(&user.id).await?;
    Ok(Json(friends))
}

/// GET /messages/{chat_id}?type=&page=&limit=
///
/// History is queried newest-first for pagination and re-reversed here so
/// clients render oldest-first.
pub async fn get_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Message>>> {
    let me = authenticate(&state, &headers).await?;
    info!("GET /messages/{} ({:?})", chat_id, params.chat_type);

    let page = params.page.unwrap_or(1);
    let limit = params
        .limit
        .unwrap_or(state.config.history_page_size)
        .clamp(1, 200);

    let mut messages = match params.chat_type {
        ChatType::Group => {
            require_membership(&state, &chat_id, &me.id).await?;
            state.messages.group_history(&chat_id, page, limit).await?
        }
        ChatType::User => {
            state
                .messages
                .direct_history(&me.id, &chat_id, page, limit)
                .await?
        }
    };

    messages.reverse();
    Ok(Json(messages))
}

/// POST /messages/send/{chat_id}
pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
    Json(input): Json<SendMessageInput>,
) -> Result<(StatusCode, Json<Message>)> {
    let me = authenticate(&state, &headers).await?;
    info!("POST /messages/send/{} from {}", chat_id, me.username);

    let target = match input.chat_type {
        ChatType::Group => {
            require_membership(&state, &chat_id, &me.id).await?;
            ChatTarget::group(&chat_id)
        }
        ChatType::User => {
            state.auth.get_user(&chat_id).await?;
            ChatTarget::direct(&chat_id)
        }
    };

    let image = match input.image {
        Some(payload) => Some(state.images.store_base64(&payload).await?),
        None => None,
    };

    let message = Message::compose(&me.id, target, input.text, image, input.reply_to)?;
    state.messages.save(&message).await?;

    // Fanout only after the write is confirmed.
    state
        .fanout
        .deliver_for_message(&message, ServerEvent::NewMessage(message.clone()))
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// PUT /messages/edit/{message_id}
pub async fn edit_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<Message>> {
    let me = authenticate(&state, &headers).await?;
    info!("PUT /messages/edit/{} by {}", message_id, me.username);

    let updated = state.messages.edit(&message_id, &me.id, &req.text).await?;

    state
        .fanout
        .deliver_for_message(&updated, ServerEvent::MessageEdited(updated.clone()))
        .await?;

    Ok(Json(updated))
}

/// DELETE /messages/delete/{message_id}
pub async fn delete_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> Result<StatusCode> {
    let me = authenticate(&state, &headers).await?;
    info!("DELETE /messages/delete/{} by {}", message_id, me.username);

    let deleted = state.messages.delete(&message_id, &me.id).await?;

    // The delete event carries only the id.
    state
        .fanout
        .deliver_for_message(&deleted, ServerEvent::MessageDeleted(deleted.id.clone()))
        .await?;

    Ok(StatusCode::OK)
}

/// GET /messages/search?chatId=&query=&type=
pub async fn search_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchMessageParams>,
) -> Result<Json<Vec<Message>>> {
    let me = authenticate(&state, &headers).await?;

    let scope = match params.chat_type {
        ChatType::Group => {
            require_membership(&state, &params.chat_id, &me.id).await?;
            ChatTarget::group(&params.chat_id)
        }
        ChatType::User => ChatTarget::direct(&params.chat_id),
    };

    let hits = state.messages.search(&scope, &me.id, &params.query).await?;
    Ok(Json(hits))
}

/// POST /messages/read/{message_id}
///
/// Idempotent; only conversation participants may mark a message read.
pub async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> Result<StatusCode> {
    let me = authenticate(&state, &headers).await?;

    let message = state.messages.get(&message_id).await?;
    let can_read = match &message.target {
        ChatTarget::Direct { receiver_id } => {
            message.sender_id == me.id || *receiver_id == me.id
        }
        ChatTarget::Group { group_id } => state.groups.is_member(group_id, &me.id).await?,
    };
    if !can_read {
        return Err(Error::Forbidden(
            "not a participant of this conversation".to_string(),
        ));
    }

    state.messages.mark_read(&message_id, &me.id).await?;
    Ok(StatusCode::OK)
}

/// GET /images/{hash}
pub async fn get_image(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<(HeaderMap, Bytes)> {
    let data = state.images.read(&hash).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        crate::blobs::ImageStore::content_type(&data).parse().unwrap(),
    );

    Ok((headers, data))
}

async fn require_membership(state: &AppState, group_id: &str, user_id: &str) -> Result<()> {
    if !state.groups.is_member(group_id, user_id).await? {
        return Err(Error::Forbidden(
            "not a member of this group".to_string(),
        ));
    }
    Ok(())
}
