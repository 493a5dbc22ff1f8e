use anyhow::anyhow;
use axum::{extract::State, http::StatusCode};

use serde::{Deserialize, Serialize};

use std::sync::Arc;

use crate::{
    data::model::{ConversationSummary, Message},
    error::AppError,
    extract::{Json, Path, Query},
    messaging::{self, participant_conversation},
    middleware::CurrentUser,
    realtime::OutgoingMessage,
    AppState,
};

use super::{clamp_limit, Page};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

#[axum::debug_handler]
pub async fn conversations(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    Ok(Json(state.messages.summaries(user.id).await?))
}

#[derive(Deserialize, Debug)]
pub struct OpenConversation {
    user_id: i64,
}

#[axum::debug_handler]
pub async fn open_conversation(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(open): Json<OpenConversation>,
) -> Result<Json<ConversationSummary>, AppError> {
    if open.user_id == user.id {
        return Err(AppError::validation("you cannot message yourself"));
    }
    if !state.users.exists(open.user_id).await? {
        return Err(AppError::NotFound("user"));
    }

    let conversation = state
        .messages
        .get_or_create_conversation(user.id, open.user_id)
        .await?;
    let summary = state
        .messages
        .summary(conversation.id, user.id)
        .await?
        .ok_or_else(|| anyhow!("conversation {} has no summary", conversation.id))?;

    Ok(Json(summary))
}

#[axum::debug_handler]
pub async fn messages(
    Path(conversation_id): Path<i64>,
    Query(page): Query<Page>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Message>>, AppError> {
    participant_conversation(&state, user.id, conversation_id).await?;

    let limit = clamp_limit(page.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let messages = state
        .messages
        .messages(conversation_id, page.before, limit)
        .await?;

    Ok(Json(messages))
}

#[axum::debug_handler]
pub async fn send(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(outgoing): Json<OutgoingMessage>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let message = messaging::send_message(&state, user.id, conversation_id, outgoing).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Serialize, Debug)]
pub struct ReadReceipt {
    message_ids: Vec<i64>,
}

#[axum::debug_handler]
pub async fn read(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ReadReceipt>, AppError> {
    let message_ids = messaging::mark_read(&state, user.id, conversation_id).await?;
    Ok(Json(ReadReceipt { message_ids }))
}
