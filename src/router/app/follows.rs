use axum::{extract::State, http::StatusCode};

use std::sync::Arc;

use crate::{
    data::model::UserSummary,
    error::AppError,
    extract::{Json, Path},
    middleware::CurrentUser,
    AppState,
};

async fn require_user(state: &AppState, user_id: i64) -> Result<(), AppError> {
    if state.users.exists(user_id).await? {
        Ok(())
    } else {
        Err(AppError::NotFound("user"))
    }
}

#[axum::debug_handler]
pub async fn follow(
    Path(user_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    if user_id == user.id {
        return Err(AppError::validation("you cannot follow yourself"));
    }
    require_user(&state, user_id).await?;

    state.follows.follow(user.id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn unfollow(
    Path(user_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    state.follows.unfollow(user.id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn followers(
    Path(user_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    require_user(&state, user_id).await?;
    Ok(Json(state.follows.followers(user_id).await?))
}

#[axum::debug_handler]
pub async fn following(
    Path(user_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    require_user(&state, user_id).await?;
    Ok(Json(state.follows.following(user_id).await?))
}
