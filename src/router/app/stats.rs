use anyhow::anyhow;
use axum::{extract::State, http::StatusCode};
use tracing::info;

use std::sync::Arc;

use crate::{
    data::model::{Position, PositionField, Sport, SportProfile},
    error::AppError,
    extract::{Json, Path},
    middleware::CurrentUser,
    stats::{resolve_values, validate_year, SaveStatsRequest},
    AppState,
};

#[axum::debug_handler]
pub async fn sports(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Sport>>, AppError> {
    Ok(Json(state.stats.sports().await?))
}

#[axum::debug_handler]
pub async fn positions(
    Path(sport_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Position>>, AppError> {
    if !state.stats.sport_exists(sport_id).await? {
        return Err(AppError::NotFound("sport"));
    }
    Ok(Json(state.stats.positions(sport_id).await?))
}

#[axum::debug_handler]
pub async fn fields(
    Path(position_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PositionField>>, AppError> {
    if !state.stats.position_exists(position_id).await? {
        return Err(AppError::NotFound("position"));
    }
    Ok(Json(state.stats.fields(position_id).await?))
}

/// Saves one season of stats. Submitting the same sport, position and year
/// again replaces that season's values.
#[axum::debug_handler]
pub async fn save_stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SaveStatsRequest>,
) -> Result<Json<SportProfile>, AppError> {
    let year = validate_year(request.year, chrono::Utc::now().date_naive())?;

    let sport = state
        .stats
        .sport_by_name(request.sport.trim())
        .await?
        .ok_or(AppError::NotFound("sport"))?;
    let position = state
        .stats
        .position_by_name(sport.id, request.position.trim())
        .await?
        .ok_or(AppError::NotFound("position"))?;
    let fields = state.stats.fields(position.id).await?;
    let values = resolve_values(&fields, &request.values)?;

    let entry_id = state
        .stats
        .save_entry(user.id, sport.id, position.id, year, &values)
        .await?;
    info!(user_id = user.id, entry_id, year, sport = %sport.name, "stat entry saved");

    let saved = state
        .stats
        .user_stats(user.id, Some(entry_id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("stat entry {entry_id} vanished after saving"))?;

    Ok(Json(saved))
}

#[axum::debug_handler]
pub async fn user_stats(
    Path(user_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SportProfile>>, AppError> {
    if !state.users.exists(user_id).await? {
        return Err(AppError::NotFound("user"));
    }
    Ok(Json(state.stats.user_stats(user_id, None).await?))
}

#[axum::debug_handler]
pub async fn delete_entry(
    Path(entry_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    match state.stats.entry_owner(entry_id).await? {
        None => return Err(AppError::NotFound("stat entry")),
        Some(owner_id) if owner_id != user.id => {
            return Err(AppError::forbidden("only the owner can delete this entry"))
        }
        Some(_) => {}
    }

    state.stats.delete_entry(entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
