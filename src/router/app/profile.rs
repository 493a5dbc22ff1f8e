use axum::extract::State;

use serde::Deserialize;

use std::sync::Arc;

use crate::{
    auth::normalize_sports,
    data::model::{Profile, ProfileUpdate, User, UserSummary, UserType},
    error::AppError,
    extract::{Json, Path},
    middleware::CurrentUser,
    AppState,
};

#[axum::debug_handler]
pub async fn profile(
    Path(user_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(viewer): CurrentUser,
) -> Result<Json<Profile>, AppError> {
    state
        .users
        .profile(user_id, viewer.id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("user"))
}

#[derive(Deserialize, Debug, Default)]
pub struct UpdateProfile {
    full_name: Option<String>,
    bio: Option<String>,
    city: Option<String>,
    avatar_url: Option<String>,
    cover_url: Option<String>,
    sports_played: Option<Vec<String>>,
    primary_sport: Option<String>,
}

impl UpdateProfile {
    /// Sports and primary sport are always resolved together so the primary
    /// stays one of the sports played.
    fn into_update(self, current: &User) -> Result<ProfileUpdate, AppError> {
        let full_name = match self.full_name {
            Some(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(AppError::validation("full name is required"));
                }
                Some(name)
            }
            None => None,
        };

        let (sports_played, primary_sport) =
            if self.sports_played.is_some() || self.primary_sport.is_some() {
                let sports = self
                    .sports_played
                    .unwrap_or_else(|| current.sports_played.clone());
                let primary = match self.primary_sport {
                    Some(primary) => Some(primary),
                    None => current
                        .primary_sport
                        .clone()
                        .filter(|old| sports.iter().any(|s| s.trim().eq_ignore_ascii_case(old))),
                };
                let (played, primary) = normalize_sports(&sports, primary.as_deref())?;
                (Some(played), primary)
            } else {
                (None, None)
            };

        let trimmed = |value: Option<String>| value.map(|v| v.trim().to_string());

        Ok(ProfileUpdate {
            full_name,
            bio: trimmed(self.bio),
            city: trimmed(self.city),
            avatar_url: trimmed(self.avatar_url),
            cover_url: trimmed(self.cover_url),
            sports_played,
            primary_sport,
        })
    }
}

#[axum::debug_handler]
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(update): Json<UpdateProfile>,
) -> Result<Json<User>, AppError> {
    let update = update.into_update(&user)?;
    state
        .users
        .update_profile(user.id, &update)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("user"))
}

#[axum::debug_handler]
pub async fn children(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    if user.user_type != UserType::Parent {
        return Err(AppError::forbidden("only parent accounts have linked children"));
    }

    let Some(email) = user.email.as_deref() else {
        return Ok(Json(Vec::new()));
    };

    Ok(Json(state.users.children_of(email).await?))
}
