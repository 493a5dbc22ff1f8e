use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use tower_cookies::Cookies;
use tracing::warn;
use uuid::Uuid;

use std::sync::Arc;

use crate::{data::model::User, error::AppError, AppState};

pub const SESSION_COOKIE: &str = "athlinked-session";

/// Resolves the session cookie to the signed-in user, if any, and stores it as
/// an `Option<User>` request extension.
pub async fn extract_user(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Response {
    let token = cookies
        .get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok());

    let current_user = match token {
        Some(token) => match state.users.find_session_user(token).await {
            Ok(user) => user,
            Err(err) => {
                warn!(?err, "failed to resolve session");
                None
            }
        },
        None => None,
    };

    req.extensions_mut().insert(current_user);
    next.run(req).await
}

/// Rejects anonymous requests with 401.
pub async fn auth(
    Extension(current_user): Extension<Option<User>>,
    req: Request,
    next: Next,
) -> Response {
    match current_user {
        Some(_user) => next.run(req).await,
        None => AppError::Unauthorized.into_response(),
    }
}

/// The signed-in user. Handlers behind [`auth`] use this instead of unwrapping
/// the extension.
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Option<User>>()
            .cloned()
            .flatten()
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}
