use axum::extract::State;

use serde::{Deserialize, Serialize};

use std::sync::Arc;

use crate::{
    data::model::{Post, UserSummary},
    error::AppError,
    extract::{Json, Query},
    middleware::CurrentUser,
    AppState,
};

use super::clamp_limit;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 50;

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    #[default]
    Users,
    Posts,
}

#[derive(Deserialize, Debug)]
pub struct SearchParams {
    q: Option<String>,
    #[serde(default)]
    kind: SearchKind,
    limit: Option<i64>,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum SearchResults {
    Users { users: Vec<UserSummary> },
    Posts { posts: Vec<Post> },
}

#[axum::debug_handler]
pub async fn search(
    Query(params): Query<SearchParams>,
    State(state): State<Arc<AppState>>,
    CurrentUser(viewer): CurrentUser,
) -> Result<Json<SearchResults>, AppError> {
    let query = params.q.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Err(AppError::validation("search query is required"));
    }
    let limit = clamp_limit(params.limit, DEFAULT_LIMIT, MAX_LIMIT);

    let results = match params.kind {
        SearchKind::Users => SearchResults::Users {
            users: state.users.search(query, limit).await?,
        },
        SearchKind::Posts => SearchResults::Posts {
            posts: state.posts.search(viewer.id, query, limit).await?,
        },
    };

    Ok(Json(results))
}
