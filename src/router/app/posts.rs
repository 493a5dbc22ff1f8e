use axum::{extract::State, http::StatusCode};

use serde::{Deserialize, Serialize};
use tracing::info;

use std::sync::Arc;

use crate::{
    data::model::{Comment, NewPost, Post, PostKind},
    error::AppError,
    extract::{Json, Path, Query},
    middleware::CurrentUser,
    AppState,
};

use super::{clamp_limit, Page};

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 50;
const MAX_TITLE_CHARS: usize = 200;
const MAX_POST_CHARS: usize = 20_000;
const MAX_COMMENT_CHARS: usize = 2_000;

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Renders an article's markdown body.
pub fn render_article(body: &str) -> String {
    comrak::markdown_to_html(body, &comrak::Options::default())
}

#[derive(Deserialize, Debug)]
pub struct CreatePost {
    kind: PostKind,
    title: Option<String>,
    body: Option<String>,
    media_url: Option<String>,
}

impl CreatePost {
    fn validate(self) -> Result<NewPost, AppError> {
        let title = non_blank(self.title);
        let body = non_blank(self.body);
        let media_url = non_blank(self.media_url);

        match self.kind {
            PostKind::Article if title.is_none() || body.is_none() => {
                return Err(AppError::validation("articles need a title and a body"))
            }
            PostKind::Clip if media_url.is_none() => {
                return Err(AppError::validation("clips need a media_url"))
            }
            PostKind::Post if body.is_none() && media_url.is_none() => {
                return Err(AppError::validation("posts need text or media"))
            }
            _ => {}
        }

        if title
            .as_ref()
            .is_some_and(|t| t.chars().count() > MAX_TITLE_CHARS)
        {
            return Err(AppError::validation(format!(
                "titles are limited to {MAX_TITLE_CHARS} characters"
            )));
        }
        if body
            .as_ref()
            .is_some_and(|b| b.chars().count() > MAX_POST_CHARS)
        {
            return Err(AppError::validation(format!(
                "posts are limited to {MAX_POST_CHARS} characters"
            )));
        }

        Ok(NewPost {
            kind: self.kind,
            title,
            body,
            media_url,
        })
    }
}

#[axum::debug_handler]
pub async fn create_post(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(create): Json<CreatePost>,
) -> Result<(StatusCode, Json<Post>), AppError> {
    let new_post = create.validate()?;
    let post = state.posts.create(user.id, &new_post).await?;
    info!(post_id = post.id, author_id = user.id, kind = post.kind.as_str(), "post created");

    Ok((StatusCode::CREATED, Json(post)))
}

#[axum::debug_handler]
pub async fn feed(
    Query(page): Query<Page>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Post>>, AppError> {
    let limit = clamp_limit(page.limit, DEFAULT_LIMIT, MAX_LIMIT);
    Ok(Json(state.posts.feed(user.id, page.before, limit).await?))
}

#[derive(Deserialize, Debug)]
pub struct UserPostsParams {
    kind: Option<PostKind>,
    before: Option<i64>,
    limit: Option<i64>,
}

#[axum::debug_handler]
pub async fn user_posts(
    Path(author_id): Path<i64>,
    Query(params): Query<UserPostsParams>,
    State(state): State<Arc<AppState>>,
    CurrentUser(viewer): CurrentUser,
) -> Result<Json<Vec<Post>>, AppError> {
    if !state.users.exists(author_id).await? {
        return Err(AppError::NotFound("user"));
    }

    let limit = clamp_limit(params.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let posts = state
        .posts
        .by_author(author_id, viewer.id, params.kind, params.before, limit)
        .await?;

    Ok(Json(posts))
}

#[axum::debug_handler]
pub async fn post_by_id(
    Path(post_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(viewer): CurrentUser,
) -> Result<Json<Post>, AppError> {
    let mut post = state
        .posts
        .find(post_id, viewer.id)
        .await?
        .ok_or(AppError::NotFound("post"))?;

    if post.kind == PostKind::Article {
        post.body_html = post.body.as_deref().map(render_article);
    }

    Ok(Json(post))
}

#[axum::debug_handler]
pub async fn delete_post(
    Path(post_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    match state.posts.author_of(post_id).await? {
        None => return Err(AppError::NotFound("post")),
        Some(author_id) if author_id != user.id => {
            return Err(AppError::forbidden("only the author can delete this post"))
        }
        Some(_) => {}
    }

    state.posts.delete(post_id).await?;
    info!(post_id, "post deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize, Debug)]
pub struct LikeCount {
    like_count: i64,
}

async fn require_post(state: &AppState, post_id: i64) -> Result<(), AppError> {
    match state.posts.author_of(post_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound("post")),
    }
}

#[axum::debug_handler]
pub async fn like(
    Path(post_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<LikeCount>, AppError> {
    require_post(&state, post_id).await?;
    let like_count = state.posts.like(post_id, user.id).await?;
    Ok(Json(LikeCount { like_count }))
}

#[axum::debug_handler]
pub async fn unlike(
    Path(post_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<LikeCount>, AppError> {
    require_post(&state, post_id).await?;
    let like_count = state.posts.unlike(post_id, user.id).await?;
    Ok(Json(LikeCount { like_count }))
}

#[axum::debug_handler]
pub async fn comments(
    Path(post_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Comment>>, AppError> {
    require_post(&state, post_id).await?;
    Ok(Json(state.posts.comments(post_id).await?))
}

#[derive(Deserialize, Debug)]
pub struct NewComment {
    body: String,
}

#[axum::debug_handler]
pub async fn add_comment(
    Path(post_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(comment): Json<NewComment>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let body = comment.body.trim();
    if body.is_empty() {
        return Err(AppError::validation("comment cannot be empty"));
    }
    if body.chars().count() > MAX_COMMENT_CHARS {
        return Err(AppError::validation(format!(
            "comments are limited to {MAX_COMMENT_CHARS} characters"
        )));
    }
    require_post(&state, post_id).await?;

    let comment = state.posts.add_comment(post_id, user.id, body).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}
