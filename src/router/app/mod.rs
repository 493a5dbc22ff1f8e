use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use serde::Deserialize;

use std::sync::Arc;

use crate::{middleware::auth, AppState};

mod auth;
use auth::{login, logout, me, signup_start, signup_verify};
mod profile;
use profile::{children, profile, update_profile};
mod follows;
use follows::{follow, followers, following, unfollow};
mod search;
use search::search;
mod posts;
use posts::{
    add_comment, comments, create_post, delete_post, feed, like, post_by_id, unlike, user_posts,
};
mod messages;
use messages::{conversations, messages, open_conversation, read, send};
mod stats;
use stats::{delete_entry, fields, positions, save_stats, sports, user_stats};
mod ws;
use ws::ws_handler;
mod error;
use error::not_found;

/// Cursor pagination: items with an id below `before`, at most `limit`.
#[derive(Deserialize, Debug, Default)]
pub struct Page {
    before: Option<i64>,
    limit: Option<i64>,
}

pub(crate) fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let account_router = Router::new()
        .route("/signup/start", post(signup_start))
        .route("/signup/verify", post(signup_verify))
        .route("/login", post(login))
        .route("/logout", post(logout));

    let taxonomy_router = Router::new()
        .route("/sports", get(sports))
        .route("/sports/:id/positions", get(positions))
        .route("/positions/:id/fields", get(fields));

    let member_router = Router::new()
        .route("/me", get(me))
        .route("/profile", patch(update_profile))
        .route("/profile/:id", get(profile))
        .route("/parent/children", get(children))
        .route("/users/:id/follow", post(follow).delete(unfollow))
        .route("/users/:id/followers", get(followers))
        .route("/users/:id/following", get(following))
        .route("/users/:id/posts", get(user_posts))
        .route("/users/:id/stats", get(user_stats))
        .route("/search", get(search))
        .route("/posts", get(feed).post(create_post))
        .route("/posts/:id", get(post_by_id).delete(delete_post))
        .route("/posts/:id/like", post(like).delete(unlike))
        .route("/posts/:id/comments", get(comments).post(add_comment))
        .route("/conversations", get(conversations).post(open_conversation))
        .route("/conversations/:id/messages", get(messages).post(send))
        .route("/conversations/:id/read", post(read))
        .route("/stats", post(save_stats))
        .route("/stats/entries/:id", delete(delete_entry))
        .route_layer(axum::middleware::from_fn(auth));

    let socket_router = Router::new()
        .route("/ws", get(ws_handler))
        .route_layer(axum::middleware::from_fn(auth));

    Router::new()
        .nest(
            "/api",
            account_router.merge(taxonomy_router).merge(member_router),
        )
        .merge(socket_router)
        .fallback(not_found)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::{build_app, config::Config};

    /// The pool never connects; these requests are all answered before a
    /// query would run.
    fn app() -> Router {
        let config = Config::for_tests();
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(&config.database_url)
            .unwrap();
        build_app(Arc::new(AppState::new(pool, config)))
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None, 20, 50), 20);
        assert_eq!(clamp_limit(Some(0), 20, 50), 1);
        assert_eq!(clamp_limit(Some(-5), 20, 50), 1);
        assert_eq!(clamp_limit(Some(500), 20, 50), 50);
        assert_eq!(clamp_limit(Some(35), 20, 50), 35);
    }

    #[tokio::test]
    async fn me_requires_a_session() {
        let response = app()
            .oneshot(Request::get("/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await, json!({ "error": "authentication required" }));
    }

    #[tokio::test]
    async fn member_routes_reject_anonymous_requests() {
        let requests = [
            (Method::GET, "/api/posts"),
            (Method::GET, "/api/conversations"),
            (Method::GET, "/api/search?q=jordan"),
            (Method::GET, "/api/profile/1"),
            (Method::DELETE, "/api/posts/1"),
            (Method::POST, "/api/users/1/follow"),
            (Method::GET, "/api/users/1/stats"),
            (Method::GET, "/ws"),
        ];

        for (method, uri) in requests {
            let response = app()
                .oneshot(
                    Request::builder()
                        .method(method.clone())
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn malformed_session_cookie_counts_as_anonymous() {
        let response = app()
            .oneshot(
                Request::get("/api/me")
                    .header(header::COOKIE, "athlinked-session=not-a-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signup_rejects_email_and_username_together() {
        let response = app()
            .oneshot(json_request(
                Method::POST,
                "/api/signup/start",
                json!({
                    "email": "jordan@example.com",
                    "username": "jordan",
                    "password": "correct horse",
                    "full_name": "Jordan Miles",
                    "date_of_birth": "2001-04-02"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("not both"));
    }

    #[tokio::test]
    async fn minors_cannot_sign_up_without_a_parent() {
        let response = app()
            .oneshot(json_request(
                Method::POST,
                "/api/signup/start",
                json!({
                    "username": "young_qb",
                    "password": "correct horse",
                    "full_name": "Sam Miles",
                    "date_of_birth": "2014-09-01"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_clears_a_stale_cookie() {
        let response = app()
            .oneshot(
                Request::post("/api/logout")
                    .header(header::COOKIE, "athlinked-session=expired")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(set_cookie.starts_with("athlinked-session="));
    }

    #[tokio::test]
    async fn malformed_json_body_is_a_json_400() {
        let response = app()
            .oneshot(json_request(
                Method::POST,
                "/api/signup/start",
                json!({
                    "email": "jordan@example.com",
                    "full_name": "Jordan Miles",
                    "date_of_birth": "2001-04-02"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("application/json"));
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("password"));
    }

    #[tokio::test]
    async fn non_numeric_path_id_is_a_json_400() {
        let response = app()
            .oneshot(
                Request::get("/api/sports/football/positions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn unknown_routes_get_a_json_404() {
        let response = app()
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await, json!({ "error": "route not found" }));
    }
}
