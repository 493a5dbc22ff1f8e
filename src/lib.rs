//! Backend for Athlinked, a social network for athletes: accounts with
//! parent links for minors, profiles and follows, posts/articles/clips,
//! one-to-one messaging with live delivery and read receipts, and per-season
//! stat tracking over a sport → position → field taxonomy.
//!
//! Everything is served as JSON under `/api`, plus a WebSocket at `/ws` for
//! message events.

use std::{sync::Arc, time::Duration};

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    Router,
};
use sqlx::{migrate::Migrator, postgres::PgPoolOptions, PgPool};
use tokio::{net::TcpListener, signal};
use tower_cookies::CookieManagerLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod extract;
pub mod messaging;
pub mod middleware;
pub mod realtime;
pub mod router;
pub mod stats;

use config::Config;
use data::repository::{
    FollowRepository, MessageRepository, PostRepository, SignupRepository, StatsRepository,
    UserRepository,
};
use middleware::extract_user;
use realtime::Hub;
use router::app_router;

pub static MIGRATOR: Migrator = sqlx::migrate!();

pub struct AppState {
    pub config: Config,
    pub users: UserRepository,
    pub signups: SignupRepository,
    pub follows: FollowRepository,
    pub posts: PostRepository,
    pub messages: MessageRepository,
    pub stats: StatsRepository,
    pub hub: Hub,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        Self {
            config,
            users: UserRepository { pool: pool.clone() },
            signups: SignupRepository { pool: pool.clone() },
            follows: FollowRepository { pool: pool.clone() },
            posts: PostRepository { pool: pool.clone() },
            messages: MessageRepository { pool: pool.clone() },
            stats: StatsRepository { pool },
            hub: Hub::new(),
        }
    }
}

/// Routes plus the session layers every request needs.
pub fn build_app(state: Arc<AppState>) -> Router {
    app_router(state.clone())
        .layer(axum::middleware::from_fn_with_state(state, extract_user))
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
}

pub async fn start_server() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "athlinked=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await?;
    info!("PostgreSQL connection established.");

    MIGRATOR.run(&pool).await?;
    info!("Migrations applied.");

    let cors = CorsLayer::new()
        .allow_origin(config.cors_origin.parse::<HeaderValue>()?)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60));

    let address = format!("0.0.0.0:{}", config.port);
    let state = Arc::new(AppState::new(pool, config));
    let app = build_app(state).layer(cors);

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(err) => {
                error!(?err, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                error!(?err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
