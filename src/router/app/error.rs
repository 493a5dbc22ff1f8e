use axum::http::Uri;
use tracing::debug;

use crate::error::AppError;

pub async fn not_found(uri: Uri) -> AppError {
    debug!(%uri, "no route");
    AppError::NotFound("route")
}
