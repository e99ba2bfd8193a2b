use std::sync::Arc;

use axum::{
    routing::{delete, get},
    Router,
};

use crate::errors::AppError;
use crate::AppState;

pub mod images;
pub mod tokens;

/// Build the API router. The caller mounts this under `/api`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/images",
            get(images::list_images).post(images::upload_image),
        )
        .route(
            "/images/:id",
            get(images::fetch_image).delete(images::delete_image),
        )
        .route(
            "/tokens",
            get(tokens::list_tokens).post(tokens::create_token),
        )
        .route("/tokens/:id", delete(tokens::delete_token))
        .fallback(fallback_404)
}

pub async fn fallback_404() -> AppError {
    AppError::NotFound("No such resource.".to_string())
}
