use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};
use serde_json::{Value, json};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::storage::MAX_IMAGE_SIZE;
use crate::{auth, images, meadows, trees};

/// Multipart framing on top of the file itself.
const UPLOAD_BODY_LIMIT: usize = MAX_IMAGE_SIZE + 64 * 1024;

/// All routes. Everything except `/register`, `/login` and `/health` needs a
/// bearer token; handlers scope every query to the token's user.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/meadows", get(meadows::list_meadows).post(meadows::create_meadow))
        .route(
            "/meadows/{id}",
            get(meadows::get_meadow)
                .put(meadows::update_meadow)
                .delete(meadows::delete_meadow),
        )
        .route("/meadows/{id}/trees", get(meadows::list_meadow_trees))
        .route("/trees", post(trees::create_tree))
        .route(
            "/trees/{id}",
            get(trees::get_tree)
                .put(trees::update_tree)
                .delete(trees::delete_tree),
        )
        .route(
            "/trees/{id}/images",
            get(images::list_tree_images)
                .post(images::upload_image)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/trees/{id}/uploadImage",
            post(images::upload_image).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/trees/images/{image_id}",
            put(images::update_image).delete(images::delete_image),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
