use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};

use orchard_db::models::{MeadowChanges, NewMeadow};
use orchard_types::api::{Ack, Claims, CreateMeadowRequest, UpdateMeadowRequest};
use orchard_types::models::{Meadow, Tree};

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, blocking};

/// GET /meadows
pub async fn list_meadows(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Meadow>>> {
    let meadows = blocking(&state, move |s| Ok(s.db.meadows().find_all(claims.sub)?)).await?;
    Ok(Json(meadows.into_iter().map(Meadow::from).collect()))
}

/// GET /meadows/{id}
pub async fn get_meadow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(meadow_id): Path<i64>,
) -> ApiResult<Json<Meadow>> {
    let meadow = blocking(&state, move |s| {
        s.db.meadows()
            .find_by_id(meadow_id, claims.sub)?
            .ok_or_else(|| meadow_not_found(meadow_id))
    })
    .await?;
    Ok(Json(meadow.into()))
}

/// POST /meadows
pub async fn create_meadow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateMeadowRequest>,
) -> ApiResult<impl IntoResponse> {
    let meadow = NewMeadow {
        location: req.location,
        name: req.name,
        size: req.size,
        tree_ids: req.tree_ids,
    };
    let id = blocking(&state, move |s| Ok(s.db.meadows().insert(&meadow, claims.sub)?)).await?;

    Ok((
        StatusCode::CREATED,
        Json(Ack::with_id("Meadow inserted successfully", id)),
    ))
}

/// PUT /meadows/{id}. The tree list is not client-writable.
pub async fn update_meadow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(meadow_id): Path<i64>,
    Json(req): Json<UpdateMeadowRequest>,
) -> ApiResult<Json<Ack>> {
    let changes = MeadowChanges {
        location: req.location,
        name: req.name,
        size: req.size,
    };
    blocking(&state, move |s| {
        Ok(s.db.meadows().update(meadow_id, &changes, claims.sub)?)
    })
    .await?;

    Ok(Json(Ack::new("Meadow updated successfully")))
}

/// DELETE /meadows/{id}. Cascades to the meadow's trees and their images.
pub async fn delete_meadow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(meadow_id): Path<i64>,
) -> ApiResult<Json<Ack>> {
    let report = blocking(&state, move |s| {
        Ok(s.db.meadows().delete(meadow_id, claims.sub, &s.images)?)
    })
    .await?;

    if !report.stale_tree_ids.is_empty() {
        warn!(
            "Meadow {} listed trees that no longer existed: {:?}",
            meadow_id, report.stale_tree_ids
        );
    }
    info!(
        "Meadow {} deleted with {} trees and {} images",
        meadow_id, report.trees_deleted, report.images_deleted
    );

    Ok(Json(Ack::with_id("Meadow deleted successfully", meadow_id)))
}

/// GET /meadows/{id}/trees, in the meadow's list order.
pub async fn list_meadow_trees(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(meadow_id): Path<i64>,
) -> ApiResult<Json<Vec<Tree>>> {
    let trees = blocking(&state, move |s| {
        if s.db.meadows().find_by_id(meadow_id, claims.sub)?.is_none() {
            return Err(meadow_not_found(meadow_id));
        }
        Ok(s.db.trees().find_all_for_meadow(meadow_id, claims.sub)?)
    })
    .await?;

    Ok(Json(trees.into_iter().map(Tree::from).collect()))
}

fn meadow_not_found(meadow_id: i64) -> ApiError {
    ApiError::NotFound(format!("meadow not found: {meadow_id}"))
}
