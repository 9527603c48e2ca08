use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use orchard_db::models::{NewTree, TreeChanges};
use orchard_types::api::{Ack, Claims, CreateTreeRequest, UpdateTreeRequest};
use orchard_types::models::Tree;

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, blocking};

/// GET /trees/{id}
pub async fn get_tree(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(tree_id): Path<i64>,
) -> ApiResult<Json<Tree>> {
    let tree = blocking(&state, move |s| {
        s.db.trees()
            .find_by_id(tree_id, claims.sub)?
            .ok_or_else(|| tree_not_found(tree_id))
    })
    .await?;
    Ok(Json(tree.into()))
}

/// POST /trees. Also appends the new tree to its meadow's list.
pub async fn create_tree(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateTreeRequest>,
) -> ApiResult<impl IntoResponse> {
    let tree = NewTree {
        plant_date: req.plant_date,
        meadow_id: req.meadow_id,
        position: req.position,
        kind: req.kind,
    };
    let id = blocking(&state, move |s| Ok(s.db.trees().insert(&tree, claims.sub)?)).await?;

    Ok((
        StatusCode::CREATED,
        Json(Ack::with_id("Tree inserted successfully", id)),
    ))
}

/// PUT /trees/{id}. The parent meadow cannot be changed.
pub async fn update_tree(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(tree_id): Path<i64>,
    Json(req): Json<UpdateTreeRequest>,
) -> ApiResult<Json<Ack>> {
    let changes = TreeChanges {
        plant_date: req.plant_date,
        position: req.position,
        kind: req.kind,
    };
    blocking(&state, move |s| Ok(s.db.trees().update(tree_id, &changes, claims.sub)?)).await?;

    Ok(Json(Ack::new("Tree updated successfully")))
}

/// DELETE /trees/{id}. Removes the tree's images and its meadow list entry.
pub async fn delete_tree(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(tree_id): Path<i64>,
) -> ApiResult<Json<Ack>> {
    let report = blocking(&state, move |s| {
        Ok(s.db.trees().delete_for_user(tree_id, claims.sub, &s.images)?)
    })
    .await?;

    info!("Tree {} deleted with {} images", tree_id, report.images_deleted);
    Ok(Json(Ack::with_id("Tree deleted successfully", tree_id)))
}

pub(crate) fn tree_not_found(tree_id: i64) -> ApiError {
    ApiError::NotFound(format!("tree not found: {tree_id}"))
}
