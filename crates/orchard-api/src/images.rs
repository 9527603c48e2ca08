use axum::{
    Extension, Form, Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Request, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::{info, warn};

use orchard_types::api::{Ack, Claims, ImageFormUpdate, UpdateImageRequest, UploadResponse};
use orchard_types::models::Image;

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, blocking};
use crate::storage::{ImageKind, MAX_IMAGE_SIZE};
use crate::trees::tree_not_found;

/// Multipart field carrying the file.
const FILE_FIELD: &str = "treeImage";
const DESCRIPTION_FIELD: &str = "description";

/// GET /trees/{id}/images
pub async fn list_tree_images(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(tree_id): Path<i64>,
) -> ApiResult<Json<Vec<Image>>> {
    let images = blocking(&state, move |s| {
        if s.db.trees().find_by_id(tree_id, claims.sub)?.is_none() {
            return Err(tree_not_found(tree_id));
        }
        Ok(s.db.images().list_for_tree(tree_id, claims.sub)?)
    })
    .await?;

    Ok(Json(images.into_iter().map(Image::from).collect()))
}

/// POST /trees/{id}/images (multipart: `treeImage` file, optional
/// `description`). The tree is checked before anything is written.
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(tree_id): Path<i64>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut file: Option<Bytes> = None;
    let mut description = String::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FILE_FIELD => file = Some(field.bytes().await.map_err(multipart_error)?),
            DESCRIPTION_FIELD => description = field.text().await.map_err(multipart_error)?,
            _ => {}
        }
    }

    let bytes = file.ok_or_else(|| {
        ApiError::bad_request("MISSING_FILE", format!("Missing multipart field '{FILE_FIELD}'"))
    })?;
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }

    let kind = ImageKind::sniff(&bytes).ok_or_else(|| {
        ApiError::UnsupportedMediaType("only JPEG and PNG images are accepted".into())
    })?;

    blocking(&state, move |s| {
        match s.db.trees().find_by_id(tree_id, claims.sub)? {
            Some(_) => Ok(()),
            None => Err(tree_not_found(tree_id)),
        }
    })
    .await?;

    let path = state.images.save(&bytes, kind).await?;
    info!("Stored {} upload ({} bytes) at {}", kind.mime(), bytes.len(), path);

    let record_path = path.clone();
    let inserted = blocking(&state, move |s| {
        Ok(s.db.images().insert(&record_path, &description, claims.sub, tree_id)?)
    })
    .await;

    let id = match inserted {
        Ok(id) => id,
        Err(e) => {
            warn!("Discarding upload {} after failed insert", path);
            state.images.discard(&path).await;
            return Err(e);
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "Image uploaded successfully".into(),
            id,
            path: orchard_db::images::normalize_path(&path),
        }),
    ))
}

/// PUT /trees/images/{image_id}. Exactly one of `description` or
/// `datetime` must be present. Form bodies use `newDescription` and
/// `newDatetime` instead.
pub async fn update_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(image_id): Path<i64>,
    request: Request,
) -> ApiResult<Json<Ack>> {
    let req = read_image_update(request).await?;
    let message = match (req.description, req.datetime) {
        (Some(description), None) => {
            blocking(&state, move |s| {
                Ok(s.db.images().update_description(image_id, &description, claims.sub)?)
            })
            .await?;
            "Image description updated successfully"
        }
        (None, Some(datetime)) => {
            blocking(&state, move |s| {
                Ok(s.db.images().update_datetime(image_id, datetime, claims.sub)?)
            })
            .await?;
            "Image datetime updated successfully"
        }
        _ => {
            return Err(ApiError::bad_request(
                "INVALID_INPUT",
                "Provide exactly one of 'description' or 'datetime'",
            ));
        }
    };

    Ok(Json(Ack::new(message)))
}

/// DELETE /trees/images/{image_id}. Removes the record, then its file.
pub async fn delete_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(image_id): Path<i64>,
) -> ApiResult<Json<Ack>> {
    blocking(&state, move |s| {
        Ok(s.db.images().delete(image_id, claims.sub, &s.images)?)
    })
    .await?;

    Ok(Json(Ack::with_id("Image deleted successfully", image_id)))
}

async fn read_image_update(request: Request) -> ApiResult<UpdateImageRequest> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let form = if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(form) = Form::<ImageFormUpdate>::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request("INVALID_INPUT", e.body_text()))?;
        form
    } else if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request("INVALID_INPUT", e.body_text()))?;
        let mut form = ImageFormUpdate::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "newDescription" => {
                    form.new_description = Some(field.text().await.map_err(multipart_error)?)
                }
                "newDatetime" => {
                    form.new_datetime = Some(field.text().await.map_err(multipart_error)?)
                }
                _ => {}
            }
        }
        form
    } else {
        let Json(update) = Json::<UpdateImageRequest>::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request("INVALID_INPUT", e.body_text()))?;
        return Ok(update);
    };

    form.into_update()
        .map_err(|message| ApiError::bad_request("INVALID_INPUT", message))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::bad_request("INVALID_UPLOAD", err.body_text())
    }
}
