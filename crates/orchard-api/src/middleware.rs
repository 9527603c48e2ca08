use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use orchard_types::api::Claims;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate the JWT from the Authorization header. The claims
/// become a request extension; `claims.sub` is the owner for every query.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("Missing authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("Expected a bearer token"))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| unauthorized("Invalid or expired token"))?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

fn unauthorized(message: &str) -> ApiError {
    ApiError::unauthorized("UNAUTHORIZED", message)
}
