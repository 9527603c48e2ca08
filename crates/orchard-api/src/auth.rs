use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};

use orchard_db::StoreError;
use orchard_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, blocking};

const TOKEN_LIFETIME_HOURS: i64 = 24;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_registration(&req)?;

    let username = req.username.clone();
    let user_id = blocking(&state, move |s| {
        let users = s.db.users();
        if users.get_by_username(&req.username)?.is_some() {
            return Err(ApiError::conflict("USERNAME_TAKEN", "Username already exists"));
        }
        if users.get_by_email(&req.email)?.is_some() {
            return Err(ApiError::conflict("EMAIL_TAKEN", "Email already exists"));
        }

        let password_hash = hash_password(&req.password)?;

        // Lost the race against a concurrent registration.
        users
            .create(&req.username, &password_hash, &req.email)
            .map_err(|e| match e {
                StoreError::AlreadyExists { detail, .. } => taken(&detail),
                other => other.into(),
            })
    })
    .await?;

    info!("User {} registered as {}", username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".into(),
            user_id,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = blocking(&state, move |s| {
        let user = s
            .db
            .users()
            .get_by_username(&req.username)?
            .ok_or_else(invalid_credentials)?;

        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|e| ApiError::Internal(format!("stored password hash is invalid: {e}")))?;

        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .map_err(|_| invalid_credentials())?;

        Ok(user)
    })
    .await
    .inspect_err(|e| {
        if matches!(e, ApiError::Unauthorized { .. }) {
            warn!("Rejected login attempt");
        }
    })?;

    let token = create_token(&state.jwt_secret, user.id, &user.username)
        .map_err(|e| ApiError::Internal(format!("failed to sign token: {e}")))?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

fn validate_registration(req: &RegisterRequest) -> ApiResult<()> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::bad_request(
            "INVALID_INPUT",
            "Username must be between 3 and 32 characters",
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request(
            "INVALID_INPUT",
            "Password must be at least 8 characters",
        ));
    }
    if !req.email.contains('@') {
        return Err(ApiError::bad_request("INVALID_INPUT", "Email address is invalid"));
    }
    Ok(())
}

/// Pick the conflict code from SQLite's "UNIQUE constraint failed: users.<column>".
fn taken(detail: &str) -> ApiError {
    if detail.contains("users.email") {
        ApiError::conflict("EMAIL_TAKEN", "Email already exists")
    } else {
        ApiError::conflict("USERNAME_TAKEN", "Username already exists")
    }
}

fn invalid_credentials() -> ApiError {
    ApiError::unauthorized("INVALID_CREDENTIALS", "Invalid username or password")
}

fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(format!("failed to hash password: {e}")))?
        .to_string();
    Ok(hash)
}

pub fn create_token(secret: &str, user_id: i64, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp()
            as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
