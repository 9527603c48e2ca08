use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// JWT claims issued on login and checked by the auth middleware.
/// `sub` is the numeric user ID every repository call is scoped to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

// -- Meadows --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateMeadowRequest {
    pub location: String,
    pub name: String,
    pub size: f64,
    #[serde(default)]
    pub tree_ids: Vec<i64>,
}

/// Only the descriptive fields are updatable; a body carrying `treeIds`
/// is rejected rather than silently ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateMeadowRequest {
    pub location: String,
    pub name: String,
    pub size: f64,
}

// -- Trees --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateTreeRequest {
    pub plant_date: NaiveDate,
    pub meadow_id: i64,
    pub position: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Moving a tree to another meadow is not supported, so there is no `meadowId`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateTreeRequest {
    pub plant_date: NaiveDate,
    pub position: String,
    #[serde(rename = "type")]
    pub kind: String,
}

// -- Images --

/// Exactly one of the two fields must be set.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateImageRequest {
    pub description: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
}

/// Form-encoded image update (`newDescription` / `newDatetime`). Older
/// clients send the literal `"null"` for the field they leave alone.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFormUpdate {
    pub new_description: Option<String>,
    pub new_datetime: Option<String>,
}

impl ImageFormUpdate {
    pub fn into_update(self) -> Result<UpdateImageRequest, String> {
        let set = |v: Option<String>| v.filter(|s| s != "null");

        let datetime = match set(self.new_datetime) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|_| format!("Invalid datetime format: {raw}"))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(UpdateImageRequest {
            description: set(self.new_description),
            datetime,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub id: i64,
    pub path: String,
}

// -- Generic --

/// `{ "message": ..., "id": ... }` acknowledgement for create/delete.
#[derive(Debug, Serialize)]
pub struct Ack {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl Ack {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            id: None,
        }
    }

    pub fn with_id(message: impl Into<String>, id: i64) -> Self {
        Self {
            message: message.into(),
            id: Some(id),
        }
    }
}
