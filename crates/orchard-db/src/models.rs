//! Database row types and write inputs. Distinct from the orchard-types API
//! models so the DB layer stays independent; `From` impls bridge the two.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use orchard_types::models::{Image, Meadow, Tree};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeadowRow {
    pub id: i64,
    pub location: String,
    pub name: String,
    pub size: f64,
    pub tree_ids: Vec<i64>,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeRow {
    pub id: i64,
    pub plant_date: NaiveDate,
    pub meadow_id: i64,
    pub position: String,
    pub kind: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRow {
    pub id: i64,
    pub path: String,
    pub description: String,
    pub datetime: DateTime<Utc>,
    pub tree_id: i64,
    pub user_id: i64,
}

pub struct NewMeadow {
    pub location: String,
    pub name: String,
    pub size: f64,
    pub tree_ids: Vec<i64>,
}

impl NewMeadow {
    pub fn new(location: impl Into<String>, name: impl Into<String>, size: f64) -> Self {
        Self {
            location: location.into(),
            name: name.into(),
            size,
            tree_ids: Vec::new(),
        }
    }
}

pub struct MeadowChanges {
    pub location: String,
    pub name: String,
    pub size: f64,
}

pub struct NewTree {
    pub plant_date: NaiveDate,
    pub meadow_id: i64,
    pub position: String,
    pub kind: String,
}

pub struct TreeChanges {
    pub plant_date: NaiveDate,
    pub position: String,
    pub kind: String,
}

/// What a cascading delete actually did. Stale IDs are list entries whose
/// tree row was already gone; `files_failed` counts image files that could
/// not be removed after the rows were committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub trees_deleted: usize,
    pub images_deleted: usize,
    pub stale_tree_ids: Vec<i64>,
    pub files_failed: usize,
}

// -- Row mapping --

pub(crate) const MEADOW_COLUMNS: &str = "id, location, name, size, tree_ids, user_id";
pub(crate) const TREE_COLUMNS: &str = "id, plant_date, meadow_id, position, type, user_id";
pub(crate) const IMAGE_COLUMNS: &str = "id, path, description, datetime, tree_id, user_id";

pub(crate) fn meadow_from_row(row: &Row<'_>) -> rusqlite::Result<MeadowRow> {
    let raw: String = row.get(4)?;
    let tree_ids = decode_tree_ids(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(MeadowRow {
        id: row.get(0)?,
        location: row.get(1)?,
        name: row.get(2)?,
        size: row.get(3)?,
        tree_ids,
        user_id: row.get(5)?,
    })
}

pub(crate) fn tree_from_row(row: &Row<'_>) -> rusqlite::Result<TreeRow> {
    Ok(TreeRow {
        id: row.get(0)?,
        plant_date: row.get(1)?,
        meadow_id: row.get(2)?,
        position: row.get(3)?,
        kind: row.get(4)?,
        user_id: row.get(5)?,
    })
}

pub(crate) fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRow> {
    Ok(ImageRow {
        id: row.get(0)?,
        path: row.get(1)?,
        description: row.get(2)?,
        datetime: row.get(3)?,
        tree_id: row.get(4)?,
        user_id: row.get(5)?,
    })
}

pub(crate) fn decode_tree_ids(raw: &str) -> serde_json::Result<Vec<i64>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
}

pub(crate) fn encode_tree_ids(ids: &[i64]) -> serde_json::Result<String> {
    serde_json::to_string(ids)
}

impl From<MeadowRow> for Meadow {
    fn from(row: MeadowRow) -> Self {
        Meadow {
            id: row.id,
            location: row.location,
            name: row.name,
            size: row.size,
            tree_ids: row.tree_ids,
        }
    }
}

impl From<TreeRow> for Tree {
    fn from(row: TreeRow) -> Self {
        Tree {
            id: row.id,
            plant_date: row.plant_date,
            meadow_id: row.meadow_id,
            position: row.position,
            kind: row.kind,
        }
    }
}

impl From<ImageRow> for Image {
    fn from(row: ImageRow) -> Self {
        Image {
            id: row.id,
            path: row.path,
            description: row.description,
            datetime: row.datetime,
        }
    }
}
