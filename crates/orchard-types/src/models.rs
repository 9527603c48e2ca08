use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A user-owned land plot. `tree_ids` mirrors the trees whose `meadow_id`
/// points here; only the tree insert/delete paths may change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meadow {
    pub id: i64,
    pub location: String,
    pub name: String,
    pub size: f64,
    pub tree_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub id: i64,
    pub plant_date: NaiveDate,
    pub meadow_id: i64,
    pub position: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Photo metadata. `path` is always served with a leading `/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub path: String,
    pub description: String,
    pub datetime: DateTime<Utc>,
}
