use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info};

use crate::Database;
use crate::consistency;
use crate::error::{QueryContext, Result, StoreError};
use crate::images::FileStore;
use crate::meadows;
use crate::models::{CascadeReport, NewTree, TREE_COLUMNS, TreeChanges, TreeRow, tree_from_row};

pub struct TreeRepo<'a> {
    db: &'a Database,
}

impl<'a> TreeRepo<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn find_by_id(&self, tree_id: i64, user_id: i64) -> Result<Option<TreeRow>> {
        let tree = self.db.with_conn(|conn| find_by_id(conn, tree_id, user_id))?;
        match &tree {
            Some(t) => debug!("Found tree {} for user {}: {:?}", t.id, user_id, t),
            None => debug!("No tree found with ID {} for user {}", tree_id, user_id),
        }
        Ok(tree)
    }

    /// Trees listed in the meadow's `tree_ids`, in list order. An absent
    /// meadow or an empty list yields an empty vec without querying trees.
    pub fn find_all_for_meadow(&self, meadow_id: i64, user_id: i64) -> Result<Vec<TreeRow>> {
        self.db.with_conn(|conn| {
            let Some(meadow) = meadows::find_by_id(conn, meadow_id, user_id)? else {
                return Ok(Vec::new());
            };
            if meadow.tree_ids.is_empty() {
                return Ok(Vec::new());
            }

            let mut trees = find_by_ids(conn, &meadow.tree_ids, user_id)?;
            trees.sort_by_key(|t| meadow.tree_ids.iter().position(|&id| id == t.id));
            Ok(trees)
        })
    }

    /// Insert a tree and append its ID to the parent meadow's list, in one
    /// transaction. Fails with `NotFound` if the meadow is not the caller's.
    pub fn insert(&self, tree: &NewTree, user_id: i64) -> Result<i64> {
        consistency::insert_tree(self.db, tree, user_id)
    }

    /// Update plant date, position and type. The parent meadow cannot change.
    pub fn update(&self, tree_id: i64, changes: &TreeChanges, user_id: i64) -> Result<()> {
        let affected = self.db.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE trees SET plant_date = ?1, position = ?2, type = ?3 WHERE id = ?4 AND user_id = ?5",
                params![changes.plant_date, changes.position, changes.kind, tree_id, user_id],
            )
            .op("update tree")
        })?;

        if affected == 0 {
            return Err(StoreError::NotFound { entity: "tree", id: tree_id });
        }

        info!("Updated tree {} for user {}", tree_id, user_id);
        Ok(())
    }

    /// Delete the tree row and its images; the parent meadow's list is not
    /// touched.
    pub fn delete_only(
        &self,
        tree_id: i64,
        user_id: i64,
        files: &dyn FileStore,
    ) -> Result<CascadeReport> {
        consistency::delete_tree_only(self.db, tree_id, user_id, files)
    }

    /// Delete the tree, its images, and its entry in the meadow's list.
    pub fn delete_for_user(
        &self,
        tree_id: i64,
        user_id: i64,
        files: &dyn FileStore,
    ) -> Result<CascadeReport> {
        consistency::delete_tree(self.db, tree_id, user_id, files)
    }
}

pub(crate) fn find_by_id(conn: &Connection, tree_id: i64, user_id: i64) -> Result<Option<TreeRow>> {
    let sql = format!("SELECT {TREE_COLUMNS} FROM trees WHERE id = ?1 AND user_id = ?2");
    let row = conn
        .query_row(&sql, params![tree_id, user_id], tree_from_row)
        .optional()
        .op("find tree")?;
    Ok(row)
}

pub(crate) fn find_by_ids(conn: &Connection, ids: &[i64], user_id: i64) -> Result<Vec<TreeRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT {TREE_COLUMNS} FROM trees WHERE id IN ({}) AND user_id = ?{}",
        placeholders.join(", "),
        ids.len() + 1
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params_from_iter(ids.iter().copied().chain(std::iter::once(user_id))),
            tree_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()
        .op("list trees")?;
    Ok(rows)
}

/// IDs of trees whose `meadow_id` points at this meadow, ascending.
pub(crate) fn ids_for_meadow(conn: &Connection, meadow_id: i64, user_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT id FROM trees WHERE meadow_id = ?1 AND user_id = ?2 ORDER BY id")?;
    let ids = stmt
        .query_map(params![meadow_id, user_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()
        .op("list tree ids")?;
    Ok(ids)
}

pub(crate) fn insert_row(conn: &Connection, tree: &NewTree, user_id: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO trees (plant_date, meadow_id, position, type, user_id) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![tree.plant_date, tree.meadow_id, tree.position, tree.kind, user_id],
    )
    .op("insert tree")?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn delete_row(conn: &Connection, tree_id: i64, user_id: i64) -> Result<()> {
    let affected = conn
        .execute(
            "DELETE FROM trees WHERE id = ?1 AND user_id = ?2",
            params![tree_id, user_id],
        )
        .op("delete tree")?;

    if affected == 0 {
        return Err(StoreError::NotFound { entity: "tree", id: tree_id });
    }

    info!("Deleted tree {} for user {}", tree_id, user_id);
    Ok(())
}
