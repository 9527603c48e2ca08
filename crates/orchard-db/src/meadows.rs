use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::Database;
use crate::consistency;
use crate::error::{QueryContext, Result, StoreError};
use crate::images::FileStore;
use crate::models::{
    CascadeReport, MEADOW_COLUMNS, MeadowChanges, MeadowRow, NewMeadow, encode_tree_ids,
    meadow_from_row,
};

/// Owner-scoped access to meadows. The `tree_ids` list is only ever
/// changed through [`MeadowRepo::update_tree_ids`] and the cascade paths.
pub struct MeadowRepo<'a> {
    db: &'a Database,
}

impl<'a> MeadowRepo<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn find_by_id(&self, meadow_id: i64, user_id: i64) -> Result<Option<MeadowRow>> {
        let meadow = self.db.with_conn(|conn| find_by_id(conn, meadow_id, user_id))?;
        match &meadow {
            Some(m) => debug!("Found meadow {} for user {}: {:?}", m.id, user_id, m),
            None => debug!("No meadow found with ID {} for user {}", meadow_id, user_id),
        }
        Ok(meadow)
    }

    pub fn find_all(&self, user_id: i64) -> Result<Vec<MeadowRow>> {
        self.db.with_conn(|conn| find_all(conn, Some(user_id)))
    }

    /// Insert a meadow; referenced tree IDs, if any, are stored as given.
    pub fn insert(&self, meadow: &NewMeadow, user_id: i64) -> Result<i64> {
        let tree_ids = encode_tree_ids(&meadow.tree_ids)?;
        let id = self.db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO meadows (location, name, size, tree_ids, user_id) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![meadow.location, meadow.name, meadow.size, tree_ids, user_id],
            )
            .op("insert meadow")?;
            Ok(conn.last_insert_rowid())
        })?;

        info!("Inserted meadow {} for user {}", id, user_id);
        Ok(id)
    }

    /// Update location, name and size. The tree ID list is left alone.
    pub fn update(&self, meadow_id: i64, changes: &MeadowChanges, user_id: i64) -> Result<()> {
        let affected = self.db.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE meadows SET location = ?1, name = ?2, size = ?3 WHERE id = ?4 AND user_id = ?5",
                params![changes.location, changes.name, changes.size, meadow_id, user_id],
            )
            .op("update meadow")
        })?;

        if affected == 0 {
            return Err(StoreError::NotFound { entity: "meadow", id: meadow_id });
        }

        info!("Updated meadow {} for user {}", meadow_id, user_id);
        Ok(())
    }

    /// Append `tree_id` to, or remove one occurrence of it from, the
    /// meadow's tree list. Removing an ID that is not listed succeeds and
    /// leaves the list unchanged.
    pub fn update_tree_ids(
        &self,
        meadow_id: i64,
        tree_id: i64,
        should_remove: bool,
        user_id: i64,
    ) -> Result<()> {
        self.db
            .with_tx(|tx| update_tree_ids(tx, meadow_id, tree_id, should_remove, user_id))?;
        Ok(())
    }

    /// Delete the meadow and every tree (and tree image) that belongs to it.
    pub fn delete(
        &self,
        meadow_id: i64,
        user_id: i64,
        files: &dyn FileStore,
    ) -> Result<CascadeReport> {
        consistency::delete_meadow(self.db, meadow_id, user_id, files)
    }

    /// Rebuild `tree_ids` from `trees.meadow_id` for one owner, or every
    /// owner when `user_id` is `None`. Returns how many meadows changed.
    pub fn reconcile_tree_ids(&self, user_id: Option<i64>) -> Result<usize> {
        consistency::reconcile_tree_ids(self.db, user_id)
    }
}

pub(crate) fn find_by_id(
    conn: &Connection,
    meadow_id: i64,
    user_id: i64,
) -> Result<Option<MeadowRow>> {
    let sql = format!("SELECT {MEADOW_COLUMNS} FROM meadows WHERE id = ?1 AND user_id = ?2");
    let row = conn
        .query_row(&sql, params![meadow_id, user_id], meadow_from_row)
        .optional()
        .op("find meadow")?;
    Ok(row)
}

pub(crate) fn find_all(conn: &Connection, user_id: Option<i64>) -> Result<Vec<MeadowRow>> {
    let (sql, params) = match user_id {
        Some(uid) => (
            format!("SELECT {MEADOW_COLUMNS} FROM meadows WHERE user_id = ?1 ORDER BY id"),
            vec![uid],
        ),
        None => (format!("SELECT {MEADOW_COLUMNS} FROM meadows ORDER BY id"), vec![]),
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), meadow_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .op("list meadows")?;
    Ok(rows)
}

pub(crate) fn write_tree_ids(
    conn: &Connection,
    meadow_id: i64,
    tree_ids: &[i64],
    user_id: i64,
) -> Result<()> {
    let encoded = encode_tree_ids(tree_ids)?;
    let affected = conn
        .execute(
            "UPDATE meadows SET tree_ids = ?1 WHERE id = ?2 AND user_id = ?3",
            params![encoded, meadow_id, user_id],
        )
        .op("update meadow tree list")?;

    if affected == 0 {
        return Err(StoreError::NotFound { entity: "meadow", id: meadow_id });
    }
    Ok(())
}

/// Read-modify-write of the tree list. Callers must hold a transaction.
pub(crate) fn update_tree_ids(
    conn: &Connection,
    meadow_id: i64,
    tree_id: i64,
    should_remove: bool,
    user_id: i64,
) -> Result<Vec<i64>> {
    let mut meadow = find_by_id(conn, meadow_id, user_id)?
        .ok_or(StoreError::NotFound { entity: "meadow", id: meadow_id })?;

    debug!("Current tree IDs for meadow {}: {:?}", meadow_id, meadow.tree_ids);
    apply_tree_id(&mut meadow.tree_ids, tree_id, should_remove);
    debug!("New tree IDs for meadow {}: {:?}", meadow_id, meadow.tree_ids);

    write_tree_ids(conn, meadow_id, &meadow.tree_ids, user_id)?;
    Ok(meadow.tree_ids)
}

pub(crate) fn delete_row(conn: &Connection, meadow_id: i64, user_id: i64) -> Result<()> {
    let affected = conn
        .execute(
            "DELETE FROM meadows WHERE id = ?1 AND user_id = ?2",
            params![meadow_id, user_id],
        )
        .op("delete meadow")?;

    if affected == 0 {
        return Err(StoreError::NotFound { entity: "meadow", id: meadow_id });
    }
    Ok(())
}

/// Append, or remove the first occurrence of, `tree_id`.
pub(crate) fn apply_tree_id(tree_ids: &mut Vec<i64>, tree_id: i64, should_remove: bool) {
    if should_remove {
        if let Some(pos) = tree_ids.iter().position(|&id| id == tree_id) {
            tree_ids.remove(pos);
        }
    } else {
        tree_ids.push(tree_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_temp;

    #[test]
    fn apply_tree_id_removes_single_occurrence() {
        let mut ids = vec![1, 2, 1];
        apply_tree_id(&mut ids, 1, true);
        assert_eq!(ids, vec![2, 1]);

        apply_tree_id(&mut ids, 9, true);
        assert_eq!(ids, vec![2, 1]);

        apply_tree_id(&mut ids, 5, false);
        assert_eq!(ids, vec![2, 1, 5]);
    }

    #[test]
    fn insert_then_find() {
        let (_dir, db) = open_temp();
        let repo = db.meadows();

        let id = repo.insert(&NewMeadow::new("North Field", "Oak Grove", 2.5), 7).unwrap();
        let meadow = repo.find_by_id(id, 7).unwrap().unwrap();

        assert_eq!(meadow.location, "North Field");
        assert_eq!(meadow.name, "Oak Grove");
        assert_eq!(meadow.size, 2.5);
        assert!(meadow.tree_ids.is_empty());
        assert_eq!(meadow.user_id, 7);
    }

    #[test]
    fn other_owner_sees_nothing() {
        let (_dir, db) = open_temp();
        let repo = db.meadows();
        let id = repo.insert(&NewMeadow::new("North Field", "Oak Grove", 2.5), 7).unwrap();

        assert!(repo.find_by_id(id, 8).unwrap().is_none());
        assert!(repo.find_all(8).unwrap().is_empty());

        let changes = MeadowChanges {
            location: "x".into(),
            name: "y".into(),
            size: 1.0,
        };
        assert!(repo.update(id, &changes, 8).unwrap_err().is_not_found());
        assert!(repo.update_tree_ids(id, 1, false, 8).unwrap_err().is_not_found());

        // Owner's row is untouched.
        let meadow = repo.find_by_id(id, 7).unwrap().unwrap();
        assert_eq!(meadow.name, "Oak Grove");
        assert!(meadow.tree_ids.is_empty());
    }

    #[test]
    fn find_all_lists_only_owner_rows() {
        let (_dir, db) = open_temp();
        let repo = db.meadows();
        repo.insert(&NewMeadow::new("a", "one", 1.0), 1).unwrap();
        repo.insert(&NewMeadow::new("b", "two", 2.0), 1).unwrap();
        repo.insert(&NewMeadow::new("c", "three", 3.0), 2).unwrap();

        let names: Vec<_> = repo.find_all(1).unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert!(repo.find_all(3).unwrap().is_empty());
    }

    #[test]
    fn update_leaves_tree_ids_alone() {
        let (_dir, db) = open_temp();
        let repo = db.meadows();
        let mut new = NewMeadow::new("North Field", "Oak Grove", 2.5);
        new.tree_ids = vec![4, 5];
        let id = repo.insert(&new, 7).unwrap();

        let changes = MeadowChanges {
            location: "South Field".into(),
            name: "Birch Grove".into(),
            size: 3.0,
        };
        repo.update(id, &changes, 7).unwrap();

        let meadow = repo.find_by_id(id, 7).unwrap().unwrap();
        assert_eq!(meadow.location, "South Field");
        assert_eq!(meadow.size, 3.0);
        assert_eq!(meadow.tree_ids, vec![4, 5]);
    }

    #[test]
    fn update_tree_ids_add_and_idempotent_remove() {
        let (_dir, db) = open_temp();
        let repo = db.meadows();
        let id = repo.insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();

        repo.update_tree_ids(id, 10, false, 7).unwrap();
        repo.update_tree_ids(id, 11, false, 7).unwrap();
        assert_eq!(repo.find_by_id(id, 7).unwrap().unwrap().tree_ids, vec![10, 11]);

        repo.update_tree_ids(id, 42, true, 7).unwrap();
        assert_eq!(repo.find_by_id(id, 7).unwrap().unwrap().tree_ids, vec![10, 11]);

        repo.update_tree_ids(id, 10, true, 7).unwrap();
        assert_eq!(repo.find_by_id(id, 7).unwrap().unwrap().tree_ids, vec![11]);
    }

    #[test]
    fn concurrent_list_updates_are_not_lost() {
        let (_dir, db) = open_temp();
        let id = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();

        std::thread::scope(|s| {
            for worker in 0..4i64 {
                let db = &db;
                s.spawn(move || {
                    for n in 0..25i64 {
                        db.meadows()
                            .update_tree_ids(id, worker * 100 + n, false, 7)
                            .unwrap();
                    }
                });
            }
        });

        let ids = db.meadows().find_by_id(id, 7).unwrap().unwrap().tree_ids;
        assert_eq!(ids.len(), 100);
    }
}
