//! Rules that keep meadows, trees and images in step.
//!
//! Each multi-step change runs in a single IMMEDIATE transaction on the
//! writer, so the meadow's `tree_ids` list and the tree rows always commit
//! together. Image files are removed only after the rows are committed;
//! a file that cannot be removed is counted, not fatal.

use std::collections::HashSet;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::Database;
use crate::error::{Result, StoreError};
use crate::images::{self, FileStore};
use crate::meadows;
use crate::models::{CascadeReport, NewTree};
use crate::trees;

/// Insert the tree row and append its ID to the parent meadow's list.
pub(crate) fn insert_tree(db: &Database, tree: &NewTree, user_id: i64) -> Result<i64> {
    let id = db.with_tx(|tx| {
        if meadows::find_by_id(tx, tree.meadow_id, user_id)?.is_none() {
            return Err(StoreError::NotFound { entity: "meadow", id: tree.meadow_id });
        }

        let id = trees::insert_row(tx, tree, user_id)?;
        meadows::update_tree_ids(tx, tree.meadow_id, id, false, user_id)?;
        Ok(id)
    })?;

    info!(
        "Inserted tree {} into meadow {} for user {}",
        id, tree.meadow_id, user_id
    );
    Ok(id)
}

/// Delete a tree with its images and drop it from the meadow's list.
pub(crate) fn delete_tree(
    db: &Database,
    tree_id: i64,
    user_id: i64,
    files: &dyn FileStore,
) -> Result<CascadeReport> {
    let mut report = CascadeReport::default();

    let paths = db.with_tx(|tx| {
        let tree = trees::find_by_id(tx, tree_id, user_id)?
            .ok_or(StoreError::NotFound { entity: "tree", id: tree_id })?;

        let paths = purge_tree(tx, tree_id, user_id, &mut report)?;
        meadows::update_tree_ids(tx, tree.meadow_id, tree_id, true, user_id)?;
        Ok(paths)
    })?;

    remove_files(files, &paths, &mut report);
    Ok(report)
}

/// Delete a tree and its images without touching the meadow's list.
pub(crate) fn delete_tree_only(
    db: &Database,
    tree_id: i64,
    user_id: i64,
    files: &dyn FileStore,
) -> Result<CascadeReport> {
    let mut report = CascadeReport::default();
    let paths = db.with_tx(|tx| purge_tree(tx, tree_id, user_id, &mut report))?;

    remove_files(files, &paths, &mut report);
    Ok(report)
}

/// Delete every tree of the meadow, their images, and then the meadow.
///
/// List entries whose tree row is already gone, or whose tree points at a
/// different meadow, are recorded as stale and skipped. Trees pointing at
/// the meadow without being listed are deleted too. Any store error rolls
/// the whole deletion back.
pub(crate) fn delete_meadow(
    db: &Database,
    meadow_id: i64,
    user_id: i64,
    files: &dyn FileStore,
) -> Result<CascadeReport> {
    let mut report = CascadeReport::default();

    let paths = db.with_tx(|tx| {
        let meadow = meadows::find_by_id(tx, meadow_id, user_id)?
            .ok_or(StoreError::NotFound { entity: "meadow", id: meadow_id })?;

        let mut paths = Vec::new();
        let mut seen = HashSet::new();

        for &tree_id in &meadow.tree_ids {
            if !seen.insert(tree_id) {
                continue;
            }
            match trees::find_by_id(tx, tree_id, user_id)? {
                Some(t) if t.meadow_id == meadow_id => {
                    paths.extend(purge_tree(tx, tree_id, user_id, &mut report)?);
                }
                Some(t) => {
                    warn!(
                        "Meadow {} lists tree {} which belongs to meadow {}; keeping it",
                        meadow_id, tree_id, t.meadow_id
                    );
                    report.stale_tree_ids.push(tree_id);
                }
                None => {
                    warn!(
                        "Meadow {} lists tree {} which no longer exists",
                        meadow_id, tree_id
                    );
                    report.stale_tree_ids.push(tree_id);
                }
            }
        }

        for tree_id in trees::ids_for_meadow(tx, meadow_id, user_id)? {
            warn!(
                "Tree {} points at meadow {} but was not listed; deleting it",
                tree_id, meadow_id
            );
            paths.extend(purge_tree(tx, tree_id, user_id, &mut report)?);
        }

        meadows::delete_row(tx, meadow_id, user_id)?;
        Ok(paths)
    })?;

    info!(
        "Deleted meadow {} for user {} ({} trees, {} images)",
        meadow_id, user_id, report.trees_deleted, report.images_deleted
    );

    remove_files(files, &paths, &mut report);
    Ok(report)
}

/// Rewrite each meadow's list so it matches `trees.meadow_id`. Surviving
/// entries keep their order; unlisted trees are appended in ID order.
pub(crate) fn reconcile_tree_ids(db: &Database, user_id: Option<i64>) -> Result<usize> {
    let fixed = db.with_tx(|tx| {
        let mut fixed = 0;
        for meadow in meadows::find_all(tx, user_id)? {
            let actual = trees::ids_for_meadow(tx, meadow.id, meadow.user_id)?;
            let wanted = reconciled(&meadow.tree_ids, &actual);
            if wanted != meadow.tree_ids {
                warn!(
                    "Meadow {} tree list drifted: {:?} -> {:?}",
                    meadow.id, meadow.tree_ids, wanted
                );
                meadows::write_tree_ids(tx, meadow.id, &wanted, meadow.user_id)?;
                fixed += 1;
            }
        }
        Ok(fixed)
    })?;

    if fixed > 0 {
        info!("Reconciled tree lists of {} meadows", fixed);
    }
    Ok(fixed)
}

fn reconciled(listed: &[i64], actual: &[i64]) -> Vec<i64> {
    let actual_set: HashSet<i64> = actual.iter().copied().collect();
    let mut seen = HashSet::new();

    let mut out: Vec<i64> = listed
        .iter()
        .copied()
        .filter(|id| actual_set.contains(id) && seen.insert(*id))
        .collect();
    out.extend(actual.iter().copied().filter(|id| !seen.contains(id)));
    out
}

/// Delete a tree's images and row; returns the image paths to unlink.
fn purge_tree(
    conn: &Connection,
    tree_id: i64,
    user_id: i64,
    report: &mut CascadeReport,
) -> Result<Vec<String>> {
    let paths = images::paths_for_tree(conn, tree_id, user_id)?;
    let removed = images::delete_for_tree(conn, tree_id, user_id)?;
    trees::delete_row(conn, tree_id, user_id)?;

    report.images_deleted += removed;
    report.trees_deleted += 1;
    Ok(paths)
}

fn remove_files(files: &dyn FileStore, paths: &[String], report: &mut CascadeReport) {
    for path in paths {
        if !files.exists(path) {
            warn!("Image file {} already gone", path);
            continue;
        }
        if let Err(e) = files.remove(path) {
            warn!("Failed to remove image file {}: {}", path, e);
            report.files_failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::testing::MemFiles;
    use crate::models::NewMeadow;
    use crate::testing::open_temp;
    use chrono::NaiveDate;

    fn tree(meadow_id: i64) -> NewTree {
        NewTree {
            plant_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            meadow_id,
            position: "10,20".into(),
            kind: "Oak".into(),
        }
    }

    fn listed_matches_rows(db: &Database, meadow_id: i64, user_id: i64) -> bool {
        let mut listed = db.meadows().find_by_id(meadow_id, user_id).unwrap().unwrap().tree_ids;
        listed.sort();
        let actual = db
            .with_conn(|conn| trees::ids_for_meadow(conn, meadow_id, user_id))
            .unwrap();
        listed == actual
    }

    #[test]
    fn reconciled_keeps_order_and_appends_missing() {
        assert_eq!(reconciled(&[5, 3, 9, 3], &[3, 4, 5]), vec![5, 3, 4]);
        assert_eq!(reconciled(&[], &[1, 2]), vec![1, 2]);
        assert!(reconciled(&[1, 2], &[]).is_empty());
    }

    #[test]
    fn oak_grove_walkthrough_for_one_user() {
        let (_dir, db) = open_temp();
        let files = MemFiles::default();

        let meadow_id = db
            .meadows()
            .insert(&NewMeadow::new("North Field", "Oak Grove", 2.5), 7)
            .unwrap();
        assert_eq!(meadow_id, 1);

        let tree_id = db.trees().insert(&tree(meadow_id), 7).unwrap();
        assert_eq!(tree_id, 1);
        assert_eq!(db.meadows().find_by_id(1, 7).unwrap().unwrap().tree_ids, vec![1]);

        db.trees().delete_for_user(1, 7, &files).unwrap();
        assert!(db.meadows().find_by_id(1, 7).unwrap().unwrap().tree_ids.is_empty());

        db.meadows().delete(1, 7, &files).unwrap();
        assert!(db.meadows().find_by_id(1, 7).unwrap().is_none());
        assert!(db.trees().find_by_id(1, 7).unwrap().is_none());
    }

    #[test]
    fn insert_then_delete_restores_list() {
        let (_dir, db) = open_temp();
        let files = MemFiles::default();
        let meadow_id = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();
        let keep = db.trees().insert(&tree(meadow_id), 7).unwrap();

        let before = db.meadows().find_by_id(meadow_id, 7).unwrap().unwrap().tree_ids;
        let temp = db.trees().insert(&tree(meadow_id), 7).unwrap();
        db.trees().delete_for_user(temp, 7, &files).unwrap();
        let after = db.meadows().find_by_id(meadow_id, 7).unwrap().unwrap().tree_ids;

        assert_eq!(before, vec![keep]);
        assert_eq!(before, after);
        assert!(listed_matches_rows(&db, meadow_id, 7));
    }

    #[test]
    fn delete_tree_of_other_owner_has_no_effect() {
        let (_dir, db) = open_temp();
        let meadow_id = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();
        let tree_id = db.trees().insert(&tree(meadow_id), 7).unwrap();

        let err = db.trees().delete_for_user(tree_id, 8, &MemFiles::default()).unwrap_err();
        assert!(err.is_not_found());
        assert!(db.trees().find_by_id(tree_id, 7).unwrap().is_some());
        assert_eq!(
            db.meadows().find_by_id(meadow_id, 7).unwrap().unwrap().tree_ids,
            vec![tree_id]
        );
    }

    #[test]
    fn delete_tree_cascades_to_images() {
        let (_dir, db) = open_temp();
        let meadow_id = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();
        let tree_id = db.trees().insert(&tree(meadow_id), 7).unwrap();
        db.images().insert("uploads/a.jpg", "", 7, tree_id).unwrap();
        db.images().insert("uploads/b.png", "", 7, tree_id).unwrap();
        let files = MemFiles::with(&["uploads/a.jpg", "uploads/b.png"]);

        let report = db.trees().delete_for_user(tree_id, 7, &files).unwrap();

        assert_eq!(report.trees_deleted, 1);
        assert_eq!(report.images_deleted, 2);
        assert_eq!(report.files_failed, 0);
        assert!(!files.contains("uploads/a.jpg"));
        assert!(!files.contains("uploads/b.png"));
        assert!(db.images().list_for_tree(tree_id, 7).unwrap().is_empty());
    }

    #[test]
    fn file_removal_failure_is_reported_not_fatal() {
        let (_dir, db) = open_temp();
        let meadow_id = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();
        let tree_id = db.trees().insert(&tree(meadow_id), 7).unwrap();
        db.images().insert("uploads/a.jpg", "", 7, tree_id).unwrap();
        let mut files = MemFiles::with(&["uploads/a.jpg"]);
        files.fail_removal = true;

        let report = db.trees().delete_for_user(tree_id, 7, &files).unwrap();
        assert_eq!(report.files_failed, 1);
        assert!(db.trees().find_by_id(tree_id, 7).unwrap().is_none());
    }

    #[test]
    fn delete_meadow_removes_all_trees() {
        let (_dir, db) = open_temp();
        let files = MemFiles::default();
        let meadow_id = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();
        let other = db.meadows().insert(&NewMeadow::new("c", "d", 1.0), 7).unwrap();
        let ids: Vec<i64> = (0..3)
            .map(|_| db.trees().insert(&tree(meadow_id), 7).unwrap())
            .collect();
        let survivor = db.trees().insert(&tree(other), 7).unwrap();

        let report = db.meadows().delete(meadow_id, 7, &files).unwrap();

        assert_eq!(report.trees_deleted, 3);
        assert!(report.stale_tree_ids.is_empty());
        for id in ids {
            assert!(db.trees().find_by_id(id, 7).unwrap().is_none());
        }
        assert!(db.meadows().find_by_id(meadow_id, 7).unwrap().is_none());
        assert!(db.trees().find_by_id(survivor, 7).unwrap().is_some());
        assert!(listed_matches_rows(&db, other, 7));
    }

    #[test]
    fn delete_meadow_tolerates_stale_and_unlisted_trees() {
        let (_dir, db) = open_temp();
        let files = MemFiles::default();
        let meadow_id = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();
        let listed = db.trees().insert(&tree(meadow_id), 7).unwrap();
        let unlisted = db.trees().insert(&tree(meadow_id), 7).unwrap();

        // Drift in both directions: a dangling ID and a missing one.
        db.meadows().update_tree_ids(meadow_id, unlisted, true, 7).unwrap();
        db.meadows().update_tree_ids(meadow_id, 404, false, 7).unwrap();

        let report = db.meadows().delete(meadow_id, 7, &files).unwrap();

        assert_eq!(report.stale_tree_ids, vec![404]);
        assert_eq!(report.trees_deleted, 2);
        assert!(db.trees().find_by_id(listed, 7).unwrap().is_none());
        assert!(db.trees().find_by_id(unlisted, 7).unwrap().is_none());
        assert!(db.meadows().find_by_id(meadow_id, 7).unwrap().is_none());
    }

    #[test]
    fn delete_meadow_keeps_trees_listed_from_another_meadow() {
        let (_dir, db) = open_temp();
        let files = MemFiles::default();
        let home = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();
        let tree_id = db.trees().insert(&tree(home), 7).unwrap();

        let mut borrowed = NewMeadow::new("c", "d", 1.0);
        borrowed.tree_ids = vec![tree_id];
        let borrower = db.meadows().insert(&borrowed, 7).unwrap();

        let report = db.meadows().delete(borrower, 7, &files).unwrap();

        assert_eq!(report.trees_deleted, 0);
        assert_eq!(report.stale_tree_ids, vec![tree_id]);
        assert!(db.trees().find_by_id(tree_id, 7).unwrap().is_some());
        assert_eq!(db.meadows().find_by_id(home, 7).unwrap().unwrap().tree_ids, vec![tree_id]);
        assert!(listed_matches_rows(&db, home, 7));
    }

    #[test]
    fn delete_meadow_of_other_owner_is_not_found() {
        let (_dir, db) = open_temp();
        let meadow_id = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();
        let tree_id = db.trees().insert(&tree(meadow_id), 7).unwrap();

        let err = db.meadows().delete(meadow_id, 8, &MemFiles::default()).unwrap_err();
        assert!(err.is_not_found());
        assert!(db.trees().find_by_id(tree_id, 7).unwrap().is_some());
    }

    #[test]
    fn reconcile_repairs_drifted_lists() {
        let (_dir, db) = open_temp();
        let a = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();
        let b = db.meadows().insert(&NewMeadow::new("c", "d", 1.0), 8).unwrap();
        let t1 = db.trees().insert(&tree(a), 7).unwrap();
        let t2 = db.trees().insert(&tree(a), 7).unwrap();
        db.trees().insert(&tree(b), 8).unwrap();

        db.meadows().update_tree_ids(a, t1, true, 7).unwrap();
        db.meadows().update_tree_ids(a, 77, false, 7).unwrap();
        assert!(!listed_matches_rows(&db, a, 7));

        assert_eq!(db.meadows().reconcile_tree_ids(None).unwrap(), 1);
        assert_eq!(db.meadows().find_by_id(a, 7).unwrap().unwrap().tree_ids, vec![t2, t1]);
        assert!(listed_matches_rows(&db, b, 8));

        assert_eq!(db.meadows().reconcile_tree_ids(Some(7)).unwrap(), 0);
    }

    #[test]
    fn concurrent_inserts_and_deletes_keep_list_in_sync() {
        let (_dir, db) = open_temp();
        let meadow_id = db.meadows().insert(&NewMeadow::new("a", "b", 1.0), 7).unwrap();

        std::thread::scope(|s| {
            for _ in 0..4 {
                let db = &db;
                s.spawn(move || {
                    let files = MemFiles::default();
                    for n in 0..10 {
                        let id = db.trees().insert(&tree(meadow_id), 7).unwrap();
                        if n % 2 == 0 {
                            db.trees().delete_for_user(id, 7, &files).unwrap();
                        }
                    }
                });
            }
        });

        let listed = db.meadows().find_by_id(meadow_id, 7).unwrap().unwrap().tree_ids;
        assert_eq!(listed.len(), 20);
        assert!(listed_matches_rows(&db, meadow_id, 7));
    }
}
