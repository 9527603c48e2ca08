use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use crate::Database;
use crate::error::{QueryContext, Result, StoreError};
use crate::models::{IMAGE_COLUMNS, ImageRow, image_from_row};

/// Filesystem side of image records. Paths are the ones stored in the
/// `images.path` column.
pub trait FileStore: Send + Sync {
    fn exists(&self, path: &str) -> bool;
    fn remove(&self, path: &str) -> std::io::Result<()>;
}

pub struct ImageRepo<'a> {
    db: &'a Database,
}

impl<'a> ImageRepo<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Images of one tree, oldest first, with paths normalized for clients.
    pub fn list_for_tree(&self, tree_id: i64, user_id: i64) -> Result<Vec<ImageRow>> {
        let mut images = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {IMAGE_COLUMNS} FROM images WHERE tree_id = ?1 AND user_id = ?2 ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![tree_id, user_id], image_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .op("list images")?;
            Ok(rows)
        })?;

        for image in &mut images {
            image.path = normalize_path(&image.path);
        }
        Ok(images)
    }

    /// Record an already-written file. The datetime defaults to now.
    pub fn insert(&self, path: &str, description: &str, user_id: i64, tree_id: i64) -> Result<i64> {
        let id = self.db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO images (path, description, datetime, tree_id, user_id) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![path, description, Utc::now(), tree_id, user_id],
            )
            .op("insert image")?;
            Ok(conn.last_insert_rowid())
        })?;

        info!("Recorded image {} ({}) for user {}", id, path, user_id);
        Ok(id)
    }

    pub fn update_description(&self, image_id: i64, description: &str, user_id: i64) -> Result<()> {
        self.update_column(
            "UPDATE images SET description = ?1 WHERE id = ?2 AND user_id = ?3",
            &description,
            image_id,
            user_id,
        )?;
        info!("Updated description of image {}", image_id);
        Ok(())
    }

    pub fn update_datetime(
        &self,
        image_id: i64,
        datetime: DateTime<Utc>,
        user_id: i64,
    ) -> Result<()> {
        self.update_column(
            "UPDATE images SET datetime = ?1 WHERE id = ?2 AND user_id = ?3",
            &datetime,
            image_id,
            user_id,
        )?;
        info!("Updated datetime of image {}", image_id);
        Ok(())
    }

    fn update_column(
        &self,
        sql: &str,
        value: &dyn rusqlite::ToSql,
        image_id: i64,
        user_id: i64,
    ) -> Result<()> {
        let affected = self.db.with_conn_mut(|conn| {
            conn.execute(sql, params![value, image_id, user_id])
                .op("update image")
        })?;

        if affected == 0 {
            return Err(StoreError::NotFound { entity: "image", id: image_id });
        }
        Ok(())
    }

    /// Delete the record, then its file once the delete has committed. A
    /// record whose file is already missing is kept and reported as
    /// `FileMissing`. A file that cannot be unlinked after commit is logged.
    pub fn delete(&self, image_id: i64, user_id: i64, files: &dyn FileStore) -> Result<()> {
        let path = self.db.with_tx(|tx| {
            let path = find_path(tx, image_id, user_id)?
                .ok_or(StoreError::NotFound { entity: "image", id: image_id })?;

            if !files.exists(&path) {
                return Err(StoreError::FileMissing(path));
            }

            let affected = tx
                .execute(
                    "DELETE FROM images WHERE id = ?1 AND user_id = ?2",
                    params![image_id, user_id],
                )
                .op("delete image")?;
            if affected == 0 {
                return Err(StoreError::NotFound { entity: "image", id: image_id });
            }
            Ok(path)
        })?;

        match files.remove(&path) {
            Ok(()) => info!("Deleted file {}", path),
            Err(e) => warn!("Failed to remove image file {}: {}", path, e),
        }

        info!("Deleted image {} for user {}", image_id, user_id);
        Ok(())
    }
}

fn find_path(conn: &Connection, image_id: i64, user_id: i64) -> Result<Option<String>> {
    let path = conn
        .query_row(
            "SELECT path FROM images WHERE id = ?1 AND user_id = ?2",
            params![image_id, user_id],
            |row| row.get(0),
        )
        .optional()
        .op("find image path")?;
    Ok(path)
}

pub(crate) fn paths_for_tree(conn: &Connection, tree_id: i64, user_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT path FROM images WHERE tree_id = ?1 AND user_id = ?2")?;
    let paths = stmt
        .query_map(params![tree_id, user_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .op("list image paths")?;
    Ok(paths)
}

pub(crate) fn delete_for_tree(conn: &Connection, tree_id: i64, user_id: i64) -> Result<usize> {
    conn.execute(
        "DELETE FROM images WHERE tree_id = ?1 AND user_id = ?2",
        params![tree_id, user_id],
    )
    .op("delete tree images")
}

/// Clients expect paths rooted at `/`.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// In-memory stand-in for the upload directory.
    #[derive(Default)]
    pub struct MemFiles {
        pub files: Mutex<HashSet<String>>,
        pub fail_removal: bool,
    }

    impl MemFiles {
        pub fn with(paths: &[&str]) -> Self {
            Self {
                files: Mutex::new(paths.iter().map(|p| p.to_string()).collect()),
                fail_removal: false,
            }
        }

        pub fn contains(&self, path: &str) -> bool {
            self.files.lock().unwrap().contains(path)
        }
    }

    impl FileStore for MemFiles {
        fn exists(&self, path: &str) -> bool {
            self.contains(path)
        }

        fn remove(&self, path: &str) -> std::io::Result<()> {
            if self.fail_removal {
                return Err(std::io::Error::other("read-only filesystem"));
            }
            self.files.lock().unwrap().remove(path);
            Ok(())
        }
    }
}
