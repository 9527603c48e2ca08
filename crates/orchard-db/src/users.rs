use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::Database;
use crate::error::{QueryContext, Result, map_unique};
use crate::models::UserRow;

pub struct UserRepo<'a> {
    db: &'a Database,
}

impl<'a> UserRepo<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a user with an already-hashed password. A duplicate username
    /// or email surfaces as `AlreadyExists`.
    pub fn create(&self, username: &str, password_hash: &str, email: &str) -> Result<i64> {
        let id = self.db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, email) VALUES (?1, ?2, ?3)",
                params![username, password_hash, email],
            )
            .map_err(|e| map_unique(e, "user", "create user"))?;
            Ok(conn.last_insert_rowid())
        })?;

        info!("Registered user {} ({})", id, username);
        Ok(id)
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.db.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.db.with_conn(|conn| query_user(conn, "email", email))
    }
}

fn query_user(conn: &Connection, column: &'static str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, email, created_at FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                email: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()
        .op("find user")?;

    Ok(row)
}
