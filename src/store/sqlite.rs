use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Map UNIQUE constraint violations to `AlreadyExists` so callers can report
/// name/fingerprint collisions without parsing sqlite messages.
fn map_insert_err(e: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(inner, _) = &e {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            return Error::AlreadyExists;
        }
    }
    Error::Database(e)
}

fn repo_from_row(row: &rusqlite::Row) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_private: row.get(3)?,
        default_branch: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn key_from_row(row: &rusqlite::Row) -> rusqlite::Result<SigningKey> {
    Ok(SigningKey {
        id: row.get(0)?,
        name: row.get(1)?,
        public_key: row.get(2)?,
        fingerprint: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn webhook_from_row(row: &rusqlite::Row) -> rusqlite::Result<Webhook> {
    Ok(Webhook {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        url: row.get(2)?,
        secret: row.get(3)?,
        active: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

const REPO_COLUMNS: &str = "id, name, description, is_private, default_branch, created_at, updated_at";
const KEY_COLUMNS: &str = "id, name, public_key, fingerprint, created_at";
const WEBHOOK_COLUMNS: &str = "id, repo_id, url, secret, active, created_at";

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Repository operations

    fn create_repo(
        &self,
        name: &str,
        description: Option<&str>,
        is_private: bool,
        default_branch: &str,
    ) -> Result<Repository> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO repositories (name, description, is_private, default_branch, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                name,
                description,
                is_private,
                default_branch,
                format_datetime(&now),
            ],
        )
        .map_err(map_insert_err)?;

        Ok(Repository {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            description: description.map(str::to_string),
            is_private,
            default_branch: default_branch.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    fn get_repo(&self, name: &str) -> Result<Option<Repository>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {REPO_COLUMNS} FROM repositories WHERE name = ?1"),
            params![name],
            repo_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_repos(&self) -> Result<Vec<Repository>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {REPO_COLUMNS} FROM repositories ORDER BY name"))?;
        let rows = stmt.query_map([], repo_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn rename_repo(&self, old_name: &str, new_name: &str) -> Result<()> {
        let changed = self
            .conn()
            .execute(
                "UPDATE repositories SET name = ?1, updated_at = ?2 WHERE name = ?3",
                params![new_name, format_datetime(&Utc::now()), old_name],
            )
            .map_err(map_insert_err)?;

        if changed == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_repo(&self, name: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM repositories WHERE name = ?1", params![name])?;
        Ok(changed > 0)
    }

    // Signing key operations

    fn create_key(&self, name: &str, public_key: &str, fingerprint: &str) -> Result<SigningKey> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO ssh_keys (name, public_key, fingerprint, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, public_key, fingerprint, format_datetime(&now)],
        )
        .map_err(map_insert_err)?;

        Ok(SigningKey {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            public_key: public_key.to_string(),
            fingerprint: fingerprint.to_string(),
            created_at: now,
        })
    }

    fn get_key_by_fingerprint(&self, fingerprint: &str) -> Result<Option<SigningKey>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {KEY_COLUMNS} FROM ssh_keys WHERE fingerprint = ?1"),
            params![fingerprint],
            key_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_keys(&self) -> Result<Vec<SigningKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {KEY_COLUMNS} FROM ssh_keys ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], key_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_key(&self, fingerprint: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "DELETE FROM ssh_keys WHERE fingerprint = ?1",
            params![fingerprint],
        )?;
        Ok(changed > 0)
    }

    // Webhook operations

    fn create_webhook(&self, repo_id: i64, url: &str, secret: Option<&str>) -> Result<Webhook> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO webhooks (repo_id, url, secret, active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![repo_id, url, secret, format_datetime(&now)],
        )
        .map_err(map_insert_err)?;

        Ok(Webhook {
            id: conn.last_insert_rowid(),
            repo_id,
            url: url.to_string(),
            secret: secret.map(str::to_string),
            active: true,
            created_at: now,
        })
    }

    fn list_webhooks(&self, repo_id: i64) -> Result<Vec<Webhook>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE repo_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![repo_id], webhook_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_active_webhooks(&self, repo_name: &str) -> Result<Vec<Webhook>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT w.id, w.repo_id, w.url, w.secret, w.active, w.created_at
             FROM webhooks w JOIN repositories r ON w.repo_id = r.id
             WHERE r.name = ?1 AND w.active = 1 ORDER BY w.id",
        )?;
        let rows = stmt.query_map(params![repo_name], webhook_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_webhook(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM webhooks WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}
