//! SQLite-backed session store.

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use super::SessionStore;
use crate::config::{SaveMode, SessionConfig};
use crate::error::{Error, Result};
use crate::session::Session;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id                       TEXT PRIMARY KEY,
    creation_time            INTEGER NOT NULL,
    last_accessed_time       INTEGER NOT NULL,
    max_inactive_interval_ms INTEGER NOT NULL,
    attributes               TEXT NOT NULL
);
";

/// Session store persisted in a single `sessions` table.
///
/// Timestamps and the idle timeout are stored in milliseconds, attributes as
/// one JSON object. Thread-safe via internal Mutex.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
    default_max_inactive_interval: Option<TimeDelta>,
    save_mode: SaveMode,
}

impl SqliteSessionStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::Database)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::Database)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            default_max_inactive_interval: None,
            save_mode: SaveMode::default(),
        })
    }

    /// Apply timeout and save mode from `config`.
    pub fn configured(self, config: &SessionConfig) -> Self {
        self.with_default_max_inactive_interval(config.max_inactive_interval())
            .with_save_mode(config.save_mode)
    }

    pub fn with_default_max_inactive_interval(mut self, interval: TimeDelta) -> Self {
        self.default_max_inactive_interval = Some(interval);
        self
    }

    pub fn with_save_mode(mut self, save_mode: SaveMode) -> Self {
        self.save_mode = save_mode;
        self
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<Session>> {
        let row = conn
            .query_row(
                "SELECT id, creation_time, last_accessed_time, max_inactive_interval_ms, attributes
                 FROM sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, created, accessed, interval, attributes)) = row else {
            return Ok(None);
        };

        let attributes: HashMap<String, Value> = serde_json::from_str(&attributes)?;
        Ok(Some(Session::restore(
            id,
            attributes,
            from_millis(created)?,
            from_millis(accessed)?,
            TimeDelta::try_milliseconds(interval)
                .ok_or_else(|| Error::store(format!("interval out of range: {}", interval)))?,
        )))
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::store(format!("timestamp out of range: {}", millis)))
}

impl SessionStore for SqliteSessionStore {
    fn create_session(&self) -> Result<Session> {
        let mut session = Session::new().with_save_mode(self.save_mode);
        if let Some(interval) = self.default_max_inactive_interval {
            session.set_max_inactive_interval(interval);
        }
        Ok(session)
    }

    fn save(&self, session: &mut Session) -> Result<()> {
        let mut conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let tx = conn.transaction()?;

        let existing = Self::load(&tx, session.original_id())?;
        let attributes = match existing {
            Some(stored) if self.save_mode != SaveMode::Always => {
                let mut merged = stored.attributes().clone();
                for name in session.changed_attributes() {
                    match session.attribute(&name) {
                        Some(value) => {
                            merged.insert(name, value.clone());
                        }
                        None => {
                            merged.remove(&name);
                        }
                    }
                }
                merged
            }
            _ => session.attributes().clone(),
        };

        if session.is_id_changed() {
            tx.execute(
                "DELETE FROM sessions WHERE id = ?1",
                params![session.original_id()],
            )?;
        }

        tx.execute(
            "INSERT INTO sessions (id, creation_time, last_accessed_time, max_inactive_interval_ms, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                last_accessed_time = excluded.last_accessed_time,
                max_inactive_interval_ms = excluded.max_inactive_interval_ms,
                attributes = excluded.attributes",
            params![
                session.id(),
                session.creation_time().timestamp_millis(),
                session.last_accessed_time().timestamp_millis(),
                session.max_inactive_interval().num_milliseconds(),
                serde_json::to_string(&attributes)?,
            ],
        )?;
        tx.commit()?;

        session.mark_saved();
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        match Self::load(&conn, id)? {
            Some(session) if session.is_expired() => {
                debug!(session_id = %id, "Found expired session, deleting");
                conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
                Ok(None)
            }
            Some(session) => Ok(Some(session.with_save_mode(self.save_mode))),
            None => Ok(None),
        }
    }

    fn delete_by_id(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn cleanup_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let removed = conn.execute(
            "DELETE FROM sessions
             WHERE max_inactive_interval_ms >= 0
               AND last_accessed_time + max_inactive_interval_ms < ?1",
            params![Utc::now().timestamp_millis()],
        )?;
        if removed > 0 {
            debug!(removed, "Removed expired sessions");
        }
        Ok(removed)
    }
}
