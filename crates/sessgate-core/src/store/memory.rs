//! In-memory session store.

use chrono::{TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::SessionStore;
use crate::config::{SaveMode, SessionConfig};
use crate::error::{Error, Result};
use crate::session::Session;

/// Session store backed by a `HashMap`.
///
/// Saves merge the attributes changed during the request into the stored copy,
/// unless the save mode is [`SaveMode::Always`], in which case the request's view
/// replaces the stored one.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    default_max_inactive_interval: Option<TimeDelta>,
    save_mode: SaveMode,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store using the timeout and save mode from `config`.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new()
            .with_default_max_inactive_interval(config.max_inactive_interval())
            .with_save_mode(config.save_mode)
    }

    /// Idle timeout applied to newly created sessions
    pub fn with_default_max_inactive_interval(mut self, interval: TimeDelta) -> Self {
        self.default_max_inactive_interval = Some(interval);
        self
    }

    pub fn with_save_mode(mut self, save_mode: SaveMode) -> Self {
        self.save_mode = save_mode;
        self
    }

    /// Number of stored sessions, expired ones included.
    pub fn len(&self) -> Result<usize> {
        Ok(self.sessions.read().map_err(|_| Error::LockPoisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(&self) -> Result<Session> {
        let mut session = Session::new().with_save_mode(self.save_mode);
        if let Some(interval) = self.default_max_inactive_interval {
            session.set_max_inactive_interval(interval);
        }
        Ok(session)
    }

    fn save(&self, session: &mut Session) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| Error::LockPoisoned)?;

        let existing = if session.is_id_changed() {
            sessions.remove(session.original_id())
        } else {
            sessions.remove(session.id())
        };

        let stored = match existing {
            Some(mut stored) if self.save_mode != SaveMode::Always => {
                for name in session.changed_attributes() {
                    match session.attribute(&name) {
                        Some(value) => stored.set_attribute(name, value.clone()),
                        None => stored.remove_attribute(&name),
                    }
                }
                let mut merged = Session::restore(
                    session.id(),
                    stored.attributes().clone(),
                    stored.creation_time(),
                    session.last_accessed_time(),
                    session.max_inactive_interval(),
                );
                merged.mark_saved();
                merged
            }
            _ => {
                let mut copy = session.clone();
                copy.mark_saved();
                copy
            }
        };

        sessions.insert(session.id().to_string(), stored);
        session.mark_saved();
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        let found = {
            let sessions = self.sessions.read().map_err(|_| Error::LockPoisoned)?;
            sessions.get(id).cloned()
        };

        match found {
            Some(session) if session.is_expired() => {
                debug!(session_id = %id, "Found expired session, deleting");
                self.delete_by_id(id)?;
                Ok(None)
            }
            Some(session) => Ok(Some(session.with_save_mode(self.save_mode))),
            None => Ok(None),
        }
    }

    fn delete_by_id(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| Error::LockPoisoned)?;
        sessions.remove(id);
        Ok(())
    }

    fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().map_err(|_| Error::LockPoisoned)?;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired_at(now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "Removed expired sessions");
        }
        Ok(removed)
    }
}
