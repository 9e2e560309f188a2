//! The session data entity.

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::config::SaveMode;
use crate::error::{Error, Result};

/// Default idle timeout (30 minutes).
pub const DEFAULT_MAX_INACTIVE_INTERVAL_SECONDS: i64 = 1800;

/// Server-side state keyed by an opaque identifier.
///
/// Sessions are handed out by a [`SessionStore`](crate::store::SessionStore) and
/// carry enough bookkeeping for the store to persist them: the id the session was
/// loaded under (so an id change can re-key the store) and the set of attributes
/// touched since the last save.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    original_id: String,
    attributes: HashMap<String, Value>,
    creation_time: DateTime<Utc>,
    last_accessed_time: DateTime<Utc>,
    max_inactive_interval: TimeDelta,
    save_mode: SaveMode,
    delta: HashSet<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session with a freshly generated id.
    pub fn new() -> Self {
        Self::with_id(generate_id())
    }

    /// Create a session with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            original_id: id.clone(),
            id,
            attributes: HashMap::new(),
            creation_time: now,
            last_accessed_time: now,
            max_inactive_interval: TimeDelta::seconds(DEFAULT_MAX_INACTIVE_INTERVAL_SECONDS),
            save_mode: SaveMode::default(),
            delta: HashSet::new(),
        }
    }

    /// Rebuild a session loaded from persistent storage.
    pub fn restore(
        id: impl Into<String>,
        attributes: HashMap<String, Value>,
        creation_time: DateTime<Utc>,
        last_accessed_time: DateTime<Utc>,
        max_inactive_interval: TimeDelta,
    ) -> Self {
        let id = id.into();
        Self {
            original_id: id.clone(),
            id,
            attributes,
            creation_time,
            last_accessed_time,
            max_inactive_interval,
            save_mode: SaveMode::default(),
            delta: HashSet::new(),
        }
    }

    pub fn with_save_mode(mut self, save_mode: SaveMode) -> Self {
        self.save_mode = save_mode;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The id this session was created or loaded under.
    pub fn original_id(&self) -> &str {
        &self.original_id
    }

    pub fn is_id_changed(&self) -> bool {
        self.id != self.original_id
    }

    /// Replace the id with a new random one and return it.
    pub fn change_session_id(&mut self) -> String {
        self.id = generate_id();
        self.id.clone()
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Read an attribute, recording the read when the save mode writes back reads.
    pub fn read_attribute(&mut self, name: &str) -> Option<Value> {
        let value = self.attributes.get(name).cloned();
        if value.is_some() && self.save_mode == SaveMode::OnGetAttribute {
            self.delta.insert(name.to_string());
        }
        value
    }

    /// Deserialize an attribute into `T`.
    pub fn attribute_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.attributes.get(name) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn required_attribute(&self, name: &str) -> Result<&Value> {
        self.attributes
            .get(name)
            .ok_or_else(|| Error::MissingAttribute(name.to_string()))
    }

    pub fn attribute_or(&self, name: &str, default: Value) -> Value {
        self.attributes.get(name).cloned().unwrap_or(default)
    }

    pub fn attribute_names(&self) -> HashSet<String> {
        self.attributes.keys().cloned().collect()
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// Set an attribute. A null value removes it.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if value.is_null() {
            self.attributes.remove(&name);
        } else {
            self.attributes.insert(name.clone(), value);
        }
        self.delta.insert(name);
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.attributes.remove(name);
        self.delta.insert(name.to_string());
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn last_accessed_time(&self) -> DateTime<Utc> {
        self.last_accessed_time
    }

    pub fn set_last_accessed_time(&mut self, time: DateTime<Utc>) {
        self.last_accessed_time = time;
    }

    pub fn max_inactive_interval(&self) -> TimeDelta {
        self.max_inactive_interval
    }

    /// Negative intervals never expire.
    pub fn set_max_inactive_interval(&mut self, interval: TimeDelta) {
        self.max_inactive_interval = interval;
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.max_inactive_interval < TimeDelta::zero() {
            return false;
        }
        now - self.last_accessed_time > self.max_inactive_interval
    }

    pub fn save_mode(&self) -> SaveMode {
        self.save_mode
    }

    /// Attribute names a store should write back on save.
    pub fn changed_attributes(&self) -> HashSet<String> {
        match self.save_mode {
            SaveMode::Always => self
                .attributes
                .keys()
                .chain(self.delta.iter())
                .cloned()
                .collect(),
            SaveMode::OnSetAttribute | SaveMode::OnGetAttribute => self.delta.clone(),
        }
    }

    /// Reset change tracking after a successful save.
    pub fn mark_saved(&mut self) {
        self.original_id = self.id.clone();
        self.delta.clear();
    }
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
