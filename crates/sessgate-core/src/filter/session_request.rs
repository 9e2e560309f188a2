//! Per-request session view.
//!
//! ## Commit protocol
//!
//! ```text
//! get_session(create)
//!   │
//!   ├─► bound?            → return it
//!   ├─► resolve (once)    → bind, stamp access time, mark not new
//!   └─► create?           → store.create_session(), bind
//!
//! commit_session(response)
//!   │
//!   ├─► nothing bound     → expire client id if the session was invalidated
//!   └─► bound             → save (if changed), write id if it differs
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::dispatcher::SessionCommittingDispatcher;
use crate::config::FlushMode;
use crate::error::{Error, Result};
use crate::resolver::SessionIdResolver;
use crate::session::Session;
use crate::store::SessionStore;
use crate::web::{HttpResponse, RequestDispatcher, RequestHead};

/// Where a request is in the session protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    NotIntercepted,
    Intercepting,
    Committed,
}

struct BoundSession {
    session: Session,
    generation: u64,
    is_new: bool,
    dirty: bool,
}

#[derive(Default)]
struct RequestState {
    phase: Phase,
    requested_session: Option<Session>,
    requested_session_cached: bool,
    requested_session_id: Option<String>,
    requested_session_id_valid: Option<bool>,
    requested_session_not_found: bool,
    current: Option<BoundSession>,
    invalidated: bool,
    response_committed: bool,
    written_session_id: Option<String>,
    client_expired: bool,
    next_generation: u64,
}

impl RequestState {
    fn clear_requested_session_cache(&mut self) {
        self.requested_session_cached = false;
        self.requested_session = None;
        self.requested_session_id = None;
    }

    fn bind(&mut self, session: Session, is_new: bool) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.current = Some(BoundSession {
            session,
            generation,
            is_new,
            dirty: true,
        });
        generation
    }

    fn bound(&mut self, generation: u64) -> Result<&mut BoundSession> {
        match self.current.as_mut() {
            Some(bound) if bound.generation == generation => Ok(bound),
            _ => Err(Error::SessionInvalidated),
        }
    }
}

/// Lazily resolves, caches and exposes the session for one request.
///
/// Created by the session filter, bound to the [`ServerRequest`](crate::web::ServerRequest)
/// for the duration of the chain, and shared with the response decorator so the
/// first response commit can persist the session.
pub struct SessionRequest {
    head: RequestHead,
    store: Arc<dyn SessionStore>,
    resolver: Arc<dyn SessionIdResolver>,
    flush_mode: FlushMode,
    state: Mutex<RequestState>,
}

impl SessionRequest {
    pub(crate) fn new(
        head: RequestHead,
        store: Arc<dyn SessionStore>,
        resolver: Arc<dyn SessionIdResolver>,
        flush_mode: FlushMode,
    ) -> Self {
        Self {
            head,
            store,
            resolver,
            flush_mode,
            state: Mutex::new(RequestState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RequestState>> {
        self.state.lock().map_err(|_| Error::LockPoisoned)
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn phase(&self) -> Result<Phase> {
        Ok(self.lock()?.phase)
    }

    pub(crate) fn enter(&self) -> Result<()> {
        self.lock()?.phase = Phase::Intercepting;
        Ok(())
    }

    pub(crate) fn mark_response_committed(&self) -> Result<()> {
        self.lock()?.response_committed = true;
        Ok(())
    }

    /// The session bound to this request, resolving or creating one as needed.
    pub fn get_session(self: &Arc<Self>, create: bool) -> Result<Option<SessionHandle>> {
        let mut state = self.lock()?;
        if let Some(bound) = &state.current {
            return Ok(Some(self.handle(bound.generation)));
        }

        self.resolve_requested_session(&mut state)?;
        let resolved = if state.requested_session_not_found {
            None
        } else {
            state.requested_session.clone()
        };
        if let Some(mut session) = resolved {
            session.set_last_accessed_time(Utc::now());
            state.requested_session_id_valid = Some(true);
            let generation = state.bind(session, false);
            return Ok(Some(self.handle(generation)));
        }
        if state.requested_session_id.is_some() {
            debug!("No session found by id: caching result for get_session(false) for this request");
            state.requested_session_not_found = true;
        }

        if !create {
            return Ok(None);
        }
        if state.response_committed {
            return Err(Error::SessionAfterCommit);
        }

        let mut session = self.store.create_session()?;
        session.set_last_accessed_time(Utc::now());
        debug!(session_id = %session.id(), "A new session was created");
        let generation = state.bind(session, true);
        if self.flush_mode == FlushMode::Immediate {
            self.flush(&mut state, generation)?;
        }
        Ok(Some(self.handle(generation)))
    }

    /// Change the id of the bound session. Fails when there is none.
    pub fn change_session_id(self: &Arc<Self>) -> Result<String> {
        match self.get_session(false)? {
            Some(session) => session.change_session_id(),
            None => Err(Error::NoSessionBound),
        }
    }

    /// The first id the client presented, or the one that matched a session.
    pub fn requested_session_id(&self) -> Result<Option<String>> {
        let mut state = self.lock()?;
        if state.requested_session_id.is_none() {
            self.resolve_requested_session(&mut state)?;
        }
        Ok(state.requested_session_id.clone())
    }

    /// Whether the requested id matched a stored session. Frozen after the first call.
    pub fn is_requested_session_id_valid(&self) -> Result<bool> {
        let mut state = self.lock()?;
        self.requested_session_id_valid(&mut state)
    }

    /// True when the client presented an id that matched no stored session.
    pub fn requested_session_not_found(&self) -> Result<bool> {
        Ok(self.lock()?.requested_session_not_found)
    }

    /// Wrap a dispatcher so includes persist the session before rendering.
    pub fn request_dispatcher(
        self: &Arc<Self>,
        delegate: Arc<dyn RequestDispatcher>,
    ) -> SessionCommittingDispatcher {
        SessionCommittingDispatcher::new(Arc::clone(self), delegate)
    }

    /// Persist the bound session and tell the client which id to use.
    ///
    /// Safe to call repeatedly: the session is saved again only when it changed
    /// after the previous save, and an id is written at most once.
    pub fn commit_session(&self, response: &mut dyn HttpResponse) -> Result<()> {
        let mut state = self.lock()?;
        state.phase = Phase::Committed;

        if state.current.is_none() {
            if state.invalidated && !state.client_expired {
                self.resolver.expire_session(&self.head, response)?;
                state.client_expired = true;
                state.written_session_id = None;
                debug!("Expired client session id after invalidation");
            }
            return Ok(());
        }

        state.clear_requested_session_cache();
        let session_id = {
            let Some(bound) = state.current.as_mut() else {
                return Ok(());
            };
            if bound.dirty {
                self.store.save(&mut bound.session)?;
                bound.dirty = false;
            }
            bound.session.id().to_string()
        };

        let needs_write = !self.requested_session_id_valid(&mut state)? || {
            if state.requested_session_id.is_none() {
                self.resolve_requested_session(&mut state)?;
            }
            state.requested_session_id.as_deref() != Some(session_id.as_str())
        };
        if !needs_write || state.written_session_id.as_deref() == Some(session_id.as_str()) {
            return Ok(());
        }

        self.resolver
            .set_session_id(&self.head, response, &session_id)?;
        debug!(session_id = %session_id, "Wrote session id to response");
        state.written_session_id = Some(session_id);
        state.client_expired = false;
        Ok(())
    }

    fn handle(self: &Arc<Self>, generation: u64) -> SessionHandle {
        SessionHandle {
            request: Arc::clone(self),
            generation,
        }
    }

    fn resolve_requested_session(&self, state: &mut RequestState) -> Result<()> {
        if state.requested_session_cached {
            return Ok(());
        }
        for id in self.resolver.resolve_session_ids(&self.head)? {
            if id.is_empty() {
                continue;
            }
            if state.requested_session_id.is_none() {
                state.requested_session_id = Some(id.clone());
            }
            if let Some(session) = self.store.find_by_id(&id)? {
                state.requested_session = Some(session);
                state.requested_session_id = Some(id);
                break;
            }
        }
        state.requested_session_cached = true;
        Ok(())
    }

    fn requested_session_id_valid(&self, state: &mut RequestState) -> Result<bool> {
        if let Some(valid) = state.requested_session_id_valid {
            return Ok(valid);
        }
        self.resolve_requested_session(state)?;
        if let Some(session) = state.requested_session.as_mut() {
            session.set_last_accessed_time(Utc::now());
        }
        let valid = state.requested_session.is_some();
        state.requested_session_id_valid = Some(valid);
        Ok(valid)
    }

    fn flush(&self, state: &mut RequestState, generation: u64) -> Result<()> {
        let bound = state.bound(generation)?;
        self.store.save(&mut bound.session)?;
        bound.dirty = false;
        Ok(())
    }

    fn read<T>(&self, generation: u64, f: impl FnOnce(&mut Session) -> T) -> Result<T> {
        let mut state = self.lock()?;
        let bound = state.bound(generation)?;
        Ok(f(&mut bound.session))
    }

    fn write<T>(&self, generation: u64, f: impl FnOnce(&mut Session) -> T) -> Result<T> {
        let mut state = self.lock()?;
        let bound = state.bound(generation)?;
        let value = f(&mut bound.session);
        bound.dirty = true;
        if self.flush_mode == FlushMode::Immediate {
            self.flush(&mut state, generation)?;
        }
        Ok(value)
    }

    fn invalidate(&self, generation: u64) -> Result<()> {
        let mut state = self.lock()?;
        let bound = match state.current.take() {
            Some(bound) if bound.generation == generation => bound,
            other => {
                // Stale handle: its session was already invalidated.
                state.current = other;
                return Ok(());
            }
        };

        state.invalidated = true;
        state.clear_requested_session_cache();

        let session = bound.session;
        self.store.delete_by_id(session.id())?;
        if session.is_id_changed() {
            self.store.delete_by_id(session.original_id())?;
        }
        info!(session_id = %session.id(), "Session invalidated");
        Ok(())
    }
}

/// Handler-facing view of the bound session.
///
/// A handle stays tied to the session it was issued for: once that session is
/// invalidated every call except [`invalidate`](Self::invalidate) fails with
/// [`Error::SessionInvalidated`].
#[derive(Clone)]
pub struct SessionHandle {
    request: Arc<SessionRequest>,
    generation: u64,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn id(&self) -> Result<String> {
        self.request.read(self.generation, |s| s.id().to_string())
    }

    pub fn change_session_id(&self) -> Result<String> {
        let id = self
            .request
            .write(self.generation, |s| s.change_session_id())?;
        info!(session_id = %id, "Session id changed");
        Ok(id)
    }

    pub fn attribute(&self, name: &str) -> Result<Option<Value>> {
        self.request
            .read(self.generation, |s| s.read_attribute(name))
    }

    pub fn attribute_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.attribute(name)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set_attribute(&self, name: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.request
            .write(self.generation, |s| s.set_attribute(name, value))
    }

    pub fn remove_attribute(&self, name: &str) -> Result<()> {
        self.request
            .write(self.generation, |s| s.remove_attribute(name))
    }

    pub fn attribute_names(&self) -> Result<HashSet<String>> {
        self.request.read(self.generation, |s| s.attribute_names())
    }

    pub fn creation_time(&self) -> Result<DateTime<Utc>> {
        self.request.read(self.generation, |s| s.creation_time())
    }

    pub fn last_accessed_time(&self) -> Result<DateTime<Utc>> {
        self.request.read(self.generation, |s| s.last_accessed_time())
    }

    pub fn set_last_accessed_time(&self, time: DateTime<Utc>) -> Result<()> {
        self.request
            .write(self.generation, |s| s.set_last_accessed_time(time))
    }

    pub fn max_inactive_interval(&self) -> Result<TimeDelta> {
        self.request
            .read(self.generation, |s| s.max_inactive_interval())
    }

    pub fn set_max_inactive_interval(&self, interval: TimeDelta) -> Result<()> {
        self.request
            .write(self.generation, |s| s.set_max_inactive_interval(interval))
    }

    pub fn is_expired(&self) -> Result<bool> {
        self.request.read(self.generation, |s| s.is_expired())
    }

    /// Whether the session was created during this request.
    pub fn is_new(&self) -> Result<bool> {
        let mut state = self.request.lock()?;
        Ok(state.bound(self.generation)?.is_new)
    }

    /// Delete the session from the store and unbind it from the request.
    pub fn invalidate(&self) -> Result<()> {
        self.request.invalidate(self.generation)
    }
}
