//! Store and resolver doubles shared by unit tests, plus end-to-end pipeline tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::resolver::SessionIdResolver;
use crate::session::Session;
use crate::store::{MemorySessionStore, SessionStore};
use crate::web::{FilterChain, HttpResponse, RequestHead, ServerRequest};

/// Memory store that counts calls per operation.
#[derive(Default)]
pub struct CountingStore {
    inner: MemorySessionStore,
    creates: AtomicUsize,
    saves: AtomicUsize,
    finds: AtomicUsize,
    deletes: AtomicUsize,
    fail_saves: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session directly, bypassing the counters.
    pub fn seed(&self, id: &str, attributes: &[(&str, Value)]) {
        let mut session = Session::with_id(id);
        for (name, value) in attributes {
            session.set_attribute(*name, value.clone());
        }
        self.inner.save(&mut session).unwrap();
    }

    pub fn inner(&self) -> &MemorySessionStore {
        &self.inner
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.creates() + self.saves() + self.finds() + self.deletes()
    }
}

impl SessionStore for CountingStore {
    fn create_session(&self) -> Result<Session> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_session()
    }

    fn save(&self, session: &mut Session) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::store("save rejected"));
        }
        self.inner.save(session)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_id(id)
    }

    fn delete_by_id(&self, id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_by_id(id)
    }
}

/// Resolver that presents fixed ids and records what it is asked to write.
pub struct RecordingResolver {
    ids: Vec<String>,
    written: Mutex<Vec<String>>,
    expired: AtomicUsize,
}

impl RecordingResolver {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|id| id.to_string()).collect(),
            written: Mutex::new(Vec::new()),
            expired: AtomicUsize::new(0),
        }
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }

    pub fn expired(&self) -> usize {
        self.expired.load(Ordering::SeqCst)
    }
}

impl SessionIdResolver for RecordingResolver {
    fn resolve_session_ids(&self, _request: &RequestHead) -> Result<Vec<String>> {
        Ok(self.ids.clone())
    }

    fn set_session_id(
        &self,
        _request: &RequestHead,
        _response: &mut dyn HttpResponse,
        session_id: &str,
    ) -> Result<()> {
        self.written.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    fn expire_session(&self, _request: &RequestHead, _response: &mut dyn HttpResponse) -> Result<()> {
        self.expired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type HandlerFn = dyn Fn(&mut ServerRequest, &mut dyn HttpResponse) -> Result<()> + Send + Sync;

/// Endpoint backed by a synchronous closure.
pub struct Handler(Box<HandlerFn>);

impl Handler {
    pub fn new(
        f: impl Fn(&mut ServerRequest, &mut dyn HttpResponse) -> Result<()> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self(Box::new(f)))
    }
}

#[async_trait]
impl FilterChain for Handler {
    async fn do_filter(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        (self.0)(request, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Phase, SessionFilter, SessionRequest};
    use crate::resolver::CookieSessionIdResolver;
    use crate::web::{BufferedResponse, DispatchType, Pipeline, PipelineDispatcher, RequestDispatcher};
    use http::header::{COOKIE, SET_COOKIE};
    use http::{HeaderValue, StatusCode};
    use serde_json::json;

    fn pipeline(
        store: &Arc<CountingStore>,
        resolver: &Arc<RecordingResolver>,
        endpoint: Arc<dyn FilterChain>,
    ) -> Pipeline {
        let filter = SessionFilter::builder()
            .store(store.clone())
            .resolver(resolver.clone())
            .build()
            .unwrap()
            .into_filter();
        Pipeline::new(endpoint).with_filter(Arc::new(filter))
    }

    fn current(request: &ServerRequest) -> Arc<SessionRequest> {
        request.session_request().cloned().unwrap()
    }

    async fn run(pipeline: &Pipeline) -> (ServerRequest, BufferedResponse) {
        let mut request = ServerRequest::new(RequestHead::default());
        let mut response = BufferedResponse::new();
        pipeline.dispatch(&mut request, &mut response).await.unwrap();
        (request, response)
    }

    #[tokio::test]
    async fn test_unknown_id_gets_new_session() {
        let store = Arc::new(CountingStore::new());
        let resolver = Arc::new(RecordingResolver::new(&["abc"]));
        let created = Arc::new(Mutex::new(None));
        let seen = created.clone();
        let endpoint = Handler::new(move |request, _response| {
            let session = current(request).get_session(true)?.unwrap();
            *seen.lock().unwrap() = Some(session.id()?);
            Ok(())
        });

        run(&pipeline(&store, &resolver, endpoint)).await;

        let new_id = created.lock().unwrap().clone().unwrap();
        assert_ne!(new_id, "abc");
        assert_eq!(store.creates(), 1);
        assert_eq!(store.saves(), 1);
        assert_eq!(resolver.written(), vec![new_id]);
    }

    #[tokio::test]
    async fn test_read_only_access_saves_without_rewriting_id() {
        let store = Arc::new(CountingStore::new());
        store.seed("xyz", &[("user", json!("alice"))]);
        let resolver = Arc::new(RecordingResolver::new(&["xyz"]));
        let endpoint = Handler::new(|request, _response| {
            let session = current(request).get_session(false)?.unwrap();
            assert_eq!(session.attribute("user")?, Some(json!("alice")));
            Ok(())
        });

        run(&pipeline(&store, &resolver, endpoint)).await;

        assert_eq!(store.creates(), 0);
        assert_eq!(store.saves(), 1);
        assert!(resolver.written().is_empty());
    }

    #[tokio::test]
    async fn test_no_id_and_no_create_makes_no_store_calls() {
        let store = Arc::new(CountingStore::new());
        let resolver = Arc::new(RecordingResolver::new(&[]));
        let endpoint = Handler::new(|request, _response| {
            assert!(current(request).get_session(false)?.is_none());
            Ok(())
        });

        let (request, _) = run(&pipeline(&store, &resolver, endpoint)).await;

        assert_eq!(store.total_calls(), 0);
        assert!(resolver.written().is_empty());
        assert_eq!(resolver.expired(), 0);
        assert!(request.session_request().is_none());
        assert!(request.session_store().is_some());
    }

    #[tokio::test]
    async fn test_invalidate_expires_client_id() {
        let store = Arc::new(CountingStore::new());
        store.seed("xyz", &[]);
        let resolver = Arc::new(RecordingResolver::new(&["xyz"]));
        let endpoint = Handler::new(|request, _response| {
            let session = current(request).get_session(false)?.unwrap();
            session.invalidate()?;
            session.invalidate()
        });

        run(&pipeline(&store, &resolver, endpoint)).await;

        assert_eq!(store.deletes(), 1);
        assert_eq!(resolver.expired(), 1);
        assert!(resolver.written().is_empty());
        assert!(store.inner().is_empty().unwrap());
    }

    struct IncludeAfterMutation {
        store: Arc<CountingStore>,
        resolver: Arc<RecordingResolver>,
        observed: Arc<Mutex<Option<(usize, usize)>>>,
    }

    #[async_trait]
    impl FilterChain for IncludeAfterMutation {
        async fn do_filter(
            &self,
            request: &mut ServerRequest,
            response: &mut dyn HttpResponse,
        ) -> Result<()> {
            let session_request = current(request);
            let session = session_request.get_session(true)?.unwrap();
            session.set_attribute("cart", vec!["apple"])?;

            let store = self.store.clone();
            let resolver = self.resolver.clone();
            let observed = self.observed.clone();
            let included = Pipeline::new(Handler::new(move |_request, response| {
                *observed.lock().unwrap() = Some((store.saves(), resolver.written().len()));
                response.write(b"included")
            }));
            let dispatcher =
                session_request.request_dispatcher(Arc::new(PipelineDispatcher::new(Arc::new(included))));
            dispatcher.include(request, response).await
        }
    }

    #[tokio::test]
    async fn test_include_commits_before_included_content() {
        let store = Arc::new(CountingStore::new());
        let resolver = Arc::new(RecordingResolver::new(&[]));
        let observed = Arc::new(Mutex::new(None));
        let endpoint = Arc::new(IncludeAfterMutation {
            store: store.clone(),
            resolver: resolver.clone(),
            observed: observed.clone(),
        });

        let (_, response) = run(&pipeline(&store, &resolver, endpoint)).await;

        assert_eq!(*observed.lock().unwrap(), Some((1, 1)));
        assert_eq!(response.body(), b"included");
        assert_eq!(store.saves(), 1);
        assert_eq!(resolver.written().len(), 1);
    }

    #[tokio::test]
    async fn test_chain_error_still_commits_and_propagates() {
        let store = Arc::new(CountingStore::new());
        let resolver = Arc::new(RecordingResolver::new(&[]));
        let endpoint = Handler::new(|request, _response| {
            let session = current(request).get_session(true)?.unwrap();
            session.set_attribute("step", 1)?;
            Err(Error::store("downstream failed"))
        });
        let pipeline = pipeline(&store, &resolver, endpoint);

        let mut request = ServerRequest::new(RequestHead::default());
        let mut response = BufferedResponse::new();
        let err = pipeline
            .dispatch(&mut request, &mut response)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Store(ref message) if message == "downstream failed"));
        assert_eq!(store.saves(), 1);
        assert_eq!(resolver.written().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_surfaces_after_successful_chain() {
        let store = Arc::new(CountingStore::new());
        store.fail_saves(true);
        let resolver = Arc::new(RecordingResolver::new(&[]));
        let endpoint = Handler::new(|request, _response| {
            current(request).get_session(true)?;
            Ok(())
        });
        let pipeline = pipeline(&store, &resolver, endpoint);

        let mut request = ServerRequest::new(RequestHead::default());
        let mut response = BufferedResponse::new();
        let err = pipeline
            .dispatch(&mut request, &mut response)
            .await
            .unwrap_err();

        assert!(err.is_store_failure());
        assert!(resolver.written().is_empty());
    }

    #[tokio::test]
    async fn test_write_commits_and_blocks_late_creation() {
        let store = Arc::new(CountingStore::new());
        let resolver = Arc::new(RecordingResolver::new(&[]));
        let endpoint = Handler::new(|request, response| {
            let session_request = current(request);
            assert_eq!(session_request.phase()?, Phase::Intercepting);
            response.set_status(StatusCode::CREATED)?;
            response.write(b"done")?;
            assert_eq!(session_request.phase()?, Phase::Committed);
            assert!(matches!(
                session_request.get_session(true),
                Err(Error::SessionAfterCommit)
            ));
            Ok(())
        });

        let (_, response) = run(&pipeline(&store, &resolver, endpoint)).await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_forward_reuses_bound_session() {
        let store = Arc::new(CountingStore::new());
        let resolver = Arc::new(RecordingResolver::new(&[]));
        let target = Arc::new(pipeline(
            &store,
            &resolver,
            Handler::new(|request, _response| {
                current(request).get_session(false)?.unwrap().set_attribute("forwarded", true)
            }),
        ));
        let endpoint = {
            struct Forwarding(Arc<Pipeline>);

            #[async_trait]
            impl FilterChain for Forwarding {
                async fn do_filter(
                    &self,
                    request: &mut ServerRequest,
                    response: &mut dyn HttpResponse,
                ) -> Result<()> {
                    current(request).get_session(true)?;
                    PipelineDispatcher::new(self.0.clone())
                        .forward(request, response)
                        .await
                }
            }
            Arc::new(Forwarding(target))
        };

        run(&pipeline(&store, &resolver, endpoint)).await;

        assert_eq!(store.creates(), 1);
        assert_eq!(store.saves(), 1);
        assert_eq!(resolver.written().len(), 1);
    }

    struct ErrorRedispatch {
        target: Arc<Pipeline>,
        after_nested: Arc<Mutex<Option<(Phase, bool)>>>,
    }

    #[async_trait]
    impl FilterChain for ErrorRedispatch {
        async fn do_filter(
            &self,
            request: &mut ServerRequest,
            response: &mut dyn HttpResponse,
        ) -> Result<()> {
            let session_request = current(request);
            session_request.get_session(true)?;
            self.target
                .dispatch_as(DispatchType::Error, request, response)
                .await?;
            let still_bound = request
                .session_request()
                .is_some_and(|bound| Arc::ptr_eq(bound, &session_request));
            *self.after_nested.lock().unwrap() = Some((session_request.phase()?, still_bound));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_error_dispatch_reenters_with_bound_session() {
        let store = Arc::new(CountingStore::new());
        let resolver = Arc::new(RecordingResolver::new(&[]));
        let filter: Arc<dyn crate::web::Filter> = Arc::new(
            SessionFilter::builder()
                .store(store.clone())
                .resolver(resolver.clone())
                .build()
                .unwrap()
                .into_filter(),
        );

        let nested_phase = Arc::new(Mutex::new(None));
        let seen = nested_phase.clone();
        let error_page = Arc::new(
            Pipeline::new(Handler::new(move |request, _response| {
                let session_request = current(request);
                *seen.lock().unwrap() = Some(session_request.phase()?);
                let session = session_request.get_session(false)?.unwrap();
                assert!(session.is_new()?);
                session.set_attribute("error", "not found")
            }))
            .with_filter(filter.clone()),
        );
        let after_nested = Arc::new(Mutex::new(None));
        let endpoint = Arc::new(ErrorRedispatch {
            target: error_page,
            after_nested: after_nested.clone(),
        });
        let pipeline = Pipeline::new(endpoint).with_filter(filter);

        let (request, _) = run(&pipeline).await;

        assert_eq!(*nested_phase.lock().unwrap(), Some(Phase::Intercepting));
        assert_eq!(*after_nested.lock().unwrap(), Some((Phase::Committed, true)));
        assert_eq!(store.creates(), 1);
        assert_eq!(store.saves(), 1);
        assert_eq!(resolver.written().len(), 1);
        assert!(request.session_request().is_none());

        let id = &resolver.written()[0];
        let stored = store.inner().find_by_id(id).unwrap().unwrap();
        assert_eq!(stored.attribute("error"), Some(&json!("not found")));
    }

    #[tokio::test]
    async fn test_cookie_round_trip_across_requests() {
        let store = Arc::new(MemorySessionStore::new());
        let filter = Arc::new(
            SessionFilter::builder()
                .store(store.clone())
                .resolver(Arc::new(CookieSessionIdResolver::default()))
                .build()
                .unwrap()
                .into_filter(),
        );
        let endpoint = Handler::new(|request, response| {
            let session = current(request).get_session(true)?.unwrap();
            let visits = session.attribute_as::<u64>("visits")?.unwrap_or(0) + 1;
            session.set_attribute("visits", visits)?;
            response.write(visits.to_string().as_bytes())
        });
        let pipeline = Pipeline::new(endpoint).with_filter(filter);

        let (_, first) = run(&pipeline).await;
        let set_cookie = first.headers()[SET_COOKIE].to_str().unwrap().to_string();
        let pair = set_cookie.split(';').next().unwrap().to_string();

        let mut head = RequestHead::default();
        head.headers.insert(COOKIE, HeaderValue::from_str(&pair).unwrap());
        let mut request = ServerRequest::new(head);
        let mut second = BufferedResponse::new();
        pipeline.dispatch(&mut request, &mut second).await.unwrap();

        assert_eq!(first.body(), b"1");
        assert_eq!(second.body(), b"2");
        assert!(second.headers().get(SET_COOKIE).is_none());
        assert_eq!(store.len().unwrap(), 1);
    }
}
