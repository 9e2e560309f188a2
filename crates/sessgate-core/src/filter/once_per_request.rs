//! Guarantees a filter body runs at most once per physical request.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::trace;

use crate::error::{Error, Result};
use crate::web::{DispatchType, Filter, FilterChain, HttpResponse, ServerRequest};

/// Appended to the filter's name to build the "already filtered" attribute.
pub const ALREADY_FILTERED_SUFFIX: &str = ".FILTERED";

/// The body of a filter wrapped by [`OncePerRequestFilter`].
#[async_trait]
pub trait OncePerRequest: Send + Sync {
    /// Runs once for the outermost dispatch of a request.
    async fn filter_internal(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
        chain: &dyn FilterChain,
    ) -> Result<()>;

    /// Runs when an error dispatch re-enters the filter while it is still active.
    /// Passes straight through unless overridden.
    async fn filter_nested_error_dispatch(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
        chain: &dyn FilterChain,
    ) -> Result<()> {
        chain.do_filter(request, response).await
    }
}

/// Adapts a [`OncePerRequest`] body into a [`Filter`].
///
/// While the body runs, a request attribute named after the body type marks the
/// request as filtered. Forward and include dispatches that re-enter the pipeline
/// see the marker and skip the body. The marker is removed when the body finishes,
/// including on error or panic.
pub struct OncePerRequestFilter<F> {
    inner: F,
    already_filtered_attribute: String,
}

impl<F: OncePerRequest> OncePerRequestFilter<F> {
    pub fn new(inner: F) -> Self {
        Self {
            already_filtered_attribute: format!(
                "{}{}",
                std::any::type_name::<F>(),
                ALREADY_FILTERED_SUFFIX
            ),
            inner,
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn already_filtered_attribute_name(&self) -> &str {
        &self.already_filtered_attribute
    }
}

#[async_trait]
impl<F: OncePerRequest> Filter for OncePerRequestFilter<F> {
    async fn do_filter(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
        chain: &dyn FilterChain,
    ) -> Result<()> {
        if !request.is_http() {
            return Err(Error::UnsupportedExchange(format!(
                "{} only supports HTTP requests",
                std::any::type_name::<F>()
            )));
        }

        let name = self.already_filtered_attribute.as_str();
        if request.has_attribute(name) {
            if request.dispatch_type() == DispatchType::Error {
                trace!(filter = name, "Nested error dispatch");
                return self
                    .inner
                    .filter_nested_error_dispatch(request, response, chain)
                    .await;
            }
            trace!(filter = name, dispatch = ?request.dispatch_type(), "Already filtered, skipping");
            return chain.do_filter(request, response).await;
        }

        request.set_attribute(name, true);
        let outcome = AssertUnwindSafe(self.inner.filter_internal(request, response, chain))
            .catch_unwind()
            .await;
        request.remove_attribute(name);

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::{BufferedResponse, Pipeline, PipelineDispatcher, RequestDispatcher, RequestHead};
    use http::{Method, Uri};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
        nested: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl OncePerRequest for Counting {
        async fn filter_internal(
            &self,
            request: &mut ServerRequest,
            response: &mut dyn HttpResponse,
            chain: &dyn FilterChain,
        ) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            chain.do_filter(request, response).await?;
            if self.fail {
                return Err(Error::store("boom"));
            }
            Ok(())
        }

        async fn filter_nested_error_dispatch(
            &self,
            request: &mut ServerRequest,
            response: &mut dyn HttpResponse,
            chain: &dyn FilterChain,
        ) -> Result<()> {
            self.nested.fetch_add(1, Ordering::SeqCst);
            chain.do_filter(request, response).await
        }
    }

    struct Noop;

    #[async_trait]
    impl FilterChain for Noop {
        async fn do_filter(
            &self,
            _request: &mut ServerRequest,
            _response: &mut dyn HttpResponse,
        ) -> Result<()> {
            Ok(())
        }
    }

    /// Endpoint that re-enters a pipeline once with the given dispatch type.
    struct Redispatch {
        target: Arc<Pipeline>,
        dispatch_type: DispatchType,
        panic: bool,
    }

    #[async_trait]
    impl FilterChain for Redispatch {
        async fn do_filter(
            &self,
            request: &mut ServerRequest,
            response: &mut dyn HttpResponse,
        ) -> Result<()> {
            if self.panic {
                panic!("handler panicked");
            }
            match self.dispatch_type {
                DispatchType::Forward => {
                    PipelineDispatcher::new(self.target.clone())
                        .forward(request, response)
                        .await
                }
                DispatchType::Include => {
                    PipelineDispatcher::new(self.target.clone())
                        .include(request, response)
                        .await
                }
                other => self.target.dispatch_as(other, request, response).await,
            }
        }
    }

    fn outer_pipeline(
        filter: Arc<OncePerRequestFilter<Counting>>,
        dispatch_type: DispatchType,
        panic: bool,
    ) -> Pipeline {
        let inner = Arc::new(Pipeline::new(Arc::new(Noop)).with_filter(filter.clone()));
        Pipeline::new(Arc::new(Redispatch {
            target: inner,
            dispatch_type,
            panic,
        }))
        .with_filter(filter)
    }

    #[tokio::test]
    async fn test_skips_forward_and_include() {
        for dispatch_type in [DispatchType::Forward, DispatchType::Include] {
            let filter = Arc::new(OncePerRequestFilter::new(Counting::default()));
            let pipeline = outer_pipeline(filter.clone(), dispatch_type, false);

            let mut request = ServerRequest::new(RequestHead::default());
            let mut response = BufferedResponse::new();
            pipeline.dispatch(&mut request, &mut response).await.unwrap();

            assert_eq!(filter.inner().runs.load(Ordering::SeqCst), 1);
            assert_eq!(filter.inner().nested.load(Ordering::SeqCst), 0);
            assert!(!request.has_attribute(filter.already_filtered_attribute_name()));
        }
    }

    #[tokio::test]
    async fn test_error_dispatch_uses_nested_path() {
        let filter = Arc::new(OncePerRequestFilter::new(Counting::default()));
        let pipeline = outer_pipeline(filter.clone(), DispatchType::Error, false);

        let mut request = ServerRequest::new(RequestHead::default());
        let mut response = BufferedResponse::new();
        pipeline.dispatch(&mut request, &mut response).await.unwrap();

        assert_eq!(filter.inner().runs.load(Ordering::SeqCst), 1);
        assert_eq!(filter.inner().nested.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_marker_removed_on_error() {
        let filter = OncePerRequestFilter::new(Counting {
            fail: true,
            ..Default::default()
        });
        let mut request = ServerRequest::new(RequestHead::default());
        let mut response = BufferedResponse::new();

        let err = filter
            .do_filter(&mut request, &mut response, &Noop)
            .await
            .unwrap_err();
        assert!(err.is_store_failure());
        assert!(!request.has_attribute(filter.already_filtered_attribute_name()));

        filter
            .do_filter(&mut request, &mut response, &Noop)
            .await
            .unwrap_err();
        assert_eq!(filter.inner().runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_marker_removed_on_panic() {
        let filter = Arc::new(OncePerRequestFilter::new(Counting::default()));
        let pipeline = outer_pipeline(filter.clone(), DispatchType::Forward, true);

        let mut request = ServerRequest::new(RequestHead::default());
        let mut response = BufferedResponse::new();
        let outcome = AssertUnwindSafe(pipeline.dispatch(&mut request, &mut response))
            .catch_unwind()
            .await;

        assert!(outcome.is_err());
        assert!(!request.has_attribute(filter.already_filtered_attribute_name()));
    }

    #[tokio::test]
    async fn test_rejects_non_http_exchange() {
        let filter = OncePerRequestFilter::new(Counting::default());
        let mut request = ServerRequest::new(RequestHead::new(
            Method::GET,
            Uri::from_static("ws://example.com/socket"),
        ));
        let mut response = BufferedResponse::new();

        let err = filter
            .do_filter(&mut request, &mut response, &Noop)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedExchange(_)));
        assert_eq!(filter.inner().runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_attribute_name_uses_type_name() {
        let filter = OncePerRequestFilter::new(Counting::default());
        assert!(filter.already_filtered_attribute_name().ends_with("Counting.FILTERED"));
    }
}
