//! Filters, filter chains and dispatchers.

use async_trait::async_trait;
use std::sync::Arc;

use super::{DispatchType, HttpResponse, ServerRequest};
use crate::error::Result;

/// The remainder of a pipeline, as seen from a filter.
#[async_trait]
pub trait FilterChain: Send + Sync {
    async fn do_filter(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()>;
}

/// A step that can inspect or decorate the exchange before passing it on.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn do_filter(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
        chain: &dyn FilterChain,
    ) -> Result<()>;
}

/// Re-enters a pipeline with the same physical request.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    /// Hand the request over; the caller does not write afterwards.
    async fn forward(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()>;

    /// Render the target into the current response and return to the caller.
    async fn include(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()>;
}

/// An ordered list of filters in front of an endpoint.
pub struct Pipeline {
    filters: Vec<Arc<dyn Filter>>,
    endpoint: Arc<dyn FilterChain>,
}

impl Pipeline {
    pub fn new(endpoint: Arc<dyn FilterChain>) -> Self {
        Self {
            filters: Vec::new(),
            endpoint,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Run the request through every filter and the endpoint.
    pub async fn dispatch(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        let chain = Position {
            pipeline: self,
            index: 0,
        };
        chain.do_filter(request, response).await
    }

    /// Run the pipeline with the given dispatch type, restoring the previous one.
    pub async fn dispatch_as(
        &self,
        dispatch_type: DispatchType,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        let previous = request.dispatch_type();
        request.set_dispatch_type(dispatch_type);
        let result = self.dispatch(request, response).await;
        request.set_dispatch_type(previous);
        result
    }
}

struct Position<'a> {
    pipeline: &'a Pipeline,
    index: usize,
}

#[async_trait]
impl FilterChain for Position<'_> {
    async fn do_filter(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        match self.pipeline.filters.get(self.index) {
            Some(filter) => {
                let next = Position {
                    pipeline: self.pipeline,
                    index: self.index + 1,
                };
                filter.do_filter(request, response, &next).await
            }
            None => self.pipeline.endpoint.do_filter(request, response).await,
        }
    }
}

/// Dispatches forward/include into another pipeline.
pub struct PipelineDispatcher {
    target: Arc<Pipeline>,
}

impl PipelineDispatcher {
    pub fn new(target: Arc<Pipeline>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl RequestDispatcher for PipelineDispatcher {
    async fn forward(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        self.target
            .dispatch_as(DispatchType::Forward, request, response)
            .await
    }

    async fn include(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        self.target
            .dispatch_as(DispatchType::Include, request, response)
            .await
    }
}
