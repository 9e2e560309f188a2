//! Host-facing request/response model.
//!
//! A small, host-agnostic filter pipeline: filters see a
//! mutable [`ServerRequest`] and write into an [`HttpResponse`], and the same
//! physical request can re-enter the pipeline through a [`RequestDispatcher`]
//! (forward, include, error).

mod chain;
mod request;
mod response;

pub use chain::{Filter, FilterChain, Pipeline, PipelineDispatcher, RequestDispatcher};
pub use request::{DispatchType, RequestHead, ServerRequest};
pub use response::{BufferedResponse, HttpResponse};
