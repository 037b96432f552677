//! Seams between the middleware chain and the collaborators it drives.
//!
//! The execution engine, the upload processor and the error formatter are
//! all consumed through the narrow interfaces defined here; the middleware
//! chain never looks inside them.

use std::fmt;

use axum::body::Body;
use derivative::Derivative;
use futures::future::BoxFuture;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::Uri;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use tower::BoxError;

use crate::error::ErrorFormatterFn;
use crate::uploads::MultipartRequestLimits;
use crate::uploads::ProcessedUpload;

/// Capability flags describing what the configured execution engine
/// supports. A fixed record rather than behaviour on the engine itself:
/// the set is known when the server is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct EngineCapabilities {
    /// The engine accepts multipart file uploads
    pub supports_uploads: bool,

    /// The engine advertises a subscription endpoint
    pub supports_subscriptions: bool,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            supports_uploads: true,
            supports_subscriptions: true,
        }
    }
}

/// Request attributes available to the engine options builder.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RequestDetails {
    /// The request method.
    pub method: Method,
    /// The request URI.
    pub uri: Uri,
    /// The request headers.
    pub headers: HeaderMap,
}

/// Options for executing a single request, built lazily from the request
/// context through an [`OptionsThunk`].
#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct ExecutionOptions {
    /// What the engine was declared to support.
    pub capabilities: EngineCapabilities,
    /// Whether debug error output is enabled.
    pub debug: bool,
    /// The configured error formatting callback, if any.
    #[derivative(Debug = "ignore")]
    pub format_error: Option<ErrorFormatterFn>,
    /// Attributes of the request being executed.
    pub details: RequestDetails,
}

/// Lazily builds [`ExecutionOptions`] from the request being executed.
pub type OptionsThunk = Box<dyn FnOnce(&http::Request<Body>) -> ExecutionOptions + Send>;

/// The GraphQL request-execution engine.
///
/// The engine owns query parsing, validation, execution and error
/// formatting for everything that reaches it; it settles the HTTP response
/// directly.
pub trait QueryExecutor: Send + Sync + 'static {
    /// Execute a request, settling the HTTP response.
    fn execute(
        &self,
        options: OptionsThunk,
        request: http::Request<Body>,
    ) -> BoxFuture<'static, Result<http::Response<Body>, BoxError>>;

    /// One-time startup work that must complete before the first request is
    /// executed, e.g. building the schema or warming data sources.
    fn warm_up(&self) -> BoxFuture<'static, Result<(), BoxError>> {
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Parses a raw multipart request stream into structured upload data.
pub trait UploadProcessor: Send + Sync + 'static {
    /// Consume the raw request body and produce the processed representation.
    fn process(
        &self,
        content_type: HeaderValue,
        body: Body,
        limits: MultipartRequestLimits,
    ) -> BoxFuture<'static, Result<ProcessedUpload, UploadRejection>>;
}

/// Rejection raised by an [`UploadProcessor`].
#[derive(Debug)]
pub struct UploadRejection {
    /// HTTP status to surface on the response, when `expose` is set.
    pub status: Option<StatusCode>,
    /// Whether `status` is intended for the client.
    pub expose: bool,
    /// Human readable description of the failure.
    pub message: String,
    /// Machine readable error code placed in the error extensions.
    pub extension_code: Option<String>,
}

impl UploadRejection {
    /// The status to put on the response, if any.
    pub(crate) fn exposed_status(&self) -> Option<StatusCode> {
        if self.expose { self.status } else { None }
    }
}

impl fmt::Display for UploadRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for UploadRejection {}
