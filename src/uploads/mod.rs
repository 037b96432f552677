//! Multipart file-upload interception ahead of execution.
//!
//! When a request announces `multipart/form-data`, the raw body is handed to
//! the configured [`UploadProcessor`](crate::services::UploadProcessor) and
//! replaced with the processed operations document before anything
//! downstream sees it. Parsed files travel alongside the request in its
//! extensions.

use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use axum::body::Body;
use bytes::Bytes;
use bytesize::ByteSize;
use futures::future::BoxFuture;
use http::header::CONTENT_LENGTH;
use http::header::CONTENT_TYPE;
use indexmap::IndexMap;
use mediatype::MediaType;
use mediatype::names::FORM_DATA;
use mediatype::names::MULTIPART;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::error::ErrorFormatSettings;
use crate::error::ExposedError;
use crate::error::format_errors;
use crate::graphql;
use crate::services::UploadProcessor;

pub(crate) mod error;
mod multipart;

pub use multipart::MultipartProcessor;

/// Limits applied while reading a multipart request.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct MultipartRequestLimits {
    /// The maximum number of files in a single request (default: 5)
    pub max_files: usize,

    /// The maximum size of a single file (default: 5MiB)
    #[schemars(with = "String")]
    pub max_file_size: ByteSize,
}

impl Default for MultipartRequestLimits {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_file_size: ByteSize::mib(5),
        }
    }
}

/// A single uploaded file, fully read off the wire.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// The client-supplied file name, if any.
    pub filename: Option<String>,
    /// The declared content type of the file, if any.
    pub content_type: Option<String>,
    /// The file contents.
    pub data: Bytes,
}

/// The files of a processed upload request, keyed by their `map` entry, in
/// `map` order. Inserted into the request extensions for the engine.
#[derive(Debug, Clone, Default)]
pub struct UploadedFiles(pub IndexMap<String, UploadedFile>);

/// Outcome of upload processing: the operations document with every mapped
/// variable patched, plus the files themselves.
#[derive(Debug)]
pub struct ProcessedUpload {
    /// The GraphQL request extracted from the `operations` field.
    pub operations: graphql::Request,
    /// The uploaded files.
    pub files: UploadedFiles,
}

fn get_multipart_mime<B>(req: &http::Request<B>) -> Option<MediaType> {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|header| header.to_str().ok())
        .and_then(|str| MediaType::parse(str).ok())
        .filter(|mime| mime.ty == MULTIPART && mime.subty == FORM_DATA)
}

/// Middleware that swaps multipart bodies for their processed
/// representation. Anything that is not multipart form-data passes through
/// untouched.
#[derive(Clone)]
pub(crate) struct FileUploadLayer {
    processor: Arc<dyn UploadProcessor>,
    limits: MultipartRequestLimits,
    format: ErrorFormatSettings,
}

impl FileUploadLayer {
    pub(crate) fn new(
        processor: Arc<dyn UploadProcessor>,
        limits: MultipartRequestLimits,
        format: ErrorFormatSettings,
    ) -> Self {
        Self {
            processor,
            limits,
            format,
        }
    }
}

impl<S> Layer<S> for FileUploadLayer {
    type Service = FileUploadService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FileUploadService {
            inner,
            processor: self.processor.clone(),
            limits: self.limits,
            format: self.format.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct FileUploadService<S> {
    inner: S,
    processor: Arc<dyn UploadProcessor>,
    limits: MultipartRequestLimits,
    format: ErrorFormatSettings,
}

impl<S> Service<http::Request<Body>> for FileUploadService<S>
where
    S: Service<http::Request<Body>, Response = http::Response<Body>, Error = BoxError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let processor = self.processor.clone();
        let limits = self.limits;
        let format = self.format.clone();
        let mut inner = self.inner.clone();
        std::mem::swap(&mut inner, &mut self.inner);
        Box::pin(async move {
            if get_multipart_mime(&req).is_none() {
                return inner.call(req).await;
            }
            let (mut parts, body) = req.into_parts();
            let Some(content_type) = parts.headers.get(CONTENT_TYPE).cloned() else {
                return inner
                    .call(http::Request::from_parts(parts, body))
                    .await;
            };

            match processor.process(content_type, body, limits).await {
                Ok(upload) => {
                    let body = serde_json::to_vec(&upload.operations).map_err(BoxError::from)?;
                    parts.headers.insert(
                        CONTENT_TYPE,
                        http::HeaderValue::from_static(mime::APPLICATION_JSON.as_ref()),
                    );
                    parts.headers.remove(CONTENT_LENGTH);
                    parts.extensions.insert(upload.files);
                    inner
                        .call(http::Request::from_parts(parts, Body::from(body)))
                        .await
                }
                Err(rejection) => {
                    let status = rejection.exposed_status();
                    let error = graphql::Error::builder()
                        .message(rejection.message.clone())
                        .and_extension_code(rejection.extension_code.clone())
                        .build();
                    Err(Box::new(ExposedError {
                        status,
                        errors: format_errors(vec![error], &format),
                    }))
                }
            }
        })
    }
}
