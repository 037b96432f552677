//! Request body policy for the execution path.
//!
//! Oversized requests are refused with 413 up front when they announce a
//! Content-Length, and cut off mid-stream otherwise.

use std::task::Context;
use std::task::Poll;

use axum::body::Body;
use bytesize::ByteSize;
use futures::future::Either;
use futures::future::Ready;
use futures::future::ready;
use http::StatusCode;
use http::header::CONTENT_LENGTH;
use http::header::CONTENT_TYPE;
use http_body_util::Limited;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::graphql;

/// Limits applied to request bodies on the execution path.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct BodyLimits {
    /// The maximum size of a request body (default: 2MiB)
    #[schemars(with = "String")]
    pub max_request_size: ByteSize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            max_request_size: ByteSize::mib(2),
        }
    }
}

#[derive(Clone)]
pub(crate) struct BodyLimitLayer {
    limits: BodyLimits,
}

impl BodyLimitLayer {
    pub(crate) fn new(limits: BodyLimits) -> Self {
        Self { limits }
    }
}

impl<S> Layer<S> for BodyLimitLayer {
    type Service = BodyLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BodyLimitService {
            inner,
            limits: self.limits,
        }
    }
}

#[derive(Clone)]
pub(crate) struct BodyLimitService<S> {
    inner: S,
    limits: BodyLimits,
}

fn payload_too_large() -> http::Response<Body> {
    let error = graphql::Error::builder()
        .message("request body is too large".to_string())
        .extension_code("PAYLOAD_TOO_LARGE".to_string())
        .build();
    let body = serde_json::json!({ "errors": [error] });
    let mut response = http::Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static(mime::APPLICATION_JSON.as_ref()),
    );
    response
}

impl<S> Service<http::Request<Body>> for BodyLimitService<S>
where
    S: Service<http::Request<Body>, Response = http::Response<Body>, Error = BoxError>,
{
    type Response = http::Response<Body>;
    type Error = BoxError;
    type Future = Either<Ready<Result<Self::Response, Self::Error>>, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let limit = self.limits.max_request_size.as_u64();

        let declared_length = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        if let Some(length) = declared_length
            && length > limit
        {
            return Either::Left(ready(Ok(payload_too_large())));
        }

        let (parts, body) = req.into_parts();
        let body = Body::new(Limited::new(body, limit as usize));
        Either::Right(self.inner.call(http::Request::from_parts(parts, body)))
    }
}
