//! Liveness endpoint at the well-known health path.

use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use axum::body::Body;
use futures::future::BoxFuture;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::Serialize;
use tower::BoxError;
use tower::Layer;
use tower::Service;

/// Media type for health check responses.
pub const HEALTH_CHECK_CONTENT_TYPE: &str = "application/health+json";

/// Optional asynchronous check the health endpoint defers to.
///
/// Any error returned here is absorbed into a `fail` response; it never
/// propagates further.
pub type HealthCheckCallback =
    Arc<dyn Fn(&http::Request<Body>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum HealthStatus {
    Pass,
    Fail,
}

#[derive(Debug, Serialize)]
struct Health {
    status: HealthStatus,
}

/// Terminal middleware answering health probes. Never calls the
/// continuation: a matched request is always answered here.
#[derive(Clone)]
pub(crate) struct HealthCheckLayer {
    callback: Option<HealthCheckCallback>,
}

impl HealthCheckLayer {
    pub(crate) fn new(callback: Option<HealthCheckCallback>) -> Self {
        Self { callback }
    }
}

impl<S> Layer<S> for HealthCheckLayer {
    type Service = HealthCheckService;

    fn layer(&self, _inner: S) -> Self::Service {
        HealthCheckService {
            callback: self.callback.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct HealthCheckService {
    callback: Option<HealthCheckCallback>,
}

impl Service<http::Request<Body>> for HealthCheckService {
    type Response = http::Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let check = self.callback.as_ref().map(|callback| callback(&req));
        Box::pin(async move {
            let (status_code, health) = match check {
                None => (
                    StatusCode::OK,
                    Health {
                        status: HealthStatus::Pass,
                    },
                ),
                Some(check) => match check.await {
                    Ok(()) => (
                        StatusCode::OK,
                        Health {
                            status: HealthStatus::Pass,
                        },
                    ),
                    Err(error) => {
                        tracing::debug!(%error, "health check callback failed");
                        (
                            StatusCode::SERVICE_UNAVAILABLE,
                            Health {
                                status: HealthStatus::Fail,
                            },
                        )
                    }
                },
            };
            tracing::trace!(?health, "health check");
            Ok(http::Response::builder()
                .status(status_code)
                .header(CONTENT_TYPE, HEALTH_CHECK_CONTENT_TYPE)
                .body(Body::from(
                    serde_json::to_vec(&health).map_err(BoxError::from)?,
                ))?)
        })
    }
}
