//! One-time startup barrier ahead of request execution.

use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use axum::body::Body;
use futures::FutureExt;
use futures::TryFutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::error::ServerError;
use crate::services::QueryExecutor;

/// The pending startup computation, cloned into every gate.
///
/// Settles exactly once; every request awaits the same handle, so neither
/// success nor failure ever re-runs the startup work.
pub(crate) type StartupFuture = Shared<BoxFuture<'static, Result<(), Arc<String>>>>;

/// Kick off the engine's startup work. Called once, when middleware is
/// registered; the returned handle is shared by all gates.
pub(crate) fn begin(executor: &Arc<dyn QueryExecutor>) -> StartupFuture {
    executor
        .warm_up()
        .map_err(|error| Arc::new(error.to_string()))
        .boxed()
        .shared()
}

/// Holds requests until the shared startup computation settles.
#[derive(Clone)]
pub(crate) struct StartupGateLayer {
    startup: StartupFuture,
}

impl StartupGateLayer {
    pub(crate) fn new(startup: StartupFuture) -> Self {
        Self { startup }
    }
}

impl<S> Layer<S> for StartupGateLayer {
    type Service = StartupGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StartupGateService {
            startup: self.startup.clone(),
            inner,
        }
    }
}

#[derive(Clone)]
pub(crate) struct StartupGateService<S> {
    startup: StartupFuture,
    inner: S,
}

impl<S> Service<http::Request<Body>> for StartupGateService<S>
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
        let startup = self.startup.clone();
        let mut inner = self.inner.clone();
        std::mem::swap(&mut inner, &mut self.inner);
        Box::pin(async move {
            if let Err(message) = startup.await {
                return Err(ServerError::StartupFailed(message.to_string()).into());
            }
            inner.call(req).await
        })
    }
}
