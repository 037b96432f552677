//! Exact-path gating for conditional middleware.

use std::task::Context;
use std::task::Poll;
use std::task::ready;

use futures::future::Either;
use tower::Layer;
use tower::Service;

/// Wraps an inner layer so that it only applies to requests whose path is
/// exactly `path`. Requests for any other path skip the wrapped middleware
/// entirely and go straight to the downstream service.
///
/// Comparison is plain string equality. This is the chain's only routing
/// mechanism: no patterns, no path parameters.
#[derive(Clone)]
pub(crate) struct PathGateLayer<L> {
    path: String,
    gated: L,
}

impl<L> PathGateLayer<L> {
    pub(crate) fn new(path: impl Into<String>, gated: L) -> Self {
        Self {
            path: path.into(),
            gated,
        }
    }
}

impl<S, L> Layer<S> for PathGateLayer<L>
where
    S: Clone,
    L: Layer<S>,
{
    type Service = PathGateService<L::Service, S>;

    fn layer(&self, inner: S) -> Self::Service {
        PathGateService {
            path: self.path.clone(),
            gated: self.gated.layer(inner.clone()),
            next: inner,
        }
    }
}

/// Service produced by [`PathGateLayer`]: `gated` on a path match, `next`
/// otherwise.
#[derive(Clone)]
pub(crate) struct PathGateService<G, S> {
    path: String,
    gated: G,
    next: S,
}

impl<G, S, B> Service<http::Request<B>> for PathGateService<G, S>
where
    G: Service<http::Request<B>>,
    S: Service<http::Request<B>, Response = G::Response, Error = G::Error>,
{
    type Response = G::Response;
    type Error = G::Error;
    type Future = Either<G::Future, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        ready!(self.gated.poll_ready(cx))?;
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        if req.uri().path() == self.path {
            Either::Left(self.gated.call(req))
        } else {
            Either::Right(self.next.call(req))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use axum::body::Body;
    use tower::BoxError;
    use tower::ServiceExt;
    use tower::util::BoxCloneSyncService;

    use super::*;

    #[derive(Clone)]
    struct CountingLayer {
        calls: Arc<AtomicUsize>,
    }

    #[derive(Clone)]
    struct CountingService<S> {
        calls: Arc<AtomicUsize>,
        inner: S,
    }

    impl<S> Layer<S> for CountingLayer {
        type Service = CountingService<S>;

        fn layer(&self, inner: S) -> Self::Service {
            CountingService {
                calls: self.calls.clone(),
                inner,
            }
        }
    }

    impl<S, B> Service<http::Request<B>> for CountingService<S>
    where
        S: Service<http::Request<B>>,
    {
        type Response = S::Response;
        type Error = S::Error;
        type Future = S::Future;

        fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.inner.poll_ready(cx)
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.call(req)
        }
    }

    fn downstream() -> BoxCloneSyncService<http::Request<Body>, http::Response<Body>, BoxError> {
        BoxCloneSyncService::new(tower::service_fn(|_req: http::Request<Body>| async {
            Ok::<_, BoxError>(http::Response::new(Body::empty()))
        }))
    }

    fn request(path: &str) -> http::Request<Body> {
        http::Request::builder()
            .uri(format!("http://127.0.0.1{path}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn inner_middleware_runs_on_exact_match() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = PathGateLayer::new(
            "/graphql",
            CountingLayer {
                calls: calls.clone(),
            },
        )
        .layer(downstream());

        service.oneshot(request("/graphql")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_paths_skip_the_middleware_but_continue() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = PathGateLayer::new(
            "/graphql",
            CountingLayer {
                calls: calls.clone(),
            },
        )
        .layer(downstream());

        let response = service.oneshot(request("/other")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(response.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn prefixes_are_not_matches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = PathGateLayer::new(
            "/graphql",
            CountingLayer {
                calls: calls.clone(),
            },
        )
        .layer(downstream());

        service.oneshot(request("/graphql/extra")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
