//! Execution-path dispatch: explorer page or engine, decided per request.

use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use axum::body::Body;
use bytes::Bytes;
use derivative::Derivative;
use futures::future::BoxFuture;
use futures::future::Either;
use futures::future::Ready;
use futures::future::ready;
use http::HeaderValue;
use http::Method;
use http::header::CONTENT_TYPE;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::accept;
use crate::error::ErrorFormatSettings;
use crate::services::EngineCapabilities;
use crate::services::ExecutionOptions;
use crate::services::OptionsThunk;
use crate::services::QueryExecutor;
use crate::services::RequestDetails;

/// Everything needed to build [`ExecutionOptions`] lazily for one request.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub(crate) struct OptionsSeed {
    pub(crate) capabilities: EngineCapabilities,
    #[derivative(Debug = "ignore")]
    pub(crate) format: ErrorFormatSettings,
}

impl OptionsSeed {
    fn options_for(&self, request: &http::Request<Body>) -> ExecutionOptions {
        ExecutionOptions {
            capabilities: self.capabilities,
            debug: self.format.debug,
            format_error: self.format.formatter.clone(),
            details: RequestDetails {
                method: request.method().clone(),
                uri: request.uri().clone(),
                headers: request.headers().clone(),
            },
        }
    }
}

fn html_page(page: &Bytes) -> http::Response<Body> {
    let mut response = http::Response::new(Body::from(page.clone()));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(mime::TEXT_HTML_UTF_8.as_ref()),
    );
    response
}

/// Terminal middleware on the execution path.
///
/// A GET whose Accept ranking puts `text/html` strictly ahead of
/// `application/json` is answered with the explorer page; every other
/// request is delegated to the engine with a lazy options thunk. The
/// continuation is never called: requests reaching this stage are ours.
#[derive(Clone)]
pub(crate) struct GraphqlDispatcherLayer {
    executor: Arc<dyn QueryExecutor>,
    page: Option<Bytes>,
    seed: OptionsSeed,
}

impl GraphqlDispatcherLayer {
    pub(crate) fn new(
        executor: Arc<dyn QueryExecutor>,
        page: Option<Bytes>,
        seed: OptionsSeed,
    ) -> Self {
        Self {
            executor,
            page,
            seed,
        }
    }
}

impl<S> Layer<S> for GraphqlDispatcherLayer {
    type Service = GraphqlDispatcher;

    fn layer(&self, _inner: S) -> Self::Service {
        GraphqlDispatcher {
            executor: self.executor.clone(),
            page: self.page.clone(),
            seed: self.seed.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct GraphqlDispatcher {
    executor: Arc<dyn QueryExecutor>,
    page: Option<Bytes>,
    seed: OptionsSeed,
}

impl Service<http::Request<Body>> for GraphqlDispatcher {
    type Response = http::Response<Body>;
    type Error = BoxError;
    type Future = Either<
        Ready<Result<Self::Response, Self::Error>>,
        BoxFuture<'static, Result<Self::Response, Self::Error>>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        if req.method() == Method::GET
            && let Some(page) = &self.page
            && accept::prefers_html(req.headers())
        {
            return Either::Left(ready(Ok(html_page(page))));
        }

        let seed = self.seed.clone();
        let thunk: OptionsThunk = Box::new(move |request| seed.options_for(request));
        Either::Right(self.executor.execute(thunk, req))
    }
}

/// Explorer page handler for a dedicated explorer path: always renders the
/// page, no content negotiation, no continuation.
#[derive(Clone)]
pub(crate) struct PlaygroundHandlerLayer {
    page: Bytes,
}

impl PlaygroundHandlerLayer {
    pub(crate) fn new(page: Bytes) -> Self {
        Self { page }
    }
}

impl<S> Layer<S> for PlaygroundHandlerLayer {
    type Service = PlaygroundHandler;

    fn layer(&self, _inner: S) -> Self::Service {
        PlaygroundHandler {
            page: self.page.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct PlaygroundHandler {
    page: Bytes,
}

impl Service<http::Request<Body>> for PlaygroundHandler {
    type Response = http::Response<Body>;
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: http::Request<Body>) -> Self::Future {
        ready(Ok(html_page(&self.page)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use http::header::ACCEPT;
    use tower::ServiceExt;

    use super::*;

    #[derive(Default)]
    struct RecordingExecutor {
        executions: AtomicUsize,
    }

    impl QueryExecutor for RecordingExecutor {
        fn execute(
            &self,
            options: OptionsThunk,
            request: http::Request<Body>,
        ) -> BoxFuture<'static, Result<http::Response<Body>, BoxError>> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            let options = options(&request);
            Box::pin(async move {
                let mut response = http::Response::new(Body::from(r#"{"data":null}"#));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(mime::APPLICATION_JSON.as_ref()),
                );
                response
                    .extensions_mut()
                    .insert(options.details.method.clone());
                Ok(response)
            })
        }
    }

    fn dispatcher(
        executor: Arc<RecordingExecutor>,
        page: Option<Bytes>,
    ) -> GraphqlDispatcher {
        GraphqlDispatcher {
            executor,
            page,
            seed: OptionsSeed {
                capabilities: EngineCapabilities::default(),
                format: ErrorFormatSettings::default(),
            },
        }
    }

    fn request(method: Method, accept: &'static str) -> http::Request<Body> {
        http::Request::builder()
            .method(method)
            .uri("http://127.0.0.1/graphql")
            .header(ACCEPT, HeaderValue::from_static(accept))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn get_preferring_html_is_answered_with_the_page() {
        let executor = Arc::new(RecordingExecutor::default());
        let service = dispatcher(executor.clone(), Some(Bytes::from_static(b"<html/>")));

        let response = service
            .oneshot(request(Method::GET, "text/html"))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            mime::TEXT_HTML_UTF_8.as_ref()
        );
        assert_eq!(executor.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn get_preferring_json_is_executed() {
        let executor = Arc::new(RecordingExecutor::default());
        let service = dispatcher(executor.clone(), Some(Bytes::from_static(b"<html/>")));

        service
            .oneshot(request(Method::GET, "application/json"))
            .await
            .unwrap();
        assert_eq!(executor.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn post_is_always_executed() {
        let executor = Arc::new(RecordingExecutor::default());
        let service = dispatcher(executor.clone(), Some(Bytes::from_static(b"<html/>")));

        service
            .oneshot(request(Method::POST, "text/html"))
            .await
            .unwrap();
        assert_eq!(executor.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_without_a_page_is_executed() {
        let executor = Arc::new(RecordingExecutor::default());
        let service = dispatcher(executor.clone(), None);

        service
            .oneshot(request(Method::GET, "text/html"))
            .await
            .unwrap();
        assert_eq!(executor.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn playground_handler_ignores_accept() {
        let service = PlaygroundHandler {
            page: Bytes::from_static(b"<html/>"),
        };
        let response = service
            .oneshot(request(Method::GET, "application/json"))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            mime::TEXT_HTML_UTF_8.as_ref()
        );
    }
}
