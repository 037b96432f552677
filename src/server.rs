//! Server instance and middleware registration.
//!
//! [`ApolloServer::apply_middleware`] attaches the full middleware chain to
//! a host [`axum::Router`]: an ordered list of named, path-gated stages
//! folded into a single service with the host application as the innermost
//! continuation.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::OnceLock;
use std::task::Context;
use std::task::Poll;

use axum::Router;
use axum::body::Body;
use bytes::Bytes;
use derivative::Derivative;
use futures::future::BoxFuture;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower::util::BoxCloneSyncService;

use crate::body_limit::BodyLimitLayer;
use crate::configuration::HEALTH_CHECK_PATH;
use crate::configuration::ServerRegistration;
use crate::dispatcher::GraphqlDispatcherLayer;
use crate::dispatcher::OptionsSeed;
use crate::dispatcher::PlaygroundHandlerLayer;
use crate::error::ErrorFormatSettings;
use crate::error::ErrorFormatterFn;
use crate::error::ServerError;
use crate::error::error_response;
use crate::health_check::HealthCheckLayer;
use crate::layers::PathGateLayer;
use crate::playground;
use crate::playground::Playground;
use crate::services::EngineCapabilities;
use crate::services::QueryExecutor;
use crate::services::UploadProcessor;
use crate::startup;
use crate::startup::StartupFuture;
use crate::startup::StartupGateLayer;
use crate::uploads::FileUploadLayer;
use crate::uploads::MultipartProcessor;
use crate::uploads::MultipartRequestLimits;

pub(crate) type PipelineService =
    BoxCloneSyncService<http::Request<Body>, http::Response<Body>, BoxError>;

/// A named middleware stage. The chain is built once, at registration time,
/// as an ordered list of these.
pub(crate) struct Stage {
    pub(crate) name: &'static str,
    wrap: Box<dyn FnOnce(PipelineService) -> PipelineService>,
}

impl Stage {
    /// A stage whose middleware only runs on an exact path match; any other
    /// request skips it and continues down the chain.
    fn gated<L>(name: &'static str, path: &str, layer: L) -> Self
    where
        L: Layer<PipelineService> + Send + 'static,
        L::Service: Service<http::Request<Body>, Response = http::Response<Body>, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<http::Request<Body>>>::Future: Send + 'static,
    {
        let gate = PathGateLayer::new(path, layer);
        Stage {
            name,
            wrap: Box::new(move |next| BoxCloneSyncService::new(gate.layer(next))),
        }
    }
}

#[derive(Debug, Clone)]
struct AppliedPaths {
    graphql_path: String,
    playground_path: String,
}

/// A GraphQL server bound to a host application as middleware.
///
/// Constructed once with the engine and its policies, then attached to an
/// application with [`apply_middleware`](Self::apply_middleware), exactly
/// once.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ApolloServer {
    #[derivative(Debug = "ignore")]
    executor: Arc<dyn QueryExecutor>,
    capabilities: EngineCapabilities,
    uploads: Option<MultipartRequestLimits>,
    #[derivative(Debug = "ignore")]
    upload_processor: Arc<dyn UploadProcessor>,
    playground: Playground,
    subscriptions_path: Option<String>,
    #[derivative(Debug = "ignore")]
    format: ErrorFormatSettings,
    applied: OnceLock<AppliedPaths>,
    #[derivative(Debug = "ignore")]
    startup: OnceLock<StartupFuture>,
}

#[buildstructor::buildstructor]
impl ApolloServer {
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)] // Used through a builder, not directly
    fn new(
        executor: Arc<dyn QueryExecutor>,
        capabilities: Option<EngineCapabilities>,
        uploads: Option<MultipartRequestLimits>,
        upload_processor: Option<Arc<dyn UploadProcessor>>,
        playground: Option<Playground>,
        subscriptions_path: Option<String>,
        format_error: Option<ErrorFormatterFn>,
        debug: Option<bool>,
    ) -> Self {
        Self {
            executor,
            capabilities: capabilities.unwrap_or_default(),
            uploads,
            upload_processor: upload_processor.unwrap_or_else(|| Arc::new(MultipartProcessor)),
            playground: playground.unwrap_or_default(),
            subscriptions_path,
            format: ErrorFormatSettings {
                formatter: format_error,
                debug: debug.unwrap_or_default(),
            },
            applied: OnceLock::new(),
            startup: OnceLock::new(),
        }
    }
}

impl ApolloServer {
    /// The execution path recorded at registration time.
    pub fn graphql_path(&self) -> Option<&str> {
        self.applied.get().map(|paths| paths.graphql_path.as_str())
    }

    /// The explorer path recorded at registration time.
    pub fn playground_path(&self) -> Option<&str> {
        self.applied
            .get()
            .map(|paths| paths.playground_path.as_str())
    }

    /// Attach the middleware chain to `app`, returning the wrapped
    /// application. May be called exactly once per server instance.
    ///
    /// The engine's startup work begins here; requests on the execution path
    /// are held until it settles, the call itself never blocks.
    pub fn apply_middleware(
        &self,
        registration: ServerRegistration,
        app: Router,
    ) -> Result<Router, ServerError> {
        let graphql_path = registration.path.clone();
        let playground_path = registration
            .playground_path
            .clone()
            .unwrap_or_else(|| graphql_path.clone());
        self.applied
            .set(AppliedPaths {
                graphql_path: graphql_path.clone(),
                playground_path: playground_path.clone(),
            })
            .map_err(|_| ServerError::MiddlewareAlreadyApplied)?;

        let startup = startup::begin(&self.executor);
        let _ = self.startup.set(startup.clone());

        let stages = self.build_stages(&registration, &graphql_path, &playground_path, startup)?;
        for stage in &stages {
            tracing::debug!(stage = stage.name, "registering middleware stage");
        }

        let host: PipelineService =
            BoxCloneSyncService::new(ServiceExt::<http::Request<Body>>::map_err(
                app,
                |error: Infallible| match error {},
            ));
        let pipeline = stages
            .into_iter()
            .rev()
            .fold(host, |next, stage| (stage.wrap)(next));

        tracing::info!("GraphQL endpoint exposed at {graphql_path}");
        if !registration.disable_health_check {
            tracing::info!("Health check exposed at {HEALTH_CHECK_PATH}");
        }
        if self.playground.enabled {
            tracing::info!("GraphQL playground exposed at {playground_path}");
        }

        Ok(Router::new().fallback_service(HostErrorAdapter { inner: pipeline }))
    }

    /// Build the ordered stage list for one registration. Ordering is fixed:
    /// startup gate, health check, CORS, body limit, uploads, dispatch,
    /// dedicated explorer handler.
    fn build_stages(
        &self,
        registration: &ServerRegistration,
        graphql_path: &str,
        playground_path: &str,
        startup: StartupFuture,
    ) -> Result<Vec<Stage>, ServerError> {
        let mut stages = Vec::new();

        stages.push(Stage::gated(
            "startup-barrier",
            graphql_path,
            StartupGateLayer::new(startup),
        ));

        if !registration.disable_health_check {
            stages.push(Stage::gated(
                "health-check",
                HEALTH_CHECK_PATH,
                HealthCheckLayer::new(registration.on_health_check.clone()),
            ));
        }

        if let Some(cors) = registration.cors.clone().into_layer()? {
            stages.push(Stage::gated("cors", graphql_path, cors));
        }

        if let Some(limits) = registration.body_parser.limits() {
            stages.push(Stage::gated(
                "body-limit",
                graphql_path,
                BodyLimitLayer::new(limits),
            ));
        }

        if self.capabilities.supports_uploads
            && let Some(limits) = self.uploads
        {
            stages.push(Stage::gated(
                "file-uploads",
                graphql_path,
                FileUploadLayer::new(self.upload_processor.clone(), limits, self.format.clone()),
            ));
        }

        let page = self.playground.enabled.then(|| {
            Bytes::from(playground::page_content(
                &self.playground,
                graphql_path,
                self.subscription_endpoint(),
            ))
        });

        stages.push(Stage::gated(
            "graphql",
            graphql_path,
            GraphqlDispatcherLayer::new(
                self.executor.clone(),
                page.clone(),
                OptionsSeed {
                    capabilities: self.capabilities,
                    format: self.format.clone(),
                },
            ),
        ));

        if playground_path != graphql_path
            && let Some(page) = page
        {
            stages.push(Stage::gated(
                "playground",
                playground_path,
                PlaygroundHandlerLayer::new(page),
            ));
        }

        Ok(stages)
    }

    fn subscription_endpoint(&self) -> Option<&str> {
        if self.capabilities.supports_subscriptions {
            self.subscriptions_path.as_deref()
        } else {
            None
        }
    }
}

/// The outermost adapter: axum requires infallible services, so pipeline
/// errors are materialized into HTTP error responses here.
#[derive(Clone)]
struct HostErrorAdapter {
    inner: PipelineService,
}

impl Service<http::Request<Body>> for HostErrorAdapter {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            match inner.oneshot(req).await {
                Ok(response) => Ok(response),
                Err(error) => {
                    tracing::debug!(%error, "middleware chain returned an error");
                    Ok(error_response(&error))
                }
            }
        })
    }
}

/// Former registration entry point, retained only to direct callers to the
/// supported API.
#[deprecated(note = "call `apply_middleware` on the server instance instead")]
pub fn register_server() -> Result<(), ServerError> {
    Err(ServerError::RegisterServerRemoved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::OptionsThunk;

    #[derive(Default)]
    struct NoopExecutor;

    impl QueryExecutor for NoopExecutor {
        fn execute(
            &self,
            _options: OptionsThunk,
            _request: http::Request<Body>,
        ) -> BoxFuture<'static, Result<http::Response<Body>, BoxError>> {
            Box::pin(std::future::ready(Ok(http::Response::new(Body::empty()))))
        }
    }

    fn server() -> ApolloServer {
        ApolloServer::builder()
            .executor(Arc::new(NoopExecutor) as Arc<dyn QueryExecutor>)
            .build()
    }

    fn stage_names(server: &ApolloServer, registration: &ServerRegistration) -> Vec<&'static str> {
        let startup = startup::begin(&server.executor);
        server
            .build_stages(registration, "/graphql", "/playground", startup)
            .unwrap()
            .into_iter()
            .map(|stage| stage.name)
            .collect()
    }

    #[test]
    fn stages_are_registered_in_fixed_order() {
        let server = ApolloServer::builder()
            .executor(Arc::new(NoopExecutor) as Arc<dyn QueryExecutor>)
            .uploads(MultipartRequestLimits::default())
            .build();
        assert_eq!(
            stage_names(&server, &ServerRegistration::default()),
            [
                "startup-barrier",
                "health-check",
                "cors",
                "body-limit",
                "file-uploads",
                "graphql",
                "playground",
            ]
        );
    }

    #[test]
    fn disabled_policies_drop_their_stages() {
        let registration = ServerRegistration::builder()
            .cors(crate::configuration::CorsPolicy::Flag(false))
            .body_parser(crate::configuration::BodyParserPolicy::Flag(false))
            .disable_health_check(true)
            .build();
        // no upload configuration on the server either
        assert_eq!(
            stage_names(&server(), &registration),
            ["startup-barrier", "graphql", "playground"]
        );
    }

    #[test]
    fn uploads_require_engine_support() {
        let server = ApolloServer::builder()
            .executor(Arc::new(NoopExecutor) as Arc<dyn QueryExecutor>)
            .capabilities(EngineCapabilities {
                supports_uploads: false,
                supports_subscriptions: true,
            })
            .uploads(MultipartRequestLimits::default())
            .build();
        assert!(
            !stage_names(&server, &ServerRegistration::default()).contains(&"file-uploads")
        );
    }

    #[test]
    fn middleware_can_only_be_applied_once() {
        let server = server();
        server
            .apply_middleware(ServerRegistration::default(), Router::new())
            .unwrap();
        let error = server
            .apply_middleware(ServerRegistration::default(), Router::new())
            .unwrap_err();
        assert!(matches!(error, ServerError::MiddlewareAlreadyApplied));
    }

    #[test]
    fn registration_records_the_paths() {
        let server = server();
        assert!(server.graphql_path().is_none());
        server
            .apply_middleware(
                ServerRegistration::builder()
                    .path("/api/graphql".to_string())
                    .build(),
                Router::new(),
            )
            .unwrap();
        assert_eq!(server.graphql_path(), Some("/api/graphql"));
        assert_eq!(server.playground_path(), Some("/api/graphql"));
    }

    #[test]
    #[allow(deprecated)]
    fn register_server_directs_to_apply_middleware() {
        assert!(matches!(
            register_server(),
            Err(ServerError::RegisterServerRemoved)
        ));
    }
}
