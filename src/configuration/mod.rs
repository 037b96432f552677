//! Logic for loading middleware registration options into an object model.

pub(crate) mod cors;

use derivative::Derivative;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use tower_http::cors::CorsLayer;

pub use cors::Cors;

use crate::body_limit::BodyLimits;
use crate::error::ServerError;
use crate::health_check::HealthCheckCallback;

/// Well-known path answering health probes, independent of the execution path.
pub const HEALTH_CHECK_PATH: &str = "/.well-known/apollo/server-health";

fn default_graphql_path() -> String {
    String::from("/graphql")
}

/// CORS policy for the execution path: a plain `true`/`false` switch, or a
/// full configuration object.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum CorsPolicy {
    /// `true` applies the default configuration, `false` disables CORS handling
    Flag(bool),
    /// Full configuration, passed through as-is
    Custom(Cors),
}

impl Default for CorsPolicy {
    fn default() -> Self {
        CorsPolicy::Flag(true)
    }
}

impl CorsPolicy {
    pub(crate) fn into_layer(self) -> Result<Option<CorsLayer>, ServerError> {
        match self {
            CorsPolicy::Flag(false) => Ok(None),
            CorsPolicy::Flag(true) => Cors::default().into_layer().map(Some),
            CorsPolicy::Custom(cors) => cors.into_layer().map(Some),
        }
    }
}

/// Body-parsing policy for the execution path, with the same boolean-or-object
/// shape as [`CorsPolicy`].
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum BodyParserPolicy {
    /// `true` applies the default limits, `false` disables body handling
    Flag(bool),
    /// Full configuration, passed through as-is
    Custom(BodyLimits),
}

impl Default for BodyParserPolicy {
    fn default() -> Self {
        BodyParserPolicy::Flag(true)
    }
}

impl BodyParserPolicy {
    pub(crate) fn limits(self) -> Option<BodyLimits> {
        match self {
            BodyParserPolicy::Flag(false) => None,
            BodyParserPolicy::Flag(true) => Some(BodyLimits::default()),
            BodyParserPolicy::Custom(limits) => Some(limits),
        }
    }
}

/// Options supplied once, when the middleware chain is attached to a host
/// application.
#[derive(Clone, Derivative, Deserialize, Serialize, JsonSchema)]
#[derivative(Debug)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct ServerRegistration {
    /// The path at which queries are accepted.
    /// Defaults to /graphql
    pub path: String,

    /// The path serving the explorer page.
    /// Defaults to the execution path
    pub playground_path: Option<String>,

    /// Cross origin request policy for the execution path.
    pub cors: CorsPolicy,

    /// Body handling policy for the execution path.
    pub body_parser: BodyParserPolicy,

    /// Set to true to not serve the well-known health endpoint
    pub disable_health_check: bool,

    /// Custom asynchronous health check, consulted on every probe
    #[serde(skip)]
    #[schemars(skip)]
    #[derivative(Debug = "ignore")]
    pub on_health_check: Option<HealthCheckCallback>,
}

impl Default for ServerRegistration {
    fn default() -> Self {
        Self {
            path: default_graphql_path(),
            playground_path: None,
            cors: Default::default(),
            body_parser: Default::default(),
            disable_health_check: false,
            on_health_check: None,
        }
    }
}

#[buildstructor::buildstructor]
impl ServerRegistration {
    #[builder(visibility = "pub")]
    fn new(
        path: Option<String>,
        playground_path: Option<String>,
        cors: Option<CorsPolicy>,
        body_parser: Option<BodyParserPolicy>,
        disable_health_check: Option<bool>,
        on_health_check: Option<HealthCheckCallback>,
    ) -> Self {
        Self {
            path: path.unwrap_or_else(default_graphql_path),
            playground_path,
            cors: cors.unwrap_or_default(),
            body_parser: body_parser.unwrap_or_default(),
            disable_health_check: disable_health_check.unwrap_or_default(),
            on_health_check,
        }
    }
}
