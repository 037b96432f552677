//! Serves a GraphQL request-execution engine from an axum application.
//!
//! The server is attached to a host [`axum::Router`] as an ordered chain of
//! conditional middleware: a startup barrier, a well-known health endpoint,
//! CORS, body limiting, multipart upload interception, and finally
//! content-negotiated dispatch between the interactive explorer page and
//! the execution engine itself. Execution semantics, schema handling and
//! subscription transport all live behind the [`services::QueryExecutor`]
//! seam.

#![warn(unreachable_pub)]

mod accept;
mod body_limit;
pub mod configuration;
mod dispatcher;
pub mod error;
pub mod graphql;
mod health_check;
mod layers;
pub mod playground;
mod server;
pub mod services;
mod startup;
pub mod uploads;

pub use body_limit::BodyLimits;
pub use configuration::BodyParserPolicy;
pub use configuration::Cors;
pub use configuration::CorsPolicy;
pub use configuration::HEALTH_CHECK_PATH;
pub use configuration::ServerRegistration;
pub use error::ErrorFormatterFn;
pub use error::ServerError;
pub use health_check::HEALTH_CHECK_CONTENT_TYPE;
pub use health_check::HealthCheckCallback;
pub use playground::Playground;
pub use server::ApolloServer;
#[allow(deprecated)]
pub use server::register_server;
pub use services::EngineCapabilities;
pub use services::ExecutionOptions;
pub use services::OptionsThunk;
pub use services::QueryExecutor;
pub use services::RequestDetails;
pub use services::UploadProcessor;
pub use services::UploadRejection;
pub use uploads::MultipartProcessor;
pub use uploads::MultipartRequestLimits;
pub use uploads::ProcessedUpload;
pub use uploads::UploadedFile;
pub use uploads::UploadedFiles;
