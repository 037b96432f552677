//! Router-level error types and the shared error formatting routine.

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use displaydoc::Display;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use thiserror::Error;
use tower::BoxError;

use crate::graphql;

/// Error formatting callback applied to every error before it is surfaced to a client.
pub type ErrorFormatterFn = Arc<dyn Fn(graphql::Error) -> graphql::Error + Send + Sync>;

/// Middleware registration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ServerError {
    /// middleware was already applied to an application
    MiddlewareAlreadyApplied,

    /// invalid CORS configuration: {0}
    InvalidCorsConfiguration(String),

    /// server startup failed: {0}
    StartupFailed(String),

    /// `register_server` is no longer supported, call `apply_middleware` on the server instead
    RegisterServerRemoved,
}

/// Formatting settings shared by every middleware that surfaces errors.
#[derive(Clone, Default)]
pub(crate) struct ErrorFormatSettings {
    pub(crate) formatter: Option<ErrorFormatterFn>,
    pub(crate) debug: bool,
}

/// Apply the configured formatter and debug policy to a list of raw errors.
///
/// When `debug` is disabled the conventional `exception` extension is
/// stripped so internals never leak to clients.
pub(crate) fn format_errors(
    errors: Vec<graphql::Error>,
    settings: &ErrorFormatSettings,
) -> Vec<graphql::Error> {
    errors
        .into_iter()
        .map(|mut error| {
            if !settings.debug {
                error.extensions.remove("exception");
            }
            match &settings.formatter {
                Some(formatter) => formatter(error),
                None => error,
            }
        })
        .collect()
}

/// An error carrying an HTTP status intended for exposure to the client.
///
/// Middleware that wants a specific status on the error response wraps its
/// formatted errors in this type before propagating them.
#[derive(Debug)]
pub(crate) struct ExposedError {
    pub(crate) status: Option<StatusCode>,
    pub(crate) errors: Vec<graphql::Error>,
}

impl fmt::Display for ExposedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut messages = self.errors.iter().map(|error| error.message.as_str());
        match messages.next() {
            Some(first) => {
                f.write_str(first)?;
                for message in messages {
                    write!(f, ", {message}")?;
                }
                Ok(())
            }
            None => f.write_str("request failed"),
        }
    }
}

impl std::error::Error for ExposedError {}

/// Turn a pipeline error into the HTTP response the host application serves.
///
/// This is the only place middleware errors are materialized: an
/// [`ExposedError`] keeps its annotated status, anything else becomes a 500.
pub(crate) fn error_response(error: &BoxError) -> http::Response<Body> {
    let (status, errors) = match error.downcast_ref::<ExposedError>() {
        Some(exposed) => (
            exposed.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            exposed.errors.clone(),
        ),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            vec![
                graphql::Error::builder()
                    .message(error.to_string())
                    .extension_code("INTERNAL_SERVER_ERROR".to_string())
                    .build(),
            ],
        ),
    };

    let body = serde_json::json!({ "errors": errors });
    let mut response = http::Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static(mime::APPLICATION_JSON.as_ref()),
    );
    response
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn format_errors_strips_exception_extension_unless_debug() {
        let error = graphql::Error::builder()
            .message("kaboom".to_string())
            .extension("exception", json!({"stacktrace": ["secret"]}))
            .build();

        let formatted = format_errors(vec![error.clone()], &ErrorFormatSettings::default());
        assert!(formatted[0].extensions.get("exception").is_none());

        let formatted = format_errors(
            vec![error],
            &ErrorFormatSettings {
                formatter: None,
                debug: true,
            },
        );
        assert!(formatted[0].extensions.get("exception").is_some());
    }

    #[test]
    fn format_errors_applies_custom_formatter() {
        let settings = ErrorFormatSettings {
            formatter: Some(Arc::new(|mut error: graphql::Error| {
                error.message = format!("formatted: {}", error.message);
                error
            })),
            debug: false,
        };
        let formatted = format_errors(
            vec![graphql::Error::builder().message("oops".to_string()).build()],
            &settings,
        );
        assert_eq!(formatted[0].message, "formatted: oops");
    }

    #[test]
    fn exposed_error_keeps_its_status() {
        let error: BoxError = Box::new(ExposedError {
            status: Some(StatusCode::UNPROCESSABLE_ENTITY),
            errors: vec![graphql::Error::builder().message("bad upload".to_string()).build()],
        });
        let response = error_response(&error);
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn opaque_errors_become_500() {
        let error: BoxError = "boom".into();
        let response = error_response(&error);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
