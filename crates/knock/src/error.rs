// Error types for the dispatcher
// Decision: Two tiers. KnockError covers configuration bugs, UnauthorizedError request failures
// Decision: UnauthorizedError travels as Arc so the stored and forwarded instance are the same

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::capability::Method;

/// Result type alias for dispatcher operations
pub type Result<T> = std::result::Result<T, KnockError>;

/// Message used when a schema leaves neither a user nor an error on the request
pub const UNSET_OUTCOME_MESSAGE: &str =
    "schema must set a user on success or an unauthorized error otherwise";

/// Message used when an unexpected error is wrapped
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Request-level authorization failure.
///
/// Raised by schema logic, synthesized by the dispatcher when a schema
/// produces no outcome, or wrapping any other error raised while a schema
/// runs.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct UnauthorizedError {
    message: String,
    schema: Option<String>,
    #[source]
    cause: Option<anyhow::Error>,
}

impl UnauthorizedError {
    pub fn new(schema: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            schema: schema.map(str::to_owned),
            cause: None,
        }
    }

    /// Wrap an unexpected error, keeping it as the cause
    pub fn internal(schema: Option<&str>, cause: anyhow::Error) -> Self {
        Self {
            message: INTERNAL_ERROR_MESSAGE.to_string(),
            schema: schema.map(str::to_owned),
            cause: Some(cause),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Name of the schema involved, if one was resolved
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }

    pub fn is_internal(&self) -> bool {
        self.cause.is_some()
    }

    /// 401 with a JSON error body
    pub fn to_response(&self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                error: self.message.clone(),
                schema: self.schema.clone(),
            }),
        )
            .into_response()
    }
}

impl IntoResponse for UnauthorizedError {
    fn into_response(self) -> Response {
        self.to_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<String>,
}

/// Errors surfaced by the dispatcher.
///
/// Everything except `Unauthorized` and `Handler` is a configuration error:
/// misuse by the deployment, never translated into an `UnauthorizedError`.
#[derive(Debug, Error)]
pub enum KnockError {
    /// No name given to `enable`/`disable` and none on the schema
    #[error("schema name is required")]
    MissingSchemaName,

    /// The registry holds no schema implementing knockLogin
    #[error("no registered schema implements knockLogin")]
    NoLoginSchema,

    /// The resolver found no schema for the invoked method
    #[error("no schema resolved for {method}")]
    SchemaNotResolved { method: Method },

    /// The resolved schema lacks the invoked method
    #[error("schema '{schema}' does not implement {method}")]
    MethodNotImplemented { schema: String, method: Method },

    /// Request-level failure
    #[error(transparent)]
    Unauthorized(Arc<UnauthorizedError>),

    /// Error raised by a schema handler or hook
    #[error("schema handler failed: {0}")]
    Handler(#[from] anyhow::Error),
}

impl KnockError {
    pub fn schema_not_resolved(method: Method) -> Self {
        KnockError::SchemaNotResolved { method }
    }

    pub fn method_not_implemented(schema: impl Into<String>, method: Method) -> Self {
        KnockError::MethodNotImplemented {
            schema: schema.into(),
            method,
        }
    }

    /// True for deployment bugs that must not be translated into request failures
    pub fn is_configuration(&self) -> bool {
        !matches!(self, KnockError::Unauthorized(_) | KnockError::Handler(_))
    }
}

impl From<UnauthorizedError> for KnockError {
    fn from(err: UnauthorizedError) -> Self {
        KnockError::Unauthorized(Arc::new(err))
    }
}

impl From<Arc<UnauthorizedError>> for KnockError {
    fn from(err: Arc<UnauthorizedError>) -> Self {
        KnockError::Unauthorized(err)
    }
}

impl IntoResponse for KnockError {
    fn into_response(self) -> Response {
        match self {
            KnockError::Unauthorized(err) => err.to_response(),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: other.to_string(),
                    schema: None,
                }),
            )
                .into_response(),
        }
    }
}
