//! Error types for the bridge
//!
//! Registry and resolver errors are returned to their direct callers.
//! Tenant build failures never surface here: they are recovered inside the
//! tenant cache and recorded on the context (see [`crate::tenant::TenantConfigError`]).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The schema is already present in this process's registry
    #[error("schema {group}/{version} is already registered")]
    AlreadyRegistered {
        /// API group of the schema
        group: String,
        /// API version of the schema
        version: String,
    },

    /// No REST mapping exists for the requested kind
    #[error("no REST mapping for {kind}.{group} (versions: {versions:?})")]
    MappingNotFound {
        /// API group that was looked up
        group: String,
        /// Kind that was looked up
        kind: String,
        /// Acceptable versions supplied by the caller (empty = any)
        versions: Vec<String>,
    },

    /// A schema does not carry a well-formed group/version/kind
    #[error("invalid schema {name}: {message}")]
    InvalidSchema {
        /// Name of the CRD (or "unknown")
        name: String,
        /// Description of what's missing
        message: String,
    },

    /// Caller supplied an invalid argument
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g., "discovery", "middleware")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid schema error for the named CRD
    pub fn invalid_schema(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidSchema {
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a mapping-not-found error
    pub fn mapping_not_found(group: &str, kind: &str, versions: &[String]) -> Self {
        Self::MappingNotFound {
            group: group.to_string(),
            kind: kind.to_string(),
            versions: versions.to_vec(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status used when this error reaches a response
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AlreadyRegistered { .. } => StatusCode::CONFLICT,
            Self::MappingNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidSchema { .. } | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Kube { .. } => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Returns true if the API server rejected a create because the object exists.
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.reason == "AlreadyExists" || resp.code == 409)
}

/// Returns true if the API server reported the object as missing.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.to_string(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}
