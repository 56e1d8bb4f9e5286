//! Error types
//!
//! Remote failures, parameter validation failures, action failures and
//! policy-level errors.
//! Evaluation faults live in [`crate::filter`] because they never leave it.

use thiserror::Error;

/// Category of a failed remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The service answered with a non-success HTTP status
    Http(u16),
    /// The request never completed (DNS, TLS, connection reset, timeout)
    Transport,
    /// The response body was not the JSON we expected
    Decode,
    /// The resource definition has no route for the requested operation
    Unsupported,
}

/// Network, auth or service-side failure during a fetch or an action call
#[derive(Debug, Clone, Error)]
#[error("{service}.{operation} failed: {message}")]
pub struct RemoteServiceError {
    pub service: String,
    pub operation: String,
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteServiceError {
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        kind: RemoteErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(service: &str, operation: &str) -> Self {
        Self::new(
            service,
            operation,
            RemoteErrorKind::Unsupported,
            format!("operation '{}' is not defined for this resource", operation),
        )
    }

    /// HTTP status, when the service answered at all
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            RemoteErrorKind::Http(status) => Some(status),
            _ => None,
        }
    }
}

/// Failure while enumerating a resource collection
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("failed to list '{resource}': {source}")]
    Remote {
        resource: String,
        #[source]
        source: RemoteServiceError,
    },
    #[error("fetch cancelled")]
    Cancelled,
}

/// Action parameters rejected before any remote call
#[derive(Debug, Clone, Error)]
#[error("invalid parameters for action '{action}': {message}")]
pub struct SchemaError {
    pub action: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Failure of one action call, recovered into a `Failed` result
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error(transparent)]
    Remote(#[from] RemoteServiceError),

    /// The call could not be built from the record (e.g. a template field is missing)
    #[error("{0}")]
    Invalid(String),
}

/// Errors that abort a policy run
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unknown resource type: {0}")]
    UnknownResource(String),

    #[error(transparent)]
    Fetch(FetchError),

    #[error("policy nesting depth {depth} exceeds the limit of {max}")]
    NestingTooDeep { depth: usize, max: usize },

    #[error(
        "policy '{policy}' exceeded {limit} (selected {selected} of {population} resources)"
    )]
    ResourceLimitExceeded {
        policy: String,
        limit: String,
        selected: usize,
        population: usize,
    },

    #[error("policy run cancelled")]
    Cancelled,

    #[error("invalid policy document: {0}")]
    Document(String),
}

impl From<FetchError> for PolicyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => PolicyError::Cancelled,
            other => PolicyError::Fetch(other),
        }
    }
}
