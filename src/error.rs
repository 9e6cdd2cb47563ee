//! Error types for the Equinix Metal provider.
//!
//! [`ReconcileError`] is what the port reconciliation core reports.
//! [`ProviderError`] is what the lifecycle surface reports to the host.

use std::time::Duration;

use thiserror::Error;

use crate::metal::api::ApiError;
use crate::metal::executor::Step;

/// Errors raised while loading or reconciling a port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The declared configuration breaks a port invariant. Never retried.
    #[error("invalid port configuration: {0}")]
    Configuration(String),

    /// The addressed port does not exist.
    #[error("port not found: {0}")]
    NotFound(String),

    /// The addressed port is not accessible with the current credentials.
    #[error("access to port denied: {0}")]
    AccessDenied(String),

    /// Looking the port up failed for another reason. The caller may retry.
    #[error("port lookup failed: {0}")]
    Transient(String),

    /// An upstream call made by one of the transition steps failed.
    #[error("{step} failed: {message}")]
    Transition {
        /// The step that failed.
        step: Step,
        /// Upstream failure, including batch error messages.
        message: String,
    },

    /// A VLAN assignment batch did not reach a terminal state in time.
    #[error("vlan assignment batch {batch_id} is not complete after {elapsed:?}")]
    Timeout {
        /// The batch being polled.
        batch_id: String,
        /// Time spent polling.
        elapsed: Duration,
    },
}

impl ReconcileError {
    /// Whether the error means the managed port is gone for this caller.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::AccessDenied(_))
    }

    pub(crate) fn transition(step: Step, err: ApiError) -> Self {
        Self::Transition {
            step,
            message: err.to_string(),
        }
    }
}

impl From<ApiError> for ReconcileError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound(msg) => Self::NotFound(msg),
            ApiError::Forbidden(msg) => Self::AccessDenied(msg),
            ApiError::Request(msg) => Self::Transient(msg),
        }
    }
}

/// Errors returned from [`ProviderService`](crate::ProviderService) operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The input does not match the schema.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider or resource configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The Metal API could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A port transition did not finish in time.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// A port transition was rejected by the Metal API.
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// The operation is not supported for this resource type.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Get the error message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg)
            | Self::PermissionDenied(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::Unavailable(msg)
            | Self::DeadlineExceeded(msg)
            | Self::FailedPrecondition(msg)
            | Self::Unsupported(msg) => msg,
            Self::Serialization(_) => "serialization error (see Debug output)",
        }
    }
}

impl From<ReconcileError> for ProviderError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Configuration(msg) => Self::Configuration(msg),
            ReconcileError::NotFound(msg) => Self::NotFound(msg),
            ReconcileError::AccessDenied(msg) => Self::PermissionDenied(msg),
            ReconcileError::Transient(msg) => Self::Unavailable(msg),
            err @ ReconcileError::Transition { .. } => Self::FailedPrecondition(err.to_string()),
            err @ ReconcileError::Timeout { .. } => Self::DeadlineExceeded(err.to_string()),
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Unavailable(msg) => tonic::Status::unavailable(msg),
            ProviderError::DeadlineExceeded(msg) => tonic::Status::deadline_exceeded(msg),
            ProviderError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::Unsupported(msg) => tonic::Status::unimplemented(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_error_display() {
        let err = ReconcileError::Transition {
            step: Step::Bond,
            message: "request failed: 422".to_string(),
        };
        assert_eq!(err.to_string(), "bond failed: request failed: 422");

        let err = ReconcileError::Timeout {
            batch_id: "b1".to_string(),
            elapsed: Duration::from_secs(900),
        };
        assert_eq!(
            err.to_string(),
            "vlan assignment batch b1 is not complete after 900s"
        );
    }

    #[test]
    fn test_api_error_classification() {
        let err: ReconcileError = ApiError::NotFound("p1".to_string()).into();
        assert_eq!(err, ReconcileError::NotFound("p1".to_string()));
        assert!(err.is_gone());

        let err: ReconcileError = ApiError::Forbidden("p1".to_string()).into();
        assert_eq!(err, ReconcileError::AccessDenied("p1".to_string()));
        assert!(err.is_gone());

        let err: ReconcileError = ApiError::Request("timeout".to_string()).into();
        assert_eq!(err, ReconcileError::Transient("timeout".to_string()));
        assert!(!err.is_gone());
    }

    #[test]
    fn test_transition_keeps_step() {
        let err = ReconcileError::transition(Step::Disbond, ApiError::Request("boom".into()));
        assert!(matches!(
            err,
            ReconcileError::Transition {
                step: Step::Disbond,
                ..
            }
        ));
    }

    #[test]
    fn test_reconcile_to_provider_error() {
        let err: ProviderError = ReconcileError::Configuration("bad".to_string()).into();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert_eq!(err.message(), "bad");

        let err: ProviderError = ReconcileError::AccessDenied("p1".to_string()).into();
        assert!(matches!(err, ProviderError::PermissionDenied(_)));

        let err: ProviderError = ReconcileError::Transient("reset".to_string()).into();
        assert!(matches!(err, ProviderError::Unavailable(_)));

        let err: ProviderError = ReconcileError::Timeout {
            batch_id: "b1".to_string(),
            elapsed: Duration::from_secs(900),
        }
        .into();
        assert!(matches!(err, ProviderError::DeadlineExceeded(_)));
        assert!(err.message().contains("b1"));

        let err: ProviderError = ReconcileError::Transition {
            step: Step::AssignVlans,
            message: "vlan assignment batch b2 provisioning failed: no".to_string(),
        }
        .into();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
        assert!(err.message().starts_with("assign vlans failed"));
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::NotFound("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status: tonic::Status = ProviderError::PermissionDenied("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);

        let status: tonic::Status = ProviderError::Configuration("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status: tonic::Status = ProviderError::DeadlineExceeded("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);

        let status: tonic::Status = ProviderError::Unavailable("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::Unavailable);

        let status: tonic::Status = ProviderError::Unsupported("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }
}
