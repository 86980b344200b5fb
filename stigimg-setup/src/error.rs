//! Error types for stigimg-setup.

use thiserror::Error;

use crate::resource::ResourceKind;

/// Errors reported by a cloud provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{0}")]
    Failed(String),
}

impl ProviderError {
    /// Classify the stderr of a failed `gcloud` invocation.
    pub fn from_stderr(stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let lower = message.to_lowercase();

        if lower.contains("already_exists")
            || lower.contains("already exists")
            || lower.contains("httperror 409")
        {
            ProviderError::AlreadyExists(message)
        } else if lower.contains("permission_denied")
            || lower.contains("permission denied")
            || lower.contains("does not have permission")
            || lower.contains("httperror 403")
        {
            ProviderError::PermissionDenied(message)
        } else if lower.contains("not_found")
            || lower.contains("not found")
            || lower.contains("does not exist")
            || lower.contains("matched no objects")
            || lower.contains("httperror 404")
        {
            ProviderError::NotFound(message)
        } else if lower.contains("resource_exhausted")
            || lower.contains("quota '")
            || lower.contains("quota exceeded")
        {
            ProviderError::QuotaExceeded(message)
        } else if lower.contains("invalid_argument") || lower.contains("invalid argument") {
            ProviderError::InvalidArgument(message)
        } else {
            ProviderError::Failed(message)
        }
    }
}

/// Errors that end a reconciliation run.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("permission denied on {kind} {name}: {message}")]
    PermissionDenied {
        kind: String,
        name: String,
        message: String,
    },

    #[error("dependency of {kind} {name} not found: {message}")]
    DependencyNotFound {
        kind: String,
        name: String,
        message: String,
    },

    #[error("provider error on {kind} {name}: {message}")]
    Provider {
        kind: String,
        name: String,
        message: String,
    },

    #[error("cancelled by user")]
    UserCancelled,

    #[error("confirmation required; pass --yes when not running in a terminal")]
    ConfirmationRequired,

    #[error("failed to read confirmation: {0}")]
    Prompt(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),
}

impl ReconcileError {
    /// Attach the identity of the failing subject to a provider error.
    pub fn from_provider(kind: impl ToString, name: &str, err: ProviderError) -> Self {
        let kind = kind.to_string();
        let name = name.to_string();
        match err {
            ProviderError::PermissionDenied(message) => {
                ReconcileError::PermissionDenied { kind, name, message }
            }
            ProviderError::NotFound(message) => {
                ReconcileError::DependencyNotFound { kind, name, message }
            }
            other => ReconcileError::Provider {
                kind,
                name,
                message: other.to_string(),
            },
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("PROJECT_ID is required")]
    MissingProjectId,

    #[error("cannot derive region from zone '{0}'")]
    InvalidZone(String),

    #[error("project number '{0}' is not numeric")]
    InvalidProjectNumber(String),
}

/// Plan validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: ResourceKind, name: String },

    #[error("step {step} depends on {kind} '{name}' which is not declared before it")]
    UnorderedDependency {
        step: String,
        kind: ResourceKind,
        name: String,
    },
}
