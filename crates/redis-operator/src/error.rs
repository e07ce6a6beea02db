//! Error types for the Redis Kubernetes Operator

use thiserror::Error;

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Create rejected because an object with the same name exists
    #[error("Resource already exists: {kind}/{name} in namespace {namespace}")]
    AlreadyExists {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Write rejected because the baseline resourceVersion is stale
    #[error("Conflict writing {kind}/{name} in namespace {namespace}: {message}")]
    Conflict {
        kind: String,
        name: String,
        namespace: String,
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Secure random source failed
    #[error("Failed to generate random password: {0}")]
    PasswordGeneration(String),

    /// The pass deadline elapsed before a step started
    #[error("Deadline exceeded before step '{0}'")]
    DeadlineExceeded(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Map a kube client error for `kind/namespace/name` onto the store taxonomy.
    ///
    /// 404 becomes [`OperatorError::NotFound`]; 409 becomes
    /// [`OperatorError::AlreadyExists`] or [`OperatorError::Conflict`]
    /// depending on the API reason.
    pub fn from_kube(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => OperatorError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                OperatorError::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => OperatorError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
                message: ae.message,
            },
            other => OperatorError::KubeError(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, OperatorError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, OperatorError::Conflict { .. })
    }

    /// Short machine-readable label, used for metrics and log fields
    pub fn metric_label(&self) -> &'static str {
        match self {
            OperatorError::KubeError(_) => "kube",
            OperatorError::NotFound { .. } => "not_found",
            OperatorError::AlreadyExists { .. } => "already_exists",
            OperatorError::Conflict { .. } => "conflict",
            OperatorError::InvalidConfig(_) => "invalid_config",
            OperatorError::ValidationError(_) => "validation",
            OperatorError::PasswordGeneration(_) => "password_generation",
            OperatorError::DeadlineExceeded(_) => "deadline_exceeded",
            OperatorError::SerializationError(_) | OperatorError::YamlError(_) => "serialization",
        }
    }
}
