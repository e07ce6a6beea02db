//! Custom Resource Definitions for the Redis Kubernetes Operator
//!
//! This module defines the `Redis` CRD that represents one managed Redis
//! deployment in Kubernetes.

use k8s_openapi::api::core::v1::{EnvVar, Probe, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::{CustomResource, CustomResourceExt};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Default container image
pub const DEFAULT_IMAGE: &str = "bitnami/redis";

/// Default replica count when the spec omits it
pub const DEFAULT_REPLICAS: i32 = 1;

/// Default Redis port
pub const DEFAULT_PORT: i32 = 6379;

/// Default name of the generated password secret
pub const DEFAULT_PASSWORD_SECRET_NAME: &str = "redis-password";

/// Default name of the client service
pub const DEFAULT_SERVICE_NAME: &str = "redis-service";

/// Regex for validating Kubernetes names (RFC 1123 subdomain)
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap());

/// Validate a container image reference
fn validate_image(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("image_required")
            .with_message("image must not be empty".into()));
    }
    if value.len() > 255 {
        return Err(ValidationError::new("image_too_long")
            .with_message("image reference exceeds 255 characters".into()));
    }
    if value.contains("..") || value.starts_with('/') || value.starts_with('-') {
        return Err(ValidationError::new("invalid_image")
            .with_message(format!("'{}' is not a valid container image", value).into()));
    }
    Ok(())
}

/// Validate a Kubernetes object name (RFC 1123 subdomain)
fn validate_k8s_name(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.len() > 253 {
        return Err(ValidationError::new("invalid_name_length")
            .with_message("name must be 1-253 characters".into()));
    }
    if !NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_name").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

/// Validate user supplied environment variables
fn validate_env_vars(vars: &[EnvVar]) -> Result<(), ValidationError> {
    const MAX_ENV_VARS: usize = 100;
    if vars.len() > MAX_ENV_VARS {
        return Err(ValidationError::new("too_many_env_vars").with_message(
            format!("maximum {} environment variables allowed", MAX_ENV_VARS).into(),
        ));
    }
    let forbidden_names = [
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "DYLD_INSERT_LIBRARIES",
        "DYLD_LIBRARY_PATH",
    ];
    for var in vars {
        if var.name.is_empty() || var.name.len() > 256 {
            return Err(ValidationError::new("invalid_env_name")
                .with_message("environment variable name must be 1-256 characters".into()));
        }
        if forbidden_names.contains(&var.name.as_str()) || var.name.starts_with("LD_AUDIT") {
            return Err(ValidationError::new("forbidden_env_var").with_message(
                format!(
                    "environment variable '{}' is not allowed for security",
                    var.name
                )
                .into(),
            ));
        }
    }
    Ok(())
}

/// Redis custom resource definition
///
/// Declares one Redis deployment. The operator derives a password secret,
/// a client service and a deployment from it and keeps them converged.
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "redis.yazio.com",
    version = "v1alpha1",
    kind = "Redis",
    plural = "redis",
    shortname = "rds",
    namespaced,
    status = "RedisStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Available", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    /// Container image for the Redis instance
    #[serde(default = "default_image")]
    #[validate(custom(function = "validate_image"))]
    pub image: String,

    /// Number of desired replicas
    #[serde(default = "default_replicas")]
    #[validate(range(min = 1, message = "replicas must be at least 1"))]
    pub replicas: Option<i32>,

    /// Port on which Redis listens
    #[serde(default = "default_port")]
    #[validate(range(min = 1, max = 65535, message = "port must be between 1 and 65535"))]
    pub port: Option<i32>,

    /// Name of the secret holding the Redis password
    #[serde(default = "default_password_secret_name")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub password_secret_name: String,

    /// Extra environment variables appended after the password variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_env_vars"))]
    pub env: Option<Vec<EnvVar>>,

    /// Client service configuration
    #[serde(default)]
    #[validate(nested)]
    pub service: RedisServiceSpec,

    /// Resource requirements for the Redis container
    #[serde(default = "default_resources")]
    pub resources: ResourceRequirements,

    /// Replaces the default `redis-cli ping` readiness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    /// Replaces the default TCP liveness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
}

impl Default for RedisSpec {
    fn default() -> Self {
        Self {
            image: default_image(),
            replicas: default_replicas(),
            port: default_port(),
            password_secret_name: default_password_secret_name(),
            env: None,
            service: RedisServiceSpec::default(),
            resources: default_resources(),
            readiness_probe: None,
            liveness_probe: None,
        }
    }
}

/// Exposure type of the client service
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ClusterIP => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
        }
    }
}

/// Service configuration for Redis
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedisServiceSpec {
    /// Name of the service
    #[serde(default = "default_service_name")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub name: String,

    /// Service type
    #[serde(default, rename = "type")]
    pub type_: ServiceType,

    /// Port exposed by the service
    #[serde(default = "default_port")]
    #[validate(range(min = 1, max = 65535, message = "service port must be between 1 and 65535"))]
    pub port: Option<i32>,
}

impl Default for RedisServiceSpec {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            type_: ServiceType::default(),
            port: default_port(),
        }
    }
}

/// Status of a Redis resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatus {
    /// Name of the password secret in use
    #[serde(default)]
    pub password_secret_name: String,

    /// Conditions describing the instance, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// Default value functions
fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_replicas() -> Option<i32> {
    Some(DEFAULT_REPLICAS)
}

fn default_port() -> Option<i32> {
    Some(DEFAULT_PORT)
}

fn default_password_secret_name() -> String {
    DEFAULT_PASSWORD_SECRET_NAME.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

fn default_resources() -> ResourceRequirements {
    let quantities = |cpu: &str, memory: &str| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    };
    ResourceRequirements {
        requests: Some(quantities("100m", "128Mi")),
        limits: Some(quantities("500m", "512Mi")),
        ..Default::default()
    }
}

impl RedisSpec {
    /// Replica count with the default applied
    pub fn replicas(&self) -> i32 {
        self.replicas.unwrap_or(DEFAULT_REPLICAS)
    }

    /// Listen port with the default applied
    pub fn port(&self) -> i32 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Service port with the default applied
    pub fn service_port(&self) -> i32 {
        self.service.port.unwrap_or(DEFAULT_PORT)
    }

    /// Labels selecting the pods of one instance
    pub fn get_selector_labels(&self, instance: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), "redis".to_string()),
            ("redis_cr".to_string(), instance.to_string()),
        ])
    }

    /// Labels for managed resources
    pub fn get_labels(&self, instance: &str) -> BTreeMap<String, String> {
        let mut labels = self.get_selector_labels(instance);
        labels.insert("app.kubernetes.io/name".to_string(), "redis".to_string());
        labels.insert(
            "app.kubernetes.io/instance".to_string(),
            instance.to_string(),
        );
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "redis-operator".to_string(),
        );
        labels
    }
}

/// Render the Redis CRD manifest as YAML
pub fn crd_yaml() -> crate::error::Result<String> {
    Ok(serde_yaml::to_string(&Redis::crd())?)
}
