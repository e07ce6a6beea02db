//! Kubernetes Resource Builders
//!
//! This module computes the desired Secret, Service and Deployment for a
//! Redis instance. Builders are pure: the same instance always yields the
//! same objects, and the password is passed in rather than generated here.

use crate::crd::Redis;
use crate::error::{OperatorError, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, PodSpec, PodTemplateSpec, Probe,
    Secret, SecretKeySelector, Service, ServicePort, ServiceSpec, TCPSocketAction,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::Resource;
use std::collections::BTreeMap;

/// Key of the password inside the generated secret
pub const PASSWORD_KEY: &str = "password";

/// Environment variable carrying the password into the container
pub const PASSWORD_ENV: &str = "REDIS_PASSWORD";

/// Name of the single managed container and of its port
pub const CONTAINER_NAME: &str = "redis";

/// Builder for generating Kubernetes resources from a Redis instance
pub struct ResourceBuilder<'a> {
    redis: &'a Redis,
    name: String,
    namespace: String,
    uid: String,
}

impl<'a> ResourceBuilder<'a> {
    /// Create a new resource builder
    pub fn new(redis: &'a Redis) -> Result<Self> {
        let name = redis
            .metadata
            .name
            .clone()
            .ok_or_else(|| OperatorError::InvalidConfig("redis name is required".to_string()))?;

        let namespace = redis
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        // Children are only ever written with an owner reference
        let uid = redis.metadata.uid.clone().ok_or_else(|| {
            OperatorError::InvalidConfig(format!("redis {} has no uid yet", name))
        })?;

        Ok(Self {
            redis,
            name,
            namespace,
            uid,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get owner reference for managed resources
    fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: Redis::api_version(&()).to_string(),
            kind: Redis::kind(&()).to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn object_meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.redis.spec.get_labels(&self.name)),
            owner_references: Some(vec![self.owner_reference()]),
            ..Default::default()
        }
    }

    /// Build the password secret around an already generated password
    pub fn build_secret(&self, password: &str) -> Secret {
        Secret {
            metadata: self.object_meta(&self.redis.spec.password_secret_name),
            type_: Some("Opaque".to_string()),
            data: Some(BTreeMap::from([(
                PASSWORD_KEY.to_string(),
                ByteString(password.as_bytes().to_vec()),
            )])),
            ..Default::default()
        }
    }

    /// Build the client-facing service
    pub fn build_service(&self) -> Service {
        let spec = &self.redis.spec;

        Service {
            metadata: self.object_meta(&spec.service.name),
            spec: Some(ServiceSpec {
                type_: Some(spec.service.type_.as_str().to_string()),
                selector: Some(spec.get_selector_labels(&self.name)),
                ports: Some(vec![ServicePort {
                    name: Some(CONTAINER_NAME.to_string()),
                    port: spec.service_port(),
                    target_port: Some(IntOrString::Int(spec.port())),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build the deployment running the Redis pods
    pub fn build_deployment(&self) -> Deployment {
        let spec = &self.redis.spec;
        let selector_labels = spec.get_selector_labels(&self.name);

        Deployment {
            metadata: self.object_meta(&self.name),
            spec: Some(DeploymentSpec {
                replicas: Some(spec.replicas()),
                selector: LabelSelector {
                    match_labels: Some(selector_labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(selector_labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![self.build_container()],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn build_container(&self) -> Container {
        let spec = &self.redis.spec;

        Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(spec.image.clone()),
            ports: Some(vec![ContainerPort {
                name: Some(CONTAINER_NAME.to_string()),
                container_port: spec.port(),
                ..Default::default()
            }]),
            env: Some(self.build_env()),
            resources: Some(spec.resources.clone()),
            liveness_probe: Some(
                spec.liveness_probe
                    .clone()
                    .unwrap_or_else(|| default_liveness_probe(spec.port())),
            ),
            readiness_probe: Some(
                spec.readiness_probe
                    .clone()
                    .unwrap_or_else(default_readiness_probe),
            ),
            ..Default::default()
        }
    }

    /// Password reference first, then the user's entries in order
    pub fn build_env(&self) -> Vec<EnvVar> {
        let spec = &self.redis.spec;
        let mut env = vec![EnvVar {
            name: PASSWORD_ENV.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: spec.password_secret_name.clone(),
                    key: PASSWORD_KEY.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }];
        if let Some(extra) = &spec.env {
            env.extend(extra.iter().cloned());
        }
        env
    }
}

/// TCP check on the Redis port
pub fn default_liveness_probe(port: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(15),
        timeout_seconds: Some(1),
        period_seconds: Some(20),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

/// `redis-cli ping` inside the container
pub fn default_readiness_probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["redis-cli".to_string(), "ping".to_string()]),
        }),
        initial_delay_seconds: Some(5),
        timeout_seconds: Some(1),
        period_seconds: Some(10),
        failure_threshold: Some(3),
        ..Default::default()
    }
}
