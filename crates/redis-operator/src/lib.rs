//! # Redis Kubernetes Operator
//!
//! Kubernetes operator for deploying and managing Redis instances declared
//! through a `Redis` custom resource.
//!
//! For every instance the operator owns three children:
//!
//! - a **Secret** holding a password generated once and never rotated
//! - a **Service** exposing the Redis port
//! - a **Deployment** running the Redis container with the password injected
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use redis_operator::prelude::*;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!     run_controller(client, ControllerConfig::default()).await
//! }
//! ```
//!
//! ## Architecture
//!
//! The operator follows the standard Kubernetes controller pattern. Each pass
//! is level-triggered and derives everything from the loaded object:
//!
//! 1. **Load**: fetch the instance; a missing instance ends the pass
//! 2. **Lifecycle**: release the finalizer on deletion, otherwise record an
//!    initial condition and attach the finalizer
//! 3. **Converge**: ensure the Secret, then correct drift on the Service and
//!    the Deployment
//! 4. **Status**: project the `Available` condition from the Deployment
//!
//! Deletion of children is delegated to the garbage collector through owner
//! references. Writes carry the resourceVersion they were computed against,
//! so a concurrent change surfaces as a conflict and the pass is retried after
//! a fixed delay.
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types with validation
//! - [`controller`] - lifecycle state machine and controller setup
//! - [`credentials`] - password generation and the password Secret
//! - [`drift`] - create-or-correct for the Service and the Deployment
//! - [`status`] - `Available` condition projection
//! - [`resources`] - Kubernetes resource builders
//! - [`store`] - object store boundary used by reconciliation
//! - [`error`] - Error types for operator operations
//!
//! ## Custom Resource Definition
//!
//! ```yaml
//! apiVersion: redis.yazio.com/v1alpha1
//! kind: Redis
//! metadata:
//!   name: cache
//! spec:
//!   image: bitnami/redis
//!   replicas: 1
//!   port: 6379
//!   passwordSecretName: redis-password
//!   service:
//!     name: redis-service
//!     type: ClusterIP
//!     port: 6379
//! ```
//!
//! ## Metrics
//!
//! - `redis_operator_reconciliations_total` - Total reconciliation attempts
//! - `redis_operator_reconciliation_errors_total` - Reconciliation errors
//! - `redis_operator_reconciliation_duration_seconds` - Reconciliation latency

pub mod conditions;
pub mod controller;
pub mod credentials;
pub mod crd;
pub mod deadline;
pub mod drift;
pub mod error;
pub mod events;
pub mod resources;
pub mod status;
pub mod store;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::controller::{
        run_controller, ControllerConfig, ControllerContext, ControllerMetrics, LifecyclePhase,
    };
    pub use crate::crd::{Redis, RedisServiceSpec, RedisSpec, RedisStatus, ServiceType};
    pub use crate::deadline::Deadline;
    pub use crate::error::{OperatorError, Result};
    pub use crate::events::{EventPublisher, KubeEventPublisher};
    pub use crate::resources::ResourceBuilder;
    pub use crate::store::{KubeStore, Store};
}
