//! Kubernetes Event recording
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconciliation that emitted it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Controller name reported on emitted events
pub const REPORTING_CONTROLLER: &str = "redis-operator";

/// Publishes Kubernetes Events about a Redis instance
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Normal event with `reason` and a human readable `note`
    async fn publish(&self, resource_ref: &ObjectReference, reason: &str, note: String);
}

/// Production implementation wrapping `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: REPORTING_CONTROLLER.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, resource_ref: &ObjectReference, reason: &str, note: String) {
        let event = Event {
            type_: EventType::Normal,
            reason: reason.to_string(),
            note: Some(note),
            action: actions::RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Well-known event reasons
pub mod reasons {
    pub const CREATED_SECRET: &str = "CreatedSecret";
    pub const CREATED_SERVICE: &str = "CreatedService";
    pub const UPDATED_SERVICE: &str = "UpdatedService";
    pub const CREATED_DEPLOYMENT: &str = "CreatedDeployment";
    pub const UPDATED_DEPLOYMENT: &str = "UpdatedDeployment";
}

/// Well-known event actions
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
}
