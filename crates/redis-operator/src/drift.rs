//! Drift detection and correction for owned child resources
//!
//! Each child kind supplies its desired shape and a comparator over the
//! fields the operator owns. A missing child is created; a drifted child gets
//! one merge patch limited to the drifted owned fields and guarded by the
//! resourceVersion it was compared against. Fields set by other actors are
//! never part of the comparison or the patch.

use crate::crd::Redis;
use crate::deadline::Deadline;
use crate::error::{OperatorError, Result};
use crate::events::{reasons, EventPublisher};
use crate::resources::ResourceBuilder;
use crate::store::{ManagedObject, Store};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodTemplateSpec, Service, ServicePort};
use kube::Resource;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// A child resource kind kept in sync with its Redis owner
pub trait ManagedChild: ManagedObject {
    /// Lower-case noun used in event notes
    const NOUN: &'static str;
    const CREATED_REASON: &'static str;
    const UPDATED_REASON: &'static str;

    /// Desired shape of the child for the builder's instance
    fn desired(builder: &ResourceBuilder<'_>) -> Self;

    /// Merge patch correcting the owned fields of `found`, or `None` if in sync
    fn drift_patch(found: &Self, desired: &Self) -> Result<Option<Value>>;
}

impl ManagedChild for Service {
    const NOUN: &'static str = "service";
    const CREATED_REASON: &'static str = reasons::CREATED_SERVICE;
    const UPDATED_REASON: &'static str = reasons::UPDATED_SERVICE;

    fn desired(builder: &ResourceBuilder<'_>) -> Self {
        builder.build_service()
    }

    fn drift_patch(found: &Self, desired: &Self) -> Result<Option<Value>> {
        let found_spec = found.spec.clone().unwrap_or_default();
        let desired_spec = desired.spec.clone().unwrap_or_default();
        let mut spec = Map::new();

        if found_spec.type_ != desired_spec.type_ {
            spec.insert("type".to_string(), json!(desired_spec.type_));
        }

        let found_ports = found_spec.ports.unwrap_or_default();
        let desired_ports = desired_spec.ports.unwrap_or_default();
        if let Some(ports) = reconcile_ports(&found_ports, &desired_ports) {
            spec.insert("ports".to_string(), serde_json::to_value(ports)?);
        }

        let desired_selector = desired_spec.selector.unwrap_or_default();
        if found_spec.selector.as_ref() != Some(&desired_selector) {
            spec.insert(
                "selector".to_string(),
                replace_map(found_spec.selector.as_ref(), &desired_selector),
            );
        }

        Ok((!spec.is_empty()).then(|| json!({ "spec": spec })))
    }
}

impl ManagedChild for Deployment {
    const NOUN: &'static str = "deployment";
    const CREATED_REASON: &'static str = reasons::CREATED_DEPLOYMENT;
    const UPDATED_REASON: &'static str = reasons::UPDATED_DEPLOYMENT;

    fn desired(builder: &ResourceBuilder<'_>) -> Self {
        builder.build_deployment()
    }

    fn drift_patch(found: &Self, desired: &Self) -> Result<Option<Value>> {
        let desired_spec = desired.spec.as_ref().ok_or_else(|| {
            OperatorError::InvalidConfig("desired deployment has no spec".to_string())
        })?;
        let found_spec = found.spec.as_ref();
        let mut spec = Map::new();

        let found_replicas = found_spec.and_then(|s| s.replicas);
        if found_replicas != desired_spec.replicas {
            info!(from = ?found_replicas, to = ?desired_spec.replicas, "Replica count changed");
            spec.insert("replicas".to_string(), json!(desired_spec.replicas));
        }

        let template_ok =
            found_spec.is_some_and(|s| templates_match(&s.template, &desired_spec.template));
        if !template_ok {
            info!("Pod template changed");
            spec.insert(
                "template".to_string(),
                serde_json::to_value(&desired_spec.template)?,
            );
        }

        Ok((!spec.is_empty()).then(|| json!({ "spec": spec })))
    }
}

/// Ports are compared by position on number and name.
/// Matching entries keep whatever else the server filled in (nodePort, protocol).
fn reconcile_ports(found: &[ServicePort], desired: &[ServicePort]) -> Option<Vec<ServicePort>> {
    if found.len() != desired.len() {
        return Some(desired.to_vec());
    }
    let mut changed = false;
    let mut merged = found.to_vec();
    for (port, want) in merged.iter_mut().zip(desired) {
        if port.port != want.port || port.name != want.name {
            *port = want.clone();
            changed = true;
        }
    }
    changed.then_some(merged)
}

/// Merge patch replacing a string map: desired keys set, stale keys nulled
fn replace_map(found: Option<&BTreeMap<String, String>>, desired: &BTreeMap<String, String>) -> Value {
    let mut patch = Map::new();
    for key in found.into_iter().flat_map(|m| m.keys()) {
        if !desired.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    for (key, value) in desired {
        patch.insert(key.clone(), json!(value));
    }
    Value::Object(patch)
}

/// Semantic match of the managed container.
///
/// Image, resources and env must be equal; both probes must be present but
/// their content is not compared. A template without containers never matches.
pub fn templates_match(found: &PodTemplateSpec, desired: &PodTemplateSpec) -> bool {
    let Some(found_container) = found.spec.as_ref().and_then(|s| s.containers.first()) else {
        return false;
    };
    let Some(desired_container) = desired.spec.as_ref().and_then(|s| s.containers.first()) else {
        return false;
    };

    if found_container.image != desired_container.image {
        return false;
    }
    if found_container.resources.clone().unwrap_or_default()
        != desired_container.resources.clone().unwrap_or_default()
    {
        return false;
    }
    if found_container.liveness_probe.is_none() || found_container.readiness_probe.is_none() {
        return false;
    }
    found_container.env.as_deref().unwrap_or_default()
        == desired_container.env.as_deref().unwrap_or_default()
}

/// Create the child if missing, otherwise correct drift on its owned fields
#[instrument(skip_all, fields(kind = %K::kind(&()), name = %redis.metadata.name.as_deref().unwrap_or_default()))]
pub async fn ensure<K: ManagedChild, S: Store>(
    store: &S,
    events: &dyn EventPublisher,
    redis: &Redis,
    deadline: &Deadline,
) -> Result<K> {
    let builder = ResourceBuilder::new(redis)?;
    let desired = K::desired(&builder);
    let namespace = builder.namespace();
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or_else(|| OperatorError::InvalidConfig(format!("desired {} has no name", K::NOUN)))?;

    deadline.check(&format!("get-{}", K::NOUN))?;
    let found = match store.get::<K>(namespace, &name).await {
        Ok(found) => found,
        Err(e) if e.is_not_found() => {
            info!(name = %name, namespace = %namespace, "Creating a new {}", K::NOUN);
            deadline.check(&format!("create-{}", K::NOUN))?;
            let created = store.create(&desired).await?;
            events
                .publish(
                    &redis.object_ref(&()),
                    K::CREATED_REASON,
                    format!("Created {} {}", K::NOUN, name),
                )
                .await;
            return Ok(created);
        }
        Err(e) => return Err(e),
    };

    let Some(mut patch) = K::drift_patch(&found, &desired)? else {
        debug!(name = %name, "No drift");
        return Ok(found);
    };
    if let Some(version) = &found.meta().resource_version {
        patch["metadata"] = json!({ "resourceVersion": version });
    }

    info!(name = %name, "Updating {}", K::NOUN);
    deadline.check(&format!("patch-{}", K::NOUN))?;
    let updated = store.patch::<K>(namespace, &name, &patch).await?;
    events
        .publish(
            &redis.object_ref(&()),
            K::UPDATED_REASON,
            format!("Updated {} {}", K::NOUN, name),
        )
        .await;
    Ok(updated)
}
