//! Status projection for Redis instances

use crate::conditions::{
    reasons, set_condition, ConditionUpdate, CONDITION_AVAILABLE, STATUS_FALSE, STATUS_TRUE,
};
use crate::crd::{Redis, RedisStatus};
use crate::deadline::Deadline;
use crate::error::{OperatorError, Result};
use crate::store::Store;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use serde_json::json;
use tracing::{debug, info, instrument};

pub const MESSAGE_AVAILABLE: &str = "Redis deployment is fully available";
pub const MESSAGE_NOT_AVAILABLE: &str = "Redis deployment is not yet fully available";

/// Compute the status `redis` should report given its workload
pub fn build_status(redis: &Redis, deployment: Option<&Deployment>, now: DateTime<Utc>) -> RedisStatus {
    let mut status = redis.status.clone().unwrap_or_default();
    status.password_secret_name = redis.spec.password_secret_name.clone();

    let available = deployment
        .map(|d| d.status.as_ref().and_then(|s| s.available_replicas).unwrap_or(0))
        .is_some_and(|ready| ready == redis.spec.replicas());

    let update = if available {
        ConditionUpdate::new(
            CONDITION_AVAILABLE,
            STATUS_TRUE,
            reasons::DEPLOYMENT_AVAILABLE,
            MESSAGE_AVAILABLE,
        )
    } else {
        ConditionUpdate::new(
            CONDITION_AVAILABLE,
            STATUS_FALSE,
            reasons::RECONCILING,
            MESSAGE_NOT_AVAILABLE,
        )
    };
    set_condition(
        &mut status.conditions,
        update.observed_generation(redis.metadata.generation),
        now,
    );
    status
}

/// Write the projected status if it differs from the stored one.
///
/// Returns whether a write was issued.
#[instrument(skip_all, fields(name = %redis.metadata.name.as_deref().unwrap_or_default()))]
pub async fn project_status<S: Store>(
    store: &S,
    redis: &Redis,
    deployment: Option<&Deployment>,
    deadline: &Deadline,
) -> Result<bool> {
    let status = build_status(redis, deployment, Utc::now());
    if redis.status.as_ref() == Some(&status) {
        debug!("Status unchanged");
        return Ok(false);
    }

    write_status(store, redis, &status, deadline).await?;
    Ok(true)
}

/// Patch the status subresource, guarded by the instance's resourceVersion
pub(crate) async fn write_status<S: Store>(
    store: &S,
    redis: &Redis,
    status: &RedisStatus,
    deadline: &Deadline,
) -> Result<Redis> {
    let (Some(name), Some(namespace)) = (
        redis.metadata.name.as_deref(),
        redis.metadata.namespace.as_deref(),
    ) else {
        return Err(OperatorError::InvalidConfig(
            "Redis resource must have a name and namespace".to_string(),
        ));
    };

    let mut patch = json!({ "status": status });
    if let Some(version) = &redis.metadata.resource_version {
        patch["metadata"] = json!({ "resourceVersion": version });
    }

    info!(name = %name, "Updating status");
    deadline.check("patch-status")?;
    store.patch_status::<Redis>(namespace, name, &patch).await
}
