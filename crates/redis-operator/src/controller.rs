//! Redis Controller
//!
//! This module implements the Kubernetes controller pattern for managing
//! Redis custom resources. Every pass is level-triggered: it loads the
//! instance, derives its lifecycle phase and drives the owned Secret, Service
//! and Deployment towards the declared state.

use crate::conditions::{
    reasons, set_condition, ConditionUpdate, CONDITION_AVAILABLE, STATUS_UNKNOWN,
};
use crate::credentials::ensure_secret;
use crate::crd::Redis;
use crate::deadline::Deadline;
use crate::drift::ensure;
use crate::error::{OperatorError, Result};
use crate::events::{EventPublisher, KubeEventPublisher};
use crate::status::{project_status, write_status};
use crate::store::{KubeStore, Store};
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

/// Finalizer guarding deletion of Redis instances
pub const FINALIZER_NAME: &str = "redis.yazio.com/finalizer";

/// Requeue delay after a failed pass
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Upper bound on the duration of a single pass
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(30);

/// Message of the condition written before anything else exists
pub const MESSAGE_RECONCILING: &str = "Reconciling redis";

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch, `None` for all namespaces
    pub namespace: Option<String>,
    /// Fixed delay before retrying a failed pass
    pub retry_delay: Duration,
    /// Per-pass deadline, `None` disables it
    pub reconcile_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            retry_delay: DEFAULT_RETRY_DELAY,
            reconcile_timeout: Some(DEFAULT_RECONCILE_TIMEOUT),
        }
    }
}

/// Context passed to the controller
pub struct ControllerContext<S: Store = KubeStore> {
    /// Object store
    pub store: S,
    /// Event sink for the Redis objects
    pub events: Arc<dyn EventPublisher>,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    pub config: ControllerConfig,
}

impl ControllerContext<KubeStore> {
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            store: KubeStore::new(client.clone()),
            events: Arc::new(KubeEventPublisher::new(client)),
            metrics: Some(ControllerMetrics::new()),
            config,
        }
    }
}

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Create new controller metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("redis_operator_reconciliations_total"),
            errors: metrics::counter!("redis_operator_reconciliation_errors_total"),
            duration: metrics::histogram!("redis_operator_reconciliation_duration_seconds"),
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Where an instance is in its lifecycle, derived from the loaded object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// No conditions recorded yet
    Unknown,
    /// Conditions present, finalizer not yet attached
    Initializing,
    /// Finalizer attached, children are managed
    Active,
    /// Deletion requested
    Deleting,
    /// Not found
    Gone,
}

impl LifecyclePhase {
    pub fn observe(redis: Option<&Redis>) -> Self {
        let Some(redis) = redis else {
            return Self::Gone;
        };
        if redis.metadata.deletion_timestamp.is_some() {
            return Self::Deleting;
        }
        let has_conditions = redis
            .status
            .as_ref()
            .is_some_and(|s| !s.conditions.is_empty());
        if !has_conditions {
            Self::Unknown
        } else if has_finalizer(redis) {
            Self::Active
        } else {
            Self::Initializing
        }
    }
}

fn has_finalizer(redis: &Redis) -> bool {
    redis.finalizers().iter().any(|f| f == FINALIZER_NAME)
}

/// Start the Redis controller
pub async fn run_controller(client: Client, config: ControllerConfig) -> Result<()> {
    let instances: Api<Redis> = match &config.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    info!(
        namespace = config.namespace.as_deref().unwrap_or("all"),
        retry_delay_secs = config.retry_delay.as_secs(),
        "Starting Redis controller"
    );

    // Watch owned resources for changes
    let deployments = match &config.namespace {
        Some(ns) => Api::<Deployment>::namespaced(client.clone(), ns),
        None => Api::<Deployment>::all(client.clone()),
    };

    let services = match &config.namespace {
        Some(ns) => Api::<Service>::namespaced(client.clone(), ns),
        None => Api::<Service>::all(client.clone()),
    };

    let secrets = match &config.namespace {
        Some(ns) => Api::<Secret>::namespaced(client.clone(), ns),
        None => Api::<Secret>::all(client.clone()),
    };

    let ctx = Arc::new(ControllerContext::new(client, config));

    Controller::new(instances, Config::default())
        .owns(deployments, Config::default())
        .owns(services, Config::default())
        .owns(secrets, Config::default())
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

/// Main reconciliation function
#[instrument(skip(redis, ctx), fields(name = %redis.name_any(), namespace = redis.namespace()))]
pub async fn reconcile<S: Store>(redis: Arc<Redis>, ctx: Arc<ControllerContext<S>>) -> Result<Action> {
    let start = std::time::Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let namespace = redis.namespace().unwrap_or_else(|| "default".to_string());
    let name = redis.name_any();
    let deadline = Deadline::after(ctx.config.reconcile_timeout);

    let result = reconcile_instance(ctx.as_ref(), &namespace, &name, &deadline).await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
        if result.is_err() {
            metrics.errors.increment(1);
        }
    }

    result
}

/// One convergence pass over the instance `namespace/name`
pub async fn reconcile_instance<S: Store>(
    ctx: &ControllerContext<S>,
    namespace: &str,
    name: &str,
    deadline: &Deadline,
) -> Result<Action> {
    deadline.check("get-redis")?;
    let mut redis = match ctx.store.get::<Redis>(namespace, name).await {
        Ok(redis) => redis,
        Err(e) if e.is_not_found() => {
            info!(name = %name, namespace = %namespace, "Redis resource not found, ignoring since object must be deleted");
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    };

    let mut phase = LifecyclePhase::observe(Some(&redis));
    debug!(name = %name, ?phase, "Observed lifecycle phase");

    if phase == LifecyclePhase::Deleting {
        return finalize(ctx, redis, deadline).await;
    }

    if phase == LifecyclePhase::Unknown {
        redis = initialize_status(ctx, &redis, deadline).await?;
        phase = LifecyclePhase::observe(Some(&redis));
    }

    if phase == LifecyclePhase::Initializing {
        redis = add_finalizer(ctx, namespace, name, deadline).await?;
    }

    apply(ctx, &redis, deadline).await?;

    info!(name = %name, "Reconciliation complete");
    Ok(Action::await_change())
}

/// Drive the owned children and the status of an active instance
async fn apply<S: Store>(ctx: &ControllerContext<S>, redis: &Redis, deadline: &Deadline) -> Result<()> {
    let name = redis.name_any();

    // Validate the spec before touching any child
    if let Err(errors) = redis.spec.validate() {
        let error_msg = errors.to_string();
        warn!(name = %name, errors = %error_msg, "Redis spec validation failed");
        return Err(OperatorError::ValidationError(error_msg));
    }

    let events = ctx.events.as_ref();
    ensure_secret(&ctx.store, events, redis, deadline).await?;
    ensure::<Service, _>(&ctx.store, events, redis, deadline).await?;
    let deployment = ensure::<Deployment, _>(&ctx.store, events, redis, deadline).await?;
    project_status(&ctx.store, redis, Some(&deployment), deadline).await?;
    Ok(())
}

/// Record `Available=Unknown` before anything else happens
async fn initialize_status<S: Store>(
    ctx: &ControllerContext<S>,
    redis: &Redis,
    deadline: &Deadline,
) -> Result<Redis> {
    let mut status = redis.status.clone().unwrap_or_default();
    set_condition(
        &mut status.conditions,
        ConditionUpdate::new(
            CONDITION_AVAILABLE,
            STATUS_UNKNOWN,
            reasons::RECONCILING,
            MESSAGE_RECONCILING,
        )
        .observed_generation(redis.metadata.generation),
        Utc::now(),
    );
    info!(name = %redis.name_any(), "Initializing status");
    write_status(&ctx.store, redis, &status, deadline).await
}

/// Re-read the instance and attach the finalizer
async fn add_finalizer<S: Store>(
    ctx: &ControllerContext<S>,
    namespace: &str,
    name: &str,
    deadline: &Deadline,
) -> Result<Redis> {
    deadline.check("get-redis")?;
    let redis: Redis = ctx.store.get(namespace, name).await?;
    if has_finalizer(&redis) {
        return Ok(redis);
    }

    let mut finalizers = redis.finalizers().to_vec();
    finalizers.push(FINALIZER_NAME.to_string());

    info!(name = %name, "Adding finalizer");
    deadline.check("add-finalizer")?;
    ctx.store
        .patch(namespace, name, &finalizer_patch(&redis, finalizers))
        .await
}

/// Release the instance for deletion; owned children are left to the garbage collector
async fn finalize<S: Store>(ctx: &ControllerContext<S>, redis: Redis, deadline: &Deadline) -> Result<Action> {
    let name = redis.name_any();
    let namespace = redis.namespace().unwrap_or_else(|| "default".to_string());

    if !has_finalizer(&redis) {
        debug!(name = %name, "Deletion in progress, finalizer already removed");
        return Ok(Action::await_change());
    }

    info!(name = %name, namespace = %namespace, "Performing finalizer operations");
    deadline.check("get-redis")?;
    let redis: Redis = ctx.store.get(&namespace, &name).await?;
    let finalizers: Vec<String> = redis
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER_NAME)
        .cloned()
        .collect();

    info!(name = %name, "Removing finalizer");
    deadline.check("remove-finalizer")?;
    ctx.store
        .patch::<Redis>(&namespace, &name, &finalizer_patch(&redis, finalizers))
        .await?;

    Ok(Action::await_change())
}

/// Merge patch replacing the finalizer list, guarded by resourceVersion
fn finalizer_patch(redis: &Redis, finalizers: Vec<String>) -> serde_json::Value {
    let mut patch = json!({ "metadata": { "finalizers": finalizers } });
    if let Some(version) = &redis.metadata.resource_version {
        patch["metadata"]["resourceVersion"] = json!(version);
    }
    patch
}

/// Error policy for the controller: constant backoff
pub fn error_policy<S: Store>(redis: Arc<Redis>, error: &OperatorError, ctx: Arc<ControllerContext<S>>) -> Action {
    let delay = ctx.config.retry_delay;

    warn!(
        error = %error,
        kind = error.metric_label(),
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        redis.name_any()
    );

    Action::requeue(delay)
}
