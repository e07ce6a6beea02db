//! In-memory [`Store`] used by the unit tests.
//!
//! Models what the reconciler relies on from the API server: resourceVersion
//! compare-and-swap, JSON merge patches, generation bumps on spec changes,
//! finalizer-gated deletion and owner-reference garbage collection. Every
//! write is recorded so tests can assert on exactly what a pass did.

use super::{ManagedObject, Store};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use kube::core::ErrorResponse;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

type Key = (String, String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Get,
    Create,
    Patch,
    PatchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub op: Op,
    pub kind: String,
    pub name: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    uids: u64,
    writes: Vec<WriteRecord>,
    racing_creates: BTreeMap<Key, Value>,
    failures: BTreeMap<(Op, String), u16>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key_of<K: ManagedObject>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn not_found(key: &Key) -> OperatorError {
    OperatorError::NotFound {
        kind: key.0.clone(),
        namespace: key.1.clone(),
        name: key.2.clone(),
    }
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn take_failure(&mut self, op: Op, kind: &str) -> Result<()> {
        match self.failures.remove(&(op, kind.to_string())) {
            Some(code) => Err(OperatorError::KubeError(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("injected {:?} failure", op),
                reason: "InternalError".to_string(),
                code,
            }))),
            None => Ok(()),
        }
    }

    /// Assign server-side metadata to a freshly created object
    fn admit(&mut self, value: &mut Value) {
        self.uids += 1;
        let uid = format!("uid-{}", self.uids);
        let version = self.next_version();
        let meta = &mut value["metadata"];
        if meta.get("uid").is_none() {
            meta["uid"] = json!(uid);
        }
        meta["resourceVersion"] = json!(version);
        if meta.get("generation").is_none() {
            meta["generation"] = json!(1);
        }
    }

    fn check_version(current: &Value, patch: &Value, key: &Key) -> Result<()> {
        if let Some(expected) = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str) {
            let actual = current
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if expected != actual {
                return Err(OperatorError::Conflict {
                    kind: key.0.clone(),
                    namespace: key.1.clone(),
                    name: key.2.clone(),
                    message: format!("resourceVersion {} is stale, current is {}", expected, actual),
                });
            }
        }
        Ok(())
    }

    /// Merge `patch` into the stored object and bump its version
    fn apply(&mut self, key: &Key, patch: &Value) -> Result<Value> {
        let version = self.next_version();
        let current = self.objects.get_mut(key).ok_or_else(|| not_found(key))?;
        Self::check_version(current, patch, key)?;

        let old_spec = current.get("spec").cloned();
        json_patch::merge(current, patch);
        if current.get("spec") != old_spec.as_ref() {
            let generation = current
                .pointer("/metadata/generation")
                .and_then(Value::as_i64)
                .unwrap_or(1);
            current["metadata"]["generation"] = json!(generation + 1);
        }
        current["metadata"]["resourceVersion"] = json!(version);
        let updated = current.clone();

        self.finish_deletion(key);
        Ok(updated)
    }

    /// Remove an object whose deletion is no longer blocked, then collect its dependents
    fn finish_deletion(&mut self, key: &Key) {
        let Some(obj) = self.objects.get(key) else {
            return;
        };
        let deleting = obj.pointer("/metadata/deletionTimestamp").is_some();
        let blocked = obj
            .pointer("/metadata/finalizers")
            .and_then(Value::as_array)
            .is_some_and(|f| !f.is_empty());
        if !deleting || blocked {
            return;
        }

        let uid = obj.pointer("/metadata/uid").cloned();
        self.objects.remove(key);
        if let Some(uid) = uid {
            self.objects.retain(|_, child| {
                !child
                    .pointer("/metadata/ownerReferences")
                    .and_then(Value::as_array)
                    .is_some_and(|refs| refs.iter().any(|r| r.get("uid") == Some(&uid)))
            });
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a write
    pub fn insert<K: ManagedObject>(&self, obj: &K) -> K {
        let mut value = serde_json::to_value(obj).expect("serializable object");
        let meta = obj.meta();
        let key = key_of::<K>(
            meta.namespace.as_deref().unwrap_or("default"),
            meta.name.as_deref().expect("object name"),
        );
        let mut state = self.state.lock().unwrap();
        state.admit(&mut value);
        state.objects.insert(key, value.clone());
        serde_json::from_value(value).unwrap()
    }

    pub fn object<K: ManagedObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&key_of::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn count<K: ManagedObject>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        let state = self.state.lock().unwrap();
        state.objects.keys().filter(|k| k.0 == kind).count()
    }

    /// Merge a patch as another actor would, without recording it as our write
    pub fn external_patch<K: ManagedObject>(&self, namespace: &str, name: &str, patch: Value) -> K {
        let mut state = self.state.lock().unwrap();
        let updated = state.apply(&key_of::<K>(namespace, name), &patch).unwrap();
        serde_json::from_value(updated).unwrap()
    }

    /// Set a deletion timestamp; the object disappears once its finalizers are gone
    pub fn mark_deleted<K: ManagedObject>(&self, namespace: &str, name: &str) {
        self.external_patch::<K>(
            namespace,
            name,
            json!({ "metadata": { "deletionTimestamp": "2025-01-01T00:00:00Z" } }),
        );
    }

    /// Make another writer create `obj` just before our next create of the same key
    pub fn race_create<K: ManagedObject>(&self, obj: &K) {
        let mut value = serde_json::to_value(obj).unwrap();
        let meta = obj.meta();
        let key = key_of::<K>(
            meta.namespace.as_deref().unwrap(),
            meta.name.as_deref().unwrap(),
        );
        let mut state = self.state.lock().unwrap();
        state.admit(&mut value);
        state.racing_creates.insert(key, value);
    }

    /// Fail the next `op` on `K` with an API error carrying `code`
    pub fn fail_next<K: ManagedObject>(&self, op: Op, code: u16) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert((op, K::kind(&()).to_string()), code);
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get<K: ManagedObject>(&self, namespace: &str, name: &str) -> Result<K> {
        let key = key_of::<K>(namespace, name);
        let value = {
            let mut state = self.state.lock().unwrap();
            state.take_failure(Op::Get, &key.0)?;
            state.objects.get(&key).cloned().ok_or_else(|| not_found(&key))
        };
        // Concurrent passes interleave between a read and the write that follows it
        tokio::task::yield_now().await;
        Ok(serde_json::from_value(value?)?)
    }

    async fn create<K: ManagedObject>(&self, obj: &K) -> Result<K> {
        let meta = obj.meta();
        let (Some(namespace), Some(name)) = (meta.namespace.as_deref(), meta.name.as_deref()) else {
            return Err(OperatorError::InvalidConfig("object needs a name and namespace".into()));
        };
        let key = key_of::<K>(namespace, name);
        let mut value = serde_json::to_value(obj)?;

        let mut state = self.state.lock().unwrap();
        state.take_failure(Op::Create, &key.0)?;
        if let Some(racer) = state.racing_creates.remove(&key) {
            state.objects.insert(key.clone(), racer);
        }
        if state.objects.contains_key(&key) {
            return Err(OperatorError::AlreadyExists {
                kind: key.0,
                namespace: key.1,
                name: key.2,
            });
        }
        state.admit(&mut value);
        state.objects.insert(key.clone(), value.clone());
        state.writes.push(WriteRecord {
            op: Op::Create,
            kind: key.0,
            name: key.2,
        });
        Ok(serde_json::from_value(value)?)
    }

    async fn patch<K: ManagedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        let key = key_of::<K>(namespace, name);
        let mut patch = patch.clone();
        if let Some(obj) = patch.as_object_mut() {
            obj.remove("status");
        }

        let mut state = self.state.lock().unwrap();
        state.take_failure(Op::Patch, &key.0)?;
        let updated = state.apply(&key, &patch)?;
        state.writes.push(WriteRecord {
            op: Op::Patch,
            kind: key.0,
            name: key.2,
        });
        Ok(serde_json::from_value(updated)?)
    }

    async fn patch_status<K: ManagedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        let key = key_of::<K>(namespace, name);
        let mut status_only = json!({ "status": patch.get("status").cloned().unwrap_or(Value::Null) });
        if let Some(version) = patch.pointer("/metadata/resourceVersion") {
            status_only["metadata"] = json!({ "resourceVersion": version });
        }

        let mut state = self.state.lock().unwrap();
        state.take_failure(Op::PatchStatus, &key.0)?;
        let updated = state.apply(&key, &status_only)?;
        state.writes.push(WriteRecord {
            op: Op::PatchStatus,
            kind: key.0,
            name: key.2,
        });
        Ok(serde_json::from_value(updated)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("a")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());

        let fetched: ConfigMap = store.get("default", "a").await.unwrap();
        assert_eq!(fetched.data, created.data);

        let err = store.create(&config_map("a")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        let err = store.get::<Secret>("default", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("a")).await.unwrap();
        let stale = created.metadata.resource_version.clone().unwrap();

        store
            .patch::<ConfigMap>("default", "a", &json!({ "data": { "k": "w" } }))
            .await
            .unwrap();

        let err = store
            .patch::<ConfigMap>(
                "default",
                "a",
                &json!({ "metadata": { "resourceVersion": stale }, "data": { "k": "x" } }),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_owner_gc_after_finalizer_removed() {
        let store = MemoryStore::new();
        let mut owner = config_map("owner");
        owner.metadata.finalizers = Some(vec!["x/guard".to_string()]);
        let owner = store.insert(&owner);

        let mut child = config_map("child");
        child.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "owner".to_string(),
            uid: owner.metadata.uid.clone().unwrap(),
            ..Default::default()
        }]);
        store.insert(&child);

        store.mark_deleted::<ConfigMap>("default", "owner");
        assert_eq!(store.count::<ConfigMap>(), 2);

        store
            .patch::<ConfigMap>("default", "owner", &json!({ "metadata": { "finalizers": [] } }))
            .await
            .unwrap();
        assert_eq!(store.count::<ConfigMap>(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_next::<Secret>(Op::Get, 500);
        assert!(matches!(
            store.get::<Secret>("default", "x").await,
            Err(OperatorError::KubeError(_))
        ));
        assert!(store.get::<Secret>("default", "x").await.unwrap_err().is_not_found());
    }
}
