//! Informer caches
//!
//! Listers backed by `kube` reflector stores, plus an in-memory lister used
//! for standalone rendering and tests. Every reflector also hands out the
//! objects it touched, in store order, to drive controller triggers.

use crate::domain::ObjectLister;
use crate::error::{Error, Result};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{Stream, StreamExt};
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource, ResourceExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, trace};

// =============================================================================
// Reflector-backed lister
// =============================================================================

/// Lister over a reflector store
#[derive(Clone)]
pub struct StoreLister<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
}

impl<K> StoreLister<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn new(store: Store<K>) -> Self {
        Self { store }
    }
}

impl<K> ObjectLister<K> for StoreLister<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<K>> {
        let mut key = ObjectRef::<K>::new(name);
        if let Some(ns) = namespace {
            key = key.within(ns);
        }
        self.store
            .get(&key)
            .ok_or_else(|| Error::not_found(K::kind(&()), qualified(namespace, name)))
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }
}

/// Start a reflector for `api` and wait until its store has synced.
///
/// The receiver yields every object the reflector touches, each one only
/// after the store has been updated with it.
pub async fn spawn_reflector<K>(
    api: Api<K>,
    config: watcher::Config,
    sync_timeout: Duration,
) -> Result<(StoreLister<K>, UnboundedReceiver<K>)>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let kind = K::kind(&()).to_string();
    let (store, writer) = reflector::store();
    let (tx, rx) = mpsc::unbounded();

    tokio::spawn(reflect_and_forward(
        kind.clone(),
        writer,
        watcher(api, config).default_backoff(),
        tx,
    ));

    tokio::time::timeout(sync_timeout, store.wait_until_ready())
        .await
        .map_err(|_| Error::CacheNotSynced(format!("timed out waiting for {} cache", kind)))?
        .map_err(|e| Error::CacheNotSynced(format!("{} cache: {}", kind, e)))?;

    info!(kind = %kind, objects = store.state().len(), "Informer cache synced");
    Ok((StoreLister::new(store), rx))
}

/// Apply `events` to the store behind `writer`, then forward each touched
/// object to `tx`
async fn reflect_and_forward<K, S>(
    kind: String,
    writer: Writer<K>,
    events: S,
    tx: UnboundedSender<K>,
) where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
    S: Stream<Item = std::result::Result<watcher::Event<K>, watcher::Error>> + Send + 'static,
{
    reflector::reflector(writer, events)
        .touched_objects()
        .for_each(|res| {
            match res {
                Ok(obj) => {
                    trace!(kind = %kind, name = %obj.name_any(), "object changed");
                    if tx.unbounded_send(obj).is_err() {
                        trace!(kind = %kind, "trigger receiver closed");
                    }
                }
                Err(e) => error!(kind = %kind, error = %e, "unexpected error with stream"),
            }
            futures::future::ready(())
        })
        .await;
}

// =============================================================================
// In-memory lister
// =============================================================================

/// Lister over objects inserted by hand
pub struct MemoryLister<K> {
    objects: RwLock<BTreeMap<(Option<String>, String), Arc<K>>>,
}

impl<K> Default for MemoryLister<K> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: Resource> MemoryLister<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object keyed by its namespace and name
    pub fn insert(&self, obj: K) {
        let key = (obj.namespace(), obj.name_any());
        self.objects.write().insert(key, Arc::new(obj));
    }

    pub fn remove(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        self.objects
            .write()
            .remove(&(namespace.map(str::to_string), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl<K> ObjectLister<K> for MemoryLister<K>
where
    K: Resource<DynamicType = ()> + Send + Sync,
{
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<K>> {
        self.objects
            .read()
            .get(&(namespace.map(str::to_string), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(K::kind(&()), qualified(namespace, name)))
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.objects.read().values().cloned().collect()
    }
}

fn qualified(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn secret(ns: &str, name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(ns.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_memory_lister_get() {
        let lister = MemoryLister::new();
        lister.insert(secret("ns-a", "creds"));

        assert!(lister.get(Some("ns-a"), "creds").is_ok());
        assert!(lister.get(Some("ns-b"), "creds").is_err());
        assert!(lister.get(None, "creds").is_err());
    }

    #[test]
    fn test_memory_lister_not_found_error() {
        let lister = MemoryLister::<Secret>::new();
        match lister.get(Some("ns"), "missing") {
            Err(Error::ResourceNotFound { kind, name }) => {
                assert_eq!(kind, "Secret");
                assert_eq!(name, "ns/missing");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_touched_objects_follow_store_updates() {
        let (store, writer) = reflector::store::<Secret>();
        let (tx, rx) = mpsc::unbounded();
        let events = futures::stream::iter(vec![
            Ok::<_, watcher::Error>(watcher::Event::Applied(secret("ns", "creds"))),
            Ok(watcher::Event::Applied(secret("ns", "stale"))),
            Ok(watcher::Event::Deleted(secret("ns", "stale"))),
        ]);

        reflect_and_forward("Secret".to_string(), writer, events, tx).await;
        let lister = StoreLister::new(store);

        let names: Vec<_> = rx.map(|s| s.name_any()).collect().await;
        assert_eq!(names, vec!["creds", "stale", "stale"]);
        assert!(lister.get(Some("ns"), "creds").is_ok());
        assert!(lister.get(Some("ns"), "stale").unwrap_err().is_not_found());
    }

    #[test]
    fn test_memory_lister_replace_and_remove() {
        let lister = MemoryLister::new();
        lister.insert(secret("ns", "a"));
        lister.insert(secret("ns", "a"));
        lister.insert(secret("ns", "b"));
        assert_eq!(lister.len(), 2);

        assert!(lister.remove(Some("ns"), "a").is_some());
        assert_eq!(lister.list().len(), 1);
    }
}
