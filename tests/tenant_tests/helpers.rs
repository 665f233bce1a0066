//! Shared fixtures: an in-memory ConfigMap source and app wiring

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use tenant_bridge::middleware::TenantLayer;
use tenant_bridge::tenant::{
    CacheSettings, ConfigEvent, ConfigEventStream, DsnSessionFactory, Subscriptions,
    TenantBuilder, TenantCache, TenantConfigSource, TenantNaming, WatchAggregator,
};
use tenant_bridge::Error;

/// ConfigMaps held in memory, with watch streams the test can push into
#[derive(Default)]
pub struct FakeConfigSource {
    configs: Mutex<HashMap<String, ConfigMap>>,
    watchers: Mutex<Vec<(String, mpsc::UnboundedSender<ConfigEvent>)>>,
    fetches: AtomicUsize,
    fail_fetch: Mutex<bool>,
}

impl FakeConfigSource {
    /// Store a tenant ConfigMap pointing at a sqlite3 database
    pub fn put_sqlite(&self, name: &str, path: &str, version: &str) {
        let ini = format!(r#"{{"database": {{"type": "sqlite3", "path": "{path}"}}}}"#);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                resource_version: Some(version.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("ini".to_string(), ini)])),
            ..Default::default()
        };
        self.configs.lock().unwrap().insert(name.to_string(), cm);
    }

    /// Remove a ConfigMap
    pub fn remove(&self, name: &str) {
        self.configs.lock().unwrap().remove(name);
    }

    /// Make every fetch fail until reset
    pub fn fail_fetches(&self, fail: bool) {
        *self.fail_fetch.lock().unwrap() = fail;
    }

    /// Number of ConfigMap fetches so far
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of watch streams opened for `name`
    pub fn watch_count(&self, name: &str) -> usize {
        self.watchers
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }

    /// Push an event to every open watch of `name`
    pub fn emit(&self, name: &str, event: ConfigEvent) {
        for (n, tx) in self.watchers.lock().unwrap().iter() {
            if n == name {
                let _ = tx.send(event.clone());
            }
        }
    }
}

#[async_trait]
impl TenantConfigSource for FakeConfigSource {
    async fn get_config(&self, _namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.fail_fetch.lock().unwrap() {
            return Err(Error::internal_with_context("configmaps", "api server unavailable"));
        }
        Ok(self.configs.lock().unwrap().get(name).cloned())
    }

    fn watch_config(&self, _namespace: &str, name: &str) -> ConfigEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().unwrap().push((name.to_string(), tx));
        UnboundedReceiverStream::new(rx).boxed()
    }
}

/// Cache, aggregator and middleware state wired the way `serve` wires them
pub struct Bridge {
    pub cache: TenantCache,
    pub subscriptions: Subscriptions,
    pub layer: TenantLayer,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Bridge {
    pub fn start(source: Arc<FakeConfigSource>) -> Self {
        let naming = TenantNaming::default();
        let (mut aggregator, watch) = WatchAggregator::new(source.clone(), naming.clone(), 64);
        let builder = TenantBuilder::new(source.clone(), Arc::new(DsnSessionFactory), naming);
        let cache = TenantCache::new(builder, CacheSettings::default(), Some(watch));
        aggregator.attach(cache.clone());
        let subscriptions = aggregator.subscriptions();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(aggregator.run(shutdown.clone()));

        Self {
            layer: TenantLayer::new(cache.clone(), "/api"),
            cache,
            subscriptions,
            shutdown,
            task,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), self.task)
            .await
            .expect("watch aggregator did not stop")
            .expect("watch aggregator panicked");
    }
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1s");
}
