//! Tenant ConfigMap access

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{future, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use kube::Client;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// A change observed on one tenant's ConfigMap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    /// The ConfigMap was created or updated (or listed on watch start)
    Applied {
        /// resourceVersion of the observed object
        resource_version: Option<String>,
    },
    /// The ConfigMap was deleted
    Deleted,
    /// The watch failed; no further events follow
    Error(String),
}

/// Stream of events for a single ConfigMap
pub type ConfigEventStream = BoxStream<'static, ConfigEvent>;

/// Reads and watches tenant ConfigMaps
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantConfigSource: Send + Sync {
    /// Fetch a ConfigMap, `None` if it does not exist
    async fn get_config(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error>;

    /// Watch a single ConfigMap by name.
    ///
    /// The stream ends after a [`ConfigEvent::Error`] or when the underlying
    /// watch ends.
    fn watch_config(&self, namespace: &str, name: &str) -> ConfigEventStream;
}

/// [`TenantConfigSource`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeConfigSource {
    client: Client,
}

impl KubeConfigSource {
    /// Create a source using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TenantConfigSource for KubeConfigSource {
    async fn get_config(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    fn watch_config(&self, namespace: &str, name: &str) -> ConfigEventStream {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        let name = name.to_string();

        watcher::watcher(api, config)
            .filter_map(move |event| {
                let mapped = match event {
                    Ok(Event::Apply(cm)) | Ok(Event::InitApply(cm)) => Some(ConfigEvent::Applied {
                        resource_version: cm.metadata.resource_version,
                    }),
                    Ok(Event::Delete(_)) => Some(ConfigEvent::Deleted),
                    Ok(Event::Init) | Ok(Event::InitDone) => None,
                    Err(e) => Some(ConfigEvent::Error(e.to_string())),
                };
                trace!(config_map = %name, event = ?mapped, "config watch event");
                future::ready(mapped)
            })
            .scan(false, |failed, event| {
                // Stop after the first error; the watcher would otherwise retry forever.
                if *failed {
                    return future::ready(None);
                }
                *failed = matches!(event, ConfigEvent::Error(_));
                future::ready(Some(event))
            })
            .boxed()
    }
}
