//! Scope-aware resolution of arbitrary resource kinds
//!
//! Translates a group/kind (optionally constrained to a list of acceptable
//! versions) into a [`ResourceHandle`] bound to the right scope. Discovery
//! is the single source of truth for whether a kind is namespaced; the
//! resolver never guesses and never caches mappings, so CRDs registered
//! after startup resolve on the next call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// A resource type identified by group and kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKind {
    group: String,
    kind: String,
}

impl GroupKind {
    /// Create a group/kind pair. Use an empty group for core resources.
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    /// API group
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Kind
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Whether instances of a resource live in a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    /// Cluster-wide resource (e.g., CustomResourceDefinition, Namespace)
    Cluster,
    /// Namespaced resource (e.g., ConfigMap)
    Namespaced,
}

impl From<&Scope> for ResourceScope {
    fn from(scope: &Scope) -> Self {
        match scope {
            Scope::Cluster => Self::Cluster,
            Scope::Namespaced => Self::Namespaced,
        }
    }
}

/// Result of a REST mapping lookup
#[derive(Debug, Clone)]
pub struct RestMapping {
    /// Concrete resource, including its plural wire name
    pub resource: ApiResource,
    /// Scope reported by discovery
    pub scope: ResourceScope,
}

/// Trait abstracting REST mapping lookups
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RestMapper: Send + Sync {
    /// Map a group/kind to a concrete resource.
    ///
    /// `versions` lists acceptable versions in preference order; empty means
    /// the most stable served version. Returns `Ok(None)` when no mapping exists.
    async fn rest_mapping(
        &self,
        group_kind: &GroupKind,
        versions: &[String],
    ) -> Result<Option<RestMapping>, Error>;
}

/// Discovery-backed [`RestMapper`].
///
/// Runs group-filtered API discovery on every lookup.
pub struct DiscoveryRestMapper {
    client: Client,
}

impl DiscoveryRestMapper {
    /// Create a new mapper using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RestMapper for DiscoveryRestMapper {
    async fn rest_mapping(
        &self,
        group_kind: &GroupKind,
        versions: &[String],
    ) -> Result<Option<RestMapping>, Error> {
        let discovery = Discovery::new(self.client.clone())
            .filter(&[group_kind.group()])
            .run()
            .await?;

        Ok(find_mapping(&discovery, group_kind, versions))
    }
}

/// Look up a group/kind in completed discovery results.
fn find_mapping(
    discovery: &Discovery,
    group_kind: &GroupKind,
    versions: &[String],
) -> Option<RestMapping> {
    let group = discovery
        .groups()
        .find(|g| g.name() == group_kind.group())?;

    let matches = |(ar, caps): (ApiResource, ApiCapabilities)| {
        (ar.kind == group_kind.kind()).then(|| RestMapping {
            scope: ResourceScope::from(&caps.scope),
            resource: ar,
        })
    };

    if versions.is_empty() {
        return group.resources_by_stability().into_iter().find_map(matches);
    }

    versions
        .iter()
        .find_map(|v| group.versioned_resources(v).into_iter().find_map(matches))
}

/// A dynamic API bound to one resource kind and, if namespaced, one namespace
#[derive(Clone)]
pub struct ResourceHandle {
    api: Api<DynamicObject>,
    resource: ApiResource,
    scope: ResourceScope,
    namespace: Option<String>,
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("resource", &self.resource)
            .field("scope", &self.scope)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl ResourceHandle {
    /// Bind a mapping to a namespace according to its scope.
    ///
    /// Cluster-scoped mappings ignore `namespace`. Namespaced mappings
    /// require a non-empty namespace.
    pub fn bind(client: Client, mapping: RestMapping, namespace: &str) -> Result<Self, Error> {
        let RestMapping { resource, scope } = mapping;

        let (api, namespace) = match scope {
            ResourceScope::Namespaced => {
                if namespace.is_empty() {
                    return Err(Error::validation(format!(
                        "{} is namespaced but no namespace was given",
                        resource.kind
                    )));
                }
                (
                    Api::namespaced_with(client, namespace, &resource),
                    Some(namespace.to_string()),
                )
            }
            ResourceScope::Cluster => (Api::all_with(client, &resource), None),
        };

        Ok(Self {
            api,
            resource,
            scope,
            namespace,
        })
    }

    /// Underlying dynamic API
    pub fn api(&self) -> &Api<DynamicObject> {
        &self.api
    }

    /// Resolved resource (group, version, kind, plural)
    pub fn resource(&self) -> &ApiResource {
        &self.resource
    }

    /// Scope reported by discovery
    pub fn scope(&self) -> ResourceScope {
        self.scope
    }

    /// Namespace the handle is bound to; `None` for cluster-scoped resources
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Get an object by name
    pub async fn get(&self, name: &str) -> Result<DynamicObject, Error> {
        Ok(self.api.get(name).await?)
    }

    /// Get an object by name, returning `None` if it doesn't exist
    pub async fn get_opt(&self, name: &str) -> Result<Option<DynamicObject>, Error> {
        Ok(self.api.get_opt(name).await?)
    }

    /// List objects
    pub async fn list(&self, params: &ListParams) -> Result<Vec<DynamicObject>, Error> {
        Ok(self.api.list(params).await?.items)
    }

    /// Server-side apply an object
    pub async fn apply(
        &self,
        name: &str,
        object: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject, Error> {
        let params = PatchParams::apply(field_manager).force();
        Ok(self.api.patch(name, &params, &Patch::Apply(object)).await?)
    }

    /// Delete an object by name
    pub async fn delete(&self, name: &str) -> Result<(), Error> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// Resolves group/kinds to scope-correct [`ResourceHandle`]s
pub struct ResourceResolver {
    client: Client,
    mapper: Arc<dyn RestMapper>,
}

impl ResourceResolver {
    /// Create a resolver backed by API discovery
    pub fn new(client: Client) -> Self {
        let mapper = Arc::new(DiscoveryRestMapper::new(client.clone()));
        Self { client, mapper }
    }

    /// Create a resolver with a custom mapper
    pub fn with_mapper(client: Client, mapper: Arc<dyn RestMapper>) -> Self {
        Self { client, mapper }
    }

    /// Resolve a group/kind to a handle.
    ///
    /// # Errors
    ///
    /// - [`Error::MappingNotFound`] if discovery has no mapping for the kind/versions
    /// - [`Error::Validation`] if the kind is namespaced and `namespace` is empty
    pub async fn resolve(
        &self,
        group_kind: &GroupKind,
        namespace: &str,
        versions: &[&str],
    ) -> Result<ResourceHandle, Error> {
        let versions: Vec<String> = versions.iter().map(|v| v.to_string()).collect();

        let mapping = self
            .mapper
            .rest_mapping(group_kind, &versions)
            .await?
            .ok_or_else(|| {
                Error::mapping_not_found(group_kind.group(), group_kind.kind(), &versions)
            })?;

        debug!(
            group_kind = %group_kind,
            api_version = %mapping.resource.api_version,
            plural = %mapping.resource.plural,
            scope = ?mapping.scope,
            "resolved REST mapping"
        );

        ResourceHandle::bind(self.client.clone(), mapping, namespace)
    }
}
