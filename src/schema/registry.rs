//! Process-wide registry of custom resource schemas
//!
//! Registration is idempotent across processes: if another replica created
//! the CRD first, the API server's AlreadyExists response is treated as
//! success and the server's copy is recorded. Registering the same
//! group/version twice within one process is a caller error.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use super::{GroupVersion, KindSchema, RegisteredSchema};
use crate::error::is_already_exists;
use crate::Error;

/// Trait abstracting CustomResourceDefinition operations
///
/// Returns raw `kube::Error` so the registry can tell an AlreadyExists
/// conflict apart from other failures.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CrdClient: Send + Sync {
    /// Create a CRD, returning the server's copy
    async fn create(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, kube::Error>;

    /// Fetch a CRD by name
    async fn get(&self, name: &str) -> Result<CustomResourceDefinition, kube::Error>;
}

/// Real Kubernetes implementation of [`CrdClient`]
pub struct KubeCrdClient {
    client: Client,
}

impl KubeCrdClient {
    /// Create a new KubeCrdClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CrdClient for KubeCrdClient {
    async fn create(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, kube::Error> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        api.create(&PostParams::default(), crd).await
    }

    async fn get(&self, name: &str) -> Result<CustomResourceDefinition, kube::Error> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        api.get(name).await
    }
}

/// Registry of schemas accepted by the API server, keyed by group/version.
///
/// Shared across request workers via `Arc<SchemaRegistry>`. `DashMap` gives
/// per-shard read/write locking; no lock is held across the remote call.
pub struct SchemaRegistry {
    client: Arc<dyn CrdClient>,
    schemas: DashMap<GroupVersion, RegisteredSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry backed by the given CRD client
    pub fn new(client: Arc<dyn CrdClient>) -> Self {
        Self {
            client,
            schemas: DashMap::new(),
        }
    }

    /// Register a schema with the API server and record it locally.
    ///
    /// Returns whether the server reports the schema's names as accepted.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRegistered`] if this registry already holds the group/version
    /// - [`Error::Kube`] for any remote failure other than AlreadyExists
    pub async fn register(&self, schema: &KindSchema) -> Result<bool, Error> {
        let gv = schema.group_version().clone();

        if self.schemas.contains_key(&gv) {
            return Err(Error::AlreadyRegistered {
                group: gv.group().to_string(),
                version: gv.version().to_string(),
            });
        }

        let recorded = match self.client.create(schema.crd()).await {
            Ok(crd) => {
                info!(crd = %schema.name(), group_version = %gv, "registered CRD");
                RegisteredSchema::from_server(crd)
            }
            Err(e) if is_already_exists(&e) => {
                debug!(crd = %schema.name(), "CRD already exists, adopting server copy");
                self.existing(schema).await
            }
            Err(e) => return Err(e.into()),
        };

        let accepted = recorded.accepted;
        self.schemas.insert(gv, recorded);
        Ok(accepted)
    }

    /// Register a batch of schemas.
    ///
    /// Schemas already present locally are skipped. Stops at the first
    /// remote failure and returns it.
    pub async fn register_all(&self, schemas: &[KindSchema]) -> Result<usize, Error> {
        let mut registered = 0;
        for schema in schemas {
            match self.register(schema).await {
                Ok(_) => registered += 1,
                Err(Error::AlreadyRegistered { .. }) => {
                    debug!(crd = %schema.name(), "schema already registered, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(registered)
    }

    /// Look up a recorded schema
    pub fn get(&self, gv: &GroupVersion) -> Option<RegisteredSchema> {
        self.schemas.get(gv).map(|r| r.clone())
    }

    /// Whether the group/version has been registered in this process
    pub fn contains(&self, gv: &GroupVersion) -> bool {
        self.schemas.contains_key(gv)
    }

    /// Number of recorded schemas
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether no schemas have been recorded
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// All recorded group/versions, sorted
    pub fn group_versions(&self) -> Vec<GroupVersion> {
        let mut gvs: Vec<_> = self.schemas.iter().map(|e| e.key().clone()).collect();
        gvs.sort();
        gvs
    }

    /// Server copy of a CRD some other writer created first.
    async fn existing(&self, schema: &KindSchema) -> RegisteredSchema {
        match self.client.get(schema.name()).await {
            Ok(crd) => RegisteredSchema::from_server(crd),
            Err(e) => {
                warn!(
                    crd = %schema.name(),
                    error = %e,
                    "failed to fetch existing CRD, recording submitted schema"
                );
                RegisteredSchema::from_server(schema.crd().clone())
            }
        }
    }
}
