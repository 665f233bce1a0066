//! Runtime configuration for the bridge

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::schema::KindSchema;
use crate::tenant::cache::CacheSettings;
use crate::tenant::watch::DEFAULT_QUEUE_CAPACITY;
use crate::tenant::TenantNaming;
use crate::{Error, DEFAULT_API_PREFIX, DEFAULT_LISTEN_ADDR};

/// Everything `serve` needs, assembled from CLI flags and environment
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the HTTP server binds
    pub listen_addr: SocketAddr,
    /// Path prefix that receives tenant resolution
    pub api_prefix: String,
    /// Location and naming of tenant ConfigMaps
    pub naming: TenantNaming,
    /// Tenant cache bounds
    pub cache: CacheSettings,
    /// Capacity of the shared watch event queue
    pub watch_queue_capacity: usize,
    /// CRD manifests registered at startup
    pub schema_files: Vec<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(DEFAULT_LISTEN_ADDR),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            naming: TenantNaming::default(),
            cache: CacheSettings::default(),
            watch_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            schema_files: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if !self.api_prefix.starts_with('/') {
            return Err(Error::Config(format!(
                "api prefix must start with '/': {}",
                self.api_prefix
            )));
        }
        if self.naming.namespace.is_empty() {
            return Err(Error::Config("config namespace must not be empty".into()));
        }
        if self.naming.settings_key.is_empty() {
            return Err(Error::Config("settings key must not be empty".into()));
        }
        if self.cache.max_tenants == 0 {
            return Err(Error::Config("cache capacity must be at least 1".into()));
        }
        if self.cache.time_to_live == Duration::ZERO {
            return Err(Error::Config("cache ttl must be positive".into()));
        }
        if self.watch_queue_capacity == 0 {
            return Err(Error::Config("watch queue capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Read and parse every configured CRD manifest
    pub async fn load_schemas(&self) -> Result<Vec<KindSchema>, Error> {
        let mut schemas = Vec::new();
        for path in &self.schema_files {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                Error::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            schemas.extend(KindSchema::from_yaml_documents(&content)?);
        }
        Ok(schemas)
    }
}
